//! The pipeline execution engine.
//!
//! - [`pipeline`] and [`expression`] describe what to run
//! - [`context`] and [`root`] describe what a node sees
//! - [`brick`] and [`registry`] describe what can be run
//! - [`reducer`] runs it, [`control_flow`] and [`state`] build on the reducer

pub mod brick;
pub mod capability;
pub mod context;
pub mod control_flow;
pub mod error;
pub mod expression;
pub mod pipeline;
pub mod reducer;
pub mod registry;
pub mod root;
pub mod state;
pub mod telemetry;
pub mod validation;

/// The alias for serde_json::Value, since every value flowing through a pipeline is JSON.
pub type NodeValue = serde_json::Value;

use std::any::Any;

/// A helper trait that just provides the `as_any` method.
/// Needed so hosts can downcast their own element types back out of an [`root::ElementRef`].
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
