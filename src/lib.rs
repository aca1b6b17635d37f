//! # Mortar
//!
//! An interpreter for declarative, JSON-serializable pipelines of "bricks".
//!
//! A pipeline is an ordered list of nodes. Each node names a brick, carries a config
//! whose fields may be expressions over the running context, and optionally binds its
//! output to a named variable for later nodes. The [`Reducer`] walks a pipeline one
//! node at a time; control-flow bricks run nested pipelines through it.
//!
//! ## Features
//!
//! - **Variable binding**: `@name.path[0]` references and minijinja templates resolved per node
//! - **Root targeting**: nodes operate on the document or on one element selected for them
//! - **Capability checks**: bricks declare what platform features they need
//! - **Control flow**: loops, mapping (sequential or parallel), try/except and sub-runs
//! - **Async state**: background runs report into shared state, fenced by request id
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mortar::prelude::*;
//! use serde_json::json;
//!
//! struct Shout;
//!
//! #[async_trait::async_trait]
//! impl TransformerLogic for Shout {
//!     async fn transform(&self, args: NodeValue, _options: &BrickOptions) -> Result<NodeValue, PipelineError> {
//!         Ok(json!(args["text"].as_str().unwrap_or_default().to_uppercase()))
//!     }
//! }
//!
//! # async fn demo() -> Result<(), PipelineError> {
//! let registry = BrickRegistry::new();
//! registry.register([Brick::transformer(BrickDefinition::new("@demo/shout", "1.0.0"), Shout)]);
//! register_control_flow_bricks(&registry);
//!
//! let pipeline = Pipeline::default()
//!     .then(PipelineNode::new("@demo/shout").config("text", var("@input.name")));
//!
//! let reducer = Reducer::new(registry);
//! let out = reducer
//!     .run(
//!         &pipeline,
//!         ExecutionContext::from_input(json!({"name": "mortar"})),
//!         &RunOptions::new(RunMetadata::new("demo")),
//!     )
//!     .await?;
//! assert_eq!(out, json!("MORTAR"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`control_flow`]: the built-in control-flow bricks
//! - [`prelude`]: Commonly used types and traits (import with `use mortar::prelude::*`)

// ============================================================================
// Core Module
// ============================================================================

mod core;

// ============================================================================
// Public Re-exports - Granular Imports
// ============================================================================

// Values and errors
pub use crate::core::NodeValue;
pub use crate::core::AsAny;
pub use crate::core::error::{ErrorKind, PipelineError, SchemaViolation, UserFacingError};

// Pipeline description
pub use crate::core::expression::{
    Expression, PathSegment, TemplateEngine, VarPath, mustache, nunjucks, pipeline, resolve,
    resolve_config, var,
};
pub use crate::core::pipeline::{Pipeline, PipelineNode, RESERVED_KEYS, RootMode};

// Context and roots
pub use crate::core::context::{ExecutionContext, RunMetadata};
pub use crate::core::root::{
    DocumentHost, ElementHandles, ElementNode, ElementRef, MemoryElementHandles, NullDocument,
    Root, downcast_element, resolve_root,
};

// Bricks
pub use crate::core::brick::{
    Brick, BrickDefinition, BrickLogger, BrickLogic, BrickOptions, BrickRole, EffectLogic,
    ReaderLogic, RendererLogic, TransformerLogic,
};
pub use crate::core::capability::{Capability, CapabilityProvider, StaticCapabilities};
pub use crate::core::registry::BrickRegistry;

// Execution
pub use crate::core::reducer::{PipelineRunner, Reducer, RunFrame, RunOptions};
pub use crate::core::state::{
    AsyncCompletion, AsyncDispatch, AsyncStateSync, AsyncTaskState, MemoryStateStore, StateStore,
};
pub use crate::core::telemetry::{LogTelemetry, MemoryTelemetry, Telemetry, TraceEntry};
pub use crate::core::validation::{
    ValidationIssue, ValidationResult, validate_input, validate_pipeline, validate_schema,
};

// Control flow
pub use crate::core::control_flow;
pub use crate::core::control_flow::register_control_flow_bricks;

// ============================================================================
// Prelude Module - Convenient Bulk Imports
// ============================================================================

/// The main prelude: imports everything needed to define bricks and run pipelines.
///
/// # Example
/// ```rust
/// use mortar::prelude::*;
/// ```
pub mod prelude {
    pub use super::{
        // Bricks
        Brick,
        BrickDefinition,
        BrickOptions,
        BrickRegistry,
        Capability,
        EffectLogic,
        // Context
        ExecutionContext,
        NodeValue,
        // Pipelines
        Pipeline,
        PipelineError,
        PipelineNode,
        ReaderLogic,
        // Execution
        Reducer,
        RendererLogic,
        Root,
        RootMode,
        RunMetadata,
        RunOptions,
        TransformerLogic,
        pipeline,
        register_control_flow_bricks,
        var,
    };
}

// ============================================================================
// Re-export commonly used external types for convenience
// ============================================================================

pub use serde_json::Value as JsonValue;
pub use tokio_util::sync::CancellationToken;

// ============================================================================
// Library Metadata
// ============================================================================

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The name of this crate.
pub const NAME: &str = env!("CARGO_PKG_NAME");
