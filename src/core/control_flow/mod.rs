//! The control-flow bricks: ordinary bricks whose config holds nested pipelines.
//!
//! Each one resolves its own arguments like any other brick, then calls back into the
//! reducer through [`BrickOptions::run_pipeline`](crate::core::brick::BrickOptions::run_pipeline)
//! with extra bindings layered on its context.

pub mod for_each;
pub mod map_values;
pub mod run;
pub mod run_async;
pub mod try_except;

use crate::core::NodeValue;
use crate::core::error::PipelineError;
use crate::core::expression::Expression;
use crate::core::pipeline::{Pipeline, check_output_key, context_key};
use crate::core::registry::BrickRegistry;

pub use for_each::FOR_EACH;
pub use map_values::MAP;
pub use run::RUN;
pub use run_async::RUN_ASYNC;
pub use try_except::TRY_EXCEPT;

pub const DEFAULT_ELEMENT_KEY: &str = "element";
pub const DEFAULT_ERROR_KEY: &str = "error";

/// Installs every control-flow brick into `registry`.
pub fn register_control_flow_bricks(registry: &BrickRegistry) {
    registry.register([
        for_each::brick(),
        map_values::brick(),
        try_except::brick(),
        run::brick(),
        run_async::brick(),
    ]);
}

/// Reads a pipeline expression argument. Absent or null fields yield `None`.
pub fn pipeline_arg(args: &NodeValue, field: &str) -> Result<Option<Pipeline>, PipelineError> {
    match args.get(field) {
        None | Some(NodeValue::Null) => Ok(None),
        Some(value) => match Expression::parse(value)? {
            Some(Expression::Pipeline(pipeline)) => Ok(Some(pipeline)),
            _ => Err(PipelineError::invalid_pipeline(format!(
                "field '{}' must be a pipeline expression",
                field
            ))),
        },
    }
}

pub(crate) fn required_pipeline(args: &NodeValue, field: &str) -> Result<Pipeline, PipelineError> {
    pipeline_arg(args, field)?.ok_or_else(|| {
        PipelineError::invalid_pipeline(format!("missing pipeline field '{}'", field))
    })
}

/// Reads the name a nested frame binds a value under. Same rules as an output key.
pub(crate) fn binding_key_arg(
    args: &NodeValue,
    field: &str,
    default: &str,
) -> Result<String, PipelineError> {
    let key = args.get(field).and_then(NodeValue::as_str).unwrap_or(default);
    binding_key(field, key)?;
    Ok(key.to_string())
}

fn binding_key(field: &str, key: &str) -> Result<String, PipelineError> {
    check_output_key(key).map_err(|_| {
        PipelineError::invalid_pipeline(format!(
            "{} '{}' must be an identifier that does not shadow a reserved key",
            field, key
        ))
    })?;
    Ok(context_key(key))
}

pub(crate) fn elements_arg(args: &NodeValue) -> Result<Vec<NodeValue>, PipelineError> {
    match args.get("elements") {
        Some(NodeValue::Array(items)) => Ok(items.clone()),
        other => Err(PipelineError::business(format!(
            "expected a list of elements, got {}",
            other.unwrap_or(&NodeValue::Null)
        ))),
    }
}

/// The context keys a control-flow brick binds for the nested pipeline in `field`.
///
/// Fails when the configured binding name could not be bound at run time.
pub fn frame_bindings(
    brick_id: &str,
    config: &serde_json::Map<String, NodeValue>,
    field: &str,
) -> Result<Vec<String>, PipelineError> {
    let literal = |key: &str, default: &str| {
        let name = config.get(key).and_then(NodeValue::as_str).unwrap_or(default);
        binding_key(key, name).map(|bound| vec![bound])
    };
    match (brick_id, field) {
        (FOR_EACH | MAP, "body") => literal("elementKey", DEFAULT_ELEMENT_KEY),
        (TRY_EXCEPT, "except") => literal("errorKey", DEFAULT_ERROR_KEY),
        _ => Ok(Vec::new()),
    }
}
