use async_trait::async_trait;
use serde_json::json;
use std::iter;

use crate::core::NodeValue;
use crate::core::brick::{Brick, BrickDefinition, BrickOptions, TransformerLogic};
use crate::core::control_flow::{
    DEFAULT_ERROR_KEY, binding_key_arg, pipeline_arg, required_pipeline,
};
use crate::core::error::PipelineError;

pub const TRY_EXCEPT: &str = "@mortar/try-except";

/// Runs `try`; if it fails, runs `except` with the serialized error bound under `errorKey`.
///
/// Without an `except` body the failure is swallowed and the brick yields null, the same
/// value a node with no output produces. Failures inside `except` propagate.
pub struct TryExcept;

#[async_trait]
impl TransformerLogic for TryExcept {
    async fn transform(
        &self,
        args: NodeValue,
        options: &BrickOptions,
    ) -> Result<NodeValue, PipelineError> {
        let try_body = required_pipeline(&args, "try")?;
        let except_body = pipeline_arg(&args, "except")?;
        let error_key = binding_key_arg(&args, "errorKey", DEFAULT_ERROR_KEY)?;

        let error = match options.run_pipeline(&try_body, "try", iter::empty()).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        options
            .logger
            .debug(format!("Caught {}: {}", error.name(), error));
        match except_body {
            Some(except_body) => {
                options
                    .run_pipeline(&except_body, "except", [(error_key, error.to_value())])
                    .await
            }
            None => Ok(NodeValue::Null),
        }
    }
}

pub fn brick() -> Brick {
    Brick::transformer(
        BrickDefinition::new(TRY_EXCEPT, env!("CARGO_PKG_VERSION"))
            .input_schema(json!({
                "type": "object",
                "properties": {
                    "try": {"type": "object"},
                    "except": {"type": ["object", "null"]},
                    "errorKey": {"type": "string"}
                },
                "required": ["try"]
            }))
            .root_aware(),
        TryExcept,
    )
}
