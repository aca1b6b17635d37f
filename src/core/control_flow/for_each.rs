use async_trait::async_trait;
use serde_json::json;

use crate::core::NodeValue;
use crate::core::brick::{Brick, BrickDefinition, BrickOptions, TransformerLogic};
use crate::core::control_flow::{
    DEFAULT_ELEMENT_KEY, binding_key_arg, elements_arg, required_pipeline,
};
use crate::core::error::PipelineError;

pub const FOR_EACH: &str = "@mortar/for-each";

/// Runs `body` once per element, in order. Yields the last iteration's result.
pub struct ForEach;

#[async_trait]
impl TransformerLogic for ForEach {
    async fn transform(
        &self,
        args: NodeValue,
        options: &BrickOptions,
    ) -> Result<NodeValue, PipelineError> {
        let body = required_pipeline(&args, "body")?;
        let elements = elements_arg(&args)?;
        let element_key = binding_key_arg(&args, "elementKey", DEFAULT_ELEMENT_KEY)?;

        let mut last = NodeValue::Null;
        for (index, element) in elements.into_iter().enumerate() {
            options.ensure_not_cancelled()?;
            last = options
                .run_pipeline(
                    &body,
                    format!("for-each[{}]", index),
                    [(element_key.clone(), element)],
                )
                .await?;
        }
        Ok(last)
    }
}

pub fn brick() -> Brick {
    Brick::transformer(
        BrickDefinition::new(FOR_EACH, env!("CARGO_PKG_VERSION"))
            .input_schema(json!({
                "type": "object",
                "properties": {
                    "elements": {"type": "array"},
                    "elementKey": {"type": "string"},
                    "body": {"type": "object"}
                },
                "required": ["elements", "body"]
            }))
            .root_aware(),
        ForEach,
    )
}
