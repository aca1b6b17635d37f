use async_trait::async_trait;
use futures::stream::{self, FuturesOrdered, StreamExt, TryStreamExt};
use serde_json::json;

use crate::core::NodeValue;
use crate::core::brick::{Brick, BrickDefinition, BrickOptions, TransformerLogic};
use crate::core::control_flow::{
    DEFAULT_ELEMENT_KEY, binding_key_arg, elements_arg, required_pipeline,
};
use crate::core::error::PipelineError;

pub const MAP: &str = "@mortar/map";

/// Runs `body` once per element and collects every result.
///
/// With `parallel` set, all iterations start at once; results still line up with the
/// input positions, not with completion order.
pub struct MapValues;

#[async_trait]
impl TransformerLogic for MapValues {
    async fn transform(
        &self,
        args: NodeValue,
        options: &BrickOptions,
    ) -> Result<NodeValue, PipelineError> {
        let body = required_pipeline(&args, "body")?;
        let elements = elements_arg(&args)?;
        let element_key = binding_key_arg(&args, "elementKey", DEFAULT_ELEMENT_KEY)?;
        let parallel = args
            .get("parallel")
            .and_then(NodeValue::as_bool)
            .unwrap_or(false);

        let iteration = |(index, element): (usize, NodeValue)| {
            options.run_pipeline(
                &body,
                format!("map[{}]", index),
                [(element_key.clone(), element)],
            )
        };

        let results: Vec<NodeValue> = if parallel {
            elements
                .into_iter()
                .enumerate()
                .map(iteration)
                .collect::<FuturesOrdered<_>>()
                .try_collect()
                .await?
        } else {
            stream::iter(elements.into_iter().enumerate())
                .then(|item| {
                    let started = options.ensure_not_cancelled().map(|()| iteration(item));
                    async move { started?.await }
                })
                .try_collect()
                .await?
        };
        Ok(NodeValue::Array(results))
    }
}

pub fn brick() -> Brick {
    Brick::transformer(
        BrickDefinition::new(MAP, env!("CARGO_PKG_VERSION"))
            .input_schema(json!({
                "type": "object",
                "properties": {
                    "elements": {"type": "array"},
                    "elementKey": {"type": "string"},
                    "parallel": {"type": "boolean"},
                    "body": {"type": "object"}
                },
                "required": ["elements", "body"]
            }))
            .output_schema(json!({"type": "array"}))
            .root_aware(),
        MapValues,
    )
}
