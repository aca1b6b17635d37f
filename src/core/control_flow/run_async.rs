use async_trait::async_trait;
use serde_json::json;
use std::iter;
use std::sync::Arc;

use crate::core::NodeValue;
use crate::core::brick::{Brick, BrickDefinition, BrickOptions, TransformerLogic};
use crate::core::control_flow::required_pipeline;
use crate::core::error::PipelineError;
use crate::core::state::AsyncStateSync;

pub const RUN_ASYNC: &str = "@mortar/run-async";

/// Runs `body` in the background, tracking its progress in the async state record
/// named by `stateKey`. Yields `{requestId}` immediately.
pub struct RunAsync;

#[async_trait]
impl TransformerLogic for RunAsync {
    async fn transform(
        &self,
        args: NodeValue,
        options: &BrickOptions,
    ) -> Result<NodeValue, PipelineError> {
        let body = required_pipeline(&args, "body")?;
        let state_key = args
            .get("stateKey")
            .and_then(NodeValue::as_str)
            .ok_or_else(|| PipelineError::invalid_pipeline("stateKey must be a string"))?;

        let sync = AsyncStateSync::new(
            Arc::clone(&options.state),
            options.meta.mod_component_id.clone(),
        );
        let frame = options.detached_frame(format!("async:{}", state_key), iter::empty());
        let dispatch = sync
            .dispatch(options.runner(), body, frame, state_key)
            .await?;

        options
            .logger
            .debug(format!("Dispatched request {} for {}", dispatch.request_id, state_key));
        Ok(json!({ "requestId": dispatch.request_id.to_string() }))
    }
}

pub fn brick() -> Brick {
    Brick::transformer(
        BrickDefinition::new(RUN_ASYNC, env!("CARGO_PKG_VERSION"))
            .input_schema(json!({
                "type": "object",
                "properties": {
                    "body": {"type": "object"},
                    "stateKey": {"type": "string", "minLength": 1}
                },
                "required": ["body", "stateKey"]
            }))
            .output_schema(json!({
                "type": "object",
                "properties": {"requestId": {"type": "string"}},
                "required": ["requestId"]
            }))
            .root_aware(),
        RunAsync,
    )
}
