use async_trait::async_trait;
use serde_json::json;
use std::iter;

use crate::core::NodeValue;
use crate::core::brick::{Brick, BrickDefinition, BrickOptions, TransformerLogic};
use crate::core::control_flow::required_pipeline;
use crate::core::error::PipelineError;

pub const RUN: &str = "@mortar/run";

/// Runs `body` as a sub-pipeline.
///
/// With `async` set the body is spawned detached and the brick yields null right away.
/// A detached body has its own abort signal and its failures only reach the log.
pub struct Run;

#[async_trait]
impl TransformerLogic for Run {
    async fn transform(
        &self,
        args: NodeValue,
        options: &BrickOptions,
    ) -> Result<NodeValue, PipelineError> {
        let body = required_pipeline(&args, "body")?;
        let detached = args
            .get("async")
            .and_then(NodeValue::as_bool)
            .unwrap_or(false);

        if !detached {
            return options.run_pipeline(&body, "run", iter::empty()).await;
        }

        let frame = options.detached_frame("run:detached", iter::empty());
        let runner = options.runner();
        let logger = options.logger.clone();
        tokio::spawn(async move {
            match runner.run_pipeline(body, frame).await {
                Ok(_) => logger.debug("Detached run finished"),
                Err(e) => logger.error(format!("Detached run failed: {}", e)),
            }
        });
        Ok(NodeValue::Null)
    }
}

pub fn brick() -> Brick {
    Brick::transformer(
        BrickDefinition::new(RUN, env!("CARGO_PKG_VERSION"))
            .input_schema(json!({
                "type": "object",
                "properties": {
                    "body": {"type": "object"},
                    "async": {"type": "boolean"}
                },
                "required": ["body"]
            }))
            .root_aware(),
        Run,
    )
}
