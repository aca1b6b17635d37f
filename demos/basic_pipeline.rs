//! A complete example showing how to run a declarative pipeline with Mortar.
//!
//! This example demonstrates:
//! - Defining custom bricks for each role
//! - Binding node outputs to variables and reading them back with expressions
//! - Mapping over a list with a nested pipeline
//! - Recovering from a failure with try/except
//! - Dispatching a background run that reports into shared state

use async_trait::async_trait;
use mortar::control_flow::{MAP, RUN_ASYNC, TRY_EXCEPT};
use mortar::prelude::*;
use mortar::{AsyncStateSync, MemoryStateStore, mustache};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Step 1: A transformer that scores a product review
// ============================================================================

struct ScoreReview;

#[async_trait]
impl TransformerLogic for ScoreReview {
    async fn transform(
        &self,
        args: NodeValue,
        _options: &BrickOptions,
    ) -> Result<NodeValue, PipelineError> {
        let text = args["text"].as_str().unwrap_or_default().to_lowercase();
        let score = ["great", "love", "fast"]
            .iter()
            .filter(|word| text.contains(*word))
            .count() as i64
            - ["slow", "broken"]
                .iter()
                .filter(|word| text.contains(*word))
                .count() as i64;
        Ok(json!(score))
    }
}

// ============================================================================
// Step 2: An effect that prints, standing in for a notification
// ============================================================================

struct Notify;

#[async_trait]
impl EffectLogic for Notify {
    async fn effect(&self, args: NodeValue, options: &BrickOptions) -> Result<(), PipelineError> {
        options.logger.info(format!("notify: {}", args["message"]));
        println!("[Notify] {}", args["message"].as_str().unwrap_or_default());
        Ok(())
    }
}

// ============================================================================
// Step 3: A reader that always fails, to show try/except
// ============================================================================

struct FlakyInventory;

#[async_trait]
impl ReaderLogic for FlakyInventory {
    async fn read(&self, _args: NodeValue, _options: &BrickOptions) -> Result<NodeValue, PipelineError> {
        Err(PipelineError::business("Inventory service is not configured"))
    }
}

#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    println!("=== Mortar Basic Pipeline Example ===\n");

    let registry = BrickRegistry::new();
    registry.register([
        Brick::transformer(
            BrickDefinition::new("@demo/score", "1.0.0").pure(),
            ScoreReview,
        ),
        Brick::effect(BrickDefinition::new("@demo/notify", "1.0.0"), Notify),
        Brick::reader(
            BrickDefinition::new("@demo/inventory", "1.0.0").requires(Capability::Network),
            FlakyInventory,
        ),
    ]);
    register_control_flow_bricks(&registry);

    let store = Arc::new(MemoryStateStore::new());
    let reducer = Reducer::new(registry).with_state_store(store.clone());

    let score_each = Pipeline::default()
        .then(PipelineNode::new("@demo/score").config("text", var("@review")));
    let score_headline = Pipeline::default()
        .then(PipelineNode::new("@demo/score").config("text", var("@input.review")));
    let check_stock = Pipeline::default().then(PipelineNode::new("@demo/inventory"));
    let explain = Pipeline::default().then(
        PipelineNode::new("@demo/notify")
            .config("message", mustache("Skipped stock check: {{ error.message }}")),
    );

    let pipeline = Pipeline::default()
        .then(
            PipelineNode::new(MAP)
                .config("elements", var("@input.reviews"))
                .config("elementKey", "review")
                .config("parallel", true)
                .config("body", pipeline(score_each))
                .output_key("scores"),
        )
        .then(
            PipelineNode::new(TRY_EXCEPT)
                .config("try", pipeline(check_stock))
                .config("except", pipeline(explain)),
        )
        .then(
            PipelineNode::new(RUN_ASYNC)
                .config("body", pipeline(score_headline))
                .config("stateKey", "latestScore"),
        )
        .then(
            PipelineNode::new("@demo/notify")
                .config("message", mustache("Scores for {{ input.product }}: {{ scores }}")),
        );

    let input = json!({
        "product": "kettle",
        "review": "Great kettle, love it",
        "reviews": ["Great kettle, love it", "Arrived broken", "Fast but slow to boil"]
    });

    let validation = reducer.validate(&pipeline, vec!["@input".to_string()]);
    validation.log_summary();

    let meta = RunMetadata::new("demo-component");
    let result = reducer
        .run(&pipeline, ExecutionContext::from_input(input), &RunOptions::new(meta))
        .await;
    if let Err(e) = &result {
        println!("Run failed: {}", e.user_facing());
    }

    // Give the background run a moment, then look at what it reported.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let state = AsyncStateSync::new(store, "demo-component")
        .read("latestScore")
        .await?;
    println!("\nBackground state: {:?}", state);

    result.map(|_| ())
}
