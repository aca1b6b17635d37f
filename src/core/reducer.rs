//! The pipeline interpreter.
//!
//! Each node goes through the same cycle, strictly one node at a time:
//! resolve root, resolve inputs, validate, check capabilities, dispatch, bind.
//! A failure at any step propagates to the caller unchanged; only the try/except
//! brick intercepts failures, and only from its own try body.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::NodeValue;
use crate::core::brick::{Brick, BrickLogger, BrickLogic, BrickOptions, BrickRole};
use crate::core::capability::{CapabilityProvider, StaticCapabilities};
use crate::core::context::{ExecutionContext, RunMetadata};
use crate::core::error::PipelineError;
use crate::core::expression::resolve_config;
use crate::core::pipeline::{Pipeline, PipelineNode};
use crate::core::registry::BrickRegistry;
use crate::core::root::{
    DocumentHost, ElementHandles, MemoryElementHandles, NullDocument, Root, resolve_root,
};
use crate::core::state::{AsyncDispatch, AsyncStateSync, MemoryStateStore, StateStore};
use crate::core::telemetry::{Telemetry, TraceEntry};
use crate::core::validation::{ValidationResult, check_output, validate_input, validate_pipeline};

/// One pipeline frame: the context, root and run identity a pipeline runs under.
#[derive(Debug, Clone)]
pub struct RunFrame {
    /// Label for logs and traces, e.g. `root` or `for-each[2]`.
    pub label: String,
    pub ctx: ExecutionContext,
    pub root: Root,
    pub meta: RunMetadata,
    pub abort: CancellationToken,
}

/// The capability control-flow bricks receive to run their nested pipelines.
///
/// Handing bricks this instead of the reducer itself keeps re-entrancy explicit and
/// lets bricks be tested against a fake runner.
pub trait PipelineRunner: Send + Sync {
    fn run_pipeline(
        &self,
        pipeline: Pipeline,
        frame: RunFrame,
    ) -> BoxFuture<'static, Result<NodeValue, PipelineError>>;
}

/// Per-invocation options for a top-level run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub meta: RunMetadata,
    pub abort: CancellationToken,
    pub root: Root,
}

impl RunOptions {
    pub fn new(meta: RunMetadata) -> Self {
        Self {
            meta,
            abort: CancellationToken::new(),
            root: Root::Document,
        }
    }

    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    pub fn with_root(mut self, root: Root) -> Self {
        self.root = root;
        self
    }
}

#[derive(Clone)]
struct ReducerInner {
    registry: BrickRegistry,
    document: Arc<dyn DocumentHost>,
    handles: Arc<dyn ElementHandles>,
    capabilities: Arc<dyn CapabilityProvider>,
    telemetry: Option<Arc<dyn Telemetry>>,
    state: Arc<dyn StateStore>,
}

/// Walks pipelines node by node. Cheap to clone; clones share collaborators.
#[derive(Clone)]
pub struct Reducer {
    inner: Arc<ReducerInner>,
}

impl Reducer {
    /// A reducer with no document, no capabilities and an in-memory state store.
    pub fn new(registry: BrickRegistry) -> Self {
        Reducer {
            inner: Arc::new(ReducerInner {
                registry,
                document: Arc::new(NullDocument),
                handles: Arc::new(MemoryElementHandles::new()),
                capabilities: Arc::new(StaticCapabilities::none()),
                telemetry: None,
                state: Arc::new(MemoryStateStore::new()),
            }),
        }
    }

    pub fn with_document(mut self, document: Arc<dyn DocumentHost>) -> Self {
        Arc::make_mut(&mut self.inner).document = document;
        self
    }

    pub fn with_element_handles(mut self, handles: Arc<dyn ElementHandles>) -> Self {
        Arc::make_mut(&mut self.inner).handles = handles;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Arc<dyn CapabilityProvider>) -> Self {
        Arc::make_mut(&mut self.inner).capabilities = capabilities;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        Arc::make_mut(&mut self.inner).telemetry = Some(telemetry);
        self
    }

    pub fn with_state_store(mut self, state: Arc<dyn StateStore>) -> Self {
        Arc::make_mut(&mut self.inner).state = state;
        self
    }

    pub fn registry(&self) -> &BrickRegistry {
        &self.inner.registry
    }

    pub fn state_store(&self) -> Arc<dyn StateStore> {
        Arc::clone(&self.inner.state)
    }

    /// Statically validates a pipeline against this reducer's registry.
    pub fn validate(&self, pipeline: &Pipeline, initial_keys: Vec<String>) -> ValidationResult {
        validate_pipeline(pipeline, &self.inner.registry, initial_keys)
    }

    /// Runs a pipeline to completion and returns the output of its last node.
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        ctx: ExecutionContext,
        options: &RunOptions,
    ) -> Result<NodeValue, PipelineError> {
        let frame = RunFrame {
            label: "root".to_string(),
            ctx,
            root: options.root.clone(),
            meta: options.meta.clone(),
            abort: options.abort.clone(),
        };

        log::info!(
            "Starting run {} for {} ({} nodes)",
            frame.meta.run_id,
            frame.meta.mod_component_id,
            pipeline.len()
        );
        let result = self.reduce(pipeline.clone(), frame).await;
        match &result {
            Ok(_) => log::info!("Run {} completed", options.meta.run_id),
            Err(e) => log::error!("Run {} failed: {}", options.meta.run_id, e),
        }
        if let Some(telemetry) = &self.inner.telemetry {
            telemetry.flush();
        }
        result
    }

    /// Runs `body` in the background and tracks it in the async state record `state_key`.
    pub async fn dispatch_async(
        &self,
        body: Pipeline,
        state_key: &str,
        ctx: ExecutionContext,
        options: &RunOptions,
    ) -> Result<AsyncDispatch, PipelineError> {
        let frame = RunFrame {
            label: format!("async:{}", state_key),
            ctx,
            root: options.root.clone(),
            meta: options.meta.clone(),
            abort: CancellationToken::new(),
        };
        let sync = AsyncStateSync::new(self.state_store(), options.meta.mod_component_id.clone());
        let runner: Arc<dyn PipelineRunner> = Arc::new(self.clone());
        sync.dispatch(runner, body, frame, state_key).await
    }

    async fn reduce(&self, pipeline: Pipeline, frame: RunFrame) -> Result<NodeValue, PipelineError> {
        pipeline.check_shape()?;
        log::debug!(
            "Entering frame {} of run {} ({} nodes)",
            frame.label,
            frame.meta.run_id,
            pipeline.len()
        );

        let mut ctx = frame.ctx.clone();
        let mut output = NodeValue::Null;
        for (index, node) in pipeline.iter().enumerate() {
            let (result, role) = self.reduce_node(index, node, &ctx, &frame).await?;
            ctx = match (&node.output_key, role) {
                (Some(key), _) => ctx.with_output(Some(key.as_str()), result.clone()),
                // Effects return nothing meaningful, so the current value survives them.
                (None, BrickRole::Effect) => ctx,
                (None, _) => ctx.with_current(result.clone()),
            };
            output = result;
        }
        Ok(output)
    }

    async fn reduce_node(
        &self,
        index: usize,
        node: &PipelineNode,
        ctx: &ExecutionContext,
        frame: &RunFrame,
    ) -> Result<(NodeValue, BrickRole), PipelineError> {
        let label = node.label(index);
        if frame.abort.is_cancelled() {
            log::debug!("Run {} aborted before node {}", frame.meta.run_id, label);
            return Err(PipelineError::Cancelled(format!(
                "run {} was aborted before node {}",
                frame.meta.run_id, label
            )));
        }

        let brick = self.inner.registry.lookup(&node.id)?;
        let started = Instant::now();
        let result = self.invoke(&brick, node, &label, ctx, frame).await;
        self.trace(&brick, &label, frame, started, result.as_ref().err());

        match &result {
            Ok(_) => log::debug!("Node {} ({}) bound", label, brick.id()),
            Err(e) => log::debug!("Node {} ({}) failed: {}", label, brick.id(), e),
        }
        result.map(|value| (value, brick.role()))
    }

    async fn invoke(
        &self,
        brick: &Brick,
        node: &PipelineNode,
        label: &str,
        ctx: &ExecutionContext,
        frame: &RunFrame,
    ) -> Result<NodeValue, PipelineError> {
        let definition = &brick.definition;

        let root = resolve_root(
            node.root_mode.unwrap_or_default(),
            node.root.as_deref(),
            &frame.root,
            self.inner.document.as_ref(),
            self.inner.handles.as_ref(),
        )?;

        let args = resolve_config(&node.config, ctx)?;
        validate_input(definition, &args)?;

        if let Some(missing) = definition
            .capabilities
            .iter()
            .find(|capability| !self.inner.capabilities.is_available(**capability))
        {
            return Err(PipelineError::business(format!(
                "Brick {} requires the '{}' capability, which is not available here",
                definition.id, missing
            )));
        }

        let options = BrickOptions {
            root: if definition.root_aware { root } else { Root::Document },
            ctx: ctx.clone(),
            meta: frame.meta.clone(),
            abort: frame.abort.clone(),
            logger: BrickLogger::new(&definition.id, label, frame.meta.run_id),
            state: Arc::clone(&self.inner.state),
            runner: Arc::new(self.clone()),
        };

        let output = match &brick.logic {
            BrickLogic::Reader(logic) => logic.read(args, &options).await?,
            BrickLogic::Transformer(logic) => logic.transform(args, &options).await?,
            BrickLogic::Effect(logic) => {
                logic.effect(args, &options).await?;
                NodeValue::Null
            }
            BrickLogic::Renderer(logic) => logic.render(args, &options).await?,
        };

        let violations = check_output(definition, &output);
        if !violations.is_empty() {
            log::warn!(
                "Brick {} returned output that does not match its schema: {:?}",
                definition.id,
                violations
            );
        }
        Ok(output)
    }

    fn trace(
        &self,
        brick: &Brick,
        label: &str,
        frame: &RunFrame,
        started: Instant,
        error: Option<&PipelineError>,
    ) {
        let Some(telemetry) = &self.inner.telemetry else {
            return;
        };
        let mut metadata = HashMap::new();
        metadata.insert("role".to_string(), brick.role().to_string());
        metadata.insert("version".to_string(), brick.version().to_string());
        telemetry.record(TraceEntry {
            timestamp: chrono::Utc::now(),
            run_id: frame.meta.run_id,
            frame: frame.label.clone(),
            brick_id: brick.id().to_string(),
            node_id: label.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            error: error.map(ToString::to_string),
            metadata,
        });
    }
}

impl PipelineRunner for Reducer {
    fn run_pipeline(
        &self,
        pipeline: Pipeline,
        frame: RunFrame,
    ) -> BoxFuture<'static, Result<NodeValue, PipelineError>> {
        let reducer = self.clone();
        Box::pin(async move { reducer.reduce(pipeline, frame).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::brick::{BrickDefinition, EffectLogic, TransformerLogic};
    use crate::core::capability::Capability;
    use crate::core::expression::var;
    use crate::core::telemetry::MemoryTelemetry;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Returns `value` from its args, recording the context keys it saw.
    struct Capture {
        seen: Arc<Mutex<Vec<Vec<String>>>>,
    }

    #[async_trait]
    impl TransformerLogic for Capture {
        async fn transform(
            &self,
            args: NodeValue,
            options: &BrickOptions,
        ) -> Result<NodeValue, PipelineError> {
            let mut keys: Vec<String> = options.ctx.keys().cloned().collect();
            keys.sort();
            self.seen.lock().unwrap().push(keys);
            Ok(args["value"].clone())
        }
    }

    struct Noop;

    #[async_trait]
    impl EffectLogic for Noop {
        async fn effect(
            &self,
            _args: NodeValue,
            _options: &BrickOptions,
        ) -> Result<(), PipelineError> {
            Ok(())
        }
    }

    fn reducer(seen: Arc<Mutex<Vec<Vec<String>>>>) -> Reducer {
        let registry = BrickRegistry::new();
        registry.register([
            Brick::transformer(BrickDefinition::new("@test/capture", "1.0.0"), Capture { seen }),
            Brick::effect(BrickDefinition::new("@test/noop", "1.0.0"), Noop),
            Brick::effect(
                BrickDefinition::new("@test/net", "1.0.0").requires(Capability::Network),
                Noop,
            ),
            Brick::transformer(
                BrickDefinition::new("@test/strict", "1.0.0").input_schema(json!({
                    "type": "object",
                    "properties": {"value": {"type": "number"}},
                    "required": ["value"]
                })),
                Capture {
                    seen: Arc::new(Mutex::new(Vec::new())),
                },
            ),
        ]);
        Reducer::new(registry)
    }

    fn options() -> RunOptions {
        RunOptions::new(RunMetadata::new("component-1"))
    }

    #[tokio::test]
    async fn test_output_keys_thread_forward() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::default()
            .then(PipelineNode::new("@test/capture").config("value", 1).output_key("a"))
            .then(PipelineNode::new("@test/capture").config("value", var("@a")).output_key("b"))
            .then(PipelineNode::new("@test/capture").config("value", var("@b")));

        let out = reducer(seen.clone())
            .run(&pipeline, ExecutionContext::new(), &options())
            .await
            .unwrap();

        assert_eq!(out, json!(1));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], Vec::<String>::new());
        assert_eq!(seen[1], vec!["@a"]);
        assert_eq!(seen[2], vec!["@a", "@b"]);
    }

    #[tokio::test]
    async fn test_untagged_output_becomes_current_value() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::default()
            .then(PipelineNode::new("@test/capture").config("value", "first"))
            .then(PipelineNode::new("@test/noop"))
            .then(PipelineNode::new("@test/capture").config("value", var("@")));

        let out = reducer(seen)
            .run(&pipeline, ExecutionContext::new(), &options())
            .await
            .unwrap();
        assert_eq!(out, json!("first"));
    }

    #[tokio::test]
    async fn test_input_validation_failure() {
        let pipeline =
            Pipeline::default().then(PipelineNode::new("@test/strict").config("value", "nan"));
        let err = reducer(Arc::new(Mutex::new(Vec::new())))
            .run(&pipeline, ExecutionContext::new(), &options())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InputValidation { .. }));
    }

    #[tokio::test]
    async fn test_missing_capability_fails_before_invocation() {
        let pipeline = Pipeline::default().then(PipelineNode::new("@test/net"));
        let reducer = reducer(Arc::new(Mutex::new(Vec::new())));

        let err = reducer
            .run(&pipeline, ExecutionContext::new(), &options())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Business(_)));
        assert!(err.to_string().contains("network"));

        let allowed = reducer.with_capabilities(Arc::new(StaticCapabilities::new([
            Capability::Network,
        ])));
        assert!(
            allowed
                .run(&pipeline, ExecutionContext::new(), &options())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_unknown_brick() {
        let pipeline = Pipeline::default().then(PipelineNode::new("@test/nope"));
        let err = reducer(Arc::new(Mutex::new(Vec::new())))
            .run(&pipeline, ExecutionContext::new(), &options())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_abort_stops_before_next_node() {
        let abort = CancellationToken::new();
        abort.cancel();
        let pipeline = Pipeline::default().then(PipelineNode::new("@test/noop"));
        let err = reducer(Arc::new(Mutex::new(Vec::new())))
            .run(
                &pipeline,
                ExecutionContext::new(),
                &options().with_abort(abort),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_telemetry_records_each_node() {
        let telemetry = Arc::new(MemoryTelemetry::new());
        let pipeline = Pipeline::default()
            .then(PipelineNode::new("@test/noop").instance_id("first"))
            .then(PipelineNode::new("@test/strict").instance_id("second"));

        let reducer =
            reducer(Arc::new(Mutex::new(Vec::new()))).with_telemetry(telemetry.clone());
        let _ = reducer
            .run(&pipeline, ExecutionContext::new(), &options())
            .await;

        let traces = telemetry.get_traces();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].node_id, "first");
        assert!(traces[0].error.is_none());
        assert_eq!(traces[1].node_id, "second");
        assert!(traces[1].error.is_some());
    }
}
