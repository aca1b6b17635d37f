use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::NodeValue;
use crate::core::capability::Capability;
use crate::core::context::{ExecutionContext, RunMetadata};
use crate::core::error::PipelineError;
use crate::core::pipeline::Pipeline;
use crate::core::reducer::{PipelineRunner, RunFrame};
use crate::core::root::Root;
use crate::core::state::StateStore;

/// What a brick declares about itself.
#[derive(Debug, Clone)]
pub struct BrickDefinition {
    /// Stable identifier, e.g. `@mortar/for-each`.
    pub id: String,
    /// Semantic version of the implementation.
    pub version: String,
    /// JSON Schema the resolved arguments must satisfy.
    pub input_schema: NodeValue,
    pub output_schema: Option<NodeValue>,
    /// No observable side effects and deterministic for an identical context.
    pub pure: bool,
    /// Consumes the resolved root rather than always operating on the document.
    pub root_aware: bool,
    pub capabilities: Vec<Capability>,
}

impl BrickDefinition {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            input_schema: json!({ "type": "object" }),
            output_schema: None,
            pure: false,
            root_aware: false,
            capabilities: Vec::new(),
        }
    }

    pub fn input_schema(mut self, schema: NodeValue) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn output_schema(mut self, schema: NodeValue) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn pure(mut self) -> Self {
        self.pure = true;
        self
    }

    pub fn root_aware(mut self) -> Self {
        self.root_aware = true;
        self
    }

    pub fn requires(mut self, capability: Capability) -> Self {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrickRole {
    Reader,
    Transformer,
    Effect,
    Renderer,
}

impl fmt::Display for BrickRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BrickRole::Reader => "reader",
            BrickRole::Transformer => "transformer",
            BrickRole::Effect => "effect",
            BrickRole::Renderer => "renderer",
        };
        f.write_str(name)
    }
}

/// Extracts data without mutating anything.
#[async_trait]
pub trait ReaderLogic: Send + Sync + 'static {
    async fn read(&self, args: NodeValue, options: &BrickOptions)
    -> Result<NodeValue, PipelineError>;
}

/// Turns its arguments into a value.
#[async_trait]
pub trait TransformerLogic: Send + Sync + 'static {
    async fn transform(
        &self,
        args: NodeValue,
        options: &BrickOptions,
    ) -> Result<NodeValue, PipelineError>;
}

/// Mutates the outside world and returns nothing meaningful.
#[async_trait]
pub trait EffectLogic: Send + Sync + 'static {
    async fn effect(&self, args: NodeValue, options: &BrickOptions) -> Result<(), PipelineError>;
}

/// Produces a display payload.
#[async_trait]
pub trait RendererLogic: Send + Sync + 'static {
    async fn render(
        &self,
        args: NodeValue,
        options: &BrickOptions,
    ) -> Result<NodeValue, PipelineError>;
}

/// The closed set of brick roles. The reducer matches on it exhaustively.
pub enum BrickLogic {
    Reader(Box<dyn ReaderLogic>),
    Transformer(Box<dyn TransformerLogic>),
    Effect(Box<dyn EffectLogic>),
    Renderer(Box<dyn RendererLogic>),
}

impl BrickLogic {
    pub fn role(&self) -> BrickRole {
        match self {
            BrickLogic::Reader(_) => BrickRole::Reader,
            BrickLogic::Transformer(_) => BrickRole::Transformer,
            BrickLogic::Effect(_) => BrickRole::Effect,
            BrickLogic::Renderer(_) => BrickRole::Renderer,
        }
    }
}

/// A capability-tagged unit of behavior.
pub struct Brick {
    pub definition: BrickDefinition,
    pub logic: BrickLogic,
}

impl Brick {
    pub fn reader<L: ReaderLogic>(definition: BrickDefinition, logic: L) -> Self {
        Self {
            definition,
            logic: BrickLogic::Reader(Box::new(logic)),
        }
    }

    pub fn transformer<L: TransformerLogic>(definition: BrickDefinition, logic: L) -> Self {
        Self {
            definition,
            logic: BrickLogic::Transformer(Box::new(logic)),
        }
    }

    pub fn effect<L: EffectLogic>(definition: BrickDefinition, logic: L) -> Self {
        Self {
            definition,
            logic: BrickLogic::Effect(Box::new(logic)),
        }
    }

    pub fn renderer<L: RendererLogic>(definition: BrickDefinition, logic: L) -> Self {
        Self {
            definition,
            logic: BrickLogic::Renderer(Box::new(logic)),
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn version(&self) -> &str {
        &self.definition.version
    }

    pub fn role(&self) -> BrickRole {
        self.logic.role()
    }
}

impl fmt::Debug for Brick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Brick")
            .field("id", &self.definition.id)
            .field("version", &self.definition.version)
            .field("role", &self.role())
            .finish()
    }
}

/// Log sink handed to every brick invocation.
///
/// Records go through the `log` facade under the `mortar::brick` target, tagged with
/// the brick, node and run they came from.
#[derive(Debug, Clone)]
pub struct BrickLogger {
    brick_id: String,
    node_id: String,
    run_id: Uuid,
}

impl BrickLogger {
    pub fn new(brick_id: impl Into<String>, node_id: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            brick_id: brick_id.into(),
            node_id: node_id.into(),
            run_id,
        }
    }

    pub fn debug(&self, message: impl fmt::Display) {
        log::debug!(target: "mortar::brick", "[{} {} run={}] {}", self.brick_id, self.node_id, self.run_id, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        log::info!(target: "mortar::brick", "[{} {} run={}] {}", self.brick_id, self.node_id, self.run_id, message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        log::warn!(target: "mortar::brick", "[{} {} run={}] {}", self.brick_id, self.node_id, self.run_id, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        log::error!(target: "mortar::brick", "[{} {} run={}] {}", self.brick_id, self.node_id, self.run_id, message);
    }
}

/// Everything a brick receives besides its arguments.
#[derive(Clone)]
pub struct BrickOptions {
    /// The resolved root for root-aware bricks, the document otherwise.
    pub root: Root,
    /// The context the node's arguments were resolved against.
    pub ctx: ExecutionContext,
    pub meta: RunMetadata,
    pub abort: CancellationToken,
    pub logger: BrickLogger,
    pub state: Arc<dyn StateStore>,
    pub(crate) runner: Arc<dyn PipelineRunner>,
}

impl BrickOptions {
    /// Runs a nested pipeline with extra bindings on top of this node's context.
    ///
    /// The nested frame inherits this node's root, metadata and abort signal. Its own
    /// bindings never leak back.
    pub fn run_pipeline(
        &self,
        pipeline: &Pipeline,
        label: impl Into<String>,
        extra: impl IntoIterator<Item = (String, NodeValue)>,
    ) -> BoxFuture<'static, Result<NodeValue, PipelineError>> {
        let frame = RunFrame {
            label: label.into(),
            ctx: self.ctx.with_vars(extra),
            root: self.root.clone(),
            meta: self.meta.clone(),
            abort: self.abort.clone(),
        };
        self.runner.run_pipeline(pipeline.clone(), frame)
    }

    /// Like [`run_pipeline`](Self::run_pipeline), but the frame gets its own abort
    /// signal so cancelling this run does not reach it.
    pub fn detached_frame(
        &self,
        label: impl Into<String>,
        extra: impl IntoIterator<Item = (String, NodeValue)>,
    ) -> RunFrame {
        RunFrame {
            label: label.into(),
            ctx: self.ctx.with_vars(extra),
            root: self.root.clone(),
            meta: self.meta.clone(),
            abort: CancellationToken::new(),
        }
    }

    pub fn runner(&self) -> Arc<dyn PipelineRunner> {
        Arc::clone(&self.runner)
    }

    /// Fails with a cancel error once the abort signal fired. Bricks call this at safe points.
    pub fn ensure_not_cancelled(&self) -> Result<(), PipelineError> {
        if self.abort.is_cancelled() {
            return Err(PipelineError::Cancelled(format!(
                "run {} was aborted",
                self.meta.run_id
            )));
        }
        Ok(())
    }
}
