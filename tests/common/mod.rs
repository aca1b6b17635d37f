//! Shared fixtures: an in-memory document and a handful of helper bricks.
#![allow(dead_code)]

use async_trait::async_trait;
use mortar::prelude::*;
use mortar::{DocumentHost, ElementNode, ElementRef, downcast_element};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const READ_TEXT: &str = "@test/read-text";
pub const IDENTITY: &str = "@test/identity";
pub const DOUBLE: &str = "@test/double";
pub const SLEEP_ECHO: &str = "@test/sleep-echo";
pub const FAIL: &str = "@test/fail";
pub const RECORD: &str = "@test/record";
pub const NEEDS_NETWORK: &str = "@test/needs-network";
pub const RENDER_CARD: &str = "@test/render-card";

// ============================================================================
// In-memory document
// ============================================================================

#[derive(Debug, Default)]
pub struct TestElement {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub text: String,
    pub children: Vec<Arc<TestElement>>,
}

impl TestElement {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Self::default()
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn child(mut self, child: TestElement) -> Self {
        self.children.push(Arc::new(child));
        self
    }

    /// `#id`, `.class` or a bare tag name.
    fn matches(&self, selector: &str) -> bool {
        if let Some(id) = selector.strip_prefix('#') {
            self.id.as_deref() == Some(id)
        } else if let Some(class) = selector.strip_prefix('.') {
            self.classes.iter().any(|c| c == class)
        } else {
            self.tag == selector
        }
    }

    fn collect(&self, selector: &str, found: &mut Vec<ElementRef>) {
        for child in &self.children {
            if child.matches(selector) {
                found.push(child.clone());
            }
            child.collect(selector, found);
        }
    }
}

impl ElementNode for TestElement {
    fn tag_name(&self) -> &str {
        &self.tag
    }

    fn text_content(&self) -> String {
        let mut text = self.text.clone();
        for child in &self.children {
            text.push_str(&child.text_content());
        }
        text
    }

    fn attribute(&self, name: &str) -> Option<String> {
        match name {
            "id" => self.id.clone(),
            "class" => Some(self.classes.join(" ")),
            _ => None,
        }
    }
}

/// A document whose `body` element is the root of the tree.
pub struct MemoryDocument {
    pub body: Arc<TestElement>,
}

impl MemoryDocument {
    pub fn new(body: TestElement) -> Self {
        Self {
            body: Arc::new(body),
        }
    }

    pub fn find(&self, selector: &str) -> Vec<ElementRef> {
        let mut found = Vec::new();
        self.body.collect(selector, &mut found);
        found
    }
}

impl DocumentHost for MemoryDocument {
    fn query_selector_all(
        &self,
        scope: &Root,
        selector: &str,
    ) -> Result<Vec<ElementRef>, PipelineError> {
        let mut found = Vec::new();
        match scope {
            Root::Document => self.body.collect(selector, &mut found),
            Root::Element(element) => downcast_element::<TestElement>(element)
                .ok_or_else(|| PipelineError::platform("foreign element in scope"))?
                .collect(selector, &mut found),
        }
        Ok(found)
    }
}

// ============================================================================
// Helper bricks
// ============================================================================

/// Returns the text of its root element.
struct ReadText;

#[async_trait]
impl ReaderLogic for ReadText {
    async fn read(&self, _args: NodeValue, options: &BrickOptions) -> Result<NodeValue, PipelineError> {
        match options.root.as_element() {
            Some(element) => Ok(json!(element.text_content())),
            None => Err(PipelineError::business("read-text needs an element root")),
        }
    }
}

/// Returns its `value` argument unchanged.
struct Identity;

#[async_trait]
impl TransformerLogic for Identity {
    async fn transform(&self, args: NodeValue, _options: &BrickOptions) -> Result<NodeValue, PipelineError> {
        Ok(args.get("value").cloned().unwrap_or(NodeValue::Null))
    }
}

struct Double;

#[async_trait]
impl TransformerLogic for Double {
    async fn transform(&self, args: NodeValue, _options: &BrickOptions) -> Result<NodeValue, PipelineError> {
        match args["value"].as_i64() {
            Some(n) => Ok(json!(n * 2)),
            None => Err(PipelineError::business(format!("cannot double {}", args["value"]))),
        }
    }
}

/// Sleeps `ms`, then records `value` and returns it.
struct SleepEcho {
    log: Arc<Mutex<Vec<NodeValue>>>,
}

#[async_trait]
impl TransformerLogic for SleepEcho {
    async fn transform(&self, args: NodeValue, _options: &BrickOptions) -> Result<NodeValue, PipelineError> {
        let ms = args["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        self.log.lock().unwrap().push(args["value"].clone());
        Ok(args["value"].clone())
    }
}

struct Fail;

#[async_trait]
impl TransformerLogic for Fail {
    async fn transform(&self, args: NodeValue, _options: &BrickOptions) -> Result<NodeValue, PipelineError> {
        let message = args["message"].as_str().unwrap_or("failed on purpose");
        Err(PipelineError::business(message))
    }
}

/// Appends `value` to the shared log.
struct Record {
    log: Arc<Mutex<Vec<NodeValue>>>,
}

#[async_trait]
impl EffectLogic for Record {
    async fn effect(&self, args: NodeValue, _options: &BrickOptions) -> Result<(), PipelineError> {
        self.log.lock().unwrap().push(args["value"].clone());
        Ok(())
    }
}

/// Wraps `text` in a paragraph.
struct RenderCard;

#[async_trait]
impl RendererLogic for RenderCard {
    async fn render(&self, args: NodeValue, _options: &BrickOptions) -> Result<NodeValue, PipelineError> {
        let text = args["text"].as_str().unwrap_or_default();
        Ok(json!({"html": format!("<p>{}</p>", text)}))
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub registry: BrickRegistry,
    pub document: Arc<MemoryDocument>,
    /// Values recorded by `@test/record`.
    pub recorded: Arc<Mutex<Vec<NodeValue>>>,
    /// Values in the order `@test/sleep-echo` finished them.
    pub finished: Arc<Mutex<Vec<NodeValue>>>,
}

impl Harness {
    pub fn new(body: TestElement) -> Self {
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(Mutex::new(Vec::new()));

        let registry = BrickRegistry::new();
        registry.register([
            Brick::reader(BrickDefinition::new(READ_TEXT, "1.0.0").pure().root_aware(), ReadText),
            Brick::transformer(BrickDefinition::new(IDENTITY, "1.0.0").pure(), Identity),
            Brick::transformer(
                BrickDefinition::new(DOUBLE, "1.0.0").pure().input_schema(json!({
                    "type": "object",
                    "properties": {"value": {"type": "integer"}},
                    "required": ["value"]
                })),
                Double,
            ),
            Brick::transformer(
                BrickDefinition::new(SLEEP_ECHO, "1.0.0"),
                SleepEcho {
                    log: finished.clone(),
                },
            ),
            Brick::transformer(BrickDefinition::new(FAIL, "1.0.0"), Fail),
            Brick::effect(
                BrickDefinition::new(RECORD, "1.0.0"),
                Record {
                    log: recorded.clone(),
                },
            ),
            Brick::effect(
                BrickDefinition::new(NEEDS_NETWORK, "1.0.0").requires(Capability::Network),
                Record {
                    log: recorded.clone(),
                },
            ),
            Brick::renderer(BrickDefinition::new(RENDER_CARD, "1.0.0"), RenderCard),
        ]);
        register_control_flow_bricks(&registry);

        Self {
            registry,
            document: Arc::new(MemoryDocument::new(body)),
            recorded,
            finished,
        }
    }

    /// A harness over an empty document.
    pub fn empty() -> Self {
        Self::new(TestElement::new("body"))
    }

    pub fn reducer(&self) -> Reducer {
        Reducer::new(self.registry.clone()).with_document(self.document.clone())
    }

    pub fn recorded(&self) -> Vec<NodeValue> {
        self.recorded.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<NodeValue> {
        self.finished.lock().unwrap().clone()
    }
}

pub fn options() -> RunOptions {
    RunOptions::new(RunMetadata::new("test-component"))
}

pub fn node(id: &str) -> PipelineNode {
    PipelineNode::new(id)
}
