//! The JSON-serializable pipeline description the reducer walks.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::NodeValue;
use crate::core::error::PipelineError;

/// Context keys that no `outputKey` may claim.
pub const RESERVED_KEYS: [&str; 4] = ["@input", "@options", "@mod", "@"];

/// How a node's root is derived from the parent root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RootMode {
    /// Use the parent root, or query the selector within it.
    #[default]
    Inherit,
    /// Query the selector against the whole document.
    Document,
    /// Dereference a serialized element handle.
    Element,
}

/// A single brick invocation inside a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineNode {
    /// Identifier of the brick to invoke.
    pub id: String,
    /// Stable per-node identifier, used for tracing only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub config: serde_json::Map<String, NodeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_mode: Option<RootMode>,
    /// A selector, or an element handle when `root_mode` is `element`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
}

impl PipelineNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            instance_id: None,
            config: serde_json::Map::new(),
            root_mode: None,
            root: None,
            output_key: None,
        }
    }

    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Sets a single config field. Later calls for the same key overwrite.
    pub fn config(mut self, key: impl Into<String>, value: impl Into<NodeValue>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn root_mode(mut self, mode: RootMode) -> Self {
        self.root_mode = Some(mode);
        self
    }

    /// Sets the selector (or handle) the root is resolved from.
    pub fn root(mut self, selector_or_handle: impl Into<String>) -> Self {
        self.root = Some(selector_or_handle.into());
        self
    }

    /// A readable label for logs: the instance id when present, else `index:brick`.
    pub fn label(&self, index: usize) -> String {
        match &self.instance_id {
            Some(instance_id) => instance_id.clone(),
            None => format!("{}:{}", index, self.id),
        }
    }
}

/// An ordered sequence of nodes. Serializes as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pipeline {
    nodes: Vec<PipelineNode>,
}

impl Pipeline {
    pub fn new(nodes: Vec<PipelineNode>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[PipelineNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PipelineNode> {
        self.nodes.iter()
    }

    /// Appends a node, builder style.
    pub fn then(mut self, node: PipelineNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Checks the structural invariants: unique instance ids and valid output keys.
    pub fn check_shape(&self) -> Result<(), PipelineError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if let Some(instance_id) = &node.instance_id {
                if !seen.insert(instance_id.as_str()) {
                    return Err(PipelineError::invalid_pipeline(format!(
                        "duplicate node instance id '{}'",
                        instance_id
                    )));
                }
            }
            if let Some(key) = &node.output_key {
                check_output_key(key)?;
            }
        }
        Ok(())
    }
}

impl From<Vec<PipelineNode>> for Pipeline {
    fn from(nodes: Vec<PipelineNode>) -> Self {
        Pipeline::new(nodes)
    }
}

impl<'a> IntoIterator for &'a Pipeline {
    type Item = &'a PipelineNode;
    type IntoIter = std::slice::Iter<'a, PipelineNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

/// Prefixes a bare key with the `@` sigil used in the context.
pub fn context_key(key: &str) -> String {
    if key.starts_with('@') {
        key.to_string()
    } else {
        format!("@{}", key)
    }
}

/// An output key must be an identifier and must not shadow a reserved context key.
pub fn check_output_key(key: &str) -> Result<(), PipelineError> {
    let mut chars = key.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    };
    if !valid {
        return Err(PipelineError::invalid_pipeline(format!(
            "output key '{}' is not a valid identifier",
            key
        )));
    }
    if RESERVED_KEYS.contains(&context_key(key).as_str()) {
        return Err(PipelineError::invalid_pipeline(format!(
            "output key '{}' is reserved",
            key
        )));
    }
    Ok(())
}
