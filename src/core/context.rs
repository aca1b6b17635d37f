use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::NodeValue;
use crate::core::pipeline::context_key;

/// Identifiers correlating one pipeline invocation with its owner.
///
/// Attached read-only to every brick invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub mod_component_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    pub run_id: Uuid,
}

impl RunMetadata {
    /// Metadata for a fresh run of the given mod component.
    pub fn new(mod_component_id: impl Into<String>) -> Self {
        Self {
            mod_component_id: mod_component_id.into(),
            deployment_id: None,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn with_deployment(mut self, deployment_id: impl Into<String>) -> Self {
        self.deployment_id = Some(deployment_id.into());
        self
    }
}

/// The variables visible to a node.
///
/// Cloning is cheap and every `with_*` call returns a new context, leaving the receiver
/// untouched. Bindings made in a nested frame therefore never leak back to the parent
/// or to sibling branches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    vars: Arc<HashMap<String, NodeValue>>,
    current: Option<NodeValue>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose only binding is `@input`.
    pub fn from_input(input: NodeValue) -> Self {
        Self::new().with_var("@input", input)
    }

    /// Returns a copy with `key` bound to `value`.
    pub fn with_var(&self, key: impl Into<String>, value: NodeValue) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.vars).insert(key.into(), value);
        next
    }

    /// Returns a copy with every pair bound. Bare keys get the `@` sigil.
    pub fn with_vars(&self, extra: impl IntoIterator<Item = (String, NodeValue)>) -> Self {
        let mut next = self.clone();
        let mut extra = extra.into_iter().peekable();
        if extra.peek().is_some() {
            let vars = Arc::make_mut(&mut next.vars);
            for (key, value) in extra {
                vars.insert(context_key(&key), value);
            }
        }
        next
    }

    /// Returns a copy whose anonymous current value is `value`.
    pub fn with_current(&self, value: NodeValue) -> Self {
        Self {
            vars: Arc::clone(&self.vars),
            current: Some(value),
        }
    }

    /// Binds a node result: under `@key` when an output key is given, else as the current value.
    pub fn with_output(&self, output_key: Option<&str>, value: NodeValue) -> Self {
        match output_key {
            Some(key) => self.with_var(context_key(key), value),
            None => self.with_current(value),
        }
    }

    /// Looks up a root variable. The bare `@` names the anonymous current value.
    pub fn get(&self, key: &str) -> Option<&NodeValue> {
        if key == "@" {
            return self.current.as_ref();
        }
        self.vars.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn current(&self) -> Option<&NodeValue> {
        self.current.as_ref()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.vars.keys()
    }

    /// The variables as seen from a template, `@title` becoming `title`. The current
    /// value is not among them.
    pub(crate) fn template_vars(&self) -> serde_json::Map<String, NodeValue> {
        self.vars
            .iter()
            .map(|(key, value)| {
                let name = key.strip_prefix('@').unwrap_or(key);
                (name.to_string(), value.clone())
            })
            .collect()
    }

    /// Snapshot of all bindings, for diagnostics.
    pub fn to_value(&self) -> NodeValue {
        let mut map: serde_json::Map<String, NodeValue> = self
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(current) = &self.current {
            map.insert("@".to_string(), current.clone());
        }
        NodeValue::Object(map)
    }
}
