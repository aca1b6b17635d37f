//! Expression resolution.
//!
//! Config values are either literals or tagged expression objects:
//!
//! ```json
//! { "__type__": "var", "__value__": "@input.items[0].name" }
//! { "__type__": "mustache", "__value__": "Hello {{ title }}" }
//! { "__type__": "pipeline", "__value__": [ { "id": "..." } ] }
//! ```
//!
//! Templates see every named binding without its sigil, so `@title` is `{{ title }}`.
//! The anonymous current value has no name there and `{{ @ }}` is a syntax error;
//! bind it with an `outputKey` or read it through a `var` expression instead.
//!
//! Literals are walked recursively so expressions nested inside objects and arrays are
//! resolved too. Pipeline expressions are left untouched: only the reducer can expand
//! them, because expansion means recursing into the reducer itself.

use minijinja::Environment;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::NodeValue;
use crate::core::context::ExecutionContext;
use crate::core::error::PipelineError;
use crate::core::pipeline::Pipeline;

pub const TYPE_TAG: &str = "__type__";
pub const VALUE_TAG: &str = "__value__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateEngine {
    Mustache,
    Nunjucks,
}

impl TemplateEngine {
    fn tag(self) -> &'static str {
        match self {
            TemplateEngine::Mustache => "mustache",
            TemplateEngine::Nunjucks => "nunjucks",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Var(VarPath),
    Template {
        engine: TemplateEngine,
        template: String,
    },
    Pipeline(Pipeline),
}

impl Expression {
    /// Recognizes a tagged expression object. Returns `Ok(None)` for literals.
    pub fn parse(value: &NodeValue) -> Result<Option<Expression>, PipelineError> {
        let Some(object) = value.as_object() else {
            return Ok(None);
        };
        let Some(tag) = object.get(TYPE_TAG) else {
            return Ok(None);
        };
        let payload = object.get(VALUE_TAG).unwrap_or(&NodeValue::Null);

        let expression = match tag.as_str() {
            Some("var") => {
                let path = payload.as_str().ok_or_else(|| {
                    PipelineError::invalid_pipeline("var expression must hold a string path")
                })?;
                Expression::Var(path.parse()?)
            }
            Some(engine @ ("mustache" | "nunjucks")) => {
                let template = payload.as_str().ok_or_else(|| {
                    PipelineError::invalid_pipeline(format!(
                        "{} expression must hold a template string",
                        engine
                    ))
                })?;
                let engine = if engine == "mustache" {
                    TemplateEngine::Mustache
                } else {
                    TemplateEngine::Nunjucks
                };
                Expression::Template {
                    engine,
                    template: template.to_string(),
                }
            }
            Some("pipeline") => {
                let pipeline: Pipeline = serde_json::from_value(payload.clone()).map_err(|e| {
                    PipelineError::invalid_pipeline(format!("malformed pipeline expression: {}", e))
                })?;
                Expression::Pipeline(pipeline)
            }
            _ => {
                return Err(PipelineError::invalid_pipeline(format!(
                    "unknown expression type {}",
                    tag
                )));
            }
        };
        Ok(Some(expression))
    }

    pub fn to_value(&self) -> NodeValue {
        match self {
            Expression::Var(path) => json!({ TYPE_TAG: "var", VALUE_TAG: path.as_str() }),
            Expression::Template { engine, template } => {
                json!({ TYPE_TAG: engine.tag(), VALUE_TAG: template })
            }
            Expression::Pipeline(pipeline) => {
                json!({ TYPE_TAG: "pipeline", VALUE_TAG: pipeline })
            }
        }
    }
}

/// Builds a variable reference expression.
pub fn var(path: &str) -> NodeValue {
    json!({ TYPE_TAG: "var", VALUE_TAG: path })
}

/// Builds a mustache template expression.
pub fn mustache(template: &str) -> NodeValue {
    json!({ TYPE_TAG: "mustache", VALUE_TAG: template })
}

/// Builds a nunjucks template expression.
pub fn nunjucks(template: &str) -> NodeValue {
    json!({ TYPE_TAG: "nunjucks", VALUE_TAG: template })
}

/// Builds a nested pipeline expression.
pub fn pipeline(pipeline: Pipeline) -> NodeValue {
    Expression::Pipeline(pipeline).to_value()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed dotted/bracket variable path such as `@input.items[0]["display name"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarPath {
    raw: String,
    root: String,
    segments: Vec<PathSegment>,
}

impl VarPath {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The context variable the path starts from.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Looks the path up. An unbound root fails; a missing deeper segment yields `null`.
    pub fn lookup(&self, ctx: &ExecutionContext) -> Result<NodeValue, PipelineError> {
        let root = ctx
            .get(&self.root)
            .ok_or_else(|| PipelineError::unbound_variable(&self.raw, &self.root))?;

        let mut current = root;
        for segment in &self.segments {
            let next = match (segment, current) {
                (PathSegment::Key(key), NodeValue::Object(map)) => map.get(key),
                (PathSegment::Index(index), NodeValue::Array(items)) => items.get(*index),
                (PathSegment::Index(index), NodeValue::Object(map)) => {
                    map.get(&index.to_string())
                }
                (PathSegment::Key(key), NodeValue::Array(items)) => {
                    key.parse::<usize>().ok().and_then(|i| items.get(i))
                }
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Ok(NodeValue::Null),
            }
        }
        Ok(current.clone())
    }
}

impl std::str::FromStr for VarPath {
    type Err = PipelineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed =
            |why: &str| PipelineError::invalid_pipeline(format!("malformed path '{}': {}", raw, why));

        let chars: Vec<char> = raw.trim().chars().collect();
        let root_end = chars
            .iter()
            .position(|c| *c == '.' || *c == '[')
            .unwrap_or(chars.len());
        let root: String = chars[..root_end].iter().collect();
        if root.is_empty() {
            return Err(malformed("missing variable name"));
        }

        let mut segments = Vec::new();
        let mut i = root_end;
        while i < chars.len() {
            match chars[i] {
                '.' => {
                    let start = i + 1;
                    let end = chars[start..]
                        .iter()
                        .position(|c| *c == '.' || *c == '[')
                        .map_or(chars.len(), |p| start + p);
                    if start == end {
                        return Err(malformed("empty segment"));
                    }
                    segments.push(PathSegment::Key(chars[start..end].iter().collect()));
                    i = end;
                }
                '[' => {
                    let close = chars[i..]
                        .iter()
                        .position(|c| *c == ']')
                        .map(|p| i + p)
                        .ok_or_else(|| malformed("unclosed bracket"))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    let inner = inner.trim();
                    let quoted = inner.len() >= 2
                        && ((inner.starts_with('"') && inner.ends_with('"'))
                            || (inner.starts_with('\'') && inner.ends_with('\'')));
                    if quoted {
                        segments.push(PathSegment::Key(inner[1..inner.len() - 1].to_string()));
                    } else if let Ok(index) = inner.parse::<usize>() {
                        segments.push(PathSegment::Index(index));
                    } else {
                        return Err(malformed("bracket must hold an index or a quoted key"));
                    }
                    i = close + 1;
                }
                _ => return Err(malformed("unexpected character")),
            }
        }

        Ok(VarPath {
            raw: raw.to_string(),
            root,
            segments,
        })
    }
}

/// Resolves a config value against the context.
pub fn resolve(value: &NodeValue, ctx: &ExecutionContext) -> Result<NodeValue, PipelineError> {
    match Expression::parse(value)? {
        Some(Expression::Var(path)) => path.lookup(ctx),
        Some(Expression::Template { template, .. }) => render_template(&template, ctx),
        Some(Expression::Pipeline(_)) => Ok(value.clone()),
        None => match value {
            NodeValue::Array(items) => items
                .iter()
                .map(|item| resolve(item, ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(NodeValue::Array),
            NodeValue::Object(map) => resolve_map(map, ctx).map(NodeValue::Object),
            _ => Ok(value.clone()),
        },
    }
}

/// Resolves every field of a node config, producing the brick's arguments.
pub fn resolve_config(
    config: &serde_json::Map<String, NodeValue>,
    ctx: &ExecutionContext,
) -> Result<NodeValue, PipelineError> {
    resolve_map(config, ctx).map(NodeValue::Object)
}

fn resolve_map(
    map: &serde_json::Map<String, NodeValue>,
    ctx: &ExecutionContext,
) -> Result<serde_json::Map<String, NodeValue>, PipelineError> {
    map.iter()
        .map(|(key, value)| Ok((key.clone(), resolve(value, ctx)?)))
        .collect()
}

fn render_template(template: &str, ctx: &ExecutionContext) -> Result<NodeValue, PipelineError> {
    let env = Environment::new();
    let vars = minijinja::Value::from_serialize(ctx.template_vars());
    env.render_str(template, vars)
        .map(NodeValue::String)
        .map_err(|e| PipelineError::invalid_pipeline(format!("failed to render template: {}", e)))
}

/// Collects every variable path referenced (directly) by a config value.
///
/// Templates and nested pipelines are not inspected.
pub fn referenced_vars(value: &NodeValue) -> Vec<VarPath> {
    let mut found = Vec::new();
    collect_vars(value, &mut found);
    found
}

fn collect_vars(value: &NodeValue, found: &mut Vec<VarPath>) {
    match Expression::parse(value) {
        Ok(Some(Expression::Var(path))) => found.push(path),
        Ok(Some(_)) | Err(_) => {}
        Ok(None) => match value {
            NodeValue::Array(items) => items.iter().for_each(|item| collect_vars(item, found)),
            NodeValue::Object(map) => map.values().for_each(|item| collect_vars(item, found)),
            _ => {}
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::PipelineNode;

    fn ctx() -> ExecutionContext {
        ExecutionContext::from_input(json!({
            "items": [{"name": "first"}, {"name": "second"}],
            "display name": "spaced",
        }))
        .with_var("@title", json!("Hello"))
    }

    #[test]
    fn test_path_parsing() {
        let path: VarPath = "@input.items[1][\"name\"]".parse().unwrap();
        assert_eq!(path.root(), "@input");
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("items".into()),
                PathSegment::Index(1),
                PathSegment::Key("name".into())
            ]
        );
        assert!("@input..x".parse::<VarPath>().is_err());
        assert!("@input[abc]".parse::<VarPath>().is_err());
        assert!("@input[0".parse::<VarPath>().is_err());
    }

    #[test]
    fn test_var_lookup() {
        let ctx = ctx();
        assert_eq!(
            resolve(&var("@input.items[0].name"), &ctx).unwrap(),
            json!("first")
        );
        assert_eq!(
            resolve(&var("@input['display name']"), &ctx).unwrap(),
            json!("spaced")
        );
        assert_eq!(resolve(&var("@title"), &ctx).unwrap(), json!("Hello"));
    }

    #[test]
    fn test_missing_deep_path_is_null() {
        let ctx = ctx();
        assert_eq!(
            resolve(&var("@input.items[7].name"), &ctx).unwrap(),
            NodeValue::Null
        );
        assert_eq!(
            resolve(&var("@title.nope"), &ctx).unwrap(),
            NodeValue::Null
        );
    }

    #[test]
    fn test_unbound_root_fails() {
        let err = resolve(&var("@missing.field"), &ctx()).unwrap_err();
        assert!(matches!(err, PipelineError::InputValidation { .. }));
    }

    #[test]
    fn test_current_value_reference() {
        let ctx = ExecutionContext::new().with_current(json!(7));
        assert_eq!(resolve(&var("@"), &ctx).unwrap(), json!(7));
        assert!(resolve(&var("@"), &ExecutionContext::new()).is_err());
    }

    #[test]
    fn test_template_rendering() {
        let ctx = ctx();
        assert_eq!(
            resolve(&mustache("{{ title }}, {{ input.items[1].name }}!"), &ctx).unwrap(),
            json!("Hello, second!")
        );
        assert_eq!(
            resolve(&nunjucks("{{ title | upper }}"), &ctx).unwrap(),
            json!("HELLO")
        );
    }

    #[test]
    fn test_templates_cannot_read_current_value() {
        let ctx = ExecutionContext::new()
            .with_var("@title", json!("T"))
            .with_current(json!(7));
        assert!(matches!(
            resolve(&mustache("{{ @ }}"), &ctx),
            Err(PipelineError::InvalidPipeline(_))
        ));
        assert_eq!(resolve(&var("@"), &ctx).unwrap(), json!(7));
    }

    #[test]
    fn test_literals_are_walked() {
        let value = json!({
            "static": 1,
            "nested": {"list": [var("@title"), "plain"]},
        });
        assert_eq!(
            resolve(&value, &ctx()).unwrap(),
            json!({"static": 1, "nested": {"list": ["Hello", "plain"]}})
        );
    }

    #[test]
    fn test_pipeline_expressions_pass_through() {
        let body = pipeline(Pipeline::new(vec![PipelineNode::new("x")
            .config("value", var("@never_bound"))]));
        assert_eq!(resolve(&body, &ctx()).unwrap(), body);
    }

    #[test]
    fn test_unknown_expression_type() {
        let value = json!({"__type__": "python", "__value__": "1+1"});
        assert!(matches!(
            Expression::parse(&value),
            Err(PipelineError::InvalidPipeline(_))
        ));
    }

    #[test]
    fn test_referenced_vars() {
        let value = json!({"a": var("@x.y"), "b": [var("@z")], "c": mustache("{{ q }}")});
        let mut roots: Vec<String> = referenced_vars(&value)
            .iter()
            .map(|p| p.root().to_string())
            .collect();
        roots.sort();
        assert_eq!(roots, vec!["@x", "@z"]);
    }
}
