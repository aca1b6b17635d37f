use jsonschema::JSONSchema;
use std::collections::HashSet;

use crate::core::NodeValue;
use crate::core::brick::BrickDefinition;
use crate::core::control_flow;
use crate::core::error::{PipelineError, SchemaViolation};
use crate::core::expression::{self, Expression};
use crate::core::pipeline::{Pipeline, check_output_key, context_key};
use crate::core::registry::BrickRegistry;

/// Checks `value` against `schema`, returning every violated constraint.
pub fn validate_schema(schema: &NodeValue, value: &NodeValue) -> Result<(), Vec<SchemaViolation>> {
    let compiled = match JSONSchema::compile(schema) {
        Ok(compiled) => compiled,
        Err(e) => {
            return Err(vec![SchemaViolation {
                keyword: "schema".to_string(),
                instance_location: String::new(),
                schema_location: e.schema_path.to_string(),
                message: format!("invalid schema: {}", e),
            }]);
        }
    };

    let violations = match compiled.validate(value) {
        Ok(()) => return Ok(()),
        Err(errors) => errors
            .map(|err| {
                let schema_location = err.schema_path.to_string();
                SchemaViolation {
                    keyword: schema_location
                        .rsplit('/')
                        .next()
                        .unwrap_or_default()
                        .to_string(),
                    instance_location: err.instance_path.to_string(),
                    schema_location,
                    message: err.to_string(),
                }
            })
            .collect::<Vec<_>>(),
    };
    Err(violations)
}

/// Validates a brick's resolved arguments against its input schema.
pub fn validate_input(definition: &BrickDefinition, args: &NodeValue) -> Result<(), PipelineError> {
    validate_schema(&definition.input_schema, args).map_err(|errors| {
        let summary = errors
            .iter()
            .map(|e| format!("{} ({})", e.message, e.keyword))
            .collect::<Vec<_>>()
            .join("; ");
        PipelineError::InputValidation {
            message: format!("{}: {}", definition.id, summary),
            schema: definition.input_schema.clone(),
            input: args.clone(),
            errors,
        }
    })
}

/// Checks a result against the brick's declared output schema, if any.
pub fn check_output(definition: &BrickDefinition, output: &NodeValue) -> Vec<SchemaViolation> {
    match &definition.output_schema {
        Some(schema) => validate_schema(schema, output).err().unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Represents an issue found during static pipeline validation.
#[derive(Debug, Clone)]
pub enum ValidationIssue {
    /// A hard error: the pipeline cannot run as written.
    Error(String),
    /// A warning: the pipeline might fail depending on runtime data.
    Warning(String),
}

/// The result of a pipeline validation pass.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.issues.push(ValidationIssue::Error(msg.into()));
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.issues.push(ValidationIssue::Warning(msg.into()));
    }

    pub fn is_safe(&self) -> bool {
        !self.issues.iter().any(|i| matches!(i, ValidationIssue::Error(_)))
    }

    pub fn has_warnings(&self) -> bool {
        self.issues.iter().any(|i| matches!(i, ValidationIssue::Warning(_)))
    }

    pub fn log_summary(&self) {
        if self.is_safe() && !self.has_warnings() {
            log::info!("Pipeline validation passed: every variable reference is bound.");
            return;
        }

        for issue in &self.issues {
            match issue {
                ValidationIssue::Error(msg) => log::error!("{}", msg),
                ValidationIssue::Warning(msg) => log::warn!("{}", msg),
            }
        }
    }
}

/// Statically checks a pipeline before running it.
///
/// `initial_keys` are the context keys the caller will provide (e.g. `@input`).
/// Nested pipelines are checked with the bindings their control-flow brick adds; keys
/// bound only inside a nested frame are reported as warnings when referenced outside it.
pub fn validate_pipeline(
    pipeline: &Pipeline,
    registry: &BrickRegistry,
    initial_keys: impl IntoIterator<Item = String>,
) -> ValidationResult {
    let mut result = ValidationResult::new();
    let mut available: HashSet<String> = initial_keys.into_iter().collect();
    let mut nested_only = HashSet::new();
    validate_recursive(
        pipeline,
        "root",
        registry,
        &mut available,
        &mut nested_only,
        &mut result,
    );
    result
}

fn validate_recursive(
    pipeline: &Pipeline,
    frame: &str,
    registry: &BrickRegistry,
    available: &mut HashSet<String>,
    nested_only: &mut HashSet<String>,
    result: &mut ValidationResult,
) {
    let mut instance_ids = HashSet::new();
    let mut has_current = available.contains("@");

    for (index, node) in pipeline.iter().enumerate() {
        let label = format!("{}/{}", frame, node.label(index));

        if let Some(instance_id) = &node.instance_id {
            if !instance_ids.insert(instance_id.clone()) {
                result.add_error(format!(
                    "Node '{}' reuses instance id '{}'",
                    label, instance_id
                ));
            }
        }

        if !registry.contains(&node.id) {
            result.add_error(format!(
                "Node '{}' references unknown brick '{}'",
                label, node.id
            ));
        }

        for (field, value) in &node.config {
            for path in expression::referenced_vars(value) {
                let root = path.root();
                if root == "@" {
                    if !has_current {
                        result.add_warning(format!(
                            "Node '{}' field '{}' reads the current value before any node produced one",
                            label, field
                        ));
                    }
                } else if !available.contains(root) {
                    if nested_only.contains(root) {
                        result.add_warning(format!(
                            "Node '{}' field '{}' reads '{}', which is only bound inside a nested pipeline",
                            label, field, root
                        ));
                    } else {
                        result.add_error(format!(
                            "Node '{}' field '{}' reads '{}', which is not bound upstream",
                            label, field, root
                        ));
                    }
                }
            }

            if let Ok(Some(Expression::Pipeline(body))) = Expression::parse(value) {
                let mut branch_keys = available.clone();
                match control_flow::frame_bindings(&node.id, &node.config, field) {
                    Ok(bindings) => branch_keys.extend(bindings),
                    Err(e) => result.add_error(format!(
                        "Node '{}' cannot bind its nested frame: {}",
                        label, e
                    )),
                }
                if has_current {
                    branch_keys.insert("@".to_string());
                }
                let nested_frame = format!("{}.{}", label, field);
                validate_recursive(
                    &body,
                    &nested_frame,
                    registry,
                    &mut branch_keys,
                    nested_only,
                    result,
                );
                for key in branch_keys {
                    if !available.contains(&key) {
                        nested_only.insert(key);
                    }
                }
            }
        }

        match &node.output_key {
            Some(key) => match check_output_key(key) {
                Ok(()) => {
                    available.insert(context_key(key));
                }
                Err(e) => result.add_error(format!("Node '{}': {}", label, e)),
            },
            None => has_current = true,
        }
    }
}
