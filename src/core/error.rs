use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::core::NodeValue;

/// The coarse error taxonomy every [`PipelineError`] maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Inputs or pipeline shape are wrong. An authoring bug.
    Validation,
    /// Expected, user-actionable failure.
    Business,
    /// Unexpected internal failure.
    Platform,
    /// An abort signal fired or the user dismissed a prompt.
    Cancel,
}

/// A single violated JSON Schema constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaViolation {
    /// The schema keyword that failed (`type`, `required`, ...).
    pub keyword: String,
    /// JSON pointer into the offending value.
    pub instance_location: String,
    /// JSON pointer into the schema.
    pub schema_location: String,
    pub message: String,
}

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("Brick not found: {id}")]
    NotFound { id: String },

    #[error("Invalid input: {message}")]
    InputValidation {
        message: String,
        schema: NodeValue,
        input: NodeValue,
        errors: Vec<SchemaViolation>,
    },

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("{0}")]
    Business(String),

    #[error("Internal error: {0}")]
    Platform(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl PipelineError {
    pub fn business(message: impl Into<String>) -> Self {
        PipelineError::Business(message.into())
    }

    pub fn platform(message: impl Into<String>) -> Self {
        PipelineError::Platform(message.into())
    }

    pub fn invalid_pipeline(message: impl Into<String>) -> Self {
        PipelineError::InvalidPipeline(message.into())
    }

    /// A variable reference whose root segment is not bound in the context.
    pub fn unbound_variable(path: &str, root: &str) -> Self {
        PipelineError::InputValidation {
            message: format!("Variable '{}' is not bound (referenced by '{}')", root, path),
            schema: NodeValue::Null,
            input: NodeValue::String(path.to_string()),
            errors: Vec::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InputValidation { .. } | PipelineError::InvalidPipeline(_) => {
                ErrorKind::Validation
            }
            PipelineError::NotFound { .. } | PipelineError::Business(_) => ErrorKind::Business,
            PipelineError::Platform(_) => ErrorKind::Platform,
            PipelineError::Cancelled(_) => ErrorKind::Cancel,
        }
    }

    /// The stable error name exposed to pipelines.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineError::NotFound { .. } => "NotFoundError",
            PipelineError::InputValidation { .. } => "InputValidationError",
            PipelineError::InvalidPipeline(_) => "PipelineConfigurationError",
            PipelineError::Business(_) => "BusinessError",
            PipelineError::Platform(_) => "PlatformError",
            PipelineError::Cancelled(_) => "CancelError",
        }
    }

    /// Serializes the error into the plain object that try/except binds for its except body.
    pub fn to_value(&self) -> NodeValue {
        let mut value = json!({
            "name": self.name(),
            "message": self.to_string(),
            "kind": self.kind(),
        });
        if let PipelineError::InputValidation { schema, input, errors, .. } = self {
            value["schema"] = schema.clone();
            value["input"] = input.clone();
            value["errors"] = serde_json::to_value(errors).unwrap_or(NodeValue::Null);
        }
        value
    }

    /// Builds the message shown to the end user.
    ///
    /// Business errors are shown as-is. Everything else gets a generic message and an
    /// opaque reference; the full error is logged under that reference.
    pub fn user_facing(&self) -> UserFacingError {
        if self.kind() == ErrorKind::Business {
            return UserFacingError {
                message: self.to_string(),
                reference: None,
            };
        }

        let reference = uuid::Uuid::new_v4().simple().to_string();
        log::error!("[{}] {} ({:?})", reference, self, self);
        UserFacingError {
            message: "An error occurred while running the mod".to_string(),
            reference: Some(reference),
        }
    }
}

/// What the top-level caller renders for a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFacingError {
    pub message: String,
    pub reference: Option<String>,
}

impl std::fmt::Display for UserFacingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reference {
            Some(reference) => write!(f, "{} (reference: {})", self.message, reference),
            None => write!(f, "{}", self.message),
        }
    }
}
