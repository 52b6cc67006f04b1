//! Error types for ECS FIS Core
//!
//! Construction has exactly one checked failure, an incompatible network mode,
//! which surfaces as [`FisError::Validation`]. Everything else here belongs to
//! the resource model and configuration plumbing and propagates unchanged.

use thiserror::Error;

use crate::validator::ValidationFailure;

/// Result type alias for fault-injection construction
pub type Result<T> = std::result::Result<T, FisError>;

/// Main error type for construction and rendering
#[derive(Error, Debug)]
pub enum FisError {
    /// The task configuration cannot host the requested fault actions
    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    /// A caller-supplied resource handle is not a well-formed ARN
    #[error("Invalid ARN: {0}")]
    InvalidArn(String),

    /// A fault action tag that is not part of the known set
    #[error("Unknown fault injection action: {0}")]
    UnknownFaultAction(String),

    /// A container with the same name is already part of the task
    #[error("Container already defined in task definition: {0}")]
    DuplicateContainer(String),

    /// Two resources rendered under the same logical id
    #[error("Duplicate logical id in template: {0}")]
    DuplicateResource(String),

    /// Configuration values that cannot be rendered safely
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML decoding errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// TOML encoding errors
    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        /// What was being attempted
        context: String,
        /// Underlying failure
        source: Box<FisError>,
    },
}

impl FisError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// True when the error (or the error it wraps) is a validation failure
    pub fn is_validation(&self) -> bool {
        match self {
            Self::Validation(_) => true,
            Self::WithContext { source, .. } => source.is_validation(),
            _ => false,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.context(f()))
    }
}
