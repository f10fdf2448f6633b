//! Error types for the EC2 machine provider
//!
//! Provides structured error types for template resolution, instance-type
//! resolution, instance lifecycle calls and drift detection.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the provider
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Lookup Errors
    // =========================================================================
    /// Referenced object or instance is absent. Never wrapped with a stage so
    /// callers can apply ignore-if-absent semantics.
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: String, name: String },

    /// The owning provisioner or instance type of an instance can't be determined
    #[error("{0}")]
    Resolution(String),

    // =========================================================================
    // Capacity Errors
    // =========================================================================
    #[error("insufficient capacity, {0}")]
    InsufficientCapacity(String),

    // =========================================================================
    // Downstream Errors
    // =========================================================================
    /// Any downstream failure annotated with the stage that produced it
    #[error("{stage}, {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("operation cancelled")]
    Cancelled,

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("deserializing provider, {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("Quantity parse error: {0}")]
    QuantityParse(String),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Build a NotFound error for a resource kind
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// The innermost error beneath any stage annotations
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this error means the target is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::NotFound { .. })
    }

    /// Check if this error means no instance type could satisfy the request
    pub fn is_insufficient_capacity(&self) -> bool {
        matches!(self.root(), Error::InsufficientCapacity(_))
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self.root() {
            // Capacity may free up, or the caller may relax constraints
            Error::InsufficientCapacity(_) => ErrorAction::RequeueAfter(Duration::from_secs(60)),

            // Malformed input won't fix itself
            Error::Configuration(_)
            | Error::Deserialization(_)
            | Error::QuantityParse(_)
            | Error::YamlParse(_) => ErrorAction::NoRequeue,

            Error::NotFound { .. } => ErrorAction::NoRequeue,

            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }
}

/// Result type alias for the provider
pub type Result<T> = std::result::Result<T, Error>;

/// Annotate errors with the stage of the operation that produced them
pub trait StageExt<T> {
    /// Wrap the error with `stage`, leaving NotFound errors untouched
    fn stage(self, stage: &'static str) -> Result<T>;
}

impl<T> StageExt<T> for Result<T> {
    fn stage(self, stage: &'static str) -> Result<T> {
        self.map_err(|err| {
            if err.is_not_found() {
                err
            } else {
                Error::Stage {
                    stage,
                    source: Box::new(err),
                }
            }
        })
    }
}

/// Convert a NotFound error into `Ok(None)`, passing everything else through
pub fn ignore_not_found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}
