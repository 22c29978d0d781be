//! Domain errors for the trialsync controller.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Domain-level errors that can occur while reading or writing cluster state.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: String, name: String },

    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Patch rejected for {target}: {reason}")]
    PatchRejected { target: String, reason: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Remote server error: {0}")]
    Server(#[from] crate::domain::ports::ServerError),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

impl DomainError {
    pub fn not_found(kind: impl Into<String>, name: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.to_string(),
        }
    }

    pub fn conflict(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::ConcurrencyConflict {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Optimistic-concurrency failures are redriven, never surfaced.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for DomainError {
    fn from(err: serde_yaml::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

/// Signal that a metric value is not readable yet, or that its query is invalid.
///
/// This is the only metric failure the trial reconciler retries.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct CaptureError {
    pub message: String,
    /// Collector address the query ran against
    pub address: String,
    pub query: String,
    pub completion_time: Option<DateTime<Utc>>,
    /// Minimum delay before the value is expected to be available
    pub retry_after: Option<Duration>,
}

impl CaptureError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            address: String::new(),
            query: String::new(),
            completion_time: None,
            retry_after: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_completion_time(mut self, completion_time: Option<DateTime<Utc>>) -> Self {
        self.completion_time = completion_time;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Errors raised while capturing a metric value.
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("metric value not available: {0}")]
    Capture(#[from] CaptureError),

    #[error("failed to render metric query: {0}")]
    Template(String),

    #[error("invalid metric value {value:?}: {reason}")]
    InvalidValue { value: String, reason: String },

    #[error("unable to resolve metric address: {0}")]
    Address(String),

    #[error("metric request failed: {0}")]
    Request(String),

    #[error("unexpected metric response: {0}")]
    Response(String),
}

impl MetricError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Capture(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Capture(err) => err.retry_after,
            _ => None,
        }
    }
}
