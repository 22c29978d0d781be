use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::models::{ExperimentName, ServerExperiment, TrialAssignments, TrialValues};

/// Errors returned by the remote optimization server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The experiment will not hand out further suggestions.
    #[error("experiment stopped: {0}")]
    ExperimentStopped(String),

    /// Suggestions are temporarily unavailable; retry after the given delay.
    #[error("service unavailable")]
    Unavailable { retry_after: Option<Duration> },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unexpected response {status}: {body}")]
    Unexpected { status: u16, body: String },
}

impl ServerError {
    /// Map an HTTP status and body onto the error taxonomy.
    pub fn from_status(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            400 | 422 => Self::InvalidRequest(body),
            401 | 403 => Self::Unauthorized(body),
            404 => Self::NotFound(body),
            410 => Self::ExperimentStopped(body),
            429 | 502 | 503 | 504 => Self::Unavailable { retry_after },
            _ => Self::Unexpected { status, body },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Unavailable { retry_after } => *retry_after,
            _ => None,
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Remote optimization service port.
#[async_trait]
pub trait OptimizationServer: Send + Sync {
    /// Verify the server can be reached
    async fn check_available(&self) -> ServerResult<()>;

    /// Create (or replace) an experiment; the result carries the server links
    async fn create_experiment(
        &self,
        name: &ExperimentName,
        experiment: &ServerExperiment,
    ) -> ServerResult<ServerExperiment>;

    /// Delete an experiment by its self link
    async fn delete_experiment(&self, url: &str) -> ServerResult<()>;

    /// Request the next suggestion
    async fn next_trial(&self, url: &str) -> ServerResult<TrialAssignments>;

    /// Report the observed values of a finished trial
    async fn report_trial(&self, url: &str, values: &TrialValues) -> ServerResult<()>;

    /// Give a suggestion back without reporting values
    async fn abandon_running_trial(&self, url: &str) -> ServerResult<()>;
}
