//! Mock optimization server for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::models::{
    ExperimentName, NumberOrString, ServerAssignment, ServerExperiment, TrialAssignments,
    TrialValues,
};
use crate::domain::ports::{OptimizationServer, ServerError, ServerResult};

/// Scripted outcome of a `next_trial` call.
#[derive(Debug, Clone)]
pub enum MockSuggestion {
    /// Hand out these assignments.
    Assign(Vec<(String, i64)>),
    /// Hand out raw values, e.g. to exercise coercion.
    Raw(Vec<ServerAssignment>),
    /// The experiment is exhausted.
    Stopped,
    /// Nothing available right now.
    Unavailable(Option<Duration>),
}

/// Failure injected into a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    NotFound,
    Unavailable,
    Unexpected,
}

impl MockFailure {
    fn to_error(self, url: &str) -> ServerError {
        match self {
            Self::NotFound => ServerError::NotFound(url.to_string()),
            Self::Unavailable => ServerError::Unavailable { retry_after: None },
            Self::Unexpected => ServerError::Unexpected {
                status: 500,
                body: "injected failure".to_string(),
            },
        }
    }
}

#[derive(Debug, Default)]
struct Calls {
    created: Vec<(ExperimentName, ServerExperiment)>,
    deleted: Vec<String>,
    reported: Vec<(String, TrialValues)>,
    abandoned: Vec<String>,
    suggestions_served: usize,
}

/// In-process optimization server with scripted suggestions and call recording.
#[derive(Debug, Clone)]
pub struct MockOptimizationServer {
    address: String,
    script: Arc<RwLock<VecDeque<MockSuggestion>>>,
    /// Served when the script runs dry.
    fallback: Arc<RwLock<MockSuggestion>>,
    calls: Arc<RwLock<Calls>>,
    report_failure: Arc<RwLock<Option<MockFailure>>>,
    abandon_failure: Arc<RwLock<Option<MockFailure>>>,
    delete_failure: Arc<RwLock<Option<MockFailure>>>,
    create_failure: Arc<RwLock<Option<MockFailure>>>,
    counter: Arc<AtomicUsize>,
}

impl Default for MockOptimizationServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOptimizationServer {
    pub fn new() -> Self {
        Self {
            address: "http://mock.invalid/v1".to_string(),
            script: Arc::new(RwLock::new(VecDeque::new())),
            fallback: Arc::new(RwLock::new(MockSuggestion::Stopped)),
            calls: Arc::new(RwLock::new(Calls::default())),
            report_failure: Arc::new(RwLock::new(None)),
            abandon_failure: Arc::new(RwLock::new(None)),
            delete_failure: Arc::new(RwLock::new(None)),
            create_failure: Arc::new(RwLock::new(None)),
            counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue suggestions served in order by `next_trial`.
    pub async fn push_suggestion(&self, suggestion: MockSuggestion) {
        self.script.write().await.push_back(suggestion);
    }

    /// Suggestion served once the queue is empty.
    pub async fn set_fallback(&self, suggestion: MockSuggestion) {
        *self.fallback.write().await = suggestion;
    }

    pub async fn fail_reports(&self, failure: Option<MockFailure>) {
        *self.report_failure.write().await = failure;
    }

    pub async fn fail_abandons(&self, failure: Option<MockFailure>) {
        *self.abandon_failure.write().await = failure;
    }

    pub async fn fail_deletes(&self, failure: Option<MockFailure>) {
        *self.delete_failure.write().await = failure;
    }

    pub async fn fail_creates(&self, failure: Option<MockFailure>) {
        *self.create_failure.write().await = failure;
    }

    pub async fn created(&self) -> Vec<(ExperimentName, ServerExperiment)> {
        self.calls.read().await.created.clone()
    }

    pub async fn deleted(&self) -> Vec<String> {
        self.calls.read().await.deleted.clone()
    }

    pub async fn reported(&self) -> Vec<(String, TrialValues)> {
        self.calls.read().await.reported.clone()
    }

    pub async fn abandoned(&self) -> Vec<String> {
        self.calls.read().await.abandoned.clone()
    }

    pub async fn suggestions_served(&self) -> usize {
        self.calls.read().await.suggestions_served
    }

    fn experiment_url(&self, name: &ExperimentName) -> String {
        format!("{}/experiments/{name}", self.address)
    }
}

#[async_trait]
impl OptimizationServer for MockOptimizationServer {
    async fn check_available(&self) -> ServerResult<()> {
        Ok(())
    }

    async fn create_experiment(
        &self,
        name: &ExperimentName,
        experiment: &ServerExperiment,
    ) -> ServerResult<ServerExperiment> {
        let url = self.experiment_url(name);
        if let Some(failure) = *self.create_failure.read().await {
            return Err(failure.to_error(&url));
        }

        self.calls
            .write()
            .await
            .created
            .push((name.clone(), experiment.clone()));

        let mut created = experiment.clone();
        created.next_trial_url = Some(format!("{url}/trials/"));
        created.self_url = Some(url);
        Ok(created)
    }

    async fn delete_experiment(&self, url: &str) -> ServerResult<()> {
        if let Some(failure) = *self.delete_failure.read().await {
            return Err(failure.to_error(url));
        }
        self.calls.write().await.deleted.push(url.to_string());
        Ok(())
    }

    async fn next_trial(&self, url: &str) -> ServerResult<TrialAssignments> {
        let next = self.script.write().await.pop_front();
        let suggestion = match next {
            Some(s) => s,
            None => self.fallback.read().await.clone(),
        };

        let assignments = match suggestion {
            MockSuggestion::Stopped => return Err(ServerError::ExperimentStopped(url.to_string())),
            MockSuggestion::Unavailable(retry_after) => {
                return Err(ServerError::Unavailable { retry_after })
            }
            MockSuggestion::Assign(values) => values
                .into_iter()
                .map(|(name, value)| ServerAssignment {
                    parameter_name: name,
                    value: NumberOrString::from_i64(value),
                })
                .collect(),
            MockSuggestion::Raw(values) => values,
        };

        self.calls.write().await.suggestions_served += 1;
        let id = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TrialAssignments {
            assignments,
            report_trial_url: Some(format!("{}{id}", url)),
        })
    }

    async fn report_trial(&self, url: &str, values: &TrialValues) -> ServerResult<()> {
        if let Some(failure) = *self.report_failure.read().await {
            return Err(failure.to_error(url));
        }
        self.calls
            .write()
            .await
            .reported
            .push((url.to_string(), values.clone()));
        Ok(())
    }

    async fn abandon_running_trial(&self, url: &str) -> ServerResult<()> {
        if let Some(failure) = *self.abandon_failure.read().await {
            return Err(failure.to_error(url));
        }
        self.calls.write().await.abandoned.push(url.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_suggestions() {
        let server = MockOptimizationServer::new();
        server
            .push_suggestion(MockSuggestion::Assign(vec![("cpu".to_string(), 500)]))
            .await;
        server
            .push_suggestion(MockSuggestion::Unavailable(Some(Duration::from_secs(3))))
            .await;

        let first = server.next_trial("http://mock/next/").await.unwrap();
        assert_eq!(first.assignments[0].value.as_i64(), Some(500));
        assert_eq!(first.report_trial_url.as_deref(), Some("http://mock/next/1"));

        let err = server.next_trial("http://mock/next/").await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));

        let err = server.next_trial("http://mock/next/").await.unwrap_err();
        assert!(matches!(err, ServerError::ExperimentStopped(_)));
        assert_eq!(server.suggestions_served().await, 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_not_recorded() {
        let server = MockOptimizationServer::new();
        server.fail_reports(Some(MockFailure::Unexpected)).await;
        assert!(server
            .report_trial("http://mock/t/1", &TrialValues::default())
            .await
            .is_err());
        assert!(server.reported().await.is_empty());

        server.fail_reports(None).await;
        server
            .report_trial("http://mock/t/1", &TrialValues::default())
            .await
            .unwrap();
        assert_eq!(server.reported().await.len(), 1);
    }

    #[tokio::test]
    async fn test_create_returns_links() {
        let server = MockOptimizationServer::new();
        let created = server
            .create_experiment(&ExperimentName::new("exp"), &ServerExperiment::default())
            .await
            .unwrap();
        assert_eq!(created.self_url.as_deref(), Some("http://mock.invalid/v1/experiments/exp"));
        assert_eq!(
            created.next_trial_url.as_deref(),
            Some("http://mock.invalid/v1/experiments/exp/trials/")
        );
    }
}
