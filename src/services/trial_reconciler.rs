//! Trial lifecycle reconciler.
//!
//! Drives a single trial from creation to completion: patches, readiness
//! gates, the trial job and finally metric capture. Like the server
//! reconciler, each pass performs at most one write and the phase and
//! summary are re-derived right before it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ConditionStatus, ControllerConfig, Experiment, Metric, MetricType, NamespacedName,
    ObjectReference, TargetObject, Trial, TrialConditionType, Value, DEFAULT_ATTEMPTS,
};
use crate::domain::ports::ObjectStore;
use crate::services::metric_capture::MetricCapture;
use crate::services::patch_engine::PatchEngine;
use crate::services::server_reconciler::{requeue_conflict, ReconcileAction};
use crate::services::trial_status::{evaluate_readiness, update_status};

const JOB_KIND: &str = "Job";
const JOB_API_VERSION: &str = "batch/v1";

/// Moves trials through patching, readiness, execution and observation.
pub struct TrialReconciler<S: ?Sized> {
    store: Arc<S>,
    patches: PatchEngine,
    metrics: MetricCapture,
    poll_interval: Duration,
    capture_retry: Duration,
}

impl<S> TrialReconciler<S>
where
    S: ObjectStore + ?Sized,
{
    pub fn new(store: Arc<S>, metrics: MetricCapture, config: &ControllerConfig) -> Self {
        Self {
            store,
            patches: PatchEngine::new(),
            metrics,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            capture_retry: Duration::from_secs(config.capture_retry_secs),
        }
    }

    /// Run one pass for the named trial.
    #[instrument(skip(self), fields(trial = %name))]
    pub async fn reconcile(&self, name: &NamespacedName) -> DomainResult<ReconcileAction> {
        let Some(mut trial) = self.store.get_trial(name).await? else {
            return Ok(ReconcileAction::Done);
        };

        if trial.is_finished() || trial.metadata.is_deleted() {
            return self.finish(trial).await;
        }

        let Some(experiment) = self.store.get_experiment(&experiment_name(&trial)).await? else {
            warn!(trial = %name, "experiment for trial not found");
            return Ok(ReconcileAction::Done);
        };

        if trial.status.condition(TrialConditionType::Patched).is_none() {
            return self.render_patches(trial, &experiment).await;
        }
        if let Some(index) = trial
            .status
            .patch_operations
            .iter()
            .position(|op| op.attempts_remaining > 0)
        {
            return self.apply_patch(trial, index).await;
        }
        if !trial.status.is_true(TrialConditionType::Patched) {
            trial.status.apply_condition(
                TrialConditionType::Patched,
                ConditionStatus::True,
                "Patched",
                "",
                Utc::now(),
            );
            return self.persist(trial).await;
        }

        if !trial.status.is_true(TrialConditionType::Ready) {
            let before = readiness(&trial);
            let delay = evaluate_readiness(self.store.as_ref(), &mut trial, Utc::now()).await?;
            let changed = readiness(&trial) != before;
            match (delay, changed) {
                (Some(delay), false) => return Ok(ReconcileAction::RequeueAfter(delay)),
                (Some(delay), true) => {
                    return self.persist_then(trial, ReconcileAction::RequeueAfter(delay)).await;
                }
                (None, true) => return self.persist(trial).await,
                (None, false) => {}
            }
        }

        if trial.status.completion_time.is_none() {
            return self.observe_job(trial).await;
        }

        self.capture_metrics(trial, &experiment).await
    }

    /// Refresh the derived status of a finished trial and remove it once its TTL expires.
    async fn finish(&self, mut trial: Trial) -> DomainResult<ReconcileAction> {
        if trial.needs_cleanup(Utc::now()) {
            info!(trial = %trial.namespaced_name(), "deleting expired trial");
            match self.store.delete_trial(&trial.namespaced_name()).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err),
            }
            return Ok(ReconcileAction::Done);
        }
        if update_status(&mut trial) {
            return requeue_conflict(self.store.update_trial(&trial).await);
        }
        Ok(ReconcileAction::Done)
    }

    async fn render_patches(&self, mut trial: Trial, experiment: &Experiment) -> DomainResult<ReconcileAction> {
        let now = Utc::now();
        match self
            .patches
            .create_patch_operations(&trial, experiment.spec.patches.iter())
        {
            Ok(operations) => {
                debug!(trial = %trial.namespaced_name(), count = operations.len(), "rendered patches");
                trial.status.patch_operations = operations;
                trial.status.apply_condition(
                    TrialConditionType::Patched,
                    ConditionStatus::False,
                    "Patching",
                    "",
                    now,
                );
            }
            Err(err) => {
                warn!(trial = %trial.namespaced_name(), error = %err, "patch rendering failed");
                trial.status.apply_condition(
                    TrialConditionType::Failed,
                    ConditionStatus::True,
                    "PatchFailed",
                    &err.to_string(),
                    now,
                );
            }
        }
        self.persist(trial).await
    }

    async fn apply_patch(&self, mut trial: Trial, index: usize) -> DomainResult<ReconcileAction> {
        let op = trial.status.patch_operations[index].clone();
        let result = self
            .store
            .patch_object(&op.target_ref, op.patch_type, &op.data)
            .await;

        let remaining = match result {
            Ok(_) => {
                info!(trial = %trial.namespaced_name(), target = %op.target_ref, "applied patch");
                0
            }
            Err(err) => {
                let remaining = op.attempts_remaining - 1;
                warn!(
                    trial = %trial.namespaced_name(),
                    target = %op.target_ref,
                    attempts_remaining = remaining,
                    error = %err,
                    "patch failed"
                );
                if remaining <= 0 {
                    trial.status.apply_condition(
                        TrialConditionType::Failed,
                        ConditionStatus::True,
                        "PatchFailed",
                        &format!("unable to patch {}: {err}", op.target_ref),
                        Utc::now(),
                    );
                }
                remaining.max(0)
            }
        };
        trial.status.patch_operations[index].attempts_remaining = remaining;
        self.persist(trial).await
    }

    /// Wait for the trial job, then track its outcome.
    async fn observe_job(&self, mut trial: Trial) -> DomainResult<ReconcileAction> {
        let reference = ObjectReference::new(
            JOB_KIND,
            JOB_API_VERSION,
            trial.metadata.namespace.clone(),
            trial.job_name(),
        );
        let Some(job) = self.store.get_object(&reference).await? else {
            debug!(trial = %trial.namespaced_name(), job = %reference, "waiting for trial job");
            return Ok(ReconcileAction::RequeueAfter(self.poll_interval));
        };

        let now = Utc::now();
        if trial.status.start_time.is_none() {
            self.apply_job_patches(&trial, &reference).await;
            trial.status.start_time = Some(job.metadata.creation_timestamp.unwrap_or(now));
            return self.persist(trial).await;
        }

        if let Some(failed) = job.condition("Failed").filter(|c| c.status == "True") {
            let reason = if failed.reason.is_empty() { "JobFailed" } else { failed.reason.as_str() };
            info!(trial = %trial.namespaced_name(), %reason, "trial job failed");
            trial.status.completion_time = Some(now);
            trial.status.apply_condition(
                TrialConditionType::Failed,
                ConditionStatus::True,
                reason,
                &failed.message,
                now,
            );
            return self.persist(trial).await;
        }
        if job.condition_is_true("Complete") {
            info!(trial = %trial.namespaced_name(), "trial job complete");
            trial.status.completion_time = Some(now);
            return self.persist(trial).await;
        }

        Ok(ReconcileAction::RequeueAfter(self.poll_interval))
    }

    /// Trial job patches only apply once the job exists; failures are not fatal.
    async fn apply_job_patches(&self, trial: &Trial, job: &ObjectReference) {
        for op in trial
            .status
            .patch_operations
            .iter()
            .filter(|op| trial.is_trial_job_reference(&op.target_ref))
        {
            if let Err(err) = self.store.patch_object(job, op.patch_type, &op.data).await {
                warn!(trial = %trial.namespaced_name(), error = %err, "unable to patch trial job");
            }
        }
    }

    async fn capture_metrics(&self, mut trial: Trial, experiment: &Experiment) -> DomainResult<ReconcileAction> {
        if trial.status.values.is_empty() {
            trial.status.values = experiment
                .spec
                .metrics
                .iter()
                .map(|m| Value {
                    name: m.name.clone(),
                    attempts_remaining: DEFAULT_ATTEMPTS,
                    ..Default::default()
                })
                .collect();
        }

        let mut retry_after: Option<Duration> = None;
        let mut failure: Option<String> = None;
        for index in 0..trial.status.values.len() {
            let value = &trial.status.values[index];
            if value.attempts_remaining <= 0 {
                continue;
            }
            let Some(metric) = experiment.spec.metrics.iter().find(|m| m.name == value.name) else {
                failure = Some(format!("metric {} is not defined", value.name));
                break;
            };

            let target = self.metric_target(&trial, metric).await?;
            match self.metrics.capture(metric, &trial, &target).await {
                Ok((v, e)) => {
                    debug!(trial = %trial.namespaced_name(), metric = %metric.name, value = v, "captured metric");
                    let value = &mut trial.status.values[index];
                    value.value = v.to_string();
                    value.error = if metric.error_query.is_some() { e.to_string() } else { String::new() };
                    value.attempts_remaining = 0;
                }
                Err(err) if err.is_retryable() && trial.status.values[index].attempts_remaining > 1 => {
                    let delay = err.retry_after().unwrap_or(self.capture_retry);
                    debug!(trial = %trial.namespaced_name(), metric = %metric.name, ?delay, error = %err, "metric not ready");
                    trial.status.values[index].attempts_remaining -= 1;
                    retry_after = Some(retry_after.map_or(delay, |d| d.min(delay)));
                }
                Err(err) => {
                    trial.status.values[index].attempts_remaining = 0;
                    failure = Some(format!("unable to capture metric {}: {err}", metric.name));
                    break;
                }
            }
        }

        let now = Utc::now();
        if let Some(message) = failure {
            warn!(trial = %trial.namespaced_name(), %message, "metric capture failed");
            trial.status.apply_condition(
                TrialConditionType::Observed,
                ConditionStatus::False,
                "MetricFailed",
                &message,
                now,
            );
            trial.status.apply_condition(
                TrialConditionType::Failed,
                ConditionStatus::True,
                "MetricFailed",
                &message,
                now,
            );
            return self.persist(trial).await;
        }

        if let Some(delay) = retry_after {
            trial.status.apply_condition(
                TrialConditionType::Observed,
                ConditionStatus::Unknown,
                "Capturing",
                "",
                now,
            );
            return self.persist_then(trial, ReconcileAction::RequeueAfter(delay)).await;
        }

        info!(trial = %trial.namespaced_name(), "trial observed");
        trial
            .status
            .apply_condition(TrialConditionType::Observed, ConditionStatus::True, "", "", now);
        trial
            .status
            .apply_condition(TrialConditionType::Complete, ConditionStatus::True, "", "", now);
        self.persist(trial).await
    }

    /// Objects a metric query may refer to.
    async fn metric_target(&self, trial: &Trial, metric: &Metric) -> DomainResult<TargetObject> {
        let namespace = trial.metadata.namespace.as_str();
        let selector = metric.selector.clone().unwrap_or_default();
        let has_url = metric.url.as_deref().is_some_and(|u| !u.is_empty());
        Ok(match metric.metric_type {
            MetricType::Pods => TargetObject::Pods(self.store.list_pods(namespace, &selector).await?),
            MetricType::Prometheus | MetricType::JsonPath if !has_url => {
                TargetObject::Services(self.store.list_services(namespace, &selector).await?)
            }
            _ => TargetObject::None,
        })
    }

    async fn persist(&self, trial: Trial) -> DomainResult<ReconcileAction> {
        self.persist_then(trial, ReconcileAction::Requeue).await
    }

    async fn persist_then(&self, mut trial: Trial, action: ReconcileAction) -> DomainResult<ReconcileAction> {
        update_status(&mut trial);
        match self.store.update_trial(&trial).await {
            Ok(_) => Ok(action),
            Err(err) if err.is_conflict() => Ok(ReconcileAction::Requeue),
            Err(err) => Err(err),
        }
    }
}

/// Ready condition without its probe time, which moves on every evaluation.
fn readiness(trial: &Trial) -> Option<(ConditionStatus, String, String)> {
    trial
        .status
        .condition(TrialConditionType::Ready)
        .map(|c| (c.status, c.reason.clone(), c.message.clone()))
}

fn experiment_name(trial: &Trial) -> NamespacedName {
    let reference = &trial.spec.experiment_ref;
    let namespace = if reference.namespace.is_empty() {
        trial.metadata.namespace.clone()
    } else {
        reference.namespace.clone()
    };
    NamespacedName::new(namespace, reference.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryObjectStore;
    use crate::domain::models::{
        Assignment, ClusterObject, MetricsConfig, ObjectCondition, Parameter, PatchTemplate,
        PatchType, TrialPhase, TrialReadinessGate,
    };
    use crate::services::experiment::populate_trial_from_template;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        store: Arc<InMemoryObjectStore>,
        reconciler: TrialReconciler<InMemoryObjectStore>,
        name: NamespacedName,
    }

    fn experiment() -> Experiment {
        let mut exp = Experiment::new("default", "exp");
        exp.spec.parameters = vec![Parameter {
            name: "replicas".to_string(),
            min: 1,
            max: 5,
            baseline: None,
        }];
        exp.spec.patches = vec![PatchTemplate {
            patch_type: PatchType::Strategic,
            patch: "spec:\n  replicas: {{ .Values.replicas }}\n".to_string(),
            target_ref: Some(ObjectReference::new("Deployment", "apps/v1", "", "web")),
        }];
        exp.spec.metrics = vec![Metric {
            name: "cost".to_string(),
            minimize: true,
            query: "{{ .Values.replicas }}".to_string(),
            ..Default::default()
        }];
        exp.spec.trial_template.job_name = Some("load".to_string());
        exp
    }

    async fn fixture(exp: Experiment) -> Fixture {
        fixture_with(exp, ControllerConfig::default()).await
    }

    async fn fixture_with(exp: Experiment, config: ControllerConfig) -> Fixture {
        let store = Arc::new(InMemoryObjectStore::new());
        store.create_experiment(&exp).await.unwrap();
        store
            .put_object(ClusterObject::new("Deployment", "apps/v1", "default", "web"))
            .await;

        let mut trial = populate_trial_from_template(&exp, "default");
        trial.spec.assignments = vec![Assignment::new("replicas", 2)];
        let trial = store.create_trial(&trial).await.unwrap();

        let metrics = MetricCapture::new(MetricsConfig::default()).unwrap();
        Fixture {
            reconciler: TrialReconciler::new(store.clone(), metrics, &config),
            store,
            name: trial.namespaced_name(),
        }
    }

    /// Run passes until the reconciler stops asking for an immediate requeue.
    async fn drive(f: &Fixture) -> ReconcileAction {
        for _ in 0..20 {
            let action = f.reconciler.reconcile(&f.name).await.unwrap();
            if action != ReconcileAction::Requeue {
                return action;
            }
        }
        panic!("reconciler did not settle");
    }

    async fn trial(f: &Fixture) -> Trial {
        f.store.get_trial(&f.name).await.unwrap().unwrap()
    }

    fn job(conditions: &[(&str, &str)]) -> ClusterObject {
        let mut job = ClusterObject::new(JOB_KIND, JOB_API_VERSION, "default", "load");
        job.conditions = conditions
            .iter()
            .map(|(t, s)| ObjectCondition {
                condition_type: (*t).to_string(),
                status: (*s).to_string(),
                ..Default::default()
            })
            .collect();
        job
    }

    #[tokio::test]
    async fn test_trial_lifecycle() {
        let f = fixture(experiment()).await;
        let poll = Duration::from_millis(ControllerConfig::default().poll_interval_ms);

        // Patched, then waiting for the job.
        assert_eq!(drive(&f).await, ReconcileAction::RequeueAfter(poll));
        let t = trial(&f).await;
        assert!(t.status.is_true(TrialConditionType::Patched));
        assert_eq!(t.status.patch_operations[0].attempts_remaining, 0);
        let deployment = f
            .store
            .get_object(&ObjectReference::new("Deployment", "apps/v1", "default", "web"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deployment.data["spec"], json!({"replicas": 2}));

        f.store.put_object(job(&[])).await;
        assert_eq!(drive(&f).await, ReconcileAction::RequeueAfter(poll));
        let t = trial(&f).await;
        assert!(t.status.start_time.is_some());
        assert_eq!(t.status.phase, TrialPhase::Running);

        f.store.put_object(job(&[("Complete", "True")])).await;
        assert_eq!(drive(&f).await, ReconcileAction::Done);
        let t = trial(&f).await;
        assert_eq!(t.status.phase, TrialPhase::Completed);
        assert!(t.status.is_true(TrialConditionType::Observed));
        assert_eq!(t.status.values[0].value, "2");
        assert_eq!(t.status.summary, "cost=2");
    }

    #[tokio::test]
    async fn test_missing_patch_target_fails_after_attempts() {
        let mut exp = experiment();
        exp.spec.patches[0].target_ref = Some(ObjectReference::new("Deployment", "apps/v1", "", "missing"));
        let f = fixture(exp).await;

        assert_eq!(drive(&f).await, ReconcileAction::Done);
        let t = trial(&f).await;
        assert_eq!(t.status.phase, TrialPhase::Failed);
        assert_eq!(t.status.patch_operations[0].attempts_remaining, 0);
        let failed = t.status.condition(TrialConditionType::Failed).unwrap();
        assert_eq!(failed.reason, "PatchFailed");
        assert_eq!(t.status.summary, failed.message);
    }

    #[tokio::test]
    async fn test_patch_render_failure() {
        let mut exp = experiment();
        exp.spec.patches[0].patch = "{{ nope }}".to_string();
        let f = fixture(exp).await;

        assert_eq!(drive(&f).await, ReconcileAction::Done);
        let t = trial(&f).await;
        assert_eq!(t.status.condition(TrialConditionType::Failed).unwrap().reason, "PatchFailed");
    }

    #[tokio::test]
    async fn test_waits_for_readiness_gates() {
        let mut exp = experiment();
        exp.spec.trial_template.readiness_gates = vec![TrialReadinessGate {
            kind: "Deployment".to_string(),
            api_version: "apps/v1".to_string(),
            name: "web".to_string(),
            condition_types: vec!["Available".to_string()],
            period_seconds: 3,
        }];
        let f = fixture(exp).await;

        assert_eq!(drive(&f).await, ReconcileAction::RequeueAfter(Duration::from_secs(3)));
        let t = trial(&f).await;
        assert!(!t.status.is_true(TrialConditionType::Ready));
        // Still waiting: nothing new to write.
        let version = t.metadata.resource_version;
        assert_eq!(drive(&f).await, ReconcileAction::RequeueAfter(Duration::from_secs(3)));
        assert_eq!(trial(&f).await.metadata.resource_version, version);
    }

    #[tokio::test]
    async fn test_job_failure_fails_trial() {
        let f = fixture(experiment()).await;
        f.store.put_object(job(&[])).await;
        drive(&f).await;

        let mut failed = job(&[]);
        failed.conditions.push(ObjectCondition {
            condition_type: "Failed".to_string(),
            status: "True".to_string(),
            reason: "BackoffLimitExceeded".to_string(),
            message: "Job has reached the specified backoff limit".to_string(),
        });
        f.store.put_object(failed).await;

        assert_eq!(drive(&f).await, ReconcileAction::Done);
        let t = trial(&f).await;
        assert_eq!(t.status.phase, TrialPhase::Failed);
        assert_eq!(t.status.summary, "Job has reached the specified backoff limit");
        assert!(t.status.values.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_metric_value_fails_trial() {
        let mut exp = experiment();
        exp.spec.metrics[0].query = "fast".to_string();
        let f = fixture(exp).await;
        f.store.put_object(job(&[("Complete", "True")])).await;

        assert_eq!(drive(&f).await, ReconcileAction::Done);
        let t = trial(&f).await;
        assert_eq!(t.status.condition(TrialConditionType::Failed).unwrap().reason, "MetricFailed");
        assert!(!t.status.is_true(TrialConditionType::Observed));
    }

    #[tokio::test]
    async fn test_expired_trial_is_deleted() {
        let mut exp = experiment();
        exp.spec.trial_template.ttl_seconds_after_finished = Some(0);
        let f = fixture(exp).await;
        f.store.put_object(job(&[("Complete", "True")])).await;

        assert_eq!(drive(&f).await, ReconcileAction::Done);
        assert!(f.store.get_trial(&f.name).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_trial_is_done() {
        let f = fixture(experiment()).await;
        let other = NamespacedName::new("default", "nope");
        assert_eq!(f.reconciler.reconcile(&other).await.unwrap(), ReconcileAction::Done);
    }

    fn prometheus_experiment(address: String) -> Experiment {
        let mut exp = experiment();
        exp.spec.metrics = vec![Metric {
            name: "latency".to_string(),
            minimize: true,
            metric_type: MetricType::Prometheus,
            query: "scalar(latency)".to_string(),
            url: Some(address),
            ..Default::default()
        }];
        exp
    }

    fn scalar(value: &str) -> serde_json::Value {
        json!({"status": "success", "data": {"resultType": "scalar", "result": [1595471900.283, value]}})
    }

    fn targets(last_scrape: &str) -> serde_json::Value {
        json!({
            "status": "success",
            "data": {"activeTargets": [{"health": "up", "lastScrape": last_scrape}]}
        })
    }

    #[tokio::test]
    async fn test_metric_capture_retries_until_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/targets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(targets("2020-07-23T02:30:00Z")))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/targets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(targets("2999-01-01T00:00:00Z")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(scalar("42")))
            .mount(&server)
            .await;

        let config = ControllerConfig {
            capture_retry_secs: 30,
            ..ControllerConfig::default()
        };
        let f = fixture_with(prometheus_experiment(server.uri()), config).await;
        f.store.put_object(job(&[("Complete", "True")])).await;

        // The scrape delay wins over the configured fallback.
        let scrape_delay = ReconcileAction::RequeueAfter(Duration::from_secs(5));
        assert_eq!(drive(&f).await, scrape_delay);
        let t = trial(&f).await;
        assert_eq!(t.status.values[0].attempts_remaining, DEFAULT_ATTEMPTS - 1);
        let observed = t.status.condition(TrialConditionType::Observed).unwrap();
        assert_eq!(observed.status, ConditionStatus::Unknown);
        assert_eq!(observed.reason, "Capturing");
        assert!(!t.is_finished());

        assert_eq!(f.reconciler.reconcile(&f.name).await.unwrap(), scrape_delay);
        assert_eq!(trial(&f).await.status.values[0].attempts_remaining, DEFAULT_ATTEMPTS - 2);

        assert_eq!(drive(&f).await, ReconcileAction::Done);
        let t = trial(&f).await;
        assert_eq!(t.status.phase, TrialPhase::Completed);
        assert!(t.status.is_true(TrialConditionType::Observed));
        assert_eq!(t.status.values[0].value, "42");
        assert_eq!(t.status.values[0].attempts_remaining, 0);
    }

    #[tokio::test]
    async fn test_metric_capture_fails_when_attempts_run_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(scalar("NaN")))
            .mount(&server)
            .await;

        let config = ControllerConfig {
            capture_retry_secs: 30,
            ..ControllerConfig::default()
        };
        let f = fixture_with(prometheus_experiment(server.uri()), config).await;
        f.store.put_object(job(&[("Complete", "True")])).await;

        let fallback = ReconcileAction::RequeueAfter(Duration::from_secs(30));
        assert_eq!(drive(&f).await, fallback);
        assert_eq!(f.reconciler.reconcile(&f.name).await.unwrap(), fallback);
        assert_eq!(trial(&f).await.status.values[0].attempts_remaining, 1);

        assert_eq!(drive(&f).await, ReconcileAction::Done);
        let t = trial(&f).await;
        assert_eq!(t.status.phase, TrialPhase::Failed);
        assert_eq!(t.status.values[0].attempts_remaining, 0);
        assert_eq!(t.status.condition(TrialConditionType::Failed).unwrap().reason, "MetricFailed");
        let observed = t.status.condition(TrialConditionType::Observed).unwrap();
        assert_eq!(observed.status, ConditionStatus::False);
        assert_eq!(observed.reason, "MetricFailed");
    }

    #[tokio::test]
    async fn test_trial_job_patch_applied_when_job_appears() {
        let mut exp = experiment();
        exp.spec.patches.push(PatchTemplate {
            patch_type: PatchType::Strategic,
            patch: "spec:\n  parallelism: {{ .Values.replicas }}\n".to_string(),
            target_ref: Some(ObjectReference::new("Job", "", "", "load")),
        });
        let f = fixture(exp).await;
        let poll = ReconcileAction::RequeueAfter(Duration::from_millis(
            ControllerConfig::default().poll_interval_ms,
        ));

        assert_eq!(drive(&f).await, poll);
        let t = trial(&f).await;
        assert_eq!(t.status.patch_operations.len(), 2);
        assert_eq!(t.status.patch_operations[1].attempts_remaining, 0);

        f.store.put_object(job(&[])).await;
        assert_eq!(drive(&f).await, poll);
        assert!(trial(&f).await.status.start_time.is_some());

        let reference = ObjectReference::new(JOB_KIND, JOB_API_VERSION, "default", "load");
        let patched = f.store.get_object(&reference).await.unwrap().unwrap();
        assert_eq!(patched.data["spec"]["parallelism"], json!(2));
        assert!(f
            .store
            .applied_patches()
            .await
            .iter()
            .any(|p| p.target == reference));
    }
}
