//! Controller manager.
//!
//! Schedules reconciliation passes per experiment. A pass reconciles every
//! trial of the experiment and then the experiment itself. Passes for the
//! same experiment never overlap; different experiments run concurrently up
//! to the configured limit.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ControllerConfig, NamespacedName, Trial};
use crate::domain::ports::{ObjectStore, OptimizationServer};
use crate::services::metric_capture::MetricCapture;
use crate::services::server_reconciler::{ReconcileAction, ServerReconciler};
use crate::services::trial_reconciler::TrialReconciler;

/// Combine two pass outcomes; the most urgent one wins.
fn merge(a: ReconcileAction, b: ReconcileAction) -> ReconcileAction {
    use ReconcileAction::{Done, Requeue, RequeueAfter};
    match (a, b) {
        (Requeue, _) | (_, Requeue) => Requeue,
        (RequeueAfter(x), RequeueAfter(y)) => RequeueAfter(x.min(y)),
        (RequeueAfter(d), Done) | (Done, RequeueAfter(d)) => RequeueAfter(d),
        (Done, Done) => Done,
    }
}

/// Pending experiments keyed by name, with the earliest time each is due.
#[derive(Debug, Default)]
struct WorkQueue {
    due: HashMap<NamespacedName, Instant>,
    in_flight: HashSet<NamespacedName>,
}

impl WorkQueue {
    /// Schedule a pass; an earlier existing schedule is kept.
    fn add(&mut self, name: NamespacedName, at: Instant) {
        self.due
            .entry(name)
            .and_modify(|t| *t = (*t).min(at))
            .or_insert(at);
    }

    /// Take the most overdue experiment that is not already running.
    fn pop_ready(&mut self, now: Instant) -> Option<NamespacedName> {
        let name = self
            .due
            .iter()
            .filter(|(name, at)| **at <= now && !self.in_flight.contains(*name))
            .min_by_key(|(_, at)| **at)
            .map(|(name, _)| name.clone())?;
        self.due.remove(&name);
        self.in_flight.insert(name.clone());
        Some(name)
    }

    fn next_due(&self) -> Option<Instant> {
        self.due
            .iter()
            .filter(|(name, _)| !self.in_flight.contains(*name))
            .map(|(_, at)| *at)
            .min()
    }

    fn finish(&mut self, name: &NamespacedName) {
        self.in_flight.remove(name);
    }

    fn is_idle(&self) -> bool {
        self.due.is_empty() && self.in_flight.is_empty()
    }
}

/// Both reconcilers for one experiment pass.
struct Reconcilers<S: ?Sized, O: ?Sized> {
    store: Arc<S>,
    server: ServerReconciler<S, O>,
    trials: TrialReconciler<S>,
}

impl<S, O> Reconcilers<S, O>
where
    S: ObjectStore + ?Sized,
    O: OptimizationServer + ?Sized,
{
    #[instrument(skip(self), fields(experiment = %name))]
    async fn reconcile(&self, name: &NamespacedName) -> DomainResult<ReconcileAction> {
        let mut action = ReconcileAction::Done;
        let mut trial_error = None;

        if let Some(experiment) = self.store.get_experiment(name).await? {
            let trials = self
                .store
                .list_trials(None, &experiment.trial_selector())
                .await?;
            for trial in trials.iter().map(Trial::namespaced_name) {
                match self.trials.reconcile(&trial).await {
                    Ok(trial_action) => action = merge(action, trial_action),
                    Err(err) => {
                        warn!(%trial, error = %err, "trial reconcile failed");
                        trial_error.get_or_insert(err);
                    }
                }
            }
        }

        let server_action = self.server.reconcile(name).await?;
        if let Some(err) = trial_error {
            return Err(err);
        }
        Ok(merge(action, server_action))
    }
}

/// Runs reconciliation passes until shut down.
pub struct ControllerManager<S: ?Sized, O: ?Sized> {
    store: Arc<S>,
    reconcilers: Arc<Reconcilers<S, O>>,
    config: ControllerConfig,
}

impl<S, O> ControllerManager<S, O>
where
    S: ObjectStore + ?Sized + 'static,
    O: OptimizationServer + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, server: Arc<O>, metrics: MetricCapture, config: ControllerConfig) -> Self {
        let reconcilers = Reconcilers {
            store: store.clone(),
            server: ServerReconciler::new(store.clone(), server),
            trials: TrialReconciler::new(store.clone(), metrics, &config),
        };
        Self {
            store,
            reconcilers: Arc::new(reconcilers),
            config,
        }
    }

    /// Reconcile until `shutdown` resolves; passes already running are allowed to finish.
    pub async fn run<F>(&self, shutdown: F) -> DomainResult<()>
    where
        F: Future<Output = ()>,
    {
        self.drive(shutdown, false).await
    }

    /// Reconcile until no experiment has work left, or `shutdown` resolves.
    pub async fn run_until_idle<F>(&self, shutdown: F) -> DomainResult<()>
    where
        F: Future<Output = ()>,
    {
        self.drive(shutdown, true).await
    }

    async fn drive<F>(&self, shutdown: F, stop_when_idle: bool) -> DomainResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let max_concurrent = self.config.max_concurrent_reconciles.max(1);
        let mut queue = WorkQueue::default();
        let mut backoffs: HashMap<NamespacedName, ExponentialBackoff> = HashMap::new();
        let mut tasks = JoinSet::new();
        let mut running: HashMap<Id, NamespacedName> = HashMap::new();

        let mut resync = tokio::time::interval(Duration::from_secs(self.config.resync_interval_secs.max(1)));
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut synced = false;

        info!(max_concurrent, stop_when_idle, "controller started");
        loop {
            let now = Instant::now();
            while tasks.len() < max_concurrent {
                let Some(name) = queue.pop_ready(now) else {
                    break;
                };
                let reconcilers = self.reconcilers.clone();
                let key = name.clone();
                let handle = tasks.spawn(async move { reconcilers.reconcile(&key).await });
                running.insert(handle.id(), name);
            }

            if stop_when_idle && synced && queue.is_idle() && tasks.is_empty() {
                info!("no work left");
                break;
            }

            let next_due = queue.next_due().filter(|_| tasks.len() < max_concurrent);
            tokio::select! {
                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown requested");
                    break;
                }
                _ = resync.tick() => {
                    match self.store.list_experiments().await {
                        Ok(experiments) => {
                            debug!(count = experiments.len(), "resync");
                            for experiment in experiments {
                                queue.add(experiment.namespaced_name(), now);
                            }
                            synced = true;
                        }
                        Err(err) => error!(error = %err, "failed to list experiments"),
                    }
                }
                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    self.complete(joined, &mut running, &mut queue, &mut backoffs);
                }
                () = sleep_until(next_due.unwrap_or(now)), if next_due.is_some() => {}
            }
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            self.complete(joined, &mut running, &mut queue, &mut backoffs);
        }
        info!("controller stopped");
        Ok(())
    }

    fn complete(
        &self,
        joined: Result<(Id, DomainResult<ReconcileAction>), JoinError>,
        running: &mut HashMap<Id, NamespacedName>,
        queue: &mut WorkQueue,
        backoffs: &mut HashMap<NamespacedName, ExponentialBackoff>,
    ) {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(err) => {
                error!(error = %err, "reconcile task aborted");
                (err.id(), Err(DomainError::ExecutionFailed(err.to_string())))
            }
        };
        let Some(name) = running.remove(&id) else {
            return;
        };
        queue.finish(&name);

        let now = Instant::now();
        match result {
            Ok(action) => {
                backoffs.remove(&name);
                match action {
                    ReconcileAction::Done => debug!(experiment = %name, "reconciled"),
                    ReconcileAction::Requeue => queue.add(name, now),
                    ReconcileAction::RequeueAfter(delay) => queue.add(name, now + delay),
                }
            }
            Err(err) => {
                let max_backoff = Duration::from_millis(self.config.max_backoff_ms);
                let delay = backoffs
                    .entry(name.clone())
                    .or_insert_with(|| self.backoff())
                    .next_backoff()
                    .unwrap_or(max_backoff);
                error!(experiment = %name, error = %err, retry_in = ?delay, "reconcile failed");
                queue.add(name, now + delay);
            }
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.config.max_backoff_ms))
            .with_max_elapsed_time(None)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryObjectStore;
    use crate::adapters::server::{MockOptimizationServer, MockSuggestion};
    use crate::domain::models::{
        Assignment, ClusterObject, Experiment, Metric, MetricsConfig, ObjectCondition, ObjectReference,
        Parameter, PatchTemplate, PatchType, TrialPhase,
    };
    use crate::services::experiment::populate_trial_from_template;

    #[test]
    fn test_merge_prefers_most_urgent() {
        use ReconcileAction::{Done, Requeue, RequeueAfter};
        let s = Duration::from_secs;
        assert_eq!(merge(Done, Done), Done);
        assert_eq!(merge(Done, RequeueAfter(s(3))), RequeueAfter(s(3)));
        assert_eq!(merge(RequeueAfter(s(5)), RequeueAfter(s(3))), RequeueAfter(s(3)));
        assert_eq!(merge(RequeueAfter(s(5)), Requeue), Requeue);
    }

    #[test]
    fn test_work_queue_skips_in_flight() {
        let now = Instant::now();
        let a = NamespacedName::new("default", "a");
        let b = NamespacedName::new("default", "b");
        let mut queue = WorkQueue::default();

        queue.add(a.clone(), now);
        queue.add(b.clone(), now + Duration::from_secs(60));
        assert_eq!(queue.pop_ready(now), Some(a.clone()));
        assert_eq!(queue.pop_ready(now), None);

        // Re-adding a running experiment waits for the running pass.
        queue.add(a.clone(), now);
        assert_eq!(queue.pop_ready(now), None);
        assert_eq!(queue.next_due(), Some(now + Duration::from_secs(60)));

        queue.finish(&a);
        assert_eq!(queue.pop_ready(now), Some(a.clone()));
        queue.finish(&a);

        // The earlier schedule wins.
        queue.add(b.clone(), now);
        assert_eq!(queue.pop_ready(now), Some(b.clone()));
        queue.finish(&b);
        assert!(queue.is_idle());
    }

    fn experiment() -> Experiment {
        let mut exp = Experiment::new("default", "exp");
        exp.spec.parameters = vec![Parameter {
            name: "cpu".to_string(),
            min: 100,
            max: 1000,
            baseline: None,
        }];
        exp.spec.metrics = vec![Metric {
            name: "cost".to_string(),
            minimize: true,
            query: "{{ .Values.cpu }}".to_string(),
            ..Default::default()
        }];
        exp.spec.trial_template.job_name = Some("load".to_string());
        exp
    }

    fn manager(
        store: &Arc<InMemoryObjectStore>,
        server: &Arc<MockOptimizationServer>,
    ) -> ControllerManager<InMemoryObjectStore, MockOptimizationServer> {
        let config = ControllerConfig {
            poll_interval_ms: 10,
            ..Default::default()
        };
        let metrics = MetricCapture::new(MetricsConfig::default()).unwrap();
        ControllerManager::new(store.clone(), server.clone(), metrics, config)
    }

    #[tokio::test]
    async fn test_runs_experiment_to_completion() {
        let store = Arc::new(InMemoryObjectStore::new());
        let server = Arc::new(MockOptimizationServer::new());
        server.push_suggestion(MockSuggestion::Assign(vec![("cpu".to_string(), 250)])).await;
        store.create_experiment(&experiment()).await.unwrap();

        let mut job = ClusterObject::new("Job", "batch/v1", "default", "load");
        job.conditions.push(ObjectCondition {
            condition_type: "Complete".to_string(),
            status: "True".to_string(),
            ..Default::default()
        });
        store.put_object(job).await;

        let manager = manager(&store, &server);
        tokio::time::timeout(Duration::from_secs(10), manager.run_until_idle(std::future::pending()))
            .await
            .expect("controller should go idle")
            .unwrap();

        let reported = server.reported().await;
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].1.values[0].value, 250.0);

        let exp = store
            .get_experiment(&NamespacedName::new("default", "exp"))
            .await
            .unwrap()
            .unwrap();
        assert!(exp.next_trial_url.is_none());
        let trials = store.list_trials(None, &exp.trial_selector()).await.unwrap();
        assert_eq!(trials.len(), 1);
        assert_eq!(trials[0].status.phase, TrialPhase::Completed);
        assert!(trials[0].metadata.finalizers.is_empty());
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let store = Arc::new(InMemoryObjectStore::new());
        let server = Arc::new(MockOptimizationServer::new());
        store.create_experiment(&experiment()).await.unwrap();

        let manager = manager(&store, &server);
        tokio::time::timeout(Duration::from_secs(5), manager.run(async {}))
            .await
            .expect("controller should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_trials_reconciled_in_order() {
        let store = Arc::new(InMemoryObjectStore::new());
        let server = Arc::new(MockOptimizationServer::new());
        let mut exp = experiment();
        exp.spec.patches = vec![PatchTemplate {
            patch_type: PatchType::Merge,
            patch: "spec:\n  cpu: {{ .Values.cpu }}\n".to_string(),
            target_ref: Some(ObjectReference::new("Deployment", "apps/v1", "", "web")),
        }];
        store.create_experiment(&exp).await.unwrap();
        store
            .put_object(ClusterObject::new("Deployment", "apps/v1", "default", "web"))
            .await;
        for (name, cpu) in [("exp-c", 300), ("exp-a", 100), ("exp-b", 200)] {
            let mut trial = populate_trial_from_template(&exp, "default");
            trial.metadata.name = name.to_string();
            trial.spec.assignments = vec![Assignment::new("cpu", cpu)];
            store.create_trial(&trial).await.unwrap();
        }

        let manager = manager(&store, &server);
        let name = NamespacedName::new("default", "exp");
        // Render, then apply.
        manager.reconcilers.reconcile(&name).await.unwrap();
        manager.reconcilers.reconcile(&name).await.unwrap();

        let applied: Vec<String> = store
            .applied_patches()
            .await
            .into_iter()
            .map(|p| p.data)
            .collect();
        assert_eq!(
            applied,
            vec![
                r#"{"spec":{"cpu":100}}"#.to_string(),
                r#"{"spec":{"cpu":200}}"#.to_string(),
                r#"{"spec":{"cpu":300}}"#.to_string(),
            ]
        );
    }
}
