//! Experiment/trial synchronization with the remote optimization server.
//!
//! One pass performs the first applicable step, in order:
//! 1. create the remote experiment;
//! 2. request the next trial;
//! 3. report finished trials and abandon deleted ones;
//! 4. delete the remote experiment.
//!
//! Every step that changes state ends the pass with [`ReconcileAction::Requeue`]
//! so the next pass starts from freshly read objects. Stale writes end the
//! pass the same way.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Experiment, NamespacedName, Trial, TrialConditionType, SERVER_FINALIZER};
use crate::domain::ports::{ObjectStore, OptimizationServer, ServerError};
use crate::services::experiment::{find_available_namespace, populate_trial_from_template};
use crate::services::server_mapping::{
    from_cluster, from_cluster_trial, stop_experiment, to_cluster, to_cluster_trial,
};
use crate::services::validation::validate_assignments;

/// Delay used when the server is unavailable and names no retry time.
pub const DEFAULT_UNAVAILABLE_DELAY: Duration = Duration::from_secs(5);

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Nothing left to do until something changes.
    Done,
    /// Run another pass right away.
    Requeue,
    /// Run another pass after the delay.
    RequeueAfter(Duration),
}

/// Finish an acting step: success and stale writes both redrive the pass.
pub(crate) fn requeue_conflict<T>(result: DomainResult<T>) -> DomainResult<ReconcileAction> {
    match result {
        Ok(_) => Ok(ReconcileAction::Requeue),
        Err(err) if err.is_conflict() => {
            debug!(error = %err, "stale write, requeueing");
            Ok(ReconcileAction::Requeue)
        }
        Err(err) => Err(err),
    }
}

fn ignore_not_found(result: Result<(), ServerError>) -> Result<(), ServerError> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

fn requeue_if_unavailable(err: ServerError) -> DomainResult<ReconcileAction> {
    match err {
        ServerError::Unavailable { retry_after } => Ok(ReconcileAction::RequeueAfter(
            retry_after.unwrap_or(DEFAULT_UNAVAILABLE_DELAY),
        )),
        other => Err(other.into()),
    }
}

/// Keeps experiments and trials in sync with the optimization server.
pub struct ServerReconciler<S: ?Sized, O: ?Sized> {
    store: Arc<S>,
    server: Arc<O>,
}

impl<S, O> ServerReconciler<S, O>
where
    S: ObjectStore + ?Sized,
    O: OptimizationServer + ?Sized,
{
    pub fn new(store: Arc<S>, server: Arc<O>) -> Self {
        Self { store, server }
    }

    /// Run one pass for the named experiment.
    #[instrument(skip(self), fields(experiment = %name))]
    pub async fn reconcile(&self, name: &NamespacedName) -> DomainResult<ReconcileAction> {
        let Some(mut experiment) = self.store.get_experiment(name).await? else {
            return Ok(ReconcileAction::Done);
        };

        if experiment.replicas() > 0 {
            if let Some(action) = self.create_experiment(&mut experiment).await? {
                return Ok(action);
            }
        }

        let trials = self
            .store
            .list_trials(None, &experiment.trial_selector())
            .await?;
        let active = i32::try_from(trials.iter().filter(|t| t.is_active()).count()).unwrap_or(i32::MAX);
        experiment.status.active_trials = active;

        if active < experiment.replicas() {
            if let Some(action) = self.next_trial(&mut experiment, &trials).await? {
                return Ok(action);
            }
        }

        let mut trial_has_finalizer = false;
        for trial in &trials {
            let action = if trial.is_finished() {
                self.report_trial(trial.clone()).await?
            } else if trial.metadata.is_deleted() {
                self.abandon_trial(trial.clone()).await?
            } else {
                None
            };
            if let Some(action) = action {
                return Ok(action);
            }
            trial_has_finalizer |= trial.metadata.has_finalizer(SERVER_FINALIZER);
        }

        if experiment.metadata.is_deleted() && !trial_has_finalizer {
            if let Some(action) = self.delete_experiment(experiment).await? {
                return Ok(action);
            }
        }

        Ok(ReconcileAction::Done)
    }

    async fn create_experiment(&self, experiment: &mut Experiment) -> DomainResult<Option<ReconcileAction>> {
        if experiment.experiment_url.is_some() {
            return Ok(None);
        }

        let (name, remote) = from_cluster(experiment);
        info!(experiment = %experiment.namespaced_name(), "creating remote experiment");
        let created = match self.server.create_experiment(&name, &remote).await {
            Ok(created) => created,
            Err(err) => return requeue_if_unavailable(err).map(Some),
        };

        to_cluster(experiment, &created);
        experiment.metadata.add_finalizer(SERVER_FINALIZER);
        requeue_conflict(self.store.update_experiment(experiment).await).map(Some)
    }

    async fn next_trial(
        &self,
        experiment: &mut Experiment,
        trials: &[Trial],
    ) -> DomainResult<Option<ReconcileAction>> {
        let Some(next_trial_url) = experiment.next_trial_url.clone() else {
            return Ok(None);
        };

        let Some(namespace) = find_available_namespace(self.store.as_ref(), experiment, trials).await? else {
            debug!(experiment = %experiment.namespaced_name(), "no namespace available for the next trial");
            return Ok(None);
        };
        let mut trial = populate_trial_from_template(experiment, &namespace);

        let suggestion = match self.server.next_trial(&next_trial_url).await {
            Ok(suggestion) => suggestion,
            Err(err) => {
                if stop_experiment(experiment, &err) {
                    info!(experiment = %experiment.namespaced_name(), "remote experiment stopped, no more trials");
                    return requeue_conflict(self.store.update_experiment(experiment).await).map(Some);
                }
                return requeue_if_unavailable(err).map(Some);
            }
        };

        let checked = to_cluster_trial(&mut trial, &suggestion).and_then(|()| {
            validate_assignments(&trial.spec.assignments, &experiment.spec.parameters)
                .map_err(|e| DomainError::ValidationFailed(e.to_string()))
        });
        if let Err(err) = checked {
            warn!(experiment = %experiment.namespaced_name(), error = %err, "rejecting suggestion");
            if let Some(url) = &suggestion.report_trial_url {
                ignore_not_found(self.server.abandon_running_trial(url).await)?;
            }
            return Err(err);
        }

        info!(
            experiment = %experiment.namespaced_name(),
            namespace = %trial.metadata.namespace,
            report_trial_url = ?trial.report_trial_url,
            assignments = ?trial.spec.assignments,
            "creating new trial"
        );
        trial.metadata.add_finalizer(SERVER_FINALIZER);
        self.store.create_trial(&trial).await?;
        Ok(Some(ReconcileAction::Requeue))
    }

    async fn report_trial(&self, mut trial: Trial) -> DomainResult<Option<ReconcileAction>> {
        let Some(report_trial_url) = trial.report_trial_url.take() else {
            if trial.metadata.remove_finalizer(SERVER_FINALIZER) {
                return requeue_conflict(self.store.update_trial(&trial).await).map(Some);
            }
            return Ok(None);
        };

        // Clear the intent before the non-idempotent call: a crash in between loses the report
        // instead of sending it twice.
        match self.store.update_trial(&trial).await {
            Ok(_) => {}
            Err(err) if err.is_conflict() => return Ok(Some(ReconcileAction::Requeue)),
            Err(err) => return Err(err),
        }

        let values = from_cluster_trial(&trial);
        let failure = trial
            .status
            .condition(TrialConditionType::Failed)
            .filter(|_| values.failed);
        info!(
            trial = %trial.namespaced_name(),
            report_trial_url = %report_trial_url,
            assignments = ?trial.spec.assignments,
            values = ?values.values,
            failure_reason = failure.map(|c| c.reason.as_str()),
            failure_message = failure.map(|c| c.message.as_str()),
            "reporting trial"
        );
        ignore_not_found(self.server.report_trial(&report_trial_url, &values).await)?;
        Ok(Some(ReconcileAction::Requeue))
    }

    async fn abandon_trial(&self, mut trial: Trial) -> DomainResult<Option<ReconcileAction>> {
        if !trial.metadata.remove_finalizer(SERVER_FINALIZER) {
            return Ok(None);
        }

        if let Some(url) = trial.report_trial_url.take() {
            info!(trial = %trial.namespaced_name(), report_trial_url = %url, "abandoning trial");
            if let Err(err) = ignore_not_found(self.server.abandon_running_trial(&url).await) {
                return requeue_if_unavailable(err).map(Some);
            }
        }

        requeue_conflict(self.store.update_trial(&trial).await).map(Some)
    }

    async fn delete_experiment(&self, mut experiment: Experiment) -> DomainResult<Option<ReconcileAction>> {
        if !experiment.metadata.remove_finalizer(SERVER_FINALIZER) {
            return Ok(None);
        }

        if let Some(url) = experiment.experiment_url.clone() {
            info!(experiment = %experiment.namespaced_name(), "deleting remote experiment");
            if let Err(err) = ignore_not_found(self.server.delete_experiment(&url).await) {
                return requeue_if_unavailable(err).map(Some);
            }
            experiment.experiment_url = None;
            experiment.next_trial_url = None;
        }

        requeue_conflict(self.store.update_experiment(&experiment).await).map(Some)
    }
}
