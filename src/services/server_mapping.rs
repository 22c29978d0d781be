//! Conversions between cluster objects and remote server representations.

use tracing::warn;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Assignment, ConditionStatus, Experiment, ExperimentName, Optimization, ServerExperiment,
    ServerMetric, ServerOptimization, ServerParameter, ServerValue, Trial, TrialAssignments,
    TrialConditionType, TrialValues,
};
use crate::domain::ports::ServerError;

/// Remote name and representation of a cluster experiment.
pub fn from_cluster(experiment: &Experiment) -> (ExperimentName, ServerExperiment) {
    let name = ExperimentName::new(experiment.metadata.name.clone());
    let remote = ServerExperiment {
        optimization: experiment
            .spec
            .optimization
            .iter()
            .map(|o| ServerOptimization {
                name: o.name.clone(),
                value: o.value.clone(),
            })
            .collect(),
        parameters: experiment
            .spec
            .parameters
            .iter()
            .map(|p| ServerParameter {
                baseline: p.baseline,
                ..ServerParameter::int(p.name.clone(), p.min, p.max)
            })
            .collect(),
        metrics: experiment
            .spec
            .metrics
            .iter()
            .map(|m| ServerMetric {
                name: m.name.clone(),
                minimize: m.minimize,
            })
            .collect(),
        self_url: None,
        next_trial_url: None,
    };
    (name, remote)
}

/// Copy the remote response back onto the cluster experiment.
pub fn to_cluster(experiment: &mut Experiment, remote: &ServerExperiment) {
    experiment.experiment_url.clone_from(&remote.self_url);
    experiment.next_trial_url.clone_from(&remote.next_trial_url);

    // Server side defaults only fill gaps.
    if experiment.spec.optimization.is_empty() {
        experiment.spec.optimization = remote
            .optimization
            .iter()
            .map(|o| Optimization {
                name: o.name.clone(),
                value: o.value.clone(),
            })
            .collect();
    }
}

/// Stop asking for suggestions once the remote reports the experiment exhausted.
///
/// Returns true when the experiment was changed and needs to be persisted.
pub fn stop_experiment(experiment: &mut Experiment, err: &ServerError) -> bool {
    if matches!(err, ServerError::ExperimentStopped(_)) {
        return experiment.next_trial_url.take().is_some();
    }
    false
}

/// Copy a suggestion onto a new trial.
pub fn to_cluster_trial(trial: &mut Trial, suggestion: &TrialAssignments) -> DomainResult<()> {
    let mut assignments = Vec::with_capacity(suggestion.assignments.len());
    for a in &suggestion.assignments {
        let value = a.value.as_i64().ok_or_else(|| {
            DomainError::ValidationFailed(format!(
                "assignment {} is not an integer: {}",
                a.parameter_name, a.value
            ))
        })?;
        assignments.push(Assignment::new(a.parameter_name.clone(), value));
    }
    trial.spec.assignments = assignments;
    trial.report_trial_url.clone_from(&suggestion.report_trial_url);
    Ok(())
}

/// Observation to report for a finished trial.
pub fn from_cluster_trial(trial: &Trial) -> TrialValues {
    if let Some(failed) = trial
        .status
        .condition(TrialConditionType::Failed)
        .filter(|c| c.status == ConditionStatus::True)
    {
        return TrialValues {
            failed: true,
            failure_reason: failed.reason.clone(),
            failure_message: failed.message.clone(),
            ..Default::default()
        };
    }

    let mut values = Vec::with_capacity(trial.status.values.len());
    for v in &trial.status.values {
        let Ok(value) = v.value.trim().parse::<f64>() else {
            warn!(trial = %trial.namespaced_name(), metric = %v.name, value = %v.value, "skipping unparsable value");
            continue;
        };
        let error = v.error.trim().parse::<f64>().ok();
        values.push(ServerValue {
            metric_name: v.name.clone(),
            value,
            error,
        });
    }
    TrialValues {
        values,
        ..Default::default()
    }
}
