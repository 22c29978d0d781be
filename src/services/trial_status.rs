//! Trial status state machine.
//!
//! The phase is recomputed from the condition list on every pass; nothing
//! else about the trial feeds into it apart from its start time.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ConditionStatus, ObjectReference, Trial, TrialConditionType, TrialPhase, TrialReadinessGate,
};
use crate::domain::ports::ObjectStore;

fn has_run_activity(trial: &Trial) -> bool {
    trial.status.is_true(TrialConditionType::Ready)
        || trial.status.start_time.is_some()
        || trial.status.condition(TrialConditionType::Observed).is_some()
}

/// Derive the lifecycle phase from the trial's conditions.
pub fn derive_phase(trial: &Trial) -> TrialPhase {
    let status = &trial.status;
    if status.is_true(TrialConditionType::Failed) {
        return TrialPhase::Failed;
    }
    if status.is_true(TrialConditionType::Complete) {
        return TrialPhase::Completed;
    }

    let (setup_created, has_setup_created) =
        status.check_condition(TrialConditionType::SetupCreated, ConditionStatus::True);
    let has_setup_deleted = status.condition(TrialConditionType::SetupDeleted).is_some();

    if has_setup_created || has_setup_deleted {
        return match (setup_created, has_run_activity(trial)) {
            (true, true) => TrialPhase::Running,
            (true, false) => TrialPhase::SetupCreated,
            (false, _) => TrialPhase::SettingUp,
        };
    }

    if has_run_activity(trial) {
        TrialPhase::Running
    } else {
        TrialPhase::Created
    }
}

/// Human readable summary: the failure message, or the captured values.
pub fn summarize(trial: &Trial) -> String {
    if let Some(failed) = trial
        .status
        .condition(TrialConditionType::Failed)
        .filter(|c| c.status == ConditionStatus::True)
    {
        return failed.message.clone();
    }

    trial
        .status
        .values
        .iter()
        .filter(|v| v.attempts_remaining == 0)
        .map(|v| format!("{}={}", v.name, v.value))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Write the derived phase and summary onto the trial; returns true on change.
pub fn update_status(trial: &mut Trial) -> bool {
    let phase = derive_phase(trial);
    let summary = summarize(trial);
    let changed = trial.status.phase != phase || trial.status.summary != summary;
    trial.status.phase = phase;
    trial.status.summary = summary;
    changed
}

fn gate_reference(trial: &Trial, gate: &TrialReadinessGate) -> ObjectReference {
    ObjectReference::new(
        gate.kind.clone(),
        gate.api_version.clone(),
        trial.metadata.namespace.clone(),
        gate.name.clone(),
    )
}

/// Check every readiness gate and record the outcome as the `Ready` condition.
///
/// Returns the delay before the next check when the trial is not ready yet.
/// Trials without gates are left untouched.
pub async fn evaluate_readiness<S>(
    store: &S,
    trial: &mut Trial,
    now: DateTime<Utc>,
) -> DomainResult<Option<Duration>>
where
    S: ObjectStore + ?Sized,
{
    if trial.spec.readiness_gates.is_empty() {
        return Ok(None);
    }

    for gate in &trial.spec.readiness_gates {
        let reference = gate_reference(trial, gate);
        let unmet = match store.get_object(&reference).await? {
            None => Some(format!("waiting for {reference}")),
            Some(object) => gate
                .condition_types
                .iter()
                .find(|c| !object.condition_is_true(c))
                .map(|c| format!("waiting for {reference} to be {c}")),
        };

        if let Some(message) = unmet {
            debug!(trial = %trial.namespaced_name(), %message, "trial not ready");
            trial.status.apply_condition(
                TrialConditionType::Ready,
                ConditionStatus::False,
                "Waiting",
                &message,
                now,
            );
            let period = u64::try_from(gate.period_seconds.max(1)).unwrap_or(1);
            return Ok(Some(Duration::from_secs(period)));
        }
    }

    trial
        .status
        .apply_condition(TrialConditionType::Ready, ConditionStatus::True, "Ready", "", now);
    Ok(None)
}
