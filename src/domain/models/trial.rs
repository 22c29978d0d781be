//! Trial domain model.
//!
//! A trial is one concrete parameter assignment applied to live workloads.
//! Its lifecycle is tracked entirely through timestamped conditions; the
//! phase and summary stored in the status are derived from them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::experiment::PatchType;
use super::meta::{NamespacedName, ObjectMeta, ObjectReference};

/// Default number of attempts for patches and metric captures.
pub const DEFAULT_ATTEMPTS: i32 = 3;

/// Lifecycle phase derived from the trial conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TrialPhase {
    #[default]
    Created,
    SettingUp,
    SetupCreated,
    Running,
    Completed,
    Failed,
}

impl TrialPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::SettingUp => "Setting up",
            Self::SetupCreated => "Setup created",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TrialPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TrialConditionType {
    Complete,
    Failed,
    SetupCreated,
    SetupDeleted,
    Patched,
    Ready,
    Observed,
}

impl TrialConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "Complete",
            Self::Failed => "Failed",
            Self::SetupCreated => "SetupCreated",
            Self::SetupDeleted => "SetupDeleted",
            Self::Patched => "Patched",
            Self::Ready => "Ready",
            Self::Observed => "Observed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialCondition {
    #[serde(rename = "type")]
    pub condition_type: TrialConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_probe_time: DateTime<Utc>,
    pub last_transition_time: DateTime<Utc>,
}

/// Object whose conditions must all be true before the trial is ready.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialReadinessGate {
    pub kind: String,

    #[serde(default)]
    pub api_version: String,

    pub name: String,

    #[serde(default)]
    pub condition_types: Vec<String>,

    /// Seconds between readiness checks.
    #[serde(default = "default_period_seconds")]
    pub period_seconds: i64,
}

const fn default_period_seconds() -> i64 {
    5
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Assignment {
    pub name: String,
    pub value: i64,
}

impl Assignment {
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Captured (or pending) metric value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Value {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default)]
    pub attempts_remaining: i32,
}

/// Rendered patch waiting to be (or already) applied to a target object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchOperation {
    pub target_ref: ObjectReference,
    pub patch_type: PatchType,
    /// Rendered JSON body.
    pub data: String,
    pub attempts_remaining: i32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialSpec {
    #[serde(default)]
    pub experiment_ref: ObjectReference,

    #[serde(default)]
    pub assignments: Vec<Assignment>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readiness_gates: Vec<TrialReadinessGate>,

    /// Name of the trial job; the trial name is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_failure: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialStatus {
    #[serde(default)]
    pub phase: TrialPhase,

    #[serde(default)]
    pub summary: String,

    #[serde(default)]
    pub conditions: Vec<TrialCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub values: Vec<Value>,

    #[serde(default)]
    pub patch_operations: Vec<PatchOperation>,
}

impl TrialStatus {
    /// Update an existing condition or append a new one.
    ///
    /// The transition time only moves when the status changes; repeated
    /// observations of the same status refresh the probe time instead.
    pub fn apply_condition(
        &mut self,
        condition_type: TrialConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        time: DateTime<Utc>,
    ) {
        if let Some(c) = self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            if c.status == status {
                c.last_probe_time = time;
                if c.reason != reason {
                    c.reason = reason.to_string();
                    c.message = message.to_string();
                }
            } else {
                c.status = status;
                c.reason = reason.to_string();
                c.message = message.to_string();
                c.last_transition_time = time;
            }
            return;
        }

        self.conditions.push(TrialCondition {
            condition_type,
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_probe_time: time,
            last_transition_time: time,
        });
    }

    /// Returns `(matches, exists)` for the named condition.
    pub fn check_condition(
        &self,
        condition_type: TrialConditionType,
        status: ConditionStatus,
    ) -> (bool, bool) {
        self.condition(condition_type)
            .map_or((false, false), |c| (c.status == status, true))
    }

    pub fn condition(&self, condition_type: TrialConditionType) -> Option<&TrialCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    pub fn is_true(&self, condition_type: TrialConditionType) -> bool {
        self.check_condition(condition_type, ConditionStatus::True).0
    }
}

/// One concrete parameter assignment under evaluation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: TrialSpec,

    #[serde(default)]
    pub status: TrialStatus,

    /// Present while the remote server still expects a report for this trial.
    #[serde(default, rename = "reportTrialURL", skip_serializing_if = "Option::is_none")]
    pub report_trial_url: Option<String>,
}

impl Trial {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            ..Default::default()
        }
    }

    pub fn namespaced_name(&self) -> NamespacedName {
        self.metadata.namespaced_name()
    }

    /// A trial is finished once it is either complete or failed.
    pub fn is_finished(&self) -> bool {
        self.status.is_true(TrialConditionType::Complete)
            || self.status.is_true(TrialConditionType::Failed)
    }

    /// Unfinished trials are active, as are finished trials whose setup deletion is pending.
    pub fn is_active(&self) -> bool {
        if !self.is_finished() {
            return true;
        }
        self.status.conditions.iter().any(|c| {
            c.condition_type == TrialConditionType::SetupDeleted && c.status != ConditionStatus::True
        })
    }

    /// Deleted before it finished.
    pub fn is_abandoned(&self) -> bool {
        !self.is_finished() && self.metadata.is_deleted()
    }

    /// Name of the job object that runs this trial.
    pub fn job_name(&self) -> &str {
        self.spec
            .job_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.metadata.name)
    }

    /// Check whether a reference points at this trial's job.
    ///
    /// The kind must be `Job`; the API version and namespace may be omitted;
    /// the name must equal the trial job name exactly.
    pub fn is_trial_job_reference(&self, reference: &ObjectReference) -> bool {
        if reference.kind != "Job" {
            return false;
        }
        if !reference.api_version.is_empty() && reference.api_version != "batch/v1" {
            return false;
        }
        if !reference.namespace.is_empty() && reference.namespace != self.metadata.namespace {
            return false;
        }
        reference.name == self.job_name()
    }

    /// Environment variables exposing the assignments to the trial job.
    pub fn assignment_env(&self) -> BTreeMap<String, String> {
        self.spec
            .assignments
            .iter()
            .map(|a| (a.name.to_uppercase().replace('.', "_"), a.value.to_string()))
            .collect()
    }

    /// True when a finished trial has outlived its TTL.
    pub fn needs_cleanup(&self, now: DateTime<Utc>) -> bool {
        if self.metadata.is_deleted() || self.is_active() {
            return false;
        }

        let mut ttl = self.spec.ttl_seconds_after_finished;
        let mut finish_time: Option<DateTime<Utc>> = None;
        for c in &self.status.conditions {
            let counts = matches!(
                c.condition_type,
                TrialConditionType::Complete
                    | TrialConditionType::Failed
                    | TrialConditionType::SetupDeleted
            ) && c.status == ConditionStatus::True;
            if !counts {
                continue;
            }
            if c.condition_type == TrialConditionType::Failed
                && self.spec.ttl_seconds_after_failure.is_some()
            {
                ttl = self.spec.ttl_seconds_after_failure;
            }
            if finish_time.is_none_or(|t| t < c.last_transition_time) {
                finish_time = Some(c.last_transition_time);
            }
        }

        match (finish_time, ttl) {
            (Some(finished), Some(seconds)) if seconds >= 0 => {
                finished + Duration::seconds(seconds) < now
            }
            _ => false,
        }
    }
}
