//! Experiment domain model.
//!
//! An experiment describes the space of tunable parameters, the patches that
//! apply a parameter assignment to live workloads, and the metrics observed
//! for each trial.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::meta::{LabelSelector, NamespacedName, ObjectMeta, ObjectReference, LABEL_EXPERIMENT};
use super::trial::TrialReadinessGate;

/// How a rendered patch is applied to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchType {
    /// Strategic merge patch (the default).
    #[default]
    Strategic,
    /// JSON merge patch (RFC 7386).
    Merge,
    /// JSON patch (RFC 6902).
    Json,
}

impl PatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strategic => "strategic",
            Self::Merge => "merge",
            Self::Json => "json",
        }
    }

    /// Content type used when the patch is sent to a cluster API.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Strategic => "application/strategic-merge-patch+json",
            Self::Merge => "application/merge-patch+json",
            Self::Json => "application/json-patch+json",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "" | "strategic" | "strategic-merge" => Some(Self::Strategic),
            "merge" => Some(Self::Merge),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for PatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameterized patch applied to a workload for every trial.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchTemplate {
    #[serde(default, rename = "type")]
    pub patch_type: PatchType,

    /// Template text; YAML or JSON once rendered.
    #[serde(default)]
    pub patch: String,

    /// Explicit target; required for non-strategic patches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<ObjectReference>,
}

/// Collector backend used to capture a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// The rendered query is the value.
    #[default]
    Local,
    /// Same as local, with pods matching the selector available to the query.
    Pods,
    Prometheus,
    Datadog,
    #[serde(alias = "json-path")]
    JsonPath,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Pods => "pods",
            Self::Prometheus => "prometheus",
            Self::Datadog => "datadog",
            Self::JsonPath => "jsonpath",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Port given either by number or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Number(i32),
    Name(String),
}

impl PortSpec {
    /// Numeric value of the port; named ports that look like numbers count too.
    pub fn number(&self) -> Option<i32> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Name(s) => s.parse().ok(),
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Name(s) => f.write_str(s),
        }
    }
}

/// Metric captured at the end of every trial.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub name: String,

    #[serde(default)]
    pub minimize: bool,

    #[serde(default, rename = "type")]
    pub metric_type: MetricType,

    /// Template text producing the query (or the value itself for local metrics).
    #[serde(default)]
    pub query: String,

    /// Template text producing the standard deviation query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_query: Option<String>,

    /// Explicit collector address; bypasses service resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// `http` or `https` for service resolution; the aggregation for Datadog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Labels selecting the pods or services the metric is read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

/// Tunable parameter with inclusive integer bounds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    pub min: i64,
    pub max: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<i64>,
}

impl Parameter {
    pub fn contains(&self, value: i64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Optimization option forwarded to the remote server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Optimization {
    pub name: String,
    pub value: String,
}

/// Template copied onto every new trial.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialTemplate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Name of the trial job; defaults to the trial name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readiness_gates: Vec<TrialReadinessGate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_failure: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSpec {
    /// Desired number of concurrently active trials; defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default)]
    pub parameters: Vec<Parameter>,

    #[serde(default)]
    pub patches: Vec<PatchTemplate>,

    #[serde(default)]
    pub metrics: Vec<Metric>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optimization: Vec<Optimization>,

    /// Namespaces eligible to run trials; the experiment namespace when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,

    #[serde(default)]
    pub trial_template: TrialTemplate,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentStatus {
    #[serde(default)]
    pub active_trials: i32,
}

/// Experiment definition plus its synchronization pointers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: ExperimentSpec,

    #[serde(default)]
    pub status: ExperimentStatus,

    /// Present if and only if the experiment has been created on the remote server.
    #[serde(default, rename = "experimentURL", skip_serializing_if = "Option::is_none")]
    pub experiment_url: Option<String>,

    /// Present while the remote server is still handing out suggestions.
    #[serde(default, rename = "nextTrialURL", skip_serializing_if = "Option::is_none")]
    pub next_trial_url: Option<String>,
}

impl Experiment {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            ..Default::default()
        }
    }

    pub fn namespaced_name(&self) -> NamespacedName {
        self.metadata.namespaced_name()
    }

    /// Desired concurrent trial count; zero once deletion has been requested.
    pub fn replicas(&self) -> i32 {
        if self.metadata.is_deleted() {
            return 0;
        }
        self.spec.replicas.unwrap_or(1).max(0)
    }

    /// Selector matching the trials that belong to this experiment.
    pub fn trial_selector(&self) -> LabelSelector {
        [(LABEL_EXPERIMENT.to_string(), self.metadata.name.clone())].into()
    }

    pub fn reference(&self) -> ObjectReference {
        ObjectReference::new(
            "Experiment",
            crate::domain::models::API_VERSION,
            self.metadata.namespace.clone(),
            self.metadata.name.clone(),
        )
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.spec.parameters.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_replicas_default_and_deleted() {
        let mut exp = Experiment::new("default", "exp");
        assert_eq!(exp.replicas(), 1);

        exp.spec.replicas = Some(3);
        assert_eq!(exp.replicas(), 3);

        exp.metadata.deletion_timestamp = Some(Utc::now());
        assert_eq!(exp.replicas(), 0);
    }

    #[test]
    fn test_patch_type_parsing() {
        assert_eq!(PatchType::from_str(""), Some(PatchType::Strategic));
        assert_eq!(PatchType::from_str("Merge"), Some(PatchType::Merge));
        assert_eq!(PatchType::from_str("json"), Some(PatchType::Json));
        assert_eq!(PatchType::from_str("yolo"), None);
    }

    #[test]
    fn test_experiment_yaml() {
        let yaml = r#"
metadata:
  name: postgres
  namespace: default
spec:
  replicas: 2
  parameters:
    - name: cpu
      min: 100
      max: 4000
  patches:
    - type: merge
      patch: "{}"
      targetRef:
        kind: Deployment
        apiVersion: apps/v1
        name: postgres
  metrics:
    - name: duration
      query: "{{duration .StartTime .CompletionTime}}"
    - name: p95
      type: json-path
      port: metrics
nextTrialURL: http://example.com/next
"#;
        let exp: Experiment = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(exp.replicas(), 2);
        assert_eq!(exp.spec.patches[0].patch_type, PatchType::Merge);
        assert_eq!(exp.spec.metrics[0].metric_type, MetricType::Local);
        assert_eq!(exp.spec.metrics[1].metric_type, MetricType::JsonPath);
        assert_eq!(exp.spec.metrics[1].port, Some(PortSpec::Name("metrics".to_string())));
        assert_eq!(exp.next_trial_url.as_deref(), Some("http://example.com/next"));
        assert!(exp.experiment_url.is_none());
    }

    #[test]
    fn test_unknown_patch_type_rejected() {
        let yaml = "type: yolo\npatch: \"{}\"\n";
        assert!(serde_yaml::from_str::<PatchTemplate>(yaml).is_err());
    }
}
