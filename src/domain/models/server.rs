//! Remote optimization server representations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name an experiment is registered under on the remote server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentName(String);

impl ExperimentName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value that arrives as either a JSON number or a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberOrString {
    Number(serde_json::Number),
    String(String),
}

impl NumberOrString {
    pub fn from_i64(value: i64) -> Self {
        Self::Number(value.into())
    }

    /// Integer value; whole floats are accepted, anything else is not.
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Self::String(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            Self::String(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for NumberOrString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerOptimization {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: i64,
    pub max: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerParameter {
    pub name: String,
    /// Always `int`; the controller only tunes integer parameters.
    #[serde(rename = "type", default = "default_parameter_type")]
    pub parameter_type: String,
    pub bounds: Bounds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<i64>,
}

fn default_parameter_type() -> String {
    "int".to_string()
}

impl ServerParameter {
    pub fn int(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            name: name.into(),
            parameter_type: default_parameter_type(),
            bounds: Bounds { min, max },
            baseline: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerMetric {
    pub name: String,
    #[serde(default)]
    pub minimize: bool,
}

/// Experiment as the remote server sees it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerExperiment {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optimization: Vec<ServerOptimization>,

    #[serde(default)]
    pub parameters: Vec<ServerParameter>,

    #[serde(default)]
    pub metrics: Vec<ServerMetric>,

    /// Link to the experiment itself; filled in from the response, never sent.
    #[serde(skip)]
    pub self_url: Option<String>,

    /// Link used to request the next suggestion; filled in from the response.
    #[serde(skip)]
    pub next_trial_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerAssignment {
    pub parameter_name: String,
    pub value: NumberOrString,
}

/// Suggestion handed out by the remote server.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialAssignments {
    #[serde(default)]
    pub assignments: Vec<ServerAssignment>,

    /// Where the observed values must be reported; taken from the response headers.
    #[serde(skip)]
    pub report_trial_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerValue {
    pub metric_name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<f64>,
}

/// Observation reported back for a finished trial.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialValues {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<ServerValue>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_reason: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_message: String,
}
