//! Cluster objects read by the controller.
//!
//! Only the fields the controller actually consumes are modelled; anything
//! else a generic object carries lives in its free-form `data` body.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::meta::{ObjectMeta, ObjectReference};

/// Resource quantity such as `200m`, `1.5`, `128Mi` or `2G`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    /// Value in thousandths of the base unit.
    milli: f64,
}

impl Quantity {
    pub fn from_f64(value: f64) -> Self {
        Self {
            milli: value * 1000.0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        self.milli / 1000.0
    }

    /// Value multiplied by 1000, rounded up to the next integer.
    #[allow(clippy::cast_possible_truncation)]
    pub fn milli_value(&self) -> i64 {
        // Float noise must not push an exact value over the next integer.
        ((self.milli * 1e6).round() / 1e6).ceil() as i64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid quantity: {0}")]
pub struct QuantityParseError(pub String);

impl FromStr for Quantity {
    type Err = QuantityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const BINARY: f64 = 1024.0;
        // Multipliers to thousandths of the base unit.
        const SUFFIXES: [(&str, f64); 14] = [
            ("Ki", 1e3 * BINARY),
            ("Mi", 1e3 * BINARY * BINARY),
            ("Gi", 1e3 * BINARY * BINARY * BINARY),
            ("Ti", 1e3 * BINARY * BINARY * BINARY * BINARY),
            ("Pi", 1e3 * BINARY * BINARY * BINARY * BINARY * BINARY),
            ("Ei", 1e3 * BINARY * BINARY * BINARY * BINARY * BINARY * BINARY),
            ("m", 1.0),
            ("k", 1e6),
            ("M", 1e9),
            ("G", 1e12),
            ("T", 1e15),
            ("P", 1e18),
            ("E", 1e21),
            ("", 1e3),
        ];

        let s = s.trim();
        for (suffix, multiplier) in SUFFIXES {
            if let Some(number) = s.strip_suffix(suffix) {
                if let Ok(number) = number.parse::<f64>() {
                    return Ok(Self {
                        milli: number * multiplier,
                    });
                }
            }
        }
        Err(QuantityParseError(s.to_string()))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_f64())
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self::from_f64(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServicePort {
    #[serde(default)]
    pub name: String,
    pub port: i32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub metadata: ObjectMeta,
    /// Cluster address; `None` marks a headless service.
    #[serde(default, rename = "clusterIP", skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub requests: BTreeMap<String, Quantity>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Namespace {
    pub metadata: ObjectMeta,
}

/// Status condition reported by a generic object.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// Arbitrary cluster object: trial jobs, readiness gate objects and patch targets.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterObject {
    #[serde(default)]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ObjectCondition>,
    /// Remaining object body; patches are applied here.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ClusterObject {
    pub fn new(
        kind: impl Into<String>,
        api_version: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: ObjectMeta::new(namespace, name),
            conditions: Vec::new(),
            data: serde_json::Value::Null,
        }
    }

    pub fn reference(&self) -> ObjectReference {
        ObjectReference::new(
            self.kind.clone(),
            self.api_version.clone(),
            self.metadata.namespace.clone(),
            self.metadata.name.clone(),
        )
    }

    /// Check whether a reference identifies this object.
    ///
    /// An empty API version or namespace on the reference matches anything.
    pub fn matches(&self, reference: &ObjectReference) -> bool {
        self.kind == reference.kind
            && self.metadata.name == reference.name
            && (reference.api_version.is_empty() || reference.api_version == self.api_version)
            && (reference.namespace.is_empty() || reference.namespace == self.metadata.namespace)
    }

    pub fn condition(&self, condition_type: &str) -> Option<&ObjectCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    pub fn condition_is_true(&self, condition_type: &str) -> bool {
        self.condition(condition_type)
            .is_some_and(|c| c.status == "True")
    }
}

/// Object a metric query is evaluated against.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TargetObject {
    #[default]
    None,
    Pods(Vec<Pod>),
    Services(Vec<Service>),
}

impl TargetObject {
    pub fn pods(&self) -> &[Pod] {
        match self {
            Self::Pods(pods) => pods,
            _ => &[],
        }
    }
}
