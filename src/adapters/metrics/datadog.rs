//! Datadog time-series collector.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::domain::errors::{CaptureError, MetricError};
use crate::domain::models::DatadogConfig;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    series: Vec<Series>,
}

#[derive(Debug, Deserialize)]
struct Series {
    #[serde(default)]
    pointlist: Vec<(f64, Option<f64>)>,
}

/// How the points of a series are reduced to one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    #[default]
    Avg,
    Last,
    Max,
    Min,
    Sum,
}

impl Aggregation {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "avg" => Some(Self::Avg),
            "last" => Some(Self::Last),
            "max" => Some(Self::Max),
            "min" => Some(Self::Min),
            "sum" => Some(Self::Sum),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn apply(self, points: &[f64]) -> Option<f64> {
        if points.is_empty() {
            return None;
        }
        Some(match self {
            Self::Avg => points.iter().sum::<f64>() / points.len() as f64,
            Self::Last => points[points.len() - 1],
            Self::Max => points.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Min => points.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Sum => points.iter().sum(),
        })
    }
}

/// Runs time-range queries against the Datadog API.
#[derive(Debug, Clone)]
pub struct DatadogCollector {
    http: Client,
    config: DatadogConfig,
}

impl DatadogCollector {
    pub fn new(http: Client, config: DatadogConfig) -> Self {
        Self { http, config }
    }

    /// Aggregate the points of the first series between start and completion.
    pub async fn collect(
        &self,
        aggregation: &str,
        query: &str,
        start: Option<DateTime<Utc>>,
        completion: Option<DateTime<Utc>>,
    ) -> Result<(f64, f64), MetricError> {
        let aggregation = Aggregation::from_str(aggregation).ok_or_else(|| {
            MetricError::InvalidValue {
                value: aggregation.to_string(),
                reason: "unknown aggregation".to_string(),
            }
        })?;
        let (Some(start), Some(completion)) = (start, completion) else {
            return Err(CaptureError::new("trial has not started and completed yet")
                .with_query(query)
                .with_completion_time(completion)
                .into());
        };

        let address = self.config.address.trim_end_matches('/');
        let url = format!("{address}/api/v1/query");
        let mut req = self.http.get(&url).query(&[
            ("from", start.timestamp().to_string()),
            ("to", completion.timestamp().to_string()),
            ("query", query.to_string()),
        ]);
        if let Some(key) = &self.config.api_key {
            req = req.header("DD-API-KEY", key);
        }
        if let Some(key) = &self.config.application_key {
            req = req.header("DD-APPLICATION-KEY", key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| MetricError::Request(format!("{url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MetricError::Response(format!("{url} returned {status}: {body}")));
        }

        let body: QueryResponse = resp
            .json()
            .await
            .map_err(|e| MetricError::Response(format!("{url}: {e}")))?;
        if body.status == "error" {
            return Err(MetricError::Response(body.error.unwrap_or_default()));
        }

        let points: Vec<f64> = body
            .series
            .first()
            .map(|s| s.pointlist.iter().filter_map(|(_, v)| *v).collect())
            .unwrap_or_default();

        aggregation
            .apply(&points)
            .map(|value| (value, 0.0))
            .ok_or_else(|| {
                CaptureError::new("metric data not available")
                    .with_address(address)
                    .with_query(query)
                    .with_completion_time(Some(completion))
                    .into()
            })
    }
}
