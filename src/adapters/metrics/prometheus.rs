//! Prometheus instant-query collector.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::domain::errors::{CaptureError, MetricError};

/// Delay suggested when the scrape has not caught up with the trial yet.
const SCRAPE_RETRY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiResponse<T> {
    status: String,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetsData {
    #[serde(default)]
    active_targets: Vec<ActiveTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveTarget {
    #[serde(default)]
    health: String,
    last_scrape: Option<DateTime<Utc>>,
}

/// Runs instant queries against a Prometheus server.
#[derive(Debug, Clone)]
pub struct PrometheusCollector {
    http: Client,
}

impl PrometheusCollector {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// Capture the value and standard deviation at the trial completion time.
    pub async fn collect(
        &self,
        address: &str,
        query: &str,
        error_query: Option<&str>,
        completion_time: Option<DateTime<Utc>>,
    ) -> Result<(f64, f64), MetricError> {
        let address = address.trim_end_matches('/');

        if let Some(completion) = completion_time {
            self.check_scrape(address, query, completion).await?;
        }

        let value = self.query(address, query, completion_time).await?;
        let error = match error_query.filter(|q| !q.trim().is_empty()) {
            Some(q) => self.query(address, q, completion_time).await?,
            None => 0.0,
        };
        Ok((value, error))
    }

    /// Fail with a retryable error while healthy targets have not been scraped since completion.
    async fn check_scrape(
        &self,
        address: &str,
        query: &str,
        completion: DateTime<Utc>,
    ) -> Result<(), MetricError> {
        let url = format!("{address}/api/v1/targets");
        let targets = match self.get::<TargetsData>(&url, &[]).await {
            Ok(targets) => targets,
            Err(err) => {
                // Not every Prometheus-compatible backend serves targets.
                debug!(address, error = %err, "skipping scrape check");
                return Ok(());
            }
        };

        let behind = targets
            .active_targets
            .iter()
            .filter(|t| t.health == "up")
            .filter_map(|t| t.last_scrape)
            .any(|scraped| scraped < completion);
        if behind {
            return Err(CaptureError::new("cannot capture metric until after the next scrape")
                .with_address(address)
                .with_query(query)
                .with_completion_time(Some(completion))
                .with_retry_after(SCRAPE_RETRY)
                .into());
        }
        Ok(())
    }

    async fn query(
        &self,
        address: &str,
        query: &str,
        at: Option<DateTime<Utc>>,
    ) -> Result<f64, MetricError> {
        let url = format!("{address}/api/v1/query");
        let mut params = vec![("query", query.to_string())];
        if let Some(at) = at {
            params.push(("time", at.timestamp().to_string()));
        }

        let data: QueryData = self.get(&url, &params).await?;
        if data.result_type != "scalar" {
            return Err(MetricError::Response(format!(
                "expected scalar query result, got {} for query {query}",
                data.result_type
            )));
        }

        let raw = data
            .result
            .get(1)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| MetricError::Response(format!("malformed scalar result for query {query}")))?;
        let value: f64 = raw.parse().map_err(|_| MetricError::InvalidValue {
            value: raw.to_string(),
            reason: "not a number".to_string(),
        })?;

        if value.is_nan() {
            let mut message = "metric data not available".to_string();
            if query.trim_start().starts_with("scalar(") {
                message.push_str(
                    " (the scalar function may have received an input vector whose size is not 1)",
                );
            }
            return Err(CaptureError::new(message)
                .with_address(address)
                .with_query(query)
                .with_completion_time(at)
                .into());
        }
        Ok(value)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, MetricError> {
        let resp = self
            .http
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| MetricError::Request(format!("{url}: {e}")))?;

        let status = resp.status();
        let body: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| MetricError::Response(format!("{url} returned {status}: {e}")))?;

        if body.status != "success" {
            return Err(MetricError::Response(
                body.error.unwrap_or_else(|| format!("{url} returned {status}")),
            ));
        }
        body.data
            .ok_or_else(|| MetricError::Response(format!("{url} returned no data")))
    }
}
