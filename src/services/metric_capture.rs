//! Metric capture dispatch.
//!
//! Renders a metric's queries for a trial and hands them to the collector
//! matching the metric type. Only [`MetricError::Capture`] is worth retrying;
//! everything else is permanent for the attempt.

use std::time::Duration;

use reqwest::{Client, Proxy};
use tracing::{debug, instrument};

use crate::adapters::metrics::{DatadogCollector, JsonPathCollector, PrometheusCollector};
use crate::domain::errors::MetricError;
use crate::domain::models::{Metric, MetricType, MetricsConfig, Service, TargetObject, Trial};
use crate::services::template::TemplateEngine;

const USER_AGENT: &str = concat!("trialsync/", env!("CARGO_PKG_VERSION"));

/// Captures `(value, standard deviation)` pairs for trial metrics.
#[derive(Debug, Clone)]
pub struct MetricCapture {
    templates: TemplateEngine,
    config: MetricsConfig,
    http: Client,
}

impl MetricCapture {
    pub fn new(config: MetricsConfig) -> Result<Self, MetricError> {
        let http = build_client(&config, None)?;
        Ok(Self {
            templates: TemplateEngine::new(),
            config,
            http,
        })
    }

    /// Capture one metric for a trial.
    #[instrument(skip_all, fields(metric = %metric.name, trial = %trial.metadata.name))]
    pub async fn capture(
        &self,
        metric: &Metric,
        trial: &Trial,
        target: &TargetObject,
    ) -> Result<(f64, f64), MetricError> {
        let (query, error_query) = self
            .templates
            .render_metric_queries(metric, trial, target)
            .map_err(|e| MetricError::Template(e.to_string()))?;

        match metric.metric_type {
            MetricType::Local | MetricType::Pods => {
                let value = query.trim().parse::<f64>().map_err(|_| MetricError::InvalidValue {
                    value: query.clone(),
                    reason: "expected a floating point number".to_string(),
                })?;
                Ok((value, 0.0))
            }
            MetricType::Prometheus => {
                let collector = PrometheusCollector::new(self.client_for(metric)?);
                let mut last_error = MetricError::Address("no metric addresses".to_string());
                for address in addresses(metric, target)? {
                    match collector
                        .collect(&address, &query, error_query.as_deref(), trial.status.completion_time)
                        .await
                    {
                        Ok(result) => return Ok(result),
                        Err(err) => {
                            debug!(%address, error = %err, "prometheus capture failed");
                            last_error = err;
                        }
                    }
                }
                Err(last_error)
            }
            MetricType::Datadog => {
                let collector = DatadogCollector::new(self.client_for(metric)?, self.config.datadog.clone());
                collector
                    .collect(
                        metric.scheme.as_deref().unwrap_or_default(),
                        &query,
                        trial.status.start_time,
                        trial.status.completion_time,
                    )
                    .await
            }
            MetricType::JsonPath => {
                let urls = addresses(metric, target)?;
                JsonPathCollector::new(self.client_for(metric)?)
                    .collect(&urls, &query)
                    .await
            }
        }
    }

    fn client_for(&self, metric: &Metric) -> Result<Client, MetricError> {
        match metric.proxy.as_deref().filter(|p| !p.is_empty()) {
            Some(proxy) => build_client(&self.config, Some(proxy)),
            None => Ok(self.http.clone()),
        }
    }
}

fn build_client(config: &MetricsConfig, proxy: Option<&str>) -> Result<Client, MetricError> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(config.http_timeout_secs));
    if let Some(proxy) = proxy {
        let proxy = Proxy::all(proxy).map_err(|e| MetricError::Address(format!("invalid proxy {proxy}: {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| MetricError::Request(e.to_string()))
}

fn addresses(metric: &Metric, target: &TargetObject) -> Result<Vec<String>, MetricError> {
    match metric.url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => Ok(vec![url.to_string()]),
        None => to_url(target, metric),
    }
}

/// Build one URL per addressable port of the target services.
pub fn to_url(target: &TargetObject, metric: &Metric) -> Result<Vec<String>, MetricError> {
    let TargetObject::Services(services) = target else {
        return Err(MetricError::Address("expected target to be a service list".to_string()));
    };

    let scheme = metric
        .scheme
        .as_deref()
        .map(str::to_lowercase)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "http".to_string());
    if scheme != "http" && scheme != "https" {
        return Err(MetricError::Address(format!("scheme must be 'http' or 'https': {scheme}")));
    }
    let path = format!("/{}", metric.path.as_deref().unwrap_or_default().trim_start_matches('/'));

    let mut urls = Vec::new();
    for service in services {
        let Some(host) = service_host(service) else {
            continue;
        };
        for port in resolve_ports(service, metric)? {
            urls.push(format!("{scheme}://{host}:{port}{path}"));
        }
    }

    if urls.is_empty() {
        return Err(MetricError::Address(format!(
            "unable to find metric targets for '{}'",
            metric.name
        )));
    }
    Ok(urls)
}

/// Cluster address of a service; headless services are addressed by DNS name.
fn service_host(service: &Service) -> Option<String> {
    match service.cluster_ip.as_deref() {
        None | Some("") => None,
        Some("None") => Some(format!(
            "{}.{}",
            service.metadata.name, service.metadata.namespace
        )),
        Some(ip) => Some(ip.to_string()),
    }
}

/// Ports to query on a service. Without a metric port every declared port is used.
fn resolve_ports(service: &Service, metric: &Metric) -> Result<Vec<i32>, MetricError> {
    if let Some(number) = metric.port.as_ref().and_then(|p| p.number()).filter(|n| *n > 0) {
        return Ok(vec![number]);
    }

    let ports: Vec<i32> = match metric.port.as_ref() {
        Some(name) => {
            let name = name.to_string();
            service
                .ports
                .iter()
                .find(|p| p.name == name)
                .or_else(|| if service.ports.len() == 1 { service.ports.first() } else { None })
                .map(|p| p.port)
                .into_iter()
                .collect()
        }
        None => service.ports.iter().map(|p| p.port).collect(),
    };

    let ports: Vec<i32> = ports.into_iter().filter(|p| *p > 0).collect();
    if ports.is_empty() {
        return Err(MetricError::Address(format!(
            "metric '{}' has unresolvable port: {}",
            metric.name,
            metric.port.as_ref().map(ToString::to_string).unwrap_or_default()
        )));
    }
    Ok(ports)
}
