//! HTTP client for the remote optimization server.
//!
//! Wraps the experiments REST API with typed methods. Outbound requests go
//! through a `governor` token bucket so a busy controller cannot flood the
//! server; links between resources are read from `Link` and `Location`
//! response headers and resolved against the request URL.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, LINK, LOCATION, RETRY_AFTER};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use tracing::{debug, warn};

use crate::domain::models::{
    ExperimentName, ServerConfig, ServerExperiment, TrialAssignments, TrialValues,
};
use crate::domain::ports::{OptimizationServer, ServerError, ServerResult};

/// `User-Agent` sent with every request.
pub const USER_AGENT: &str = concat!("trialsync/", env!("CARGO_PKG_VERSION"));

/// Optimization server reached over HTTP.
#[derive(Clone)]
pub struct HttpOptimizationServer {
    http: Client,
    base: Url,
    token: Option<String>,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl std::fmt::Debug for HttpOptimizationServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpOptimizationServer")
            .field("base", &self.base.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl HttpOptimizationServer {
    /// Build a client from configuration.
    pub fn new(config: &ServerConfig) -> ServerResult<Self> {
        let mut address = config.address.trim().to_string();
        if !address.ends_with('/') {
            address.push('/');
        }
        let base = Url::parse(&address)
            .map_err(|e| ServerError::InvalidRequest(format!("invalid server address {address}: {e}")))?;

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ServerError::Transport(e.to_string()))?;

        let rps = NonZeroU32::new(config.rate_limit_rps).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            http,
            base,
            token: config.token.clone().filter(|t| !t.is_empty()),
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
        })
    }

    fn resolve(&self, url: &str) -> ServerResult<Url> {
        self.base
            .join(url)
            .map_err(|e| ServerError::InvalidRequest(format!("invalid url {url}: {e}")))
    }

    /// Wait for a rate-limit token and build an authorized request.
    async fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.limiter.until_ready().await;
        debug!(%method, %url, "sending request");
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> ServerResult<Response> {
        let resp = builder
            .send()
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let retry_after = parse_retry_after(resp.headers());
        let body = resp.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "optimization server returned an error");
        Err(ServerError::from_status(status.as_u16(), body, retry_after))
    }
}

#[async_trait]
impl OptimizationServer for HttpOptimizationServer {
    async fn check_available(&self) -> ServerResult<()> {
        let req = self.request(Method::GET, self.base.clone()).await;
        self.send(req).await.map(|_| ())
    }

    async fn create_experiment(
        &self,
        name: &ExperimentName,
        experiment: &ServerExperiment,
    ) -> ServerResult<ServerExperiment> {
        let url = self.resolve(&format!("experiments/{name}"))?;
        let req = self.request(Method::PUT, url.clone()).await.json(experiment);
        let resp = self.send(req).await?;

        let links = parse_links(resp.headers(), &url);
        let body = resp
            .bytes()
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))?;

        let mut created = if body.iter().all(u8::is_ascii_whitespace) {
            experiment.clone()
        } else {
            serde_json::from_slice::<ServerExperiment>(&body)
                .map_err(|e| ServerError::Serialization(e.to_string()))?
        };
        created.self_url = links.self_url.or_else(|| Some(url.to_string()));
        created.next_trial_url = links.next;
        Ok(created)
    }

    async fn delete_experiment(&self, url: &str) -> ServerResult<()> {
        let url = self.resolve(url)?;
        let req = self.request(Method::DELETE, url).await;
        self.send(req).await.map(|_| ())
    }

    async fn next_trial(&self, url: &str) -> ServerResult<TrialAssignments> {
        let url = self.resolve(url)?;
        let req = self.request(Method::POST, url.clone()).await;
        let resp = self.send(req).await?;

        let links = parse_links(resp.headers(), &url);
        let mut assignments = resp
            .json::<TrialAssignments>()
            .await
            .map_err(|e| ServerError::Serialization(e.to_string()))?;
        assignments.report_trial_url = links.location.or(links.self_url);
        if assignments.report_trial_url.is_none() {
            return Err(ServerError::Unexpected {
                status: 200,
                body: "suggestion is missing a report location".to_string(),
            });
        }
        Ok(assignments)
    }

    async fn report_trial(&self, url: &str, values: &TrialValues) -> ServerResult<()> {
        let url = self.resolve(url)?;
        let req = self.request(Method::POST, url).await.json(values);
        self.send(req).await.map(|_| ())
    }

    async fn abandon_running_trial(&self, url: &str) -> ServerResult<()> {
        let url = self.resolve(url)?;
        let req = self.request(Method::DELETE, url).await;
        self.send(req).await.map(|_| ())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Links {
    self_url: Option<String>,
    next: Option<String>,
    location: Option<String>,
}

/// Collect `rel="self"`/`rel="next"` links and the `Location` header.
fn parse_links(headers: &HeaderMap, request_url: &Url) -> Links {
    let resolve = |raw: &str| request_url.join(raw.trim()).ok().map(String::from);
    let mut links = Links::default();

    for value in headers.get_all(LINK) {
        let Ok(value) = value.to_str() else { continue };
        for entry in value.split(',') {
            let mut parts = entry.split(';');
            let Some(target) = parts.next().map(str::trim) else { continue };
            let Some(target) = target.strip_prefix('<').and_then(|t| t.strip_suffix('>')) else {
                continue;
            };
            for param in parts {
                let Some((key, rel)) = param.split_once('=') else { continue };
                if key.trim() != "rel" {
                    continue;
                }
                match rel.trim().trim_matches('"') {
                    "self" => links.self_url = resolve(target),
                    "next" => links.next = resolve(target),
                    _ => {}
                }
            }
        }
    }

    links.location = headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(resolve);
    if links.self_url.is_none() {
        links.self_url.clone_from(&links.location);
    }
    links
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_links() {
        let base = Url::parse("http://example.com/v1/experiments/exp").unwrap();
        let mut headers = HeaderMap::new();
        headers.append(
            LINK,
            HeaderValue::from_static(r#"</v1/experiments/1>; rel="self", </v1/experiments/1/trials/>; rel="next""#),
        );
        let links = parse_links(&headers, &base);
        assert_eq!(links.self_url.as_deref(), Some("http://example.com/v1/experiments/1"));
        assert_eq!(links.next.as_deref(), Some("http://example.com/v1/experiments/1/trials/"));
        assert!(links.location.is_none());
    }

    #[test]
    fn test_location_fallback() {
        let base = Url::parse("http://example.com/v1/experiments/1/trials/").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("7"));
        let links = parse_links(&headers, &base);
        assert_eq!(links.location.as_deref(), Some("http://example.com/v1/experiments/1/trials/7"));
        assert_eq!(links.self_url, links.location);
    }

    #[test]
    fn test_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_user_agent() {
        assert!(USER_AGENT.starts_with("trialsync/"));
    }
}
