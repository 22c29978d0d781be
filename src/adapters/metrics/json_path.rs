//! JSON endpoint collector.
//!
//! Fetches a JSON document from each resolved address and extracts a single
//! scalar with a path expression such as `{.stats.latency[0]}`.

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::domain::errors::{CaptureError, MetricError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Index(usize),
}

/// Parse `{.a.b[0]}` (braces optional) into path segments.
fn parse_path(expression: &str) -> Result<Vec<Segment>, MetricError> {
    let invalid = |reason: &str| MetricError::InvalidValue {
        value: expression.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = expression.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed)
        .trim();
    let inner = inner.strip_prefix('$').unwrap_or(inner);

    let mut segments = Vec::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n == '.' || n == '[' {
                        break;
                    }
                    name.push(n);
                    chars.next();
                }
                if !name.is_empty() {
                    segments.push(Segment::Field(name));
                }
            }
            '[' => {
                let mut body = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(n) => body.push(n),
                        None => return Err(invalid("unterminated '['")),
                    }
                }
                let body = body.trim();
                if let Some(key) = body
                    .strip_prefix('\'')
                    .and_then(|b| b.strip_suffix('\''))
                    .or_else(|| body.strip_prefix('"').and_then(|b| b.strip_suffix('"')))
                {
                    segments.push(Segment::Field(key.to_string()));
                } else {
                    let idx = body.parse().map_err(|_| invalid("array index must be a number"))?;
                    segments.push(Segment::Index(idx));
                }
            }
            c if c.is_whitespace() => {}
            _ => return Err(invalid("path segments must start with '.' or '['")),
        }
    }

    if segments.is_empty() {
        return Err(invalid("empty path"));
    }
    Ok(segments)
}

/// Evaluate a path against a document; `None` when any segment is missing.
pub fn extract<'a>(document: &'a Value, expression: &str) -> Result<Option<&'a Value>, MetricError> {
    let segments = parse_path(expression)?;
    let mut current = document;
    for segment in &segments {
        let next = match segment {
            Segment::Field(name) => current.get(name.as_str()),
            Segment::Index(idx) => current.get(*idx),
        };
        match next {
            Some(v) => current = v,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads JSON documents over HTTP.
#[derive(Debug, Clone)]
pub struct JsonPathCollector {
    http: Client,
}

impl JsonPathCollector {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// Return the value found at the first address that yields one.
    pub async fn collect(&self, urls: &[String], query: &str) -> Result<(f64, f64), MetricError> {
        // Reject malformed paths before any request goes out.
        parse_path(query)?;

        let mut last_error = MetricError::Address("no metric addresses".to_string());
        for url in urls {
            match self.collect_one(url, query).await {
                Ok(value) => return Ok((value, 0.0)),
                Err(err) => {
                    debug!(url = %url, error = %err, "json path capture failed");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    async fn collect_one(&self, url: &str, query: &str) -> Result<f64, MetricError> {
        let resp = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| MetricError::Request(format!("{url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MetricError::Response(format!("{url} returned {status}")));
        }
        let document: Value = resp
            .json()
            .await
            .map_err(|e| MetricError::Response(format!("{url}: {e}")))?;

        let Some(found) = extract(&document, query)? else {
            return Err(CaptureError::new("metric data not available")
                .with_address(url)
                .with_query(query)
                .into());
        };
        to_number(found).ok_or_else(|| MetricError::InvalidValue {
            value: found.to_string(),
            reason: "expected a numeric value".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_paths() {
        let doc = json!({
            "current_response_time_percentile_95": 5,
            "stats": [{"name": "GET /", "avg": "12.5"}],
            "odd key": {"v": 1}
        });
        assert_eq!(
            extract(&doc, "{.current_response_time_percentile_95}").unwrap(),
            Some(&json!(5))
        );
        assert_eq!(extract(&doc, "{.stats[0].avg}").unwrap(), Some(&json!("12.5")));
        assert_eq!(extract(&doc, "{$['odd key'].v}").unwrap(), Some(&json!(1)));
        assert_eq!(extract(&doc, ".stats[3]").unwrap(), None);
        assert_eq!(extract(&doc, "{.missing}").unwrap(), None);
    }

    #[test]
    fn test_invalid_paths() {
        assert!(extract(&json!({}), "{}").is_err());
        assert!(extract(&json!({}), "{.a[x]}").is_err());
        assert!(extract(&json!({}), "{.a[0}").is_err());
        assert!(extract(&json!({}), "abc").is_err());
    }

    #[test]
    fn test_parse_path_rejects_malformed() {
        let err = parse_path("{.a[}").unwrap_err();
        assert!(matches!(&err, MetricError::InvalidValue { reason, .. } if reason.contains("unterminated")));
        let err = parse_path("{a}").unwrap_err();
        assert!(matches!(&err, MetricError::InvalidValue { reason, .. } if reason.contains("must start with")));
        assert_eq!(
            parse_path("{.a.b[0]}").unwrap(),
            vec![Segment::Field("a".to_string()), Segment::Field("b".to_string()), Segment::Index(0)]
        );
    }

    #[test]
    fn test_to_number() {
        assert_eq!(to_number(&json!(2.5)), Some(2.5));
        assert_eq!(to_number(&json!("7")), Some(7.0));
        assert_eq!(to_number(&json!(true)), None);
    }
}
