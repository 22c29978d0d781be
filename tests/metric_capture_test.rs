//! Metric collectors against wiremock backends.

use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trialsync::domain::errors::MetricError;
use trialsync::domain::models::{
    DatadogConfig, Metric, MetricType, MetricsConfig, ObjectMeta, PortSpec, Service, ServicePort,
    TargetObject, Trial,
};
use trialsync::services::MetricCapture;

fn capture() -> MetricCapture {
    MetricCapture::new(MetricsConfig::default()).unwrap()
}

fn metric(metric_type: MetricType, query: &str, url: Option<String>) -> Metric {
    Metric {
        name: "m".to_string(),
        metric_type,
        query: query.to_string(),
        url,
        ..Default::default()
    }
}

fn finished_trial() -> Trial {
    let mut trial = Trial::new("default", "exp-1");
    let start = Utc.with_ymd_and_hms(2020, 7, 23, 2, 30, 0).unwrap();
    trial.status.start_time = Some(start);
    trial.status.completion_time = Some(start + chrono::Duration::minutes(5));
    trial
}

fn scalar(value: &str) -> serde_json::Value {
    json!({"status": "success", "data": {"resultType": "scalar", "result": [1595471900.283, value]}})
}

#[tokio::test]
async fn test_prometheus_scalar() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .and(query_param("query", "scalar(sum(up))"))
        .respond_with(ResponseTemplate::new(200).set_body_json(scalar("1")))
        .mount(&server)
        .await;

    let m = metric(MetricType::Prometheus, "scalar(sum(up))", Some(server.uri()));
    let value = capture()
        .capture(&m, &Trial::new("default", "exp-1"), &TargetObject::None)
        .await
        .unwrap();
    assert_eq!(value, (1.0, 0.0));
}

#[tokio::test]
async fn test_prometheus_error_query_and_completion_time() {
    let server = MockServer::start().await;
    let trial = finished_trial();
    let at = trial.status.completion_time.unwrap().timestamp().to_string();

    // A backend without a targets endpoint skips the scrape check.
    Mock::given(method("GET"))
        .and(path("/api/v1/targets"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .and(query_param("query", "latency"))
        .and(query_param("time", at.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(scalar("12.5")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .and(query_param("query", "latency_stddev"))
        .respond_with(ResponseTemplate::new(200).set_body_json(scalar("0.25")))
        .mount(&server)
        .await;

    let mut m = metric(MetricType::Prometheus, "latency", Some(server.uri()));
    m.error_query = Some("latency_stddev".to_string());
    let value = capture().capture(&m, &trial, &TargetObject::None).await.unwrap();
    assert_eq!(value, (12.5, 0.25));
}

#[tokio::test]
async fn test_prometheus_waits_for_scrape() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/targets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": {"activeTargets": [{"health": "up", "lastScrape": "2020-07-23T02:30:00Z"}]}
        })))
        .mount(&server)
        .await;

    let m = metric(MetricType::Prometheus, "up", Some(server.uri()));
    let err = capture()
        .capture(&m, &finished_trial(), &TargetObject::None)
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(err.retry_after().is_some());
}

#[tokio::test]
async fn test_prometheus_nan_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(scalar("NaN")))
        .mount(&server)
        .await;

    let m = metric(MetricType::Prometheus, "scalar(up)", Some(server.uri()));
    let err = capture()
        .capture(&m, &Trial::new("default", "exp-1"), &TargetObject::None)
        .await
        .unwrap_err();
    let MetricError::Capture(capture_err) = &err else {
        panic!("expected a capture error, got {err:?}");
    };
    assert!(capture_err.message.contains("scalar function"));
}

#[tokio::test]
async fn test_prometheus_vector_result_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": {"resultType": "vector", "result": []}
        })))
        .mount(&server)
        .await;

    let m = metric(MetricType::Prometheus, "up", Some(server.uri()));
    let err = capture()
        .capture(&m, &Trial::new("default", "exp-1"), &TargetObject::None)
        .await
        .unwrap_err();
    assert!(matches!(err, MetricError::Response(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_json_path_through_service() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stats"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"current_response_time_percentile_95": 5})),
        )
        .mount(&server)
        .await;

    let address = server.address();
    let service = Service {
        metadata: ObjectMeta::new("default", "locust"),
        cluster_ip: Some(address.ip().to_string()),
        ports: vec![ServicePort {
            name: "web".to_string(),
            port: i32::from(address.port()),
        }],
    };
    let mut m = metric(MetricType::JsonPath, "{.current_response_time_percentile_95}", None);
    m.port = Some(PortSpec::Name("web".to_string()));
    m.path = Some("/stats".to_string());

    let value = capture()
        .capture(&m, &Trial::new("default", "exp-1"), &TargetObject::Services(vec![service]))
        .await
        .unwrap();
    assert_eq!(value, (5.0, 0.0));
}

#[tokio::test]
async fn test_json_path_missing_field_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"stats": []})))
        .mount(&server)
        .await;

    let m = metric(MetricType::JsonPath, "{.stats[0].latency}", Some(server.uri()));
    let err = capture()
        .capture(&m, &Trial::new("default", "exp-1"), &TargetObject::None)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let m = metric(MetricType::JsonPath, "stats", Some(server.uri()));
    let err = capture()
        .capture(&m, &Trial::new("default", "exp-1"), &TargetObject::None)
        .await
        .unwrap_err();
    assert!(matches!(err, MetricError::InvalidValue { .. }));
}

#[tokio::test]
async fn test_datadog_average() {
    let server = MockServer::start().await;
    let trial = finished_trial();
    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .and(header("DD-API-KEY", "api"))
        .and(query_param("from", trial.status.start_time.unwrap().timestamp().to_string().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "series": [{"pointlist": [[1595471400000.0, 1.0], [1595471460000.0, null], [1595471520000.0, 3.0]]}]
        })))
        .mount(&server)
        .await;

    let capture = MetricCapture::new(MetricsConfig {
        datadog: DatadogConfig {
            address: server.uri(),
            api_key: Some("api".to_string()),
            application_key: None,
        },
        ..Default::default()
    })
    .unwrap();

    let mut m = metric(MetricType::Datadog, "avg:system.cpu.user{*}", None);
    m.scheme = Some("avg".to_string());
    assert_eq!(capture.capture(&m, &trial, &TargetObject::None).await.unwrap(), (2.0, 0.0));

    m.scheme = Some("median".to_string());
    let err = capture.capture(&m, &trial, &TargetObject::None).await.unwrap_err();
    assert!(matches!(err, MetricError::InvalidValue { .. }));
}
