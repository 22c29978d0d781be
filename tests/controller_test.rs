//! End-to-end controller runs against the in-memory store and the mock server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use trialsync::adapters::memory::InMemoryObjectStore;
use trialsync::adapters::server::{MockOptimizationServer, MockSuggestion};
use trialsync::domain::models::{
    ControllerConfig, MetricsConfig, NamespacedName, ObjectReference, TrialPhase,
};
use trialsync::domain::ports::ObjectStore;
use trialsync::services::{ControllerManager, MetricCapture};

const STATE: &str = r#"
experiments:
  - metadata:
      name: web-tuning
      namespace: default
    spec:
      parameters:
        - name: cpu
          min: 100
          max: 1000
      metrics:
        - name: cost
          minimize: true
          query: "{{ .Values.cpu }}"
      patches:
        - patch: |
            kind: Deployment
            apiVersion: apps/v1
            metadata:
              name: web
            spec:
              cpu: {{ .Values.cpu }}
      trialTemplate:
        jobName: load
objects:
  - kind: Deployment
    apiVersion: apps/v1
    metadata:
      name: web
      namespace: default
    data:
      spec:
        cpu: 0
  - kind: Job
    apiVersion: batch/v1
    metadata:
      name: load
      namespace: default
    conditions:
      - type: Complete
        status: "True"
"#;

fn controller(
    store: &Arc<InMemoryObjectStore>,
    server: &Arc<MockOptimizationServer>,
) -> ControllerManager<InMemoryObjectStore, MockOptimizationServer> {
    let config = ControllerConfig {
        poll_interval_ms: 10,
        initial_backoff_ms: 10,
        max_backoff_ms: 100,
        ..Default::default()
    };
    let metrics = MetricCapture::new(MetricsConfig::default()).unwrap();
    ControllerManager::new(store.clone(), server.clone(), metrics, config)
}

async fn run_until_idle(store: &Arc<InMemoryObjectStore>, server: &Arc<MockOptimizationServer>) {
    tokio::time::timeout(
        Duration::from_secs(10),
        controller(store, server).run_until_idle(std::future::pending()),
    )
    .await
    .expect("controller should go idle")
    .expect("controller run failed");
}

#[tokio::test]
async fn test_state_file_runs_to_completion() {
    common::setup_test_logging();
    let (dir, path) = common::state_file(STATE);
    let store = Arc::new(InMemoryObjectStore::from_yaml_file(&path).unwrap());
    let server = Arc::new(MockOptimizationServer::new());
    server.push_suggestion(MockSuggestion::Assign(vec![("cpu".to_string(), 200)])).await;
    server.push_suggestion(MockSuggestion::Assign(vec![("cpu".to_string(), 400)])).await;

    run_until_idle(&store, &server).await;

    let created = server.created().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].0.as_str(), "web-tuning");
    assert_eq!(created[0].1.parameters[0].bounds.max, 1000);

    let mut reported: Vec<f64> = server
        .reported()
        .await
        .iter()
        .map(|(_, values)| values.values[0].value)
        .collect();
    reported.sort_by(f64::total_cmp);
    assert_eq!(reported, vec![200.0, 400.0]);

    // The last trial's patch is what the deployment holds.
    let deployment = store
        .get_object(&ObjectReference::new("Deployment", "apps/v1", "default", "web"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deployment.data["spec"]["cpu"], 400);

    // State survives a save and reload.
    let out = dir.path().join("out.yaml");
    store.save_yaml_file(&out).await.unwrap();
    let reloaded = InMemoryObjectStore::from_yaml_file(&out).unwrap();
    let exp = reloaded
        .get_experiment(&NamespacedName::new("default", "web-tuning"))
        .await
        .unwrap()
        .unwrap();
    assert!(exp.experiment_url.is_some());
    assert!(exp.next_trial_url.is_none());

    let trials = reloaded.list_trials(Some("default"), &exp.trial_selector()).await.unwrap();
    assert_eq!(trials.len(), 2);
    for trial in &trials {
        assert_eq!(trial.status.phase, TrialPhase::Completed);
        assert!(trial.metadata.finalizers.is_empty());
        assert!(trial.report_trial_url.is_some());
    }
}

#[tokio::test]
async fn test_failed_job_is_reported_as_failure() {
    let store = Arc::new(InMemoryObjectStore::new());
    let server = Arc::new(MockOptimizationServer::new());
    server.push_suggestion(MockSuggestion::Assign(vec![("cpu".to_string(), 300)])).await;

    store.create_experiment(&common::experiment("default", "exp")).await.unwrap();
    store.put_object(common::deployment("default", "web")).await;
    store.put_object(common::finished_job("default", "load", "Failed")).await;

    run_until_idle(&store, &server).await;

    let reported = server.reported().await;
    assert_eq!(reported.len(), 1);
    assert!(reported[0].1.failed);
    assert!(reported[0].1.values.is_empty());

    let exp = common::experiment("default", "exp");
    let trials = store.list_trials(None, &exp.trial_selector()).await.unwrap();
    assert_eq!(trials.len(), 1);
    assert_eq!(trials[0].status.phase, TrialPhase::Failed);
}

#[tokio::test]
async fn test_out_of_bounds_suggestion_is_abandoned() {
    let store = Arc::new(InMemoryObjectStore::new());
    let server = Arc::new(MockOptimizationServer::new());
    server.push_suggestion(MockSuggestion::Assign(vec![("cpu".to_string(), 5000)])).await;
    store.create_experiment(&common::experiment("default", "exp")).await.unwrap();

    run_until_idle(&store, &server).await;

    assert_eq!(server.abandoned().await.len(), 1);
    assert!(server.reported().await.is_empty());
    let exp = common::experiment("default", "exp");
    assert!(store.list_trials(None, &exp.trial_selector()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_experiment_waits_while_server_is_busy() {
    let store = Arc::new(InMemoryObjectStore::new());
    let server = Arc::new(MockOptimizationServer::new());
    server
        .push_suggestion(MockSuggestion::Unavailable(Some(Duration::from_millis(20))))
        .await;
    server.push_suggestion(MockSuggestion::Assign(vec![("cpu".to_string(), 150)])).await;

    store.create_experiment(&common::experiment("default", "exp")).await.unwrap();
    store.put_object(common::deployment("default", "web")).await;
    store.put_object(common::finished_job("default", "load", "Complete")).await;

    run_until_idle(&store, &server).await;

    assert_eq!(server.suggestions_served().await, 1);
    let reported = server.reported().await;
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].1.values[0].value, 150.0);
}
