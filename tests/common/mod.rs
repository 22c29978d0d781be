//! Common test utilities for integration tests
//!
//! Provides shared fixtures and helpers used across multiple integration
//! test files.

#![allow(dead_code)]

use std::path::PathBuf;

use tempfile::TempDir;
use trialsync::domain::models::{
    ClusterObject, Experiment, Metric, ObjectCondition, Parameter, PatchTemplate, PatchType,
};

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Write a YAML state file into a fresh temporary directory
pub fn state_file(yaml: &str) -> (TempDir, PathBuf) {
    let dir = temp_dir();
    let path = dir.path().join("state.yaml");
    std::fs::write(&path, yaml).expect("Failed to write state file");
    (dir, path)
}

/// Setup test logging
///
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn parameter(name: &str, min: i64, max: i64) -> Parameter {
    Parameter {
        name: name.to_string(),
        min,
        max,
        baseline: None,
    }
}

/// Experiment tuning `cpu` with a local `cost` metric and a deployment patch
pub fn experiment(namespace: &str, name: &str) -> Experiment {
    let mut exp = Experiment::new(namespace, name);
    exp.spec.parameters = vec![parameter("cpu", 100, 1000)];
    exp.spec.metrics = vec![Metric {
        name: "cost".to_string(),
        minimize: true,
        query: "{{ .Values.cpu }}".to_string(),
        ..Default::default()
    }];
    exp.spec.patches = vec![PatchTemplate {
        patch_type: PatchType::Strategic,
        patch: "kind: Deployment\napiVersion: apps/v1\nmetadata:\n  name: web\nspec:\n  cpu: {{ .Values.cpu }}\n"
            .to_string(),
        target_ref: None,
    }];
    exp.spec.trial_template.job_name = Some("load".to_string());
    exp
}

pub fn deployment(namespace: &str, name: &str) -> ClusterObject {
    ClusterObject::new("Deployment", "apps/v1", namespace, name)
}

/// Trial job that already finished with the given condition
pub fn finished_job(namespace: &str, name: &str, condition: &str) -> ClusterObject {
    let mut job = ClusterObject::new("Job", "batch/v1", namespace, name);
    job.conditions.push(ObjectCondition {
        condition_type: condition.to_string(),
        status: "True".to_string(),
        reason: if condition == "Failed" { "BackoffLimitExceeded".to_string() } else { String::new() },
        message: String::new(),
    });
    job
}
