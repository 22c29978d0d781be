//! CLI command implementations.

pub mod patch;
pub mod run;
pub mod status;
pub mod validate;

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::adapters::memory::InMemoryObjectStore;
use crate::domain::models::Experiment;
use crate::domain::ports::ObjectStore;

/// Parse a `name=value` assignment flag.
pub fn parse_assignment(s: &str) -> Result<(String, i64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing parameter name in '{s}'"));
    }
    let value = value
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid value for {name}: {e}"))?;
    Ok((name.to_string(), value))
}

pub(crate) fn load_store(path: &Path) -> Result<InMemoryObjectStore> {
    InMemoryObjectStore::from_yaml_file(path)
        .with_context(|| format!("Failed to load state from {}", path.display()))
}

/// Find an experiment by `namespace/name` or by bare name.
pub(crate) async fn find_experiment(store: &InMemoryObjectStore, name: &str) -> Result<Experiment> {
    let experiments = store.list_experiments().await?;
    let mut matches = experiments.into_iter().filter(|e| match name.split_once('/') {
        Some((ns, n)) => e.metadata.namespace == ns && e.metadata.name == n,
        None => e.metadata.name == name,
    });
    let Some(experiment) = matches.next() else {
        bail!("experiment '{name}' not found");
    };
    if matches.next().is_some() {
        bail!("experiment name '{name}' is ambiguous; use namespace/name");
    }
    Ok(experiment)
}
