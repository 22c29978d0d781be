//! `patch`: render the patches an experiment would apply for a trial.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::commands::{find_experiment, load_store, parse_assignment};
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Assignment, NamespacedName, PatchOperation, Trial};
use crate::domain::ports::ObjectStore;
use crate::services::experiment::populate_trial_from_template;
use crate::services::PatchEngine;

#[derive(Args, Debug)]
pub struct PatchArgs {
    /// YAML state file
    #[arg(short, long)]
    pub state: PathBuf,

    /// Experiment (`name` or `namespace/name`)
    pub experiment: String,

    /// Render for an existing trial
    #[arg(short, long, conflicts_with = "assign")]
    pub trial: Option<String>,

    /// Render for ad hoc assignments (NAME=VALUE, repeatable)
    #[arg(short, long, value_parser = parse_assignment)]
    pub assign: Vec<(String, i64)>,
}

#[derive(Debug, Serialize)]
pub struct PatchOutput {
    pub trial: String,
    pub operations: Vec<PatchOperation>,
}

impl CommandOutput for PatchOutput {
    fn to_human(&self) -> String {
        if self.operations.is_empty() {
            return format!("No patches for {}.", self.trial);
        }
        let mut out = String::new();
        for op in &self.operations {
            let target = &op.target_ref;
            out.push_str(&format!(
                "# {} {}/{} ({}, {} attempt(s))\n{}\n",
                target.kind, target.namespace, target.name, op.patch_type, op.attempts_remaining, op.data
            ));
        }
        out.trim_end().to_string()
    }
}

pub async fn execute(args: PatchArgs, json_mode: bool) -> Result<()> {
    let store = load_store(&args.state)?;
    let experiment = find_experiment(&store, &args.experiment).await?;

    let trial = match &args.trial {
        Some(name) => {
            let key = NamespacedName::new(experiment.metadata.namespace.clone(), name.clone());
            store
                .get_trial(&key)
                .await?
                .with_context(|| format!("trial '{key}' not found"))?
        }
        None => {
            if args.assign.is_empty() {
                bail!("either --trial or at least one --assign is required");
            }
            preview_trial(&experiment, &args.assign)
        }
    };

    let operations = PatchEngine::new()
        .create_patch_operations(&trial, &experiment.spec.patches)
        .with_context(|| format!("Failed to render patches for {}", trial.namespaced_name()))?;

    output(
        &PatchOutput {
            trial: trial.namespaced_name().to_string(),
            operations,
        },
        json_mode,
    );
    Ok(())
}

fn preview_trial(experiment: &crate::domain::models::Experiment, assign: &[(String, i64)]) -> Trial {
    let mut trial = populate_trial_from_template(experiment, &experiment.metadata.namespace);
    trial.metadata.name = format!("{}preview", trial.metadata.generate_name);
    trial.spec.assignments = assign
        .iter()
        .map(|(name, value)| Assignment::new(name.clone(), *value))
        .collect();
    trial
}
