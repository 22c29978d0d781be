//! `validate`: check assignments against an experiment's parameters.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::commands::{find_experiment, load_store, parse_assignment};
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Assignment;
use crate::services::{validate_assignments, AssignmentError};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// YAML state file
    #[arg(short, long)]
    pub state: PathBuf,

    /// Experiment (`name` or `namespace/name`)
    pub experiment: String,

    /// Assignment to check (NAME=VALUE, repeatable)
    #[arg(short, long, value_parser = parse_assignment)]
    pub assign: Vec<(String, i64)>,
}

#[derive(Debug, Serialize)]
pub struct ValidateOutput {
    pub experiment: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<AssignmentError>,
}

impl CommandOutput for ValidateOutput {
    fn to_human(&self) -> String {
        match &self.errors {
            None => format!("Assignments are valid for {}", self.experiment),
            Some(err) => format!("{}: {err}", self.experiment),
        }
    }
}

pub async fn execute(args: ValidateArgs, json_mode: bool) -> Result<()> {
    let store = load_store(&args.state)?;
    let experiment = find_experiment(&store, &args.experiment).await?;

    let assignments: Vec<Assignment> = args
        .assign
        .iter()
        .map(|(name, value)| Assignment::new(name.clone(), *value))
        .collect();
    let errors = validate_assignments(&assignments, &experiment.spec.parameters).err();

    let result = ValidateOutput {
        experiment: experiment.namespaced_name().to_string(),
        valid: errors.is_none(),
        errors,
    };
    output(&result, json_mode);
    if !result.valid {
        bail!("assignments do not match the parameters of {}", result.experiment);
    }
    Ok(())
}
