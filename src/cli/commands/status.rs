//! `status`: list experiments and their trials.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::cli::commands::{find_experiment, load_store};
use crate::cli::output::{output, table, truncate, CommandOutput};
use crate::domain::models::{Experiment, Trial};
use crate::domain::ports::ObjectStore;
use crate::services::{derive_phase, summarize};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// YAML state file
    #[arg(short, long)]
    pub state: PathBuf,

    /// Only show this experiment (`name` or `namespace/name`)
    pub experiment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TrialRow {
    pub experiment: String,
    pub name: String,
    pub namespace: String,
    pub phase: String,
    pub assignments: String,
    pub summary: String,
}

impl TrialRow {
    fn new(experiment: &Experiment, trial: &Trial) -> Self {
        let assignments = trial
            .spec
            .assignments
            .iter()
            .map(|a| format!("{}={}", a.name, a.value))
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            experiment: experiment.metadata.name.clone(),
            name: trial.metadata.name.clone(),
            namespace: trial.metadata.namespace.clone(),
            phase: derive_phase(trial).to_string(),
            assignments,
            summary: summarize(trial),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExperimentRow {
    pub name: String,
    pub namespace: String,
    pub synchronized: bool,
    pub suggestions_open: bool,
    pub deleting: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub experiments: Vec<ExperimentRow>,
    pub trials: Vec<TrialRow>,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        if self.experiments.is_empty() {
            return "No experiments found.".to_string();
        }

        let mut experiments = table(&["EXPERIMENT", "NAMESPACE", "SYNCED", "SUGGESTIONS", "DELETING"]);
        for e in &self.experiments {
            experiments.add_row(vec![
                e.name.clone(),
                e.namespace.clone(),
                yes_no(e.synchronized),
                (if e.suggestions_open { "open" } else { "stopped" }).to_string(),
                yes_no(e.deleting),
            ]);
        }
        if self.trials.is_empty() {
            return format!("{experiments}\n\nNo trials.");
        }

        let mut trials = table(&["EXPERIMENT", "TRIAL", "NAMESPACE", "PHASE", "ASSIGNMENTS", "SUMMARY"]);
        for t in &self.trials {
            trials.add_row(vec![
                t.experiment.clone(),
                t.name.clone(),
                t.namespace.clone(),
                t.phase.clone(),
                truncate(&t.assignments, 40),
                truncate(&t.summary, 50),
            ]);
        }
        format!("{experiments}\n\n{trials}")
    }
}

fn yes_no(value: bool) -> String {
    let text = if value { "yes" } else { "no" };
    text.to_string()
}

pub async fn execute(args: StatusArgs, json_mode: bool) -> Result<()> {
    let store = load_store(&args.state)?;
    let experiments = match args.experiment.as_deref() {
        Some(name) => vec![find_experiment(&store, name).await?],
        None => store.list_experiments().await?,
    };

    let mut result = StatusOutput {
        experiments: Vec::with_capacity(experiments.len()),
        trials: Vec::new(),
    };
    for experiment in &experiments {
        let trials = store.list_trials(None, &experiment.trial_selector()).await?;
        result.trials.extend(trials.iter().map(|t| TrialRow::new(experiment, t)));
        result.experiments.push(ExperimentRow {
            name: experiment.metadata.name.clone(),
            namespace: experiment.metadata.namespace.clone(),
            synchronized: experiment.experiment_url.is_some(),
            suggestions_open: experiment.next_trial_url.is_some(),
            deleting: experiment.metadata.is_deleted(),
        });
    }

    output(&result, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Assignment, ConditionStatus, TrialConditionType};
    use chrono::Utc;

    #[test]
    fn test_trial_row() {
        let exp = Experiment::new("default", "exp");
        let mut trial = Trial::new("default", "exp-abcde");
        trial.spec.assignments = vec![Assignment::new("cpu", 500), Assignment::new("mem", 64)];
        trial.status.apply_condition(
            TrialConditionType::Failed,
            ConditionStatus::True,
            "MetricFailed",
            "no data",
            Utc::now(),
        );

        let row = TrialRow::new(&exp, &trial);
        assert_eq!(row.assignments, "cpu=500, mem=64");
        assert_eq!(row.phase, "Failed");
        assert_eq!(row.summary, "no data");
    }

    #[test]
    fn test_empty_status() {
        let out = StatusOutput {
            experiments: vec![],
            trials: vec![],
        };
        assert_eq!(out.to_human(), "No experiments found.");
    }
}
