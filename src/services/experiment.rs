//! Experiment helpers shared by the reconcilers and the CLI.

use std::collections::BTreeSet;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Experiment, Trial, LABEL_EXPERIMENT};
use crate::domain::ports::ObjectStore;

/// Pick a namespace for the next trial.
///
/// Candidates are the namespaces matching the experiment's namespace
/// selector, or the experiment namespace when it has none. A namespace is
/// available while no active trial runs in it. `None` means every candidate
/// is busy.
pub async fn find_available_namespace<S>(
    store: &S,
    experiment: &Experiment,
    trials: &[Trial],
) -> DomainResult<Option<String>>
where
    S: ObjectStore + ?Sized,
{
    let in_use: BTreeSet<&str> = trials
        .iter()
        .filter(|t| t.is_active())
        .map(|t| t.metadata.namespace.as_str())
        .collect();

    let candidates: Vec<String> = match &experiment.spec.namespace_selector {
        Some(selector) => {
            let mut names: Vec<String> = store
                .list_namespaces(Some(selector))
                .await?
                .into_iter()
                .filter(|ns| !ns.metadata.is_deleted())
                .map(|ns| ns.metadata.name)
                .collect();
            names.sort();
            names
        }
        None => vec![experiment.metadata.namespace.clone()],
    };

    Ok(candidates
        .into_iter()
        .find(|ns| !in_use.contains(ns.as_str())))
}

/// Build a new, unnamed trial for the experiment from its trial template.
pub fn populate_trial_from_template(experiment: &Experiment, namespace: &str) -> Trial {
    let template = &experiment.spec.trial_template;
    let mut trial = Trial::new(namespace, "");

    trial.metadata.generate_name = format!("{}-", experiment.metadata.name);
    trial.metadata.labels.clone_from(&template.labels);
    trial
        .metadata
        .labels
        .insert(LABEL_EXPERIMENT.to_string(), experiment.metadata.name.clone());
    trial.metadata.annotations.clone_from(&template.annotations);
    trial.metadata.owner = Some(experiment.reference());

    trial.spec.experiment_ref = experiment.reference();
    trial.spec.job_name.clone_from(&template.job_name);
    trial.spec.readiness_gates.clone_from(&template.readiness_gates);
    trial.spec.ttl_seconds_after_finished = template.ttl_seconds_after_finished;
    trial.spec.ttl_seconds_after_failure = template.ttl_seconds_after_failure;
    trial
}
