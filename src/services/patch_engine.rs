//! Patch engine.
//!
//! Renders an experiment patch template for a trial and resolves the object
//! the resulting patch applies to.

use serde_json::Value;
use thiserror::Error;

use crate::domain::models::{ObjectReference, PatchOperation, PatchTemplate, PatchType, Trial, DEFAULT_ATTEMPTS};
use crate::services::template::{TemplateEngine, TemplateError};

const BATCH_API_VERSION: &str = "batch/v1";

/// Permanent failures while turning a template into a patch operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("a target reference must be specified for {0} patches")]
    MissingTarget(PatchType),

    #[error("unable to identify patch target: {0}")]
    InvalidTarget(String),

    #[error("rendered patch body cannot be read: {0}")]
    InvalidBody(String),

    #[error("the trial job can only be patched with a strategic merge patch, not {0}")]
    TrialJobPatchType(PatchType),
}

/// Creates patch operations from templates.
#[derive(Debug, Clone, Default)]
pub struct PatchEngine {
    templates: TemplateEngine,
}

impl PatchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render a template into a patch operation for the trial.
    ///
    /// Returns `Ok(None)` when the template renders to nothing.
    pub fn create_patch_operation(
        &self,
        trial: &Trial,
        template: &PatchTemplate,
    ) -> Result<Option<PatchOperation>, PatchError> {
        let patch_type = template.patch_type;
        let data = self.templates.render_patch(template, trial)?;
        if data == "null" {
            return Ok(None);
        }

        let mut target = resolve_target(patch_type, &data, template.target_ref.as_ref(), trial)?;

        let attempts_remaining = if trial.is_trial_job_reference(&target) {
            if patch_type != PatchType::Strategic {
                return Err(PatchError::TrialJobPatchType(patch_type));
            }
            if target.api_version.is_empty() {
                target.api_version = BATCH_API_VERSION.to_string();
            }
            // The job does not exist yet; the trial reconciler applies this once it appears.
            0
        } else {
            DEFAULT_ATTEMPTS
        };

        Ok(Some(PatchOperation {
            target_ref: target,
            patch_type,
            data,
            attempts_remaining,
        }))
    }

    /// Render every patch of an experiment, in order.
    pub fn create_patch_operations<'a>(
        &self,
        trial: &Trial,
        templates: impl IntoIterator<Item = &'a PatchTemplate>,
    ) -> Result<Vec<PatchOperation>, PatchError> {
        let mut operations = Vec::new();
        for template in templates {
            operations.extend(self.create_patch_operation(trial, template)?);
        }
        Ok(operations)
    }
}

fn resolve_target(
    patch_type: PatchType,
    data: &str,
    explicit: Option<&ObjectReference>,
    trial: &Trial,
) -> Result<ObjectReference, PatchError> {
    let mut target = match explicit {
        Some(reference) => reference.clone(),
        None if patch_type == PatchType::Strategic => ObjectReference::default(),
        None => return Err(PatchError::MissingTarget(patch_type)),
    };
    if target.namespace.is_empty() {
        target.namespace.clone_from(&trial.metadata.namespace);
    }
    if target.kind == "Job" && target.api_version.is_empty() && trial.is_trial_job_reference(&target) {
        target.api_version = BATCH_API_VERSION.to_string();
    }

    match validate_target(&target) {
        Ok(()) => return Ok(target),
        Err(err) if patch_type != PatchType::Strategic => return Err(err),
        Err(_) => {}
    }

    // Strategic patches may carry their own type and object metadata.
    let body: Value = serde_json::from_str(data).map_err(|e| PatchError::InvalidBody(e.to_string()))?;
    if !body.is_object() {
        return Err(PatchError::InvalidBody("expected an object".to_string()));
    }
    let text = |value: Option<&Value>| value.and_then(Value::as_str).map(str::to_string);
    if let Some(api_version) = text(body.get("apiVersion")) {
        target.api_version = api_version;
    }
    if let Some(kind) = text(body.get("kind")) {
        target.kind = kind;
    }
    if let Some(name) = text(body.pointer("/metadata/name")) {
        target.name = name;
    }
    if let Some(namespace) = text(body.pointer("/metadata/namespace")).filter(|ns| !ns.is_empty()) {
        target.namespace = namespace;
    }
    if target.kind == "Job" && target.api_version.is_empty() && trial.is_trial_job_reference(&target) {
        target.api_version = BATCH_API_VERSION.to_string();
    }

    validate_target(&target)?;
    Ok(target)
}

fn validate_target(target: &ObjectReference) -> Result<(), PatchError> {
    let missing = if target.name.is_empty() {
        "name"
    } else if target.kind.is_empty() {
        "kind"
    } else if target.api_version.is_empty() {
        "apiVersion"
    } else if target.namespace.is_empty() {
        "namespace"
    } else {
        return Ok(());
    };
    Err(PatchError::InvalidTarget(format!("missing {missing}")))
}
