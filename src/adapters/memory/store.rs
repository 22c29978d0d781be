//! In-memory object store.
//!
//! Implements the [`ObjectStore`] contract without a cluster: every write
//! bumps a global resource version, stale writes are rejected, deletion is
//! gated on finalizers and removing an experiment cascades to the trials it
//! owns. The whole state can be loaded from and dumped to YAML.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::patch::apply_patch;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    selector_matches, ClusterObject, Experiment, LabelSelector, Namespace, NamespacedName,
    ObjectMeta, ObjectReference, PatchType, Pod, Service, Trial,
};
use crate::domain::ports::ObjectStore;

/// Serialized form of the store, used for seeding and inspection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub experiments: Vec<Experiment>,
    #[serde(default)]
    pub trials: Vec<Trial>,
    #[serde(default)]
    pub namespaces: Vec<Namespace>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub pods: Vec<Pod>,
    #[serde(default)]
    pub objects: Vec<ClusterObject>,
}

/// Patch recorded by the store after it was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPatch {
    pub target: ObjectReference,
    pub patch_type: PatchType,
    pub data: String,
}

#[derive(Debug, Default)]
struct State {
    experiments: BTreeMap<NamespacedName, Experiment>,
    trials: BTreeMap<NamespacedName, Trial>,
    namespaces: BTreeMap<String, Namespace>,
    services: Vec<Service>,
    pods: Vec<Pod>,
    objects: Vec<ClusterObject>,
    applied_patches: Vec<AppliedPatch>,
    version: u64,
}

impl State {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// Stamp identity and bookkeeping fields on a new object.
    fn admit(&mut self, meta: &mut ObjectMeta, kind: &str) -> DomainResult<()> {
        if meta.name.is_empty() {
            if meta.generate_name.is_empty() {
                return Err(DomainError::ValidationFailed(format!(
                    "{kind} requires a name or generate_name"
                )));
            }
            let suffix = Uuid::new_v4().simple().to_string();
            meta.name = format!("{}{}", meta.generate_name, &suffix[..5]);
        }
        meta.resource_version = self.next_version();
        meta.creation_timestamp.get_or_insert_with(Utc::now);
        meta.deletion_timestamp = None;
        Ok(())
    }

    /// Remove an experiment and apply the owner cascade to its trials.
    fn remove_experiment(&mut self, name: &NamespacedName) {
        self.experiments.remove(name);
        let owned: Vec<NamespacedName> = self
            .trials
            .values()
            .filter(|t| {
                t.metadata.owner.as_ref().is_some_and(|o| {
                    o.kind == "Experiment" && o.namespaced_name() == *name
                })
            })
            .map(Trial::namespaced_name)
            .collect();
        for trial in owned {
            self.delete_trial(&trial);
        }
    }

    fn delete_trial(&mut self, name: &NamespacedName) {
        let version = self.next_version();
        let Some(trial) = self.trials.get_mut(name) else {
            return;
        };
        if trial.metadata.finalizers.is_empty() {
            self.trials.remove(name);
        } else if trial.metadata.deletion_timestamp.is_none() {
            trial.metadata.deletion_timestamp = Some(Utc::now());
            trial.metadata.resource_version = version;
        }
    }
}

/// Object store held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot; every object gets a fresh resource version.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> DomainResult<Self> {
        let mut state = State::default();

        for mut ns in snapshot.namespaces {
            ns.metadata.resource_version = state.next_version();
            state.namespaces.insert(ns.metadata.name.clone(), ns);
        }
        for mut exp in snapshot.experiments {
            let deleting = exp.metadata.deletion_timestamp;
            state.admit(&mut exp.metadata, "experiment")?;
            exp.metadata.deletion_timestamp = deleting;
            state.experiments.insert(exp.namespaced_name(), exp);
        }
        for mut trial in snapshot.trials {
            let deleting = trial.metadata.deletion_timestamp;
            state.admit(&mut trial.metadata, "trial")?;
            trial.metadata.deletion_timestamp = deleting;
            state.trials.insert(trial.namespaced_name(), trial);
        }
        for mut svc in snapshot.services {
            svc.metadata.resource_version = state.next_version();
            state.services.push(svc);
        }
        for mut pod in snapshot.pods {
            pod.metadata.resource_version = state.next_version();
            state.pods.push(pod);
        }
        for mut obj in snapshot.objects {
            obj.metadata.resource_version = state.next_version();
            state.objects.push(obj);
        }

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
        })
    }

    /// Load a YAML snapshot from disk.
    pub fn from_yaml_file(path: &Path) -> DomainResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DomainError::ExecutionFailed(format!("failed to read {}: {e}", path.display()))
        })?;
        let snapshot: StoreSnapshot = serde_yaml::from_str(&content)?;
        Self::from_snapshot(snapshot)
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read().await;
        StoreSnapshot {
            experiments: state.experiments.values().cloned().collect(),
            trials: state.trials.values().cloned().collect(),
            namespaces: state.namespaces.values().cloned().collect(),
            services: state.services.clone(),
            pods: state.pods.clone(),
            objects: state.objects.clone(),
        }
    }

    /// Write the current state back out as YAML.
    pub async fn save_yaml_file(&self, path: &Path) -> DomainResult<()> {
        let yaml = serde_yaml::to_string(&self.snapshot().await)?;
        tokio::fs::write(path, yaml).await.map_err(|e| {
            DomainError::ExecutionFailed(format!("failed to write {}: {e}", path.display()))
        })
    }

    /// Insert or replace a generic object.
    pub async fn put_object(&self, mut object: ClusterObject) {
        let mut state = self.state.write().await;
        object.metadata.resource_version = state.next_version();
        let reference = object.reference();
        state.objects.retain(|o| !o.matches(&reference));
        state.objects.push(object);
    }

    pub async fn put_service(&self, service: Service) {
        self.state.write().await.services.push(service);
    }

    pub async fn put_pod(&self, pod: Pod) {
        self.state.write().await.pods.push(pod);
    }

    pub async fn put_namespace(&self, namespace: Namespace) {
        self.state
            .write()
            .await
            .namespaces
            .insert(namespace.metadata.name.clone(), namespace);
    }

    /// Every patch applied so far, oldest first.
    pub async fn applied_patches(&self) -> Vec<AppliedPatch> {
        self.state.read().await.applied_patches.clone()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_experiment(&self, name: &NamespacedName) -> DomainResult<Option<Experiment>> {
        Ok(self.state.read().await.experiments.get(name).cloned())
    }

    async fn list_experiments(&self) -> DomainResult<Vec<Experiment>> {
        Ok(self.state.read().await.experiments.values().cloned().collect())
    }

    async fn create_experiment(&self, experiment: &Experiment) -> DomainResult<Experiment> {
        let mut state = self.state.write().await;
        let mut created = experiment.clone();
        state.admit(&mut created.metadata, "experiment")?;
        let key = created.namespaced_name();
        if state.experiments.contains_key(&key) {
            return Err(DomainError::AlreadyExists {
                kind: "experiment".to_string(),
                name: key.to_string(),
            });
        }
        state.experiments.insert(key, created.clone());
        Ok(created)
    }

    async fn update_experiment(&self, experiment: &Experiment) -> DomainResult<Experiment> {
        let mut state = self.state.write().await;
        let key = experiment.namespaced_name();
        let current = state
            .experiments
            .get(&key)
            .ok_or_else(|| DomainError::not_found("experiment", &key))?;
        if current.metadata.resource_version != experiment.metadata.resource_version {
            return Err(DomainError::conflict("experiment", &key));
        }

        let mut updated = experiment.clone();
        // Deletion requests cannot be set or cleared through an update.
        updated.metadata.deletion_timestamp = current.metadata.deletion_timestamp;
        updated.metadata.resource_version = state.next_version();

        if updated.metadata.is_deleted() && updated.metadata.finalizers.is_empty() {
            state.remove_experiment(&key);
        } else {
            state.experiments.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn delete_experiment(&self, name: &NamespacedName) -> DomainResult<()> {
        let mut state = self.state.write().await;
        let version = state.next_version();
        let experiment = state
            .experiments
            .get_mut(name)
            .ok_or_else(|| DomainError::not_found("experiment", name))?;
        if experiment.metadata.finalizers.is_empty() {
            state.remove_experiment(name);
        } else if experiment.metadata.deletion_timestamp.is_none() {
            experiment.metadata.deletion_timestamp = Some(Utc::now());
            experiment.metadata.resource_version = version;
        }
        Ok(())
    }

    async fn get_trial(&self, name: &NamespacedName) -> DomainResult<Option<Trial>> {
        Ok(self.state.read().await.trials.get(name).cloned())
    }

    async fn list_trials(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> DomainResult<Vec<Trial>> {
        let state = self.state.read().await;
        Ok(state
            .trials
            .values()
            .filter(|t| namespace.is_none_or(|ns| t.metadata.namespace == ns))
            .filter(|t| selector_matches(selector, &t.metadata.labels))
            .cloned()
            .collect())
    }

    async fn create_trial(&self, trial: &Trial) -> DomainResult<Trial> {
        let mut state = self.state.write().await;
        let mut created = trial.clone();
        state.admit(&mut created.metadata, "trial")?;
        let key = created.namespaced_name();
        if state.trials.contains_key(&key) {
            return Err(DomainError::AlreadyExists {
                kind: "trial".to_string(),
                name: key.to_string(),
            });
        }
        state.trials.insert(key, created.clone());
        Ok(created)
    }

    async fn update_trial(&self, trial: &Trial) -> DomainResult<Trial> {
        let mut state = self.state.write().await;
        let key = trial.namespaced_name();
        let current = state
            .trials
            .get(&key)
            .ok_or_else(|| DomainError::not_found("trial", &key))?;
        if current.metadata.resource_version != trial.metadata.resource_version {
            return Err(DomainError::conflict("trial", &key));
        }

        let mut updated = trial.clone();
        updated.metadata.deletion_timestamp = current.metadata.deletion_timestamp;
        updated.metadata.resource_version = state.next_version();

        if updated.metadata.is_deleted() && updated.metadata.finalizers.is_empty() {
            state.trials.remove(&key);
        } else {
            state.trials.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn delete_trial(&self, name: &NamespacedName) -> DomainResult<()> {
        let mut state = self.state.write().await;
        if !state.trials.contains_key(name) {
            return Err(DomainError::not_found("trial", name));
        }
        state.delete_trial(name);
        Ok(())
    }

    async fn list_namespaces(&self, selector: Option<&LabelSelector>) -> DomainResult<Vec<Namespace>> {
        let state = self.state.read().await;
        Ok(state
            .namespaces
            .values()
            .filter(|ns| selector.is_none_or(|s| selector_matches(s, &ns.metadata.labels)))
            .cloned()
            .collect())
    }

    async fn list_services(&self, namespace: &str, selector: &LabelSelector) -> DomainResult<Vec<Service>> {
        let state = self.state.read().await;
        Ok(state
            .services
            .iter()
            .filter(|s| s.metadata.namespace == namespace)
            .filter(|s| selector_matches(selector, &s.metadata.labels))
            .cloned()
            .collect())
    }

    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> DomainResult<Vec<Pod>> {
        let state = self.state.read().await;
        Ok(state
            .pods
            .iter()
            .filter(|p| p.metadata.namespace == namespace)
            .filter(|p| selector_matches(selector, &p.metadata.labels))
            .cloned()
            .collect())
    }

    async fn get_object(&self, reference: &ObjectReference) -> DomainResult<Option<ClusterObject>> {
        let state = self.state.read().await;
        Ok(state.objects.iter().find(|o| o.matches(reference)).cloned())
    }

    async fn patch_object(
        &self,
        reference: &ObjectReference,
        patch_type: PatchType,
        data: &str,
    ) -> DomainResult<ClusterObject> {
        let mut state = self.state.write().await;
        let version = state.next_version();
        let object = state
            .objects
            .iter_mut()
            .find(|o| o.matches(reference))
            .ok_or_else(|| DomainError::not_found(reference.kind.clone(), reference.namespaced_name()))?;

        // Patches address the whole object; metadata is patched alongside the body.
        let mut document = match &object.data {
            serde_json::Value::Object(map) => serde_json::Value::Object(map.clone()),
            _ => serde_json::json!({}),
        };
        document["apiVersion"] = serde_json::Value::String(object.api_version.clone());
        document["kind"] = serde_json::Value::String(object.kind.clone());
        document["metadata"] = serde_json::to_value(&object.metadata)?;

        apply_patch(&mut document, patch_type, data).map_err(|reason| DomainError::PatchRejected {
            target: reference.to_string(),
            reason,
        })?;

        if let serde_json::Value::Object(mut map) = document {
            if let Some(metadata) = map.remove("metadata") {
                let mut metadata: ObjectMeta = serde_json::from_value(metadata)?;
                // Identity is not patchable.
                metadata.name = object.metadata.name.clone();
                metadata.namespace = object.metadata.namespace.clone();
                object.metadata = metadata;
            }
            map.remove("apiVersion");
            map.remove("kind");
            object.data = serde_json::Value::Object(map);
        }
        object.metadata.resource_version = version;
        let patched = object.clone();

        state.applied_patches.push(AppliedPatch {
            target: patched.reference(),
            patch_type,
            data: data.to_string(),
        });
        Ok(patched)
    }
}
