use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ClusterObject, Experiment, LabelSelector, Namespace, NamespacedName, ObjectReference,
    PatchType, Pod, Service, Trial,
};

/// Cluster object store port.
///
/// Writes are optimistic: an update carrying a stale `resource_version`
/// fails with [`DomainError::ConcurrencyConflict`](crate::domain::DomainError)
/// and the caller is expected to re-read and retry. Deleting an object that
/// still carries finalizers only marks it for deletion.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get an experiment by name
    async fn get_experiment(&self, name: &NamespacedName) -> DomainResult<Option<Experiment>>;

    /// List every experiment in every namespace
    async fn list_experiments(&self) -> DomainResult<Vec<Experiment>>;

    /// Create an experiment; returns the stored copy
    async fn create_experiment(&self, experiment: &Experiment) -> DomainResult<Experiment>;

    /// Replace an experiment; returns the stored copy with its new version
    async fn update_experiment(&self, experiment: &Experiment) -> DomainResult<Experiment>;

    /// Request deletion of an experiment
    async fn delete_experiment(&self, name: &NamespacedName) -> DomainResult<()>;

    /// Get a trial by name
    async fn get_trial(&self, name: &NamespacedName) -> DomainResult<Option<Trial>>;

    /// List trials matching a label selector, optionally restricted to one namespace
    async fn list_trials(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> DomainResult<Vec<Trial>>;

    /// Create a trial; a name is generated when only `generate_name` is set
    async fn create_trial(&self, trial: &Trial) -> DomainResult<Trial>;

    /// Replace a trial; returns the stored copy with its new version
    async fn update_trial(&self, trial: &Trial) -> DomainResult<Trial>;

    /// Request deletion of a trial
    async fn delete_trial(&self, name: &NamespacedName) -> DomainResult<()>;

    /// List namespaces, optionally filtered by labels
    async fn list_namespaces(&self, selector: Option<&LabelSelector>) -> DomainResult<Vec<Namespace>>;

    /// List services in a namespace matching a selector
    async fn list_services(&self, namespace: &str, selector: &LabelSelector) -> DomainResult<Vec<Service>>;

    /// List pods in a namespace matching a selector
    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> DomainResult<Vec<Pod>>;

    /// Get an arbitrary object by reference
    async fn get_object(&self, reference: &ObjectReference) -> DomainResult<Option<ClusterObject>>;

    /// Apply a rendered patch to an object; returns the patched object
    async fn patch_object(
        &self,
        reference: &ObjectReference,
        patch_type: PatchType,
        data: &str,
    ) -> DomainResult<ClusterObject>;
}
