pub mod cluster;
pub mod config;
pub mod experiment;
pub mod meta;
pub mod server;
pub mod trial;

/// API group version of the experiment and trial kinds.
pub const API_VERSION: &str = "redskyops.dev/v1beta1";

pub use cluster::{
    ClusterObject, Container, Namespace, ObjectCondition, Pod, Quantity, Service, ServicePort,
    TargetObject,
};
pub use config::{
    Config, ControllerConfig, DatadogConfig, LoggingConfig, MetricsConfig, ServerConfig,
};
pub use experiment::{
    Experiment, ExperimentSpec, ExperimentStatus, Metric, MetricType, Optimization, Parameter,
    PatchTemplate, PatchType, PortSpec, TrialTemplate,
};
pub use meta::{
    selector_matches, LabelSelector, NamespacedName, ObjectMeta, ObjectReference,
    ANNOTATION_METRIC_TARGET, LABEL_EXPERIMENT, SERVER_FINALIZER,
};
pub use server::{
    ExperimentName, NumberOrString, ServerAssignment, ServerExperiment, ServerMetric,
    ServerOptimization, ServerParameter, ServerValue, TrialAssignments, TrialValues,
};
pub use trial::{
    Assignment, ConditionStatus, PatchOperation, Trial, TrialCondition, TrialConditionType,
    TrialPhase, TrialReadinessGate, TrialSpec, TrialStatus, Value, DEFAULT_ATTEMPTS,
};
