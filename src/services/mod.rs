pub mod controller;
pub mod experiment;
pub mod metric_capture;
pub mod patch_engine;
pub mod server_mapping;
pub mod server_reconciler;
pub mod template;
pub mod trial_reconciler;
pub mod trial_status;
pub mod validation;

pub use controller::ControllerManager;
pub use metric_capture::MetricCapture;
pub use patch_engine::{PatchEngine, PatchError};
pub use server_reconciler::{ReconcileAction, ServerReconciler};
pub use template::{TemplateEngine, TemplateError};
pub use trial_reconciler::TrialReconciler;
pub use trial_status::{derive_phase, summarize, update_status};
pub use validation::{validate_assignments, AssignmentError};
