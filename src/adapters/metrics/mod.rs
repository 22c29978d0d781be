//! Metric collector adapters.

pub mod datadog;
pub mod json_path;
pub mod prometheus;

pub use datadog::{Aggregation, DatadogCollector};
pub use json_path::JsonPathCollector;
pub use prometheus::PrometheusCollector;
