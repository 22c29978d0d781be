//! Trialsync - experiment and trial synchronization controller
//!
//! Trialsync keeps optimization experiments in a cluster object store in
//! step with a remote optimization server: it creates trials from the
//! server's suggestions, patches the objects under test, waits for the trial
//! job, captures metrics and reports the observed values back.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and the port traits
//! - **Adapters** (`adapters`): in-memory object store, optimization server
//!   clients and metric collectors
//! - **Service Layer** (`services`): reconcilers, patch and metric engines
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use trialsync::adapters::memory::InMemoryObjectStore;
//! use trialsync::adapters::server::MockOptimizationServer;
//! use trialsync::services::{ControllerManager, MetricCapture};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = trialsync::ConfigLoader::load()?;
//!     let store = Arc::new(InMemoryObjectStore::from_yaml_file("state.yaml".as_ref())?);
//!     let server = Arc::new(MockOptimizationServer::new());
//!     let metrics = MetricCapture::new(config.metrics.clone())?;
//!     ControllerManager::new(store, server, metrics, config.controller)
//!         .run_until_idle(std::future::pending())
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{Config, Experiment, Trial, TrialPhase};
pub use domain::ports::{ObjectStore, OptimizationServer};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{ControllerManager, MetricCapture, PatchEngine, ServerReconciler, TrialReconciler};
