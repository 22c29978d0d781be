//! Domain layer for the trialsync controller
//!
//! This module contains the experiment and trial models and the ports the
//! services drive.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{CaptureError, DomainError, DomainResult, MetricError};
