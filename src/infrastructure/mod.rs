//! Infrastructure layer module
//!
//! Configuration loading and logging setup. Adapters for the domain ports
//! live in `crate::adapters`.

pub mod config;
pub mod logging;
