//! Adapters for the object store, the optimization server and metric backends.

pub mod memory;
pub mod metrics;
pub mod server;
