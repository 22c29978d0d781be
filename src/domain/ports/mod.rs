//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that adapters must implement:
//! - `ObjectStore`: cluster object reads, optimistic writes and patches
//! - `OptimizationServer`: the remote service handing out suggestions
//!
//! These traits keep the reconcilers independent of any particular
//! cluster client or HTTP stack.

pub mod object_store;
pub mod optimization_server;

pub use object_store::ObjectStore;
pub use optimization_server::{OptimizationServer, ServerError, ServerResult};
