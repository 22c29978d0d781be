//! Optimization server adapters.

pub mod http;
pub mod mock;

pub use http::HttpOptimizationServer;
pub use mock::{MockFailure, MockOptimizationServer, MockSuggestion};
