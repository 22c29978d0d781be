//! In-memory object store adapter.

mod patch;
mod store;

pub use patch::apply_patch;
pub use store::{AppliedPatch, InMemoryObjectStore, StoreSnapshot};
