//! Infrastructure adapters for resource store backends.

pub mod store;
pub use store::InMemoryStore;
