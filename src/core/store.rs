//! Resource store abstraction consumed by the reconciler.
//!
//! The store is the only shared state between reconciler invocations. It
//! offers namespaced get/list/create/update with optimistic concurrency:
//! `update` succeeds only when the caller's `resource_version` matches the
//! stored one and fails with [`SchedulerError::PersistenceConflict`] otherwise.

use async_trait::async_trait;

use crate::core::resource::Resource;
use crate::core::SchedulerError;

/// Abstraction for resource store backends.
#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    /// Fetch one object, `None` if it does not exist.
    async fn get<R: Resource>(&self, namespace: &str, name: &str)
        -> Result<Option<R>, SchedulerError>;

    /// All objects of kind `R` in `namespace`, ordered by name.
    async fn list<R: Resource>(&self, namespace: &str) -> Result<Vec<R>, SchedulerError>;

    /// Create an object; fails with `AlreadyExists` on a name clash.
    /// Returns the stored object with uid and version assigned.
    async fn create<R: Resource>(&self, object: &R) -> Result<R, SchedulerError>;

    /// Replace an object if its version is current.
    /// Returns the stored object with its new version.
    async fn update<R: Resource>(&self, object: &R) -> Result<R, SchedulerError>;
}
