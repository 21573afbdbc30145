//! In-memory resource store for development/testing.
//!
//! Objects are held as JSON documents keyed by `(kind, namespace, name)` in a
//! `BTreeMap`, which gives lists a stable name order. Every successful write
//! takes a fresh `resource_version` from a store-wide counter.
//!
//! Faults can be injected per operation and kind to exercise conflict and
//! persistence-failure paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::core::resource::Resource;
use crate::core::store::ResourceStore;
use crate::core::SchedulerError;
use crate::util::telemetry::Logger;

/// Store operation a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `get`
    Get,
    /// `list`
    List,
    /// `create`
    Create,
    /// `update`
    Update,
}

type FaultMatcher = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// Injected failure, consumed each time it fires.
pub struct StoreFault {
    op: StoreOp,
    kind: &'static str,
    remaining: usize,
    error: SchedulerError,
    matcher: Option<FaultMatcher>,
}

impl StoreFault {
    /// Fail the next `times` calls of `op` on kind `R` with `error`.
    #[must_use]
    pub fn new<R: Resource>(op: StoreOp, times: usize, error: SchedulerError) -> Self {
        Self {
            op,
            kind: R::KIND,
            remaining: times,
            error,
            matcher: None,
        }
    }

    /// Only fire for writes whose encoded object satisfies `matcher`.
    #[must_use]
    pub fn matching(mut self, matcher: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        self.matcher = Some(Box::new(matcher));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    kind: &'static str,
    namespace: String,
    name: String,
}

/// Thread-safe in-memory store.
pub struct InMemoryStore {
    objects: RwLock<BTreeMap<ObjectKey, Value>>,
    version: AtomicU64,
    faults: Mutex<Vec<StoreFault>>,
    writes: Mutex<HashMap<&'static str, u64>>,
    log: Logger,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            version: AtomicU64::new(0),
            faults: Mutex::new(Vec::new()),
            writes: Mutex::new(HashMap::new()),
            log: Logger::disabled(),
        }
    }

    /// Attach store events to `log`.
    #[must_use]
    pub fn with_logger(mut self, log: Logger) -> Self {
        self.log = log;
        self
    }

    /// Register a fault.
    pub fn inject_fault(&self, fault: StoreFault) {
        self.faults.lock().push(fault);
    }

    /// Number of successful creates and updates for kind `R`.
    #[must_use]
    pub fn write_count<R: Resource>(&self) -> u64 {
        self.writes.lock().get(R::KIND).copied().unwrap_or(0)
    }

    /// Create synchronously; used for seeding fixtures.
    ///
    /// # Errors
    ///
    /// Same as [`ResourceStore::create`].
    pub fn insert<R: Resource>(&self, object: R) -> Result<R, SchedulerError> {
        let key = Self::key_of(&object);
        self.check_fault(StoreOp::Create, R::KIND, Some(&serde_json::to_value(&object)?))?;

        let mut stored = object;
        {
            let mut objects = self.objects.write();
            if objects.contains_key(&key) {
                return Err(SchedulerError::AlreadyExists {
                    kind: R::KIND,
                    name: key.name,
                });
            }
            let meta = stored.meta_mut();
            if meta.uid.is_empty() {
                meta.uid = uuid::Uuid::new_v4().to_string();
            }
            meta.resource_version = self.next_version();
            objects.insert(key, serde_json::to_value(&stored)?);
        }
        self.count_write(R::KIND);
        Ok(stored)
    }

    /// Remove an object, returning whether it existed.
    pub fn delete<R: Resource>(&self, namespace: &str, name: &str) -> bool {
        let key = ObjectKey {
            kind: R::KIND,
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.objects.write().remove(&key).is_some()
    }

    fn key_of<R: Resource>(object: &R) -> ObjectKey {
        let meta = object.meta();
        ObjectKey {
            kind: R::KIND,
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
        }
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn count_write(&self, kind: &'static str) {
        *self.writes.lock().entry(kind).or_insert(0) += 1;
    }

    fn check_fault(
        &self,
        op: StoreOp,
        kind: &'static str,
        object: Option<&Value>,
    ) -> Result<(), SchedulerError> {
        let mut faults = self.faults.lock();
        let hit = faults.iter_mut().position(|f| {
            f.op == op
                && f.kind == kind
                && f.remaining > 0
                && match (&f.matcher, object) {
                    (Some(m), Some(v)) => m(v),
                    (Some(_), None) => false,
                    (None, _) => true,
                }
        });
        let Some(idx) = hit else {
            return Ok(());
        };
        let fault = &mut faults[idx];
        fault.remaining -= 1;
        let error = fault.error.clone();
        if fault.remaining == 0 {
            faults.remove(idx);
        }
        drop(faults);
        tracing::debug!(parent: self.log.span(), ?op, kind, %error, "injected store fault");
        Err(error)
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get<R: Resource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<R>, SchedulerError> {
        self.check_fault(StoreOp::Get, R::KIND, None)?;
        let key = ObjectKey {
            kind: R::KIND,
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        let value = self.objects.read().get(&key).cloned();
        value
            .map(|v| serde_json::from_value(v).map_err(SchedulerError::from))
            .transpose()
    }

    async fn list<R: Resource>(&self, namespace: &str) -> Result<Vec<R>, SchedulerError> {
        self.check_fault(StoreOp::List, R::KIND, None)?;
        let values: Vec<Value> = self
            .objects
            .read()
            .iter()
            .filter(|(k, _)| k.kind == R::KIND && k.namespace == namespace)
            .map(|(_, v)| v.clone())
            .collect();
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(SchedulerError::from))
            .collect()
    }

    async fn create<R: Resource>(&self, object: &R) -> Result<R, SchedulerError> {
        self.insert(object.clone())
    }

    async fn update<R: Resource>(&self, object: &R) -> Result<R, SchedulerError> {
        let key = Self::key_of(object);
        self.check_fault(StoreOp::Update, R::KIND, Some(&serde_json::to_value(object)?))?;

        let mut stored = object.clone();
        {
            let mut objects = self.objects.write();
            let Some(current) = objects.get(&key) else {
                return Err(SchedulerError::not_found(R::KIND, key.name));
            };
            let current_version = current["metadata"]["resourceVersion"].as_u64().unwrap_or(0);
            let current_uid = current["metadata"]["uid"].as_str().unwrap_or_default().to_string();
            if current_version != object.meta().resource_version {
                return Err(SchedulerError::PersistenceConflict {
                    kind: R::KIND,
                    name: key.name,
                });
            }
            let meta = stored.meta_mut();
            meta.uid = current_uid;
            meta.resource_version = self.next_version();
            objects.insert(key, serde_json::to_value(&stored)?);
        }
        self.count_write(R::KIND);
        Ok(stored)
    }
}
