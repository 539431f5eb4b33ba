#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use lockdag::engine::{EngineSettings, JobEngine};
use lockdag::lock::{LockManager, LockObjectReference, ObjectType};
use lockdag::store::{JobStore, MemoryStore};

/// Builder for a `JobEngine` with test-friendly settings.
///
/// Defaults to an in-memory store, a fresh lock manager, and lock timeouts
/// short enough that a stuck lock fails a test quickly.
pub struct EngineBuilder {
    settings: EngineSettings,
    store: Option<Arc<dyn JobStore>>,
    locks: Option<Arc<LockManager>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        let mut settings = EngineSettings::default();
        settings.lock.acquire_timeout = Duration::from_secs(2);
        settings.lock.upgrade_timeout = Duration::from_millis(500);
        Self {
            settings,
            store: None,
            locks: None,
        }
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.settings.worker_pool_size = n;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, n: usize) -> Self {
        self.settings.max_concurrent_jobs = n;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.settings.lock.acquire_timeout = timeout;
        self
    }

    pub fn with_upgrade_timeout(mut self, timeout: Duration) -> Self {
        self.settings.lock.upgrade_timeout = timeout;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_locks(mut self, locks: Arc<LockManager>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn build(self) -> JobEngine {
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let locks = self.locks.unwrap_or_else(|| Arc::new(LockManager::new()));
        JobEngine::new(self.settings, store, locks)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A reference named after its type and id, e.g. `DISTRIBUTED_APPLIANCE-42`.
pub fn object(object_type: ObjectType, id: i64) -> LockObjectReference {
    LockObjectReference::new(object_type, id, format!("{}-{id}", object_type.as_str()))
}
