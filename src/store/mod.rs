// src/store/mod.rs

//! Persistence collaborator.
//!
//! The engine writes [`JobRecord`]s and [`TaskRecord`]s through the
//! [`JobStore`] trait and opens a [`Transaction`] around each transactional
//! node. Two implementations:
//! - [`MemoryStore`]: process-local, used by tests and ad-hoc runs.
//! - [`SqliteStore`]: durable, backs the CLI and orphan recovery.
//!
//! Store calls are synchronous and short; the engine calls them from its
//! async tasks directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::StoreSection;
use crate::errors::Result;
use crate::job::{JobId, JobRecord, TaskRecord};
use crate::types::StoreKind;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Job/task record persistence.
pub trait JobStore: Send + Sync {
    /// Insert a new job; the assigned id is written back into `job.id`.
    fn insert_job(&self, job: &mut JobRecord) -> Result<()>;

    fn update_job(&self, job: &JobRecord) -> Result<()>;

    /// Insert a new task; the assigned id is written back into `task.id`.
    fn insert_task(&self, task: &mut TaskRecord) -> Result<()>;

    /// Rewrite a task row including its edges, children and objects.
    fn update_task(&self, task: &TaskRecord) -> Result<()>;

    /// Remove a job together with its tasks, edges and objects.
    fn delete_job(&self, id: JobId) -> Result<()>;

    fn load_job(&self, id: JobId) -> Result<Option<JobRecord>>;

    /// Tasks of a job ordered by `dependency_order`.
    fn load_tasks(&self, job_id: JobId) -> Result<Vec<TaskRecord>>;

    /// All jobs, newest first.
    fn list_jobs(&self) -> Result<Vec<JobRecord>>;

    /// Jobs whose state is not COMPLETED.
    fn uncompleted_jobs(&self) -> Result<Vec<JobRecord>>;

    /// Open a unit of work for one transactional node.
    fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// Unit of work handed to a transactional node.
///
/// Writes become visible to other transactions only on `commit`.
pub trait Transaction: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&mut self, key: &str, value: &str);
    fn delete(&mut self, key: &str);
    fn commit(self: Box<Self>) -> Result<()>;
    fn rollback(self: Box<Self>);
}

/// Committed key/value state behind a [`BufferedTransaction`].
pub(crate) trait KvBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;
    /// Apply every write atomically. `None` deletes the key.
    fn apply(&self, writes: BTreeMap<String, Option<String>>) -> Result<()>;
}

/// Transaction that buffers writes and applies them in one go on commit.
pub(crate) struct BufferedTransaction {
    backend: Arc<dyn KvBackend>,
    writes: BTreeMap<String, Option<String>>,
}

impl BufferedTransaction {
    pub(crate) fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            writes: BTreeMap::new(),
        }
    }
}

impl Transaction for BufferedTransaction {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.writes.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => self.backend.read(key),
        }
    }

    fn put(&mut self, key: &str, value: &str) {
        self.writes.insert(key.to_string(), Some(value.to_string()));
    }

    fn delete(&mut self, key: &str) {
        self.writes.insert(key.to_string(), None);
    }

    fn commit(self: Box<Self>) -> Result<()> {
        debug!(writes = self.writes.len(), "committing transaction");
        let this = *self;
        this.backend.apply(this.writes)
    }

    fn rollback(self: Box<Self>) {
        debug!(writes = self.writes.len(), "rolling back transaction");
    }
}

/// Open the store described by the `[store]` config section.
pub fn open_store(section: &StoreSection) -> Result<Arc<dyn JobStore>> {
    match section.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreKind::Sqlite => Ok(Arc::new(SqliteStore::open(&section.path)?)),
    }
}
