// src/task/context.rs

use std::fmt;
use std::sync::Arc;

use crate::job::{JobId, TaskId};
use crate::lock::{LockManager, LockSettings};
use crate::store::Transaction;

/// Everything a running node can reach.
pub struct TaskContext {
    job_id: JobId,
    task_id: TaskId,
    locks: Arc<LockManager>,
    lock_settings: LockSettings,
    transaction: Option<Box<dyn Transaction>>,
}

impl TaskContext {
    pub fn new(
        job_id: JobId,
        task_id: TaskId,
        locks: Arc<LockManager>,
        lock_settings: LockSettings,
    ) -> Self {
        Self {
            job_id,
            task_id,
            locks,
            lock_settings,
            transaction: None,
        }
    }

    pub fn with_transaction(mut self, transaction: Box<dyn Transaction>) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn lock_settings(&self) -> LockSettings {
        self.lock_settings
    }

    /// The node's transaction; `None` unless the node is transactional.
    pub fn transaction(&mut self) -> Option<&mut (dyn Transaction + 'static)> {
        self.transaction.as_deref_mut()
    }

    pub(crate) fn take_transaction(&mut self) -> Option<Box<dyn Transaction>> {
        self.transaction.take()
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("job_id", &self.job_id)
            .field("task_id", &self.task_id)
            .field("lock_settings", &self.lock_settings)
            .field("transactional", &self.transaction.is_some())
            .finish_non_exhaustive()
    }
}
