// src/store/memory.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::errors::{LockdagError, Result};
use crate::job::{JobId, JobRecord, TaskRecord};

use super::{BufferedTransaction, JobStore, KvBackend, Transaction};

#[derive(Debug, Default)]
struct Records {
    jobs: BTreeMap<JobId, JobRecord>,
    tasks: BTreeMap<i64, TaskRecord>,
    next_job: JobId,
    next_task: i64,
}

#[derive(Debug, Default)]
struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
}

impl KvBackend for MemoryKv {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn apply(&self, writes: BTreeMap<String, Option<String>>) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in writes {
            match value {
                Some(v) => entries.insert(key, v),
                None => entries.remove(&key),
            };
        }
        Ok(())
    }
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
    kv: Arc<MemoryKv>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Committed value for `key` (test/inspection helper).
    pub fn committed(&self, key: &str) -> Option<String> {
        self.kv.read(key).ok().flatten()
    }
}

impl JobStore for MemoryStore {
    fn insert_job(&self, job: &mut JobRecord) -> Result<()> {
        let mut records = self.records();
        records.next_job += 1;
        job.id = records.next_job;
        records.jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn update_job(&self, job: &JobRecord) -> Result<()> {
        let mut records = self.records();
        let slot = records
            .jobs
            .get_mut(&job.id)
            .ok_or(LockdagError::JobNotFound(job.id))?;
        *slot = job.clone();
        Ok(())
    }

    fn insert_task(&self, task: &mut TaskRecord) -> Result<()> {
        let mut records = self.records();
        if !records.jobs.contains_key(&task.job_id) {
            return Err(LockdagError::JobNotFound(task.job_id));
        }
        records.next_task += 1;
        task.id = records.next_task;
        records.tasks.insert(task.id, task.clone());
        Ok(())
    }

    fn update_task(&self, task: &TaskRecord) -> Result<()> {
        let mut records = self.records();
        let slot = records
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| LockdagError::Store(format!("task {} not found", task.id)))?;
        *slot = task.clone();
        Ok(())
    }

    fn delete_job(&self, id: JobId) -> Result<()> {
        let mut records = self.records();
        records.jobs.remove(&id);
        records.tasks.retain(|_, t| t.job_id != id);
        Ok(())
    }

    fn load_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        Ok(self.records().jobs.get(&id).cloned())
    }

    fn load_tasks(&self, job_id: JobId) -> Result<Vec<TaskRecord>> {
        let mut tasks: Vec<TaskRecord> = self
            .records()
            .tasks
            .values()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.dependency_order, t.id));
        Ok(tasks)
    }

    fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        Ok(self.records().jobs.values().rev().cloned().collect())
    }

    fn uncompleted_jobs(&self) -> Result<Vec<JobRecord>> {
        Ok(self
            .records()
            .jobs
            .values()
            .filter(|j| !j.is_completed())
            .cloned()
            .collect())
    }

    fn begin(&self) -> Result<Box<dyn Transaction>> {
        let backend: Arc<dyn KvBackend> = self.kv.clone();
        Ok(Box::new(BufferedTransaction::new(backend)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TaskGuard;

    #[test]
    fn ids_are_assigned_on_insert() {
        let store = MemoryStore::new();
        let mut job = JobRecord::new("a");
        store.insert_job(&mut job).unwrap();
        assert_eq!(job.id, 1);

        let mut t1 = TaskRecord::new(job.id, "t1", TaskGuard::default(), 2);
        let mut t2 = TaskRecord::new(job.id, "t2", TaskGuard::default(), 1);
        store.insert_task(&mut t1).unwrap();
        store.insert_task(&mut t2).unwrap();

        let names: Vec<_> = store
            .load_tasks(job.id)
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["t2", "t1"]);
    }

    #[test]
    fn task_for_unknown_job_is_rejected() {
        let store = MemoryStore::new();
        let mut t = TaskRecord::new(42, "t", TaskGuard::default(), 1);
        assert!(matches!(store.insert_task(&mut t), Err(LockdagError::JobNotFound(42))));
    }

    #[test]
    fn transaction_writes_are_invisible_until_commit() {
        let store = MemoryStore::new();

        let mut tx = store.begin().unwrap();
        tx.put("vs/1", "synced");
        assert_eq!(tx.get("vs/1").unwrap().as_deref(), Some("synced"));
        assert_eq!(store.committed("vs/1"), None);
        tx.commit().unwrap();
        assert_eq!(store.committed("vs/1").as_deref(), Some("synced"));

        let mut tx = store.begin().unwrap();
        tx.delete("vs/1");
        tx.rollback();
        assert_eq!(store.committed("vs/1").as_deref(), Some("synced"));
    }
}
