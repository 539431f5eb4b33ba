// src/engine/job_engine.rs

//! Public entry point: submit task graphs, observe and await jobs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Semaphore, broadcast, watch};
use tracing::{info, warn};

use crate::config::ConfigFile;
use crate::engine::core::JobRunCore;
use crate::engine::persist::persist_job;
use crate::engine::recovery::recover_orphaned_jobs;
use crate::engine::runner::JobRunner;
use crate::engine::{EngineEvent, EngineSettings};
use crate::errors::{LockdagError, Result};
use crate::exec::{NodeExecutor, WorkerPool};
use crate::graph::TaskGraph;
use crate::job::{JobId, JobRecord, JobState, TaskRecord};
use crate::lock::{LockManager, LockObjectReference};
use crate::store::{JobStore, MemoryStore, open_store};

/// A root graph plus the job-level metadata recorded with it.
#[derive(Debug)]
pub struct JobRequest {
    pub name: String,
    pub graph: TaskGraph,
    pub objects: Vec<LockObjectReference>,
    pub submitted_by: Option<String>,
}

impl JobRequest {
    pub fn new(name: impl Into<String>, graph: TaskGraph) -> Self {
        Self {
            name: name.into(),
            graph,
            objects: Vec::new(),
            submitted_by: None,
        }
    }

    pub fn with_objects(mut self, objects: impl IntoIterator<Item = LockObjectReference>) -> Self {
        self.objects.extend(objects);
        self
    }

    pub fn submitted_by(mut self, who: impl Into<String>) -> Self {
        self.submitted_by = Some(who.into());
        self
    }
}

/// Handle to a submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    done: watch::Receiver<Option<JobRecord>>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// The final record if the job has completed.
    pub fn completed(&self) -> Option<JobRecord> {
        self.done.borrow().clone()
    }

    /// Wait until the job is COMPLETED and return its final record.
    pub async fn wait(mut self) -> Result<JobRecord> {
        let record = self
            .done
            .wait_for(Option::is_some)
            .await
            .map_err(|_| LockdagError::EngineShutdown)?;
        record.clone().ok_or(LockdagError::JobNotFound(self.id))
    }
}

/// State shared between the engine handle and every job runner.
pub(crate) struct EngineShared {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) locks: Arc<LockManager>,
    pub(crate) settings: EngineSettings,
    pub(crate) executor: NodeExecutor,
    pub(crate) job_slots: Arc<Semaphore>,
    events: broadcast::Sender<EngineEvent>,
    active: Mutex<HashMap<JobId, watch::Receiver<Option<JobRecord>>>>,
    shutting_down: AtomicBool,
}

impl EngineShared {
    pub(crate) fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Leave the active set and publish the final record in one step, so
    /// neither a waiter nor a shutdown snapshot sees one without the other.
    pub(crate) fn retire(&self, done: &watch::Sender<Option<JobRecord>>, job: JobRecord) {
        let mut active = self.active();
        active.remove(&job.id);
        done.send_replace(Some(job));
    }

    fn active(&self) -> MutexGuard<'_, HashMap<JobId, watch::Receiver<Option<JobRecord>>>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The job engine. Cheap to clone; clones share one engine.
#[derive(Clone)]
pub struct JobEngine {
    shared: Arc<EngineShared>,
}

impl JobEngine {
    pub fn new(settings: EngineSettings, store: Arc<dyn JobStore>, locks: Arc<LockManager>) -> Self {
        let pool = WorkerPool::new(settings.worker_pool_size);
        let executor = NodeExecutor::new(pool, Arc::clone(&store), Arc::clone(&locks), settings.lock);
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));

        Self {
            shared: Arc::new(EngineShared {
                store,
                locks,
                settings,
                executor,
                job_slots: Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1))),
                events,
                active: Mutex::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Engine over a fresh in-memory store and lock manager.
    pub fn in_memory(settings: EngineSettings) -> Self {
        Self::new(settings, Arc::new(MemoryStore::new()), Arc::new(LockManager::new()))
    }

    /// Open the configured store, fail any jobs a previous process left
    /// unfinished, and build the engine.
    pub fn from_config(config: &ConfigFile) -> Result<Self> {
        let store = open_store(&config.store)?;
        let orphans = recover_orphaned_jobs(store.as_ref())?;
        if !orphans.is_empty() {
            warn!(count = orphans.len(), "marked orphaned jobs as failed");
        }
        Ok(Self::new(config.engine, store, Arc::new(LockManager::new())))
    }

    pub fn settings(&self) -> EngineSettings {
        self.shared.settings
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.shared.locks
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.shared.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    /// Validate and persist `request`, then start running it.
    ///
    /// A cyclic graph is rejected with `GraphCycle` before anything is
    /// persisted. Must be called from within a Tokio runtime.
    pub fn submit(&self, request: JobRequest) -> Result<JobHandle> {
        if self.is_shut_down() {
            return Err(LockdagError::EngineShutdown);
        }

        let JobRequest {
            name,
            graph,
            objects,
            submitted_by,
        } = request;

        let core = JobRunCore::new(graph)?;

        let mut job = JobRecord::new(name);
        job.objects = objects;
        job.submitted_by = submitted_by;

        // The flag is re-checked under the active-set lock, which shutdown
        // also takes, so an accepted job is always in shutdown's snapshot.
        let (job, records, done_tx, done_rx) = {
            let mut active = self.shared.active();
            if self.is_shut_down() {
                return Err(LockdagError::EngineShutdown);
            }
            let (job, records) = persist_job(self.shared.store.as_ref(), job, core.graph())?;
            let (done_tx, done_rx) = watch::channel(None);
            active.insert(job.id, done_rx.clone());
            (job, records, done_tx, done_rx)
        };
        let job_id = job.id;

        info!(job_id, job = %job.name, nodes = records.len(), "job submitted");
        self.shared.emit(EngineEvent::JobStateChanged {
            job_id,
            state: JobState::Queued,
        });

        let runner = JobRunner::new(job, core, records, Arc::clone(&self.shared), done_tx);
        tokio::spawn(runner.run());

        Ok(JobHandle {
            id: job_id,
            done: done_rx,
        })
    }

    /// Submit and wait for completion.
    pub async fn run(&self, request: JobRequest) -> Result<JobRecord> {
        self.submit(request)?.wait().await
    }

    /// Handle for a job still running in this engine.
    pub fn handle(&self, job_id: JobId) -> Option<JobHandle> {
        self.shared.active().get(&job_id).map(|done| JobHandle {
            id: job_id,
            done: done.clone(),
        })
    }

    /// Ids of jobs submitted to this engine that have not completed.
    pub fn active_jobs(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.shared.active().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn job(&self, job_id: JobId) -> Result<JobRecord> {
        self.shared
            .store
            .load_job(job_id)?
            .ok_or(LockdagError::JobNotFound(job_id))
    }

    /// Task records of a job in `dependency_order`.
    pub fn tasks(&self, job_id: JobId) -> Result<Vec<TaskRecord>> {
        self.job(job_id)?;
        self.shared.store.load_tasks(job_id)
    }

    /// Stop accepting jobs and wait for the active ones to complete.
    pub async fn shutdown(&self) {
        let pending: Vec<watch::Receiver<Option<JobRecord>>> = {
            let active = self.shared.active();
            if self.shared.shutting_down.swap(true, Ordering::SeqCst) {
                return;
            }
            active.values().cloned().collect()
        };
        info!(active = pending.len(), "engine shutting down");

        for mut done in pending {
            let _ = done.wait_for(Option::is_some).await;
        }
        info!("engine shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }
}
