// src/engine/mod.rs

//! Job engine.
//!
//! This module ties together:
//! - the pure per-job scheduling core ([`core`])
//! - record persistence at submission and on expansion ([`persist`])
//! - the async per-job runner that drives the core and the worker pool
//!   ([`runner`])
//! - the public [`JobEngine`] (submit / wait / subscribe / shutdown)
//! - serial submission ([`queue`]) and restart recovery ([`recovery`])

use crate::graph::NodeId;
use crate::job::{JobId, JobState, JobStatus, TaskId, TaskState, TaskStatus};
use crate::lock::LockSettings;

pub mod core;
pub mod job_engine;
pub mod persist;
pub mod queue;
pub mod recovery;
pub mod runner;

pub use self::core::{CoreCommand, CoreStep, JobRunCore, NodeResult, NodeState};
pub use job_engine::{JobEngine, JobHandle, JobRequest};
pub use queue::{JobQueue, QueuedJob};
pub use recovery::{OrphanedJob, recover_orphaned_jobs};

/// Engine-wide knobs, normally built from the `[engine]` and `[lock]`
/// config sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Nodes executing at once across all jobs.
    pub worker_pool_size: usize,
    /// Jobs running at once; later submissions stay QUEUED.
    pub max_concurrent_jobs: usize,
    /// Capacity of the [`EngineEvent`] broadcast channel.
    pub event_buffer: usize,
    pub lock: LockSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: 40,
            max_concurrent_jobs: 10,
            event_buffer: 256,
            lock: LockSettings::default(),
        }
    }
}

/// Progress notifications published by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    JobStateChanged {
        job_id: JobId,
        state: JobState,
    },
    TaskChanged {
        job_id: JobId,
        task_id: TaskId,
        name: String,
        state: TaskState,
        status: Option<TaskStatus>,
    },
    JobCompleted {
        job_id: JobId,
        status: JobStatus,
    },
}

/// Events flowing from workers back into a job's runner.
#[derive(Debug)]
pub(crate) enum RunEvent {
    /// A worker permit was obtained and the node is executing.
    NodeStarted(NodeId),
    NodeFinished { node: NodeId, result: NodeResult },
}
