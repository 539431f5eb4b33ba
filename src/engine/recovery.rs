// src/engine/recovery.rs

//! Startup recovery of jobs a previous process left unfinished.
//!
//! Lock state lives only in memory, so a job that was QUEUED or RUNNING when
//! its engine went away cannot be resumed safely. Each such job and its
//! unfinished tasks are closed out as FAILED and reported.

use tracing::warn;

use crate::errors::{LockdagError, Result};
use crate::job::{JobId, JobStatus, TaskStatus};
use crate::store::JobStore;

/// Fail reason given to tasks that never completed.
pub const INTERRUPTED_REASON: &str = "interrupted by an engine restart";

/// A job closed out by [`recover_orphaned_jobs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedJob {
    pub job_id: JobId,
    pub name: String,
    /// Tasks that were not COMPLETED and have now been failed.
    pub interrupted_tasks: usize,
}

/// Mark every uncompleted job (and its uncompleted tasks) COMPLETED/FAILED.
pub fn recover_orphaned_jobs(store: &dyn JobStore) -> Result<Vec<OrphanedJob>> {
    let mut orphans = Vec::new();

    for mut job in store.uncompleted_jobs()? {
        let mut interrupted = 0;
        for mut task in store.load_tasks(job.id)? {
            if task.is_completed() {
                continue;
            }
            task.mark_completed(TaskStatus::Failed, Some(INTERRUPTED_REASON));
            store.update_task(&task)?;
            interrupted += 1;
        }

        let reason = LockdagError::OrphanedJobOnRestart {
            job_id: job.id,
            name: job.name.clone(),
        }
        .to_string();
        job.mark_completed(JobStatus::Failed, Some(&reason));
        store.update_job(&job)?;

        warn!(
            job_id = job.id,
            job = %job.name,
            interrupted_tasks = interrupted,
            "orphaned job marked failed"
        );
        orphans.push(OrphanedJob {
            job_id: job.id,
            name: job.name,
            interrupted_tasks: interrupted,
        });
    }

    Ok(orphans)
}
