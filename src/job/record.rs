// src/job/record.rs

use chrono::{DateTime, Utc};

use crate::graph::TaskGuard;
use crate::lock::LockObjectReference;

use super::state::{JobState, JobStatus, TaskState, TaskStatus};
use super::{JobId, TaskId};

/// Failure reasons are cut to this many characters before persisting.
pub const MAX_FAIL_REASON_LEN: usize = 1024;

/// Truncate to [`MAX_FAIL_REASON_LEN`] characters (not bytes).
pub fn truncate_reason(reason: &str) -> String {
    reason.chars().take(MAX_FAIL_REASON_LEN).collect()
}

/// One submitted job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    /// Assigned by the store on insert; `0` before that.
    pub id: JobId,
    pub name: String,
    pub state: JobState,
    /// Set once the job completes.
    pub status: Option<JobStatus>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub submitted_by: Option<String>,
    /// Objects the submitter declared this job affects.
    pub objects: Vec<LockObjectReference>,
}

impl JobRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            state: JobState::Queued,
            status: None,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failure_reason: None,
            submitted_by: None,
            objects: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == JobState::Completed
    }

    pub fn mark_running(&mut self) {
        self.state = JobState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, status: JobStatus, failure_reason: Option<&str>) {
        self.state = JobState::Completed;
        self.status = Some(status);
        self.failure_reason = failure_reason.map(truncate_reason);
        self.completed_at = Some(Utc::now());
    }
}

/// One graph node of a job, as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    /// Assigned by the store on insert; `0` before that.
    pub id: TaskId,
    pub job_id: JobId,
    pub name: String,
    pub state: TaskState,
    /// Set once the task completes.
    pub status: Option<TaskStatus>,
    pub fail_reason: Option<String>,
    pub guard: TaskGuard,
    /// 1-based topological index within the job; spliced nodes continue the
    /// sequence.
    pub dependency_order: i64,
    pub predecessors: Vec<TaskId>,
    pub successors: Vec<TaskId>,
    /// Records created by this node's expansion (meta-tasks only).
    pub children: Vec<TaskId>,
    pub parent: Option<TaskId>,
    pub objects: Vec<LockObjectReference>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(job_id: JobId, name: impl Into<String>, guard: TaskGuard, dependency_order: i64) -> Self {
        let name = name.into();
        Self {
            id: 0,
            job_id,
            name: if name.trim().is_empty() {
                "(unnamed task)".to_string()
            } else {
                name
            },
            state: TaskState::Pending,
            status: None,
            fail_reason: None,
            guard,
            dependency_order,
            predecessors: Vec::new(),
            successors: Vec::new(),
            children: Vec::new(),
            parent: None,
            objects: Vec::new(),
            queued_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == TaskState::Completed
    }

    pub fn mark_queued(&mut self) {
        self.state = TaskState::Queued;
        self.queued_at = Some(Utc::now());
    }

    pub fn mark_running(&mut self) {
        self.state = TaskState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, status: TaskStatus, fail_reason: Option<&str>) {
        self.state = TaskState::Completed;
        self.status = Some(status);
        self.fail_reason = fail_reason.map(truncate_reason);
        self.completed_at = Some(Utc::now());
    }
}
