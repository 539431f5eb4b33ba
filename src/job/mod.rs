// src/job/mod.rs

//! Persisted job/task data model.
//!
//! These are the audit records the engine writes as a job progresses. They
//! are plain data; the engine owns their lifecycle and the store persists
//! them.

pub mod record;
pub mod state;

pub use record::{JobRecord, MAX_FAIL_REASON_LEN, TaskRecord, truncate_reason};
pub use state::{JobState, JobStatus, TaskState, TaskStatus};

pub type JobId = i64;
pub type TaskId = i64;
