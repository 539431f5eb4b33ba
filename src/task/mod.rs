// src/task/mod.rs

//! Units of work scheduled by the engine.
//!
//! - [`Task`]: a leaf node; runs once and succeeds or fails.
//! - [`MetaTask`]: a node whose execution produces a [`TaskGraph`] that the
//!   engine splices into the running job in its place.
//! - [`TaskNode`]: what a graph node holds (either of the above).
//! - [`TaskContext`]: what a node sees while running (ids, lock manager,
//!   lock timeouts, optional transaction).
//! - [`lock_tasks`]: lock / unlock / upgrade nodes and the helpers that
//!   take several locks atomically before a job is submitted.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::graph::TaskGraph;
use crate::lock::LockObjectReference;

pub mod context;
pub mod lock_tasks;

pub use context::TaskContext;
pub use lock_tasks::{
    LockObjectTask, UnlockObjectTask, UnlockObjectsTask, UpgradeLockTask, lock_child_and_parents,
    lock_objects, lock_pair, try_lock_objects,
};

/// Boxed future returned by task bodies.
pub type TaskFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A leaf unit of work.
///
/// Errors are ordinary `anyhow` errors; the engine records their rendered
/// chain as the task's failure reason.
pub trait Task: Send + Sync {
    fn name(&self) -> String;

    /// Objects this task acts on, recorded on its TaskRecord.
    fn lock_objects(&self) -> Vec<LockObjectReference> {
        Vec::new()
    }

    /// Run inside a store transaction that is committed on success and
    /// rolled back on failure.
    fn transactional(&self) -> bool {
        false
    }

    fn execute<'a>(&'a self, ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<()>>;
}

/// A node that expands into a sub-graph when it runs.
///
/// `expand` both performs the meta-task's own work and returns the graph to
/// splice in. An empty graph means "nothing further to do".
pub trait MetaTask: Send + Sync {
    fn name(&self) -> String;

    fn lock_objects(&self) -> Vec<LockObjectReference> {
        Vec::new()
    }

    fn transactional(&self) -> bool {
        false
    }

    fn expand<'a>(&'a self, ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<TaskGraph>>;
}

/// Payload of a graph node.
#[derive(Clone)]
pub enum TaskNode {
    Leaf(Arc<dyn Task>),
    Meta(Arc<dyn MetaTask>),
}

impl TaskNode {
    pub fn leaf<T: Task + 'static>(task: T) -> Self {
        TaskNode::Leaf(Arc::new(task))
    }

    pub fn meta<M: MetaTask + 'static>(task: M) -> Self {
        TaskNode::Meta(Arc::new(task))
    }

    pub fn name(&self) -> String {
        match self {
            TaskNode::Leaf(t) => t.name(),
            TaskNode::Meta(m) => m.name(),
        }
    }

    pub fn lock_objects(&self) -> Vec<LockObjectReference> {
        match self {
            TaskNode::Leaf(t) => t.lock_objects(),
            TaskNode::Meta(m) => m.lock_objects(),
        }
    }

    pub fn transactional(&self) -> bool {
        match self {
            TaskNode::Leaf(t) => t.transactional(),
            TaskNode::Meta(m) => m.transactional(),
        }
    }

    pub fn is_meta(&self) -> bool {
        matches!(self, TaskNode::Meta(_))
    }
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskNode::Leaf(t) => f.debug_tuple("Leaf").field(&t.name()).finish(),
            TaskNode::Meta(m) => f.debug_tuple("Meta").field(&m.name()).finish(),
        }
    }
}
