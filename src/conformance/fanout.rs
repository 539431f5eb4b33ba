// src/conformance/fanout.rs

//! Graph shapes that bracket work with a lock and its cleanup.
//!
//! Every shape here has the same outline:
//!
//! ```text
//!             ┌─> worker ─┐
//!   lock ─────┼─> worker ─┼────> unlock
//!             └─> worker ─┘
//! ```
//!
//! The lock step is the only entry and runs unconditionally. Workers are
//! gated on it and only run if it succeeded. The unlock step is appended
//! with `AllPredecessorsCompleted`, so it runs however the workers ended.

use crate::errors::Result;
use crate::graph::{TaskGraph, TaskGuard};
use crate::lock::{LockHandle, LockRequest};
use crate::task::{LockObjectTask, TaskNode, UnlockObjectTask, UpgradeLockTask};

/// Acquire `request`, run each worker node in parallel, release.
pub fn locked_fanout(request: LockRequest, workers: impl IntoIterator<Item = TaskNode>) -> Result<TaskGraph> {
    let subs = workers.into_iter().map(|work| {
        let mut g = TaskGraph::new();
        g.add_entry(work, TaskGuard::AllPredecessorsSucceeded);
        g
    });
    locked_subgraphs(request, subs)
}

/// Acquire `request`, run each sub-graph in parallel, release.
///
/// Sub-graph entries keep their own guards; they should normally be
/// `AllPredecessorsSucceeded` so nothing runs without the lock.
pub fn locked_subgraphs(request: LockRequest, subs: impl IntoIterator<Item = TaskGraph>) -> Result<TaskGraph> {
    let lock = TaskNode::leaf(LockObjectTask::new(request.clone()));
    let unlock = TaskNode::leaf(UnlockObjectTask::owned(request));
    bracket(lock, subs, unlock)
}

/// Upgrade a lock the caller already holds, run each sub-graph, then restore
/// READ. The hold itself is never released here.
pub fn upgraded_subgraphs(handle: &LockHandle, subs: impl IntoIterator<Item = TaskGraph>) -> Result<TaskGraph> {
    let lent = handle.lend();
    let upgrade = TaskNode::leaf(UpgradeLockTask::new(lent.request().clone()));
    let restore = TaskNode::leaf(UnlockObjectTask::new(lent));
    bracket(upgrade, subs, restore)
}

fn bracket(
    open: TaskNode,
    subs: impl IntoIterator<Item = TaskGraph>,
    close: TaskNode,
) -> Result<TaskGraph> {
    let mut g = TaskGraph::new();
    let gate = g.add_entry(open, TaskGuard::AllPredecessorsCompleted);
    for sub in subs {
        g.add_task_graph(sub, Some(gate))?;
    }
    g.append_task(close, TaskGuard::AllPredecessorsCompleted);
    Ok(g)
}
