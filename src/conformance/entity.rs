// src/conformance/entity.rs

//! Conformance meta-task for one entity and its sub-entities.
//!
//! When it runs, the meta-task asks its [`SubEntityPlanner`] for one graph of
//! work per sub-entity and expands into either
//!
//! - `lock WRITE -> sub-work -> unlock` when it was built without a lock
//!   handle (it owns the lock for the whole expansion), or
//! - `upgrade -> sub-work -> restore` when its caller handed it a held lock.
//!   The caller keeps ownership and releases the lock itself. Only a
//!   restore whose upgrade turned READ into WRITE downgrades; the planner
//!   always sees the lock lent at WRITE, so nested checks leave it there.
//!
//! Planning runs before the expansion's lock step. Work that must inspect
//! the entity under the lock belongs in the planned sub-graphs (typically as
//! nested meta-tasks).

use crate::conformance::fanout::{locked_subgraphs, upgraded_subgraphs};
use crate::graph::TaskGraph;
use crate::lock::{LockHandle, LockObjectReference, LockRequest, LockType};
use crate::task::{MetaTask, TaskContext, TaskFuture};

/// Produces the per-sub-entity work of a conformance check.
pub trait SubEntityPlanner: Send + Sync {
    /// One graph per sub-entity. `lock` is the entity's lock lent to the
    /// sub-work; nested conformance tasks may take it with
    /// [`EntityConformanceTask::with_lock`].
    fn plan<'a>(
        &'a self,
        ctx: &'a mut TaskContext,
        lock: &'a LockHandle,
    ) -> TaskFuture<'a, anyhow::Result<Vec<TaskGraph>>>;
}

pub struct EntityConformanceTask<P> {
    object: LockObjectReference,
    handle: Option<LockHandle>,
    planner: P,
}

impl<P: SubEntityPlanner> EntityConformanceTask<P> {
    /// Check `object`, acquiring and releasing its WRITE lock.
    pub fn new(object: LockObjectReference, planner: P) -> Self {
        Self {
            object,
            handle: None,
            planner,
        }
    }

    /// Check the object behind `handle`, which the caller already holds.
    pub fn with_lock(handle: LockHandle, planner: P) -> Self {
        Self {
            object: handle.request().object.clone(),
            handle: Some(handle),
            planner,
        }
    }

    pub fn object(&self) -> &LockObjectReference {
        &self.object
    }
}

impl<P: SubEntityPlanner> MetaTask for EntityConformanceTask<P> {
    fn name(&self) -> String {
        format!("Conformance check {}", self.object)
    }

    fn lock_objects(&self) -> Vec<LockObjectReference> {
        vec![self.object.clone()]
    }

    fn expand<'a>(&'a self, ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<TaskGraph>> {
        Box::pin(async move {
            match &self.handle {
                None => {
                    let request = LockRequest::write(self.object.clone());
                    let lent = LockHandle::Borrowed(request.clone());
                    let subs = self.planner.plan(ctx, &lent).await?;
                    Ok(locked_subgraphs(request, subs)?)
                }
                Some(handle) => {
                    // Sub-work runs after the upgrade, so it is lent WRITE.
                    let lent = handle.lend_as(LockType::Write);
                    let subs = self.planner.plan(ctx, &lent).await?;
                    Ok(upgraded_subgraphs(handle, subs)?)
                }
            }
        })
    }
}
