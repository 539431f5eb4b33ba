// src/task/lock_tasks.rs

//! Lock-related graph nodes and multi-lock helpers.
//!
//! A lock is held across graph nodes by pairing a [`LockObjectTask`] with an
//! [`UnlockObjectTask`] that shares the same `LockRequest` (and therefore the
//! same owner). The unlock node is normally appended with the
//! `AllPredecessorsCompleted` guard so it runs however the work in between
//! ended.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, warn};

use crate::errors::{LockdagError, Result};
use crate::lock::{LockHandle, LockManager, LockObjectReference, LockRequest, LockType};

use super::{Task, TaskContext, TaskFuture};

/// Acquire a lock, waiting up to the context's acquire timeout.
#[derive(Debug, Clone)]
pub struct LockObjectTask {
    request: LockRequest,
}

impl LockObjectTask {
    pub fn new(request: LockRequest) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &LockRequest {
        &self.request
    }
}

impl Task for LockObjectTask {
    fn name(&self) -> String {
        format!("Lock {} {}", self.request.lock_type, self.request.object)
    }

    fn lock_objects(&self) -> Vec<LockObjectReference> {
        vec![self.request.object.clone()]
    }

    fn execute<'a>(&'a self, ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let timeout = ctx.lock_settings().acquire_timeout;
            ctx.locks().acquire(&self.request, timeout).await?;
            Ok(())
        })
    }
}

/// Clean up a lock hold.
///
/// - `Owned` handles are released.
/// - `Borrowed` handles lent as READ are downgraded back to READ if this
///   flow upgraded them. A handle lent as WRITE is left alone. Borrowed
///   holds are never released.
///
/// Both paths tolerate a hold that was never obtained.
#[derive(Debug, Clone)]
pub struct UnlockObjectTask {
    handle: LockHandle,
}

impl UnlockObjectTask {
    pub fn new(handle: LockHandle) -> Self {
        Self { handle }
    }

    pub fn owned(request: LockRequest) -> Self {
        Self::new(LockHandle::Owned(request))
    }

    pub fn handle(&self) -> &LockHandle {
        &self.handle
    }
}

impl Task for UnlockObjectTask {
    fn name(&self) -> String {
        let req = self.handle.request();
        match self.handle {
            LockHandle::Owned(_) => format!("Unlock {} {}", req.lock_type, req.object),
            LockHandle::Borrowed(_) => format!("Restore {} lock {}", req.lock_type, req.object),
        }
    }

    fn lock_objects(&self) -> Vec<LockObjectReference> {
        vec![self.handle.request().object.clone()]
    }

    fn execute<'a>(&'a self, ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            match &self.handle {
                LockHandle::Owned(req) => ctx.locks().release(req),
                LockHandle::Borrowed(req) => match (req.lock_type, ctx.locks().held_type(req)) {
                    (LockType::Read, Some(LockType::Write)) => ctx.locks().downgrade(req)?,
                    (_, Some(held)) => {
                        debug!(object = %req.object, %held, "borrowed lock already at lent mode; nothing to restore")
                    }
                    (_, None) => warn!(object = %req.object, "borrowed lock no longer held"),
                },
            }
            Ok(())
        })
    }
}

/// Upgrade a held READ lock to WRITE within the context's upgrade timeout.
#[derive(Debug, Clone)]
pub struct UpgradeLockTask {
    request: LockRequest,
}

impl UpgradeLockTask {
    pub fn new(request: LockRequest) -> Self {
        Self { request }
    }
}

impl Task for UpgradeLockTask {
    fn name(&self) -> String {
        format!("Upgrade lock {}", self.request.object)
    }

    fn lock_objects(&self) -> Vec<LockObjectReference> {
        vec![self.request.object.clone()]
    }

    fn execute<'a>(&'a self, ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let wait = ctx.lock_settings().upgrade_timeout;
            if !ctx.locks().upgrade_with_wait(&self.request, wait).await {
                return Err(LockdagError::LockUpgradeDenied {
                    object: self.request.object.clone(),
                }
                .into());
            }
            Ok(())
        })
    }
}

/// Release a set of locks obtained together (see [`lock_objects`]).
#[derive(Debug, Clone)]
pub struct UnlockObjectsTask {
    requests: Vec<LockRequest>,
}

impl UnlockObjectsTask {
    pub fn new(requests: Vec<LockRequest>) -> Self {
        Self { requests }
    }

    pub fn requests(&self) -> &[LockRequest] {
        &self.requests
    }

    /// Release directly, outside of any job (e.g. when submission fails).
    pub fn release_all(&self, locks: &LockManager) {
        for req in self.requests.iter().rev() {
            locks.release(req);
        }
    }
}

impl Task for UnlockObjectsTask {
    fn name(&self) -> String {
        let names: Vec<String> = self.requests.iter().map(|r| r.object.to_string()).collect();
        format!("Unlock {}", names.join(", "))
    }

    fn lock_objects(&self) -> Vec<LockObjectReference> {
        self.requests.iter().map(|r| r.object.clone()).collect()
    }

    fn execute<'a>(&'a self, ctx: &'a mut TaskContext) -> TaskFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.release_all(ctx.locks());
            Ok(())
        })
    }
}

/// A lock node and the unlock node that releases what it acquires.
pub fn lock_pair(object: LockObjectReference, lock_type: LockType) -> (LockObjectTask, UnlockObjectTask) {
    let request = LockRequest::new(object, lock_type);
    (
        LockObjectTask::new(request.clone()),
        UnlockObjectTask::owned(request),
    )
}

/// Take every lock in `objects`, in order, waiting up to `timeout` for each.
///
/// If any acquisition fails, the locks already taken are released before the
/// error is returned.
pub async fn lock_objects(
    locks: &Arc<LockManager>,
    objects: &[(LockObjectReference, LockType)],
    timeout: Duration,
) -> Result<UnlockObjectsTask> {
    let mut held = Vec::with_capacity(objects.len());

    for (object, lock_type) in objects {
        let request = LockRequest::new(object.clone(), *lock_type);
        if let Err(err) = locks.acquire(&request, timeout).await {
            UnlockObjectsTask::new(held).release_all(locks);
            return Err(err);
        }
        held.push(request);
    }

    Ok(UnlockObjectsTask::new(held))
}

/// Non-blocking variant of [`lock_objects`].
pub fn try_lock_objects(
    locks: &Arc<LockManager>,
    objects: &[(LockObjectReference, LockType)],
) -> Result<UnlockObjectsTask> {
    let mut held = Vec::with_capacity(objects.len());

    for (object, lock_type) in objects {
        let request = LockRequest::new(object.clone(), *lock_type);
        if !locks.try_acquire(&request) {
            UnlockObjectsTask::new(held).release_all(locks);
            return Err(LockdagError::LockProtocol(format!(
                "{object} is busy; {lock_type} lock not available"
            )));
        }
        held.push(request);
    }

    Ok(UnlockObjectsTask::new(held))
}

/// WRITE on `child` plus READ on each of its `parents`, all or nothing.
pub async fn lock_child_and_parents(
    locks: &Arc<LockManager>,
    child: LockObjectReference,
    parents: impl IntoIterator<Item = LockObjectReference>,
    timeout: Duration,
) -> anyhow::Result<UnlockObjectsTask> {
    let child_name = child.to_string();
    let mut objects = vec![(child, LockType::Write)];
    objects.extend(parents.into_iter().map(|p| (p, LockType::Read)));

    lock_objects(locks, &objects, timeout)
        .await
        .with_context(|| format!("locking {child_name} and its parents"))
}
