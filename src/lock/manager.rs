// src/lock/manager.rs

//! Shared reader/writer lock manager.
//!
//! One `LockManager` is shared (via `Arc`) by every job in the process. It
//! keeps a [`LockRecord`] per object that currently has holders or waiters
//! and drops the record once the object goes idle.
//!
//! Waiting is async: a request that cannot be granted immediately is queued
//! and the caller awaits a `oneshot` wakeup bounded by `tokio::time::timeout`.
//! The mutex is never held across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::errors::{LockdagError, Result};

use super::record::{LockRecord, WaitKind, Waiter};
use super::reference::LockObjectReference;
use super::request::{LockOwner, LockRequest, LockType};

/// One currently held lock, as reported by [`LockManager::list_held`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldLock {
    pub object: LockObjectReference,
    pub owner: LockOwner,
    pub lock_type: LockType,
}

/// Snapshot of one object's lock state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub mode: Option<LockType>,
    pub holders: Vec<(LockOwner, LockType)>,
    pub waiting_readers: usize,
    pub waiting_writers: usize,
}

#[derive(Debug, Default)]
pub struct LockManager {
    records: Mutex<HashMap<LockObjectReference, LockRecord>>,
    next_ticket: AtomicU64,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<LockObjectReference, LockRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    /// Acquire `request`, waiting at most `timeout`.
    ///
    /// Re-acquiring a hold the owner already has (same mode, or READ while
    /// holding WRITE) succeeds immediately. Asking for WRITE while holding
    /// READ is rejected; use [`upgrade_with_wait`](Self::upgrade_with_wait).
    pub async fn acquire(&self, request: &LockRequest, timeout: Duration) -> Result<()> {
        let owner = request.owner;
        if request.lock_type == LockType::Unknown {
            return Err(LockdagError::LockProtocol(format!(
                "{owner} asked for an UNKNOWN lock on {}",
                request.object
            )));
        }
        let (ticket, mut rx) = {
            let mut records = self.records();
            let record = records.entry(request.object.clone()).or_default();

            match record.held_by(owner) {
                Some(held) if held == request.lock_type || held == LockType::Write => {
                    debug!(object = %request.object, %owner, "lock already held by owner");
                    return Ok(());
                }
                Some(_) => {
                    return Err(LockdagError::LockProtocol(format!(
                        "{owner} holds READ on {} and asked for WRITE; upgrade instead",
                        request.object
                    )));
                }
                None => {}
            }

            if record.try_grant(owner, request.lock_type) {
                debug!(
                    object = %request.object,
                    lock_type = %request.lock_type,
                    %owner,
                    "lock granted"
                );
                return Ok(());
            }

            let ticket = self.ticket();
            let (notify, rx) = oneshot::channel();
            record.enqueue(Waiter {
                ticket,
                owner,
                kind: WaitKind::Acquire(request.lock_type),
                notify,
            });
            debug!(
                object = %request.object,
                lock_type = %request.lock_type,
                %owner,
                ticket,
                "lock busy; waiting"
            );
            (ticket, rx)
        };

        if let Ok(Ok(())) = tokio::time::timeout(timeout, &mut rx).await {
            debug!(object = %request.object, %owner, "lock granted after wait");
            return Ok(());
        }

        if self.abandon_wait(&request.object, ticket, owner) {
            warn!(
                object = %request.object,
                lock_type = %request.lock_type,
                %owner,
                ?timeout,
                "timed out waiting for lock"
            );
            return Err(LockdagError::LockTimeout {
                object: request.object.clone(),
                lock_type: request.lock_type,
                waited: timeout,
            });
        }

        // Granted between the timeout firing and re-taking the mutex.
        Ok(())
    }

    /// Non-blocking acquire. Returns whether the lock was granted.
    pub fn try_acquire(&self, request: &LockRequest) -> bool {
        if request.lock_type == LockType::Unknown {
            warn!(object = %request.object, owner = %request.owner, "refusing UNKNOWN lock mode");
            return false;
        }
        let mut records = self.records();
        let record = records.entry(request.object.clone()).or_default();

        let granted = match record.held_by(request.owner) {
            Some(held) => held == request.lock_type || held == LockType::Write,
            None => record.try_grant(request.owner, request.lock_type),
        };

        if record.is_idle() {
            records.remove(&request.object);
        }
        debug!(
            object = %request.object,
            lock_type = %request.lock_type,
            owner = %request.owner,
            granted,
            "try-acquire"
        );
        granted
    }

    /// Release whatever `request.owner` holds on the object.
    ///
    /// Releasing something not held is logged and otherwise ignored, so the
    /// unlock side of a lock/unlock pair is safe to run after a failed lock.
    pub fn release(&self, request: &LockRequest) {
        let mut records = self.records();
        let Some(record) = records.get_mut(&request.object) else {
            warn!(
                object = %request.object,
                owner = %request.owner,
                "release requested but no active lock found for object"
            );
            return;
        };

        match record.release(request.owner) {
            Some(lock_type) => {
                debug!(object = %request.object, owner = %request.owner, %lock_type, "lock released");
                record.promote();
            }
            None => {
                debug!(
                    object = %request.object,
                    owner = %request.owner,
                    "release requested by non-holder; ignoring"
                );
            }
        }

        if record.is_idle() {
            records.remove(&request.object);
        }
    }

    /// Upgrade the owner's READ hold to WRITE, waiting at most `wait` for
    /// the other readers to leave.
    ///
    /// Returns `true` when the owner holds WRITE afterwards (including when
    /// it already did) and `false` when the upgrade could not be granted in
    /// time. On `false` the original READ hold is kept.
    ///
    /// The upgrade queues FIFO like any writer, so an upgrade requested
    /// while another writer already waits on the object cannot succeed
    /// until the caller gives up its READ hold; it returns `false` after
    /// `wait`.
    pub async fn upgrade_with_wait(&self, request: &LockRequest, wait: Duration) -> bool {
        let owner = request.owner;
        let (ticket, mut rx) = {
            let mut records = self.records();
            let Some(record) = records.get_mut(&request.object) else {
                info!(object = %request.object, %owner, "upgrade requested but no active lock found");
                return false;
            };

            match record.held_by(owner) {
                None => {
                    info!(object = %request.object, %owner, "upgrade requested by non-holder");
                    return false;
                }
                Some(LockType::Write) => return true,
                Some(_) => {}
            }

            if record.try_upgrade(owner) {
                debug!(object = %request.object, %owner, "lock upgraded to WRITE");
                return true;
            }

            let ticket = self.ticket();
            let (notify, rx) = oneshot::channel();
            record.enqueue(Waiter {
                ticket,
                owner,
                kind: WaitKind::Upgrade,
                notify,
            });
            debug!(object = %request.object, %owner, ticket, "upgrade waiting for other readers");
            (ticket, rx)
        };

        if let Ok(Ok(())) = tokio::time::timeout(wait, &mut rx).await {
            debug!(object = %request.object, %owner, "lock upgraded to WRITE after wait");
            return true;
        }

        if self.abandon_wait(&request.object, ticket, owner) {
            info!(object = %request.object, %owner, ?wait, "upgrade not granted in time");
            return false;
        }
        true
    }

    /// WRITE → READ for the owner; queued readers may enter afterwards.
    ///
    /// Downgrading a READ hold is a no-op. Downgrading something not held at
    /// all is a protocol error.
    pub fn downgrade(&self, request: &LockRequest) -> Result<()> {
        let mut records = self.records();
        let record = records
            .get_mut(&request.object)
            .filter(|r| r.held_by(request.owner).is_some())
            .ok_or_else(|| {
                LockdagError::LockProtocol(format!(
                    "{} cannot downgrade {}: no lock held",
                    request.owner, request.object
                ))
            })?;

        if record.downgrade(request.owner) {
            debug!(object = %request.object, owner = %request.owner, "lock downgraded to READ");
            record.promote();
        }
        Ok(())
    }

    /// Mode the owner currently holds on the object, if any.
    pub fn held_type(&self, request: &LockRequest) -> Option<LockType> {
        self.records()
            .get(&request.object)
            .and_then(|r| r.held_by(request.owner))
    }

    /// Every lock currently held, ordered by object then owner.
    pub fn list_held(&self) -> Vec<HeldLock> {
        let records = self.records();
        let mut held: Vec<HeldLock> = records
            .iter()
            .flat_map(|(object, record)| {
                record.holders().map(move |(owner, lock_type)| HeldLock {
                    object: object.clone(),
                    owner,
                    lock_type,
                })
            })
            .collect();
        held.sort_by_key(|h| (h.object.object_type, h.object.id, h.owner));
        held
    }

    pub fn lock_info(&self, object: &LockObjectReference) -> Option<LockInfo> {
        self.records().get(object).map(|record| {
            let mut holders: Vec<_> = record.holders().collect();
            holders.sort();
            LockInfo {
                mode: record.mode(),
                holders,
                waiting_readers: record.waiting_readers(),
                waiting_writers: record.waiting_writers(),
            }
        })
    }

    /// Number of objects with holders or waiters.
    pub fn active_objects(&self) -> usize {
        self.records().len()
    }

    /// Drop a timed-out waiter. Returns `true` if it was still queued (a real
    /// timeout), `false` if it had been granted in the meantime.
    fn abandon_wait(&self, object: &LockObjectReference, ticket: u64, owner: LockOwner) -> bool {
        let mut records = self.records();
        let Some(record) = records.get_mut(object) else {
            return true;
        };

        let timed_out = if record.cancel(ticket) {
            // The abandoned waiter may have been blocking the queue head.
            record.promote();
            true
        } else {
            record.held_by(owner).is_none()
        };

        if record.is_idle() {
            records.remove(object);
        }
        timed_out
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::lock::ObjectType;

    fn da(id: i64) -> LockObjectReference {
        LockObjectReference::new(ObjectType::DistributedAppliance, id, format!("da-{id}"))
    }

    #[tokio::test]
    async fn acquire_release_drops_idle_record() {
        let mgr = LockManager::new();
        let req = LockRequest::write(da(1));

        mgr.acquire(&req, Duration::from_millis(10)).await.unwrap();
        assert_eq!(mgr.active_objects(), 1);
        assert_eq!(mgr.held_type(&req), Some(LockType::Write));

        mgr.release(&req);
        assert_eq!(mgr.active_objects(), 0);

        // Second release is a no-op.
        mgr.release(&req);
    }

    #[tokio::test]
    async fn writer_times_out_while_reader_holds() {
        let mgr = LockManager::new();
        let reader = LockRequest::read(da(1));
        let writer = LockRequest::write(da(1));

        mgr.acquire(&reader, Duration::from_millis(10)).await.unwrap();
        let err = mgr.acquire(&writer, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, LockdagError::LockTimeout { lock_type: LockType::Write, .. }));

        let info = mgr.lock_info(&da(1)).unwrap();
        assert_eq!(info.waiting_writers, 0);
        assert_eq!(info.holders.len(), 1);
    }

    #[tokio::test]
    async fn waiting_writer_is_woken_by_release() {
        let mgr = Arc::new(LockManager::new());
        let reader = LockRequest::read(da(1));
        mgr.acquire(&reader, Duration::from_millis(10)).await.unwrap();

        let waiter = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move {
                let writer = LockRequest::write(da(1));
                mgr.acquire(&writer, Duration::from_secs(5)).await.map(|_| writer)
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mgr.lock_info(&da(1)).unwrap().waiting_writers, 1);

        mgr.release(&reader);
        let writer = waiter.await.unwrap().unwrap();
        assert_eq!(mgr.held_type(&writer), Some(LockType::Write));
    }

    #[test]
    fn try_acquire_does_not_wait() {
        let mgr = LockManager::new();
        let w = LockRequest::write(da(2));
        let r = LockRequest::read(da(2));

        assert!(mgr.try_acquire(&w));
        assert!(!mgr.try_acquire(&r));
        mgr.release(&w);
        assert!(mgr.try_acquire(&r));
    }

    #[test]
    fn failed_try_acquire_on_fresh_object_leaves_no_record() {
        let mgr = LockManager::new();
        let r = LockRequest::read(da(3));
        assert!(mgr.try_acquire(&r));
        mgr.release(&r);
        assert_eq!(mgr.active_objects(), 0);
    }

    #[tokio::test]
    async fn upgrade_of_sole_reader_is_immediate() {
        let mgr = LockManager::new();
        let r = LockRequest::read(da(4));
        mgr.acquire(&r, Duration::from_millis(10)).await.unwrap();

        assert!(mgr.upgrade_with_wait(&r, Duration::from_millis(10)).await);
        assert_eq!(mgr.held_type(&r), Some(LockType::Write));

        mgr.downgrade(&r).unwrap();
        assert_eq!(mgr.held_type(&r), Some(LockType::Read));
    }

    #[tokio::test]
    async fn upgrade_with_second_reader_returns_false_and_keeps_read() {
        let mgr = LockManager::new();
        let a = LockRequest::read(da(5));
        let b = LockRequest::read(da(5));
        mgr.acquire(&a, Duration::from_millis(10)).await.unwrap();
        mgr.acquire(&b, Duration::from_millis(10)).await.unwrap();

        assert!(!mgr.upgrade_with_wait(&a, Duration::from_millis(20)).await);
        assert_eq!(mgr.held_type(&a), Some(LockType::Read));
        assert_eq!(mgr.lock_info(&da(5)).unwrap().waiting_writers, 0);
    }

    #[tokio::test]
    async fn upgrade_succeeds_once_other_reader_leaves() {
        let mgr = Arc::new(LockManager::new());
        let a = LockRequest::read(da(10));
        let b = LockRequest::read(da(10));
        mgr.acquire(&a, Duration::from_millis(10)).await.unwrap();
        mgr.acquire(&b, Duration::from_millis(10)).await.unwrap();

        let upgrader = {
            let mgr = Arc::clone(&mgr);
            let a = a.clone();
            tokio::spawn(async move { mgr.upgrade_with_wait(&a, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        mgr.release(&b);

        assert!(upgrader.await.unwrap());
        assert_eq!(mgr.held_type(&a), Some(LockType::Write));
    }

    #[test]
    fn downgrade_without_hold_is_a_protocol_error() {
        let mgr = LockManager::new();
        let r = LockRequest::write(da(6));
        assert!(matches!(mgr.downgrade(&r), Err(LockdagError::LockProtocol(_))));
    }

    #[tokio::test]
    async fn read_then_write_by_same_owner_is_rejected() {
        let mgr = LockManager::new();
        let r = LockRequest::read(da(7));
        mgr.acquire(&r, Duration::from_millis(10)).await.unwrap();

        let as_write = LockRequest {
            lock_type: LockType::Write,
            ..r.clone()
        };
        let err = mgr.acquire(&as_write, Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, LockdagError::LockProtocol(_)));
    }

    #[tokio::test]
    async fn list_held_reports_every_holder() {
        let mgr = LockManager::new();
        let a = LockRequest::read(da(8));
        let b = LockRequest::read(da(8));
        let c = LockRequest::write(da(9));
        for req in [&a, &b, &c] {
            mgr.acquire(req, Duration::from_millis(10)).await.unwrap();
        }

        let held = mgr.list_held();
        assert_eq!(held.len(), 3);
        assert_eq!(held[2].object, da(9));
        assert_eq!(held[2].lock_type, LockType::Write);
    }

    #[test]
    fn lock_info_lists_shared_holders_in_owner_order() {
        let mgr = LockManager::new();
        let first = LockRequest::read(da(10));
        let second = LockRequest::read(da(10));
        assert!(mgr.try_acquire(&second));
        assert!(mgr.try_acquire(&first));

        let info = mgr.lock_info(&da(10)).unwrap();
        assert_eq!(info.mode, Some(LockType::Read));
        assert_eq!(
            info.holders,
            vec![(first.owner, LockType::Read), (second.owner, LockType::Read)]
        );
    }

    #[tokio::test]
    async fn unknown_mode_is_never_granted() {
        let mgr = LockManager::new();
        let req = LockRequest::new(da(11), LockType::Unknown);

        let err = mgr.acquire(&req, Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, LockdagError::LockProtocol(_)));
        assert!(!mgr.try_acquire(&req));
        assert_eq!(mgr.active_objects(), 0);
    }
}
