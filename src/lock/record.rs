// src/lock/record.rs

//! Per-object lock state: current holders plus a FIFO queue of waiters.
//!
//! Everything here is synchronous and runs under the manager's mutex. Waiters
//! are woken through a `oneshot` sender once `promote` has already granted
//! them the lock, so a woken waiter never has to re-check compatibility.

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;

use super::request::{LockOwner, LockType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    Acquire(LockType),
    /// A current READ holder waiting to become the sole WRITE holder.
    Upgrade,
}

#[derive(Debug)]
pub struct Waiter {
    pub ticket: u64,
    pub owner: LockOwner,
    pub kind: WaitKind,
    pub notify: oneshot::Sender<()>,
}

#[derive(Debug, Default)]
pub struct LockRecord {
    holders: HashMap<LockOwner, LockType>,
    waiters: VecDeque<Waiter>,
}

impl LockRecord {
    /// Current mode: `None` when nobody holds the object.
    pub fn mode(&self) -> Option<LockType> {
        if self.holders.values().any(|t| *t == LockType::Write) {
            Some(LockType::Write)
        } else if self.holders.is_empty() {
            None
        } else {
            Some(LockType::Read)
        }
    }

    pub fn held_by(&self, owner: LockOwner) -> Option<LockType> {
        self.holders.get(&owner).copied()
    }

    pub fn holders(&self) -> impl Iterator<Item = (LockOwner, LockType)> + '_ {
        self.holders.iter().map(|(o, t)| (*o, *t))
    }

    pub fn holder_count(&self) -> usize {
        self.holders.len()
    }

    pub fn waiting_readers(&self) -> usize {
        self.waiters
            .iter()
            .filter(|w| w.kind == WaitKind::Acquire(LockType::Read))
            .count()
    }

    /// Waiting writers, counting pending upgrades.
    pub fn waiting_writers(&self) -> usize {
        self.waiters.len() - self.waiting_readers()
    }

    pub fn is_idle(&self) -> bool {
        self.holders.is_empty() && self.waiters.is_empty()
    }

    fn grantable(&self, owner: LockOwner, kind: WaitKind) -> bool {
        match kind {
            WaitKind::Acquire(LockType::Read) => self.mode() != Some(LockType::Write),
            WaitKind::Acquire(LockType::Write) => self.holders.is_empty(),
            WaitKind::Acquire(LockType::Unknown) => false,
            WaitKind::Upgrade => self.holders.len() == 1 && self.holders.contains_key(&owner),
        }
    }

    /// Grant immediately if nobody is queued and the mode is compatible.
    ///
    /// A compatible READ still queues behind an earlier waiting writer.
    pub fn try_grant(&mut self, owner: LockOwner, lock_type: LockType) -> bool {
        if !self.waiters.is_empty() || !self.grantable(owner, WaitKind::Acquire(lock_type)) {
            return false;
        }
        self.holders.insert(owner, lock_type);
        true
    }

    /// Upgrade in place when the owner is the only holder and nobody is
    /// queued. A queued writer keeps its turn ahead of a later upgrade.
    pub fn try_upgrade(&mut self, owner: LockOwner) -> bool {
        if !self.waiters.is_empty() || !self.grantable(owner, WaitKind::Upgrade) {
            return false;
        }
        self.holders.insert(owner, LockType::Write);
        true
    }

    pub fn enqueue(&mut self, waiter: Waiter) {
        self.waiters.push_back(waiter);
    }

    /// Remove a queued waiter. Returns `false` if it was already granted.
    pub fn cancel(&mut self, ticket: u64) -> bool {
        match self.waiters.iter().position(|w| w.ticket == ticket) {
            Some(idx) => {
                self.waiters.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn release(&mut self, owner: LockOwner) -> Option<LockType> {
        self.holders.remove(&owner)
    }

    /// WRITE → READ for `owner`. Returns `false` if it did not hold WRITE.
    pub fn downgrade(&mut self, owner: LockOwner) -> bool {
        match self.holders.get_mut(&owner) {
            Some(t) if *t == LockType::Write => {
                *t = LockType::Read;
                true
            }
            _ => false,
        }
    }

    /// Grant queued requests in strict FIFO order until the head of the
    /// queue is incompatible. Returns how many waiters were woken.
    pub fn promote(&mut self) -> usize {
        let mut woken = 0;

        while let Some(front) = self.waiters.front() {
            if !self.grantable(front.owner, front.kind) {
                break;
            }
            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };

            let previous = self.holders.insert(
                waiter.owner,
                match waiter.kind {
                    WaitKind::Acquire(t) => t,
                    WaitKind::Upgrade => LockType::Write,
                },
            );

            if waiter.notify.send(()).is_err() {
                // Waiter went away; undo the grant and keep going.
                match previous {
                    Some(t) => self.holders.insert(waiter.owner, t),
                    None => self.holders.remove(&waiter.owner),
                };
                continue;
            }
            woken += 1;
        }

        woken
    }
}
