// src/lock/request.rs

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use super::reference::LockObjectReference;

/// Reader/writer mode of a lock.
///
/// `Unknown` is what an unreadable persisted or external mode maps to. It
/// can be carried around and displayed but never granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockType {
    Read,
    Write,
    Unknown,
}

impl LockType {
    pub fn as_str(self) -> &'static str {
        match self {
            LockType::Read => "READ",
            LockType::Write => "WRITE",
            LockType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "READ" => Ok(LockType::Read),
            "WRITE" => Ok(LockType::Write),
            "UNKNOWN" => Ok(LockType::Unknown),
            other => Err(format!("invalid lock type: {other} (expected READ, WRITE or UNKNOWN)")),
        }
    }
}

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Identity of whoever will eventually release a lock.
///
/// Every [`LockRequest`] gets a fresh owner; the matching unlock node carries
/// a clone of the same request, so release/upgrade/downgrade address exactly
/// the hold that the lock node created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockOwner(u64);

impl LockOwner {
    pub fn next() -> Self {
        LockOwner(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// A request to hold `object` in mode `lock_type` on behalf of `owner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub object: LockObjectReference,
    pub lock_type: LockType,
    pub owner: LockOwner,
}

impl LockRequest {
    pub fn new(object: LockObjectReference, lock_type: LockType) -> Self {
        Self {
            object,
            lock_type,
            owner: LockOwner::next(),
        }
    }

    pub fn read(object: LockObjectReference) -> Self {
        Self::new(object, LockType::Read)
    }

    pub fn write(object: LockObjectReference) -> Self {
        Self::new(object, LockType::Write)
    }
}

/// A lock hold as seen by the code that has to clean it up.
///
/// - `Owned`: this flow acquired the lock and must fully release it.
/// - `Borrowed`: a caller acquired it and handed it down; the receiver may
///   upgrade and downgrade it but never releases it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockHandle {
    Owned(LockRequest),
    Borrowed(LockRequest),
}

impl LockHandle {
    pub fn request(&self) -> &LockRequest {
        match self {
            LockHandle::Owned(req) | LockHandle::Borrowed(req) => req,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, LockHandle::Owned(_))
    }

    /// Hand the same hold to a callee, which must not release it.
    pub fn lend(&self) -> LockHandle {
        LockHandle::Borrowed(self.request().clone())
    }

    /// Like [`lend`](Self::lend), but records that the callee receives the
    /// hold in `lock_type`. A callee handed a hold at WRITE never downgrades
    /// it when it restores.
    pub fn lend_as(&self, lock_type: LockType) -> LockHandle {
        LockHandle::Borrowed(LockRequest {
            lock_type,
            ..self.request().clone()
        })
    }
}
