// src/lock/mod.rs

//! In-process reader/writer lock manager keyed by logical object identity.
//!
//! - [`reference`]: what is being locked (`LockObjectReference`).
//! - [`request`]: who is asking and how (`LockRequest`, `LockType`, `LockHandle`).
//! - [`record`]: per-object holder set + FIFO wait queue.
//! - [`manager`]: the shared `LockManager` with acquire / release / upgrade /
//!   downgrade and introspection.

use std::time::Duration;

pub mod manager;
pub mod record;
pub mod reference;
pub mod request;

pub use manager::{HeldLock, LockInfo, LockManager};
pub use reference::{LockObjectReference, ObjectType};
pub use request::{LockHandle, LockOwner, LockRequest, LockType};

/// Default bound on how long a lock node waits for its lock.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default bound on how long an upgrade waits for other readers to leave.
pub const DEFAULT_UPGRADE_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeouts injected into lock-taking nodes via the task context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    pub acquire_timeout: Duration,
    pub upgrade_timeout: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            upgrade_timeout: DEFAULT_UPGRADE_TIMEOUT,
        }
    }
}
