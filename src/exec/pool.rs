// src/exec/pool.rs

//! Bounded worker pool shared by every job of an engine.

use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// A counting pool of worker slots.
///
/// Each executing node holds one permit for the duration of its body.
/// Nodes waiting for a permit stay QUEUED.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        Arc::clone(&self.permits).acquire_owned().await
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots not currently held by a running node.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Refuse further permits; nodes still waiting fail to start.
    pub fn close(&self) {
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permits_are_bounded_and_returned_on_drop() {
        let pool = WorkerPool::new(2);
        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        drop(a);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn zero_size_is_clamped_to_one() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }

    #[tokio::test]
    async fn closed_pool_refuses_permits() {
        let pool = WorkerPool::new(1);
        pool.close();
        assert!(pool.acquire().await.is_err());
    }
}
