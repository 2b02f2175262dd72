//! Blocking worker pool
//!
//! Offloads blocking closures to tokio's blocking threads while a shared
//! semaphore caps how many run at once across every session. The permit is
//! moved into the closure: work whose caller has gone away keeps its slot
//! until it finishes, and its result is simply dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::OffloadError;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    capacity: usize,
    offloads: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Pool allowing at most `capacity` blocking jobs in flight (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            offloads: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run `work` on a blocking thread and wait for its result without
    /// blocking the calling task's scheduler.
    pub async fn offload<F, R>(&self, work: F) -> Result<R, OffloadError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| OffloadError::PoolClosed)?;
        self.offloads.fetch_add(1, Ordering::Relaxed);

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await
        .map_err(|e| OffloadError::Join(e.to_string()))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Total jobs started since the pool was created
    pub fn offload_count(&self) -> u64 {
        self.offloads.load(Ordering::Relaxed)
    }

    /// Stop accepting work; jobs already running finish normally
    pub fn close(&self) {
        self.permits.close();
    }
}
