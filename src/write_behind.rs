//! Bounded spawner for fire-and-forget cache writes.
//!
//! Write-backs run on detached tokio tasks so they outlive the request that
//! triggered them and never observe its cancellation. A semaphore caps how
//! many can be in flight; past that, new writes are dropped with a warning
//! since the cache is only an advisory mirror of the source of truth.

use crate::error::Result;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::task::TaskTracker;

/// Spawns background cache writes under a concurrency bound.
///
/// Cloning is cheap and clones share the same bound.
#[derive(Clone)]
pub struct WriteBehind {
    permits: Arc<Semaphore>,
    capacity: usize,
    tasks: TaskTracker,
    flushing: Arc<Mutex<()>>,
    dropped: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl WriteBehind {
    /// Create a spawner allowing at most `capacity` writes in flight.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize));
        WriteBehind {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            tasks: TaskTracker::new(),
            flushing: Arc::new(Mutex::new(())),
            dropped: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run `write` in the background. Returns `false` if it was dropped
    /// because the bound is saturated.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch<F>(&self, operation: &'static str, write: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "⚠ Write-behind saturated ({} in flight), dropping {}",
                    self.capacity, operation
                );
                return false;
            }
        };

        let failed = Arc::clone(&self.failed);
        self.tasks.spawn(async move {
            if let Err(e) = write.await {
                failed.fetch_add(1, Ordering::Relaxed);
                warn!("✗ Background {} failed: {}", operation, e);
            } else {
                debug!("✓ Background {} completed", operation);
            }
            drop(permit);
        });

        true
    }

    /// Wait until every write dispatched so far has finished.
    ///
    /// Writes dispatched while a flush is waiting still run under the bound
    /// and are waited for as well.
    pub async fn flush(&self) {
        let _guard = self.flushing.lock().await;
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Number of writes currently running.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Writes dropped because the bound was saturated.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Background writes that completed with an error.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}
