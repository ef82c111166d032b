//! Reader slot accounting
//!
//! LMDB refuses new readers once its reader table is full. The environment
//! mirrors that limit with a semaphore so callers can wait for a slot, fail
//! fast, or await one, instead of hitting `ReadersFull` from the engine.

use refstore_core::{observe, Result, StoreError};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::warn;

const MAX_BACKOFF_MS: u64 = 32;

/// Counts read transactions against `max_readers`.
///
/// Permits borrow the pool, so a read transaction cannot outlive the
/// environment that issued it.
pub(crate) struct ReaderSlots {
    semaphore: Semaphore,
    max_readers: usize,
    default_timeout: Duration,
}

impl ReaderSlots {
    pub(crate) fn new(max_readers: u32, default_timeout: Duration) -> Self {
        let max_readers = max_readers as usize;
        Self {
            semaphore: Semaphore::new(max_readers),
            max_readers,
            default_timeout,
        }
    }

    pub(crate) fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Take a slot if one is free right now.
    pub(crate) fn try_acquire(&self) -> Option<SemaphorePermit<'_>> {
        self.semaphore.try_acquire().ok()
    }

    /// Take a slot, blocking the current thread with exponential backoff
    /// (1ms, 2ms, 4ms, ... capped at 32ms) for at most `timeout`.
    ///
    /// Prefer [`acquire`](Self::acquire) in async contexts.
    pub(crate) fn acquire_blocking(&self, timeout: Duration) -> Result<SemaphorePermit<'_>> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut backoff_ms = 1u64;

        loop {
            if let Ok(permit) = self.semaphore.try_acquire() {
                observe::record_reader_wait(started.elapsed(), true);
                return Ok(permit);
            }
            let now = Instant::now();
            if now >= deadline {
                observe::record_reader_wait(started.elapsed(), false);
                return Err(self.exhausted(timeout));
            }
            let pause = Duration::from_millis(backoff_ms).min(deadline - now);
            std::thread::sleep(pause);
            backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
        }
    }

    /// Await a slot for at most `timeout`.
    pub(crate) async fn acquire(&self, timeout: Duration) -> Result<SemaphorePermit<'_>> {
        let started = Instant::now();
        let permit = tokio::time::timeout(timeout, self.semaphore.acquire())
            .await
            .map_err(|_| {
                observe::record_reader_wait(started.elapsed(), false);
                self.exhausted(timeout)
            })?
            .map_err(|e| StoreError::InvalidState(format!("reader slots closed: {e}")))?;
        observe::record_reader_wait(started.elapsed(), true);
        Ok(permit)
    }

    pub(crate) fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.max_readers
    }

    fn exhausted(&self, timeout: Duration) -> StoreError {
        warn!(
            max_readers = self.max_readers,
            ?timeout,
            "no reader slot became free"
        );
        StoreError::ResourceExhausted(format!(
            "all {} reader slots busy after {:?}",
            self.max_readers, timeout
        ))
    }
}
