//! Single-writer gate
//!
//! LMDB serializes writers itself, but its writer lock is not re-entrant: a
//! thread that begins a second write transaction while holding one blocks
//! forever. The gate records the owning thread so that case fails fast, and
//! bounds the wait with `try_lock_for()` when a writer timeout is configured.

use parking_lot::{Mutex, MutexGuard};
use refstore_core::{observe, Result, StoreError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::warn;

pub(crate) struct WriteGate {
    lock: Mutex<()>,
    owner: Mutex<Option<ThreadId>>,
    timeout: Option<Duration>,
}

/// Proof of holding the gate; released on drop.
pub(crate) struct WriterTicket<'a> {
    owner: &'a Mutex<Option<ThreadId>>,
    _guard: MutexGuard<'a, ()>,
}

impl WriteGate {
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        Self {
            lock: Mutex::new(()),
            owner: Mutex::new(None),
            timeout,
        }
    }

    pub(crate) fn acquire(&self) -> Result<WriterTicket<'_>> {
        let me = thread::current().id();
        if *self.owner.lock() == Some(me) {
            warn!("write transaction requested by the thread that already holds one");
            return Err(StoreError::ResourceExhausted(
                "this thread already holds the write transaction".into(),
            ));
        }

        let started = Instant::now();
        let guard = match self.timeout {
            Some(timeout) => self.lock.try_lock_for(timeout).ok_or_else(|| {
                warn!(?timeout, "write gate busy");
                StoreError::ResourceExhausted(format!(
                    "write transaction busy after {timeout:?}"
                ))
            })?,
            None => self.lock.lock(),
        };
        observe::record_writer_wait(started.elapsed());

        *self.owner.lock() = Some(me);
        Ok(WriterTicket {
            owner: &self.owner,
            _guard: guard,
        })
    }

    #[cfg(test)]
    pub(crate) fn is_held(&self) -> bool {
        self.owner.lock().is_some()
    }
}

impl Drop for WriterTicket<'_> {
    fn drop(&mut self) {
        *self.owner.lock() = None;
    }
}
