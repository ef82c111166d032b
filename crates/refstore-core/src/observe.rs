//! Optional metrics instrumentation.
//!
//! With the `observe` feature enabled, the store emits counters and
//! histograms through the [`metrics`](https://docs.rs/metrics) crate. The
//! embedding application installs a recorder to collect them.
//!
//! Without the feature every function here is a no-op.

use std::time::Duration;

/// Record a write transaction commit.
///
/// - `refstore.txn.commits_total` – counter
/// - `refstore.txn.commit_duration_seconds` – histogram of commit latency
/// - `refstore.txn.writes_total` – counter of engine writes in the commit
#[inline]
pub fn record_commit(duration: Duration, writes: u64) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("refstore.txn.commits_total").increment(1);
        metrics::histogram!("refstore.txn.commit_duration_seconds").record(duration.as_secs_f64());
        metrics::counter!("refstore.txn.writes_total").increment(writes);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, writes);
    }
}

/// Record an aborted (or dropped) write transaction.
///
/// - `refstore.txn.aborts_total` – counter
#[inline]
pub fn record_abort() {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("refstore.txn.aborts_total").increment(1);
    }
}

/// Record how long a reader waited for a slot.
///
/// - `refstore.reader.wait_duration_seconds` – histogram with `outcome` label
#[inline]
pub fn record_reader_wait(duration: Duration, acquired: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if acquired { "ok" } else { "timeout" };
        metrics::histogram!("refstore.reader.wait_duration_seconds", "outcome" => outcome)
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (duration, acquired);
    }
}

/// Record how long a writer waited for the write gate.
///
/// - `refstore.writer.wait_duration_seconds` – histogram
#[inline]
pub fn record_writer_wait(duration: Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::histogram!("refstore.writer.wait_duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = duration;
    }
}

/// Record a pooled buffer borrow served from a bucket (hit) or freshly
/// allocated (miss).
///
/// - `refstore.buffer_pool.borrows_total` – counter with `result` label
#[inline]
pub fn record_buffer_borrow(hit: bool) {
    #[cfg(feature = "observe")]
    {
        let result = if hit { "hit" } else { "miss" };
        metrics::counter!("refstore.buffer_pool.borrows_total", "result" => result).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = hit;
    }
}
