//! Pool of reusable byte buffers grouped by capacity.
//!
//! Every key and value that crosses into the engine is serialized into a
//! leased [`PooledBuffer`]. Buckets hold power-of-two capacities starting at
//! [`MIN_BUCKET_CAPACITY`]; a borrow is served from the smallest bucket that
//! fits. Leases return to their bucket on drop, so a serialization error or a
//! failed engine call still gives the buffer back.
//!
//! Ownership makes double release and use-after-release compile errors:
//!
//! ```compile_fail
//! use refstore_core::BufferPool;
//!
//! let pool = BufferPool::default();
//! let buffer = pool.borrow(16);
//! pool.release(buffer);
//! let _ = buffer.capacity();
//! ```

use crate::config::BufferPoolConfig;
use crate::error::BufferOverflow;
use crate::observe;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

#[cfg(debug_assertions)]
use std::collections::HashSet;

/// Capacity of the smallest bucket.
pub const MIN_BUCKET_CAPACITY: usize = 16;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

struct PoolShared {
    id: u64,
    config: BufferPoolConfig,
    /// Idle buffers; index `i` holds buffers of `MIN_BUCKET_CAPACITY << i` bytes.
    buckets: Mutex<Vec<Vec<Box<[u8]>>>>,
    in_use: AtomicUsize,
    next_lease: AtomicU64,
    #[cfg(debug_assertions)]
    leases: Mutex<HashSet<u64>>,
}

impl PoolShared {
    fn give_back(&self, mut data: Box<[u8]>, dirty: usize, lease: u64, pooled: bool) {
        #[cfg(debug_assertions)]
        {
            let known = self.leases.lock().remove(&lease);
            debug_assert!(known, "buffer lease {lease} released twice");
        }
        #[cfg(not(debug_assertions))]
        let _ = lease;

        self.in_use.fetch_sub(1, Ordering::Relaxed);
        if !pooled {
            return;
        }

        // Keep earlier contents from leaking into the next lease.
        data[..dirty].fill(0);

        let idx = bucket_index(data.len());
        let mut buckets = self.buckets.lock();
        if buckets.len() <= idx {
            buckets.resize_with(idx + 1, Vec::new);
        }
        let bucket = &mut buckets[idx];
        if bucket.len() < self.config.max_buffers_per_bucket {
            bucket.push(data);
        } else {
            trace!(capacity = data.len(), "bucket full, dropping buffer");
        }
    }
}

/// Thread-safe pool of byte buffers. Cloning shares the same pool.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(BufferPoolConfig::default())
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("id", &self.shared.id)
            .field("available", &self.available())
            .field("in_use", &self.in_use())
            .finish()
    }
}

impl BufferPool {
    pub fn new(config: BufferPoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                config,
                buckets: Mutex::new(Vec::new()),
                in_use: AtomicUsize::new(0),
                next_lease: AtomicU64::new(1),
                #[cfg(debug_assertions)]
                leases: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Lease a cleared buffer with capacity of at least `min_capacity`.
    ///
    /// Requests above `max_pooled_capacity` get an exact-size buffer that is
    /// dropped, not pooled, on release.
    pub fn borrow(&self, min_capacity: usize) -> PooledBuffer {
        let shared = &self.shared;
        let (data, pooled) = if min_capacity > shared.config.max_pooled_capacity {
            trace!(min_capacity, "unpooled buffer");
            (vec![0u8; min_capacity].into_boxed_slice(), false)
        } else {
            let capacity = bucket_capacity(min_capacity);
            let idx = bucket_index(capacity);
            let reused = shared
                .buckets
                .lock()
                .get_mut(idx)
                .and_then(|bucket| bucket.pop());
            observe::record_buffer_borrow(reused.is_some());
            let data = reused.unwrap_or_else(|| vec![0u8; capacity].into_boxed_slice());
            (data, true)
        };

        let lease = shared.next_lease.fetch_add(1, Ordering::Relaxed);
        #[cfg(debug_assertions)]
        shared.leases.lock().insert(lease);
        shared.in_use.fetch_add(1, Ordering::Relaxed);

        let limit = data.len();
        PooledBuffer {
            data,
            position: 0,
            limit,
            dirty: 0,
            lease,
            pooled,
            pool: Arc::clone(shared),
        }
    }

    /// Lease a key buffer and a value buffer together.
    pub fn borrow_pair(&self, key_capacity: usize, value_capacity: usize) -> PooledBufferPair {
        PooledBufferPair {
            key: self.borrow(key_capacity),
            value: self.borrow(value_capacity),
        }
    }

    /// Return a buffer to the pool. Equivalent to dropping it.
    ///
    /// # Panics
    ///
    /// In debug builds, if `buffer` was issued by a different pool.
    pub fn release(&self, buffer: PooledBuffer) {
        debug_assert!(
            Arc::ptr_eq(&self.shared, &buffer.pool),
            "buffer released into a pool that did not issue it (pool {} vs {})",
            self.shared.id,
            buffer.pool.id
        );
        drop(buffer);
    }

    /// Run `f` with a leased buffer, returning it afterwards on every path.
    pub fn with_buffer<R>(&self, min_capacity: usize, f: impl FnOnce(&mut PooledBuffer) -> R) -> R {
        let mut buffer = self.borrow(min_capacity);
        f(&mut buffer)
    }

    /// Number of idle buffers across all buckets.
    pub fn available(&self) -> usize {
        self.shared.buckets.lock().iter().map(Vec::len).sum()
    }

    /// Number of buffers currently leased.
    pub fn in_use(&self) -> usize {
        self.shared.in_use.load(Ordering::Relaxed)
    }

    /// Idle buffer count per bucket capacity, smallest first.
    pub fn bucket_counts(&self) -> Vec<(usize, usize)> {
        self.shared
            .buckets
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(idx, bucket)| (MIN_BUCKET_CAPACITY << idx, bucket.len()))
            .collect()
    }

    /// Drop every idle buffer.
    pub fn clear(&self) {
        let mut buckets = self.shared.buckets.lock();
        let dropped: usize = buckets.iter().map(Vec::len).sum();
        buckets.clear();
        debug!(pool = self.shared.id, dropped, "buffer pool cleared");
    }
}

fn bucket_capacity(min_capacity: usize) -> usize {
    min_capacity.max(MIN_BUCKET_CAPACITY).next_power_of_two()
}

fn bucket_index(capacity: usize) -> usize {
    (capacity.trailing_zeros() - MIN_BUCKET_CAPACITY.trailing_zeros()) as usize
}

/// A leased buffer with `position`/`limit` cursor semantics.
///
/// Issued cleared: position 0, limit = capacity. Writers append at
/// `position`; [`flip`](Self::flip) turns the written bytes into the readable
/// window returned by [`as_slice`](Self::as_slice).
pub struct PooledBuffer {
    data: Box<[u8]>,
    position: usize,
    limit: usize,
    dirty: usize,
    lease: u64,
    pooled: bool,
    pool: Arc<PoolShared>,
}

impl PooledBuffer {
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    /// Reset to position 0, limit = capacity. Contents are not erased.
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.data.len();
    }

    /// Make the bytes written so far the readable window.
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    /// Bytes between position and limit.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.position..self.limit]
    }

    pub fn put_slice(&mut self, src: &[u8]) -> Result<(), BufferOverflow> {
        let available = self.remaining();
        if src.len() > available {
            return Err(BufferOverflow {
                needed: src.len(),
                available,
            });
        }
        let end = self.position + src.len();
        self.data[self.position..end].copy_from_slice(src);
        self.position = end;
        self.dirty = self.dirty.max(end);
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) -> Result<(), BufferOverflow> {
        self.put_slice(&[value])
    }

    /// Big-endian, so byte order matches numeric order.
    pub fn put_u32(&mut self, value: u32) -> Result<(), BufferOverflow> {
        self.put_slice(&value.to_be_bytes())
    }

    /// Big-endian, so byte order matches numeric order.
    pub fn put_u64(&mut self, value: u64) -> Result<(), BufferOverflow> {
        self.put_slice(&value.to_be_bytes())
    }

    /// Native-endian, the layout LMDB integer keys expect.
    pub fn put_u32_ne(&mut self, value: u32) -> Result<(), BufferOverflow> {
        self.put_slice(&value.to_ne_bytes())
    }

    /// Native-endian, the layout LMDB integer keys expect.
    pub fn put_u64_ne(&mut self, value: u64) -> Result<(), BufferOverflow> {
        self.put_slice(&value.to_ne_bytes())
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("capacity", &self.capacity())
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("lease", &self.lease)
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool
            .give_back(data, self.dirty, self.lease, self.pooled);
    }
}

/// A key buffer and a value buffer leased together.
#[derive(Debug)]
pub struct PooledBufferPair {
    pub key: PooledBuffer,
    pub value: PooledBuffer,
}
