use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Smallest map size accepted; LMDB needs room for its two meta pages plus
/// at least a root page per table.
pub const MIN_MAP_SIZE: usize = 64 * 1024;

/// Configuration for the shared byte buffer pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Maximum number of idle buffers retained per capacity bucket (default: 50)
    ///
    /// Buffers released into a full bucket are dropped.
    #[serde(default = "default_max_buffers_per_bucket")]
    pub max_buffers_per_bucket: usize,

    /// Largest capacity served from the pool (default: 1 MiB)
    ///
    /// Requests above this are allocated on demand and never retained.
    #[serde(default = "default_max_pooled_capacity")]
    pub max_pooled_capacity: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            max_buffers_per_bucket: default_max_buffers_per_bucket(),
            max_pooled_capacity: default_max_pooled_capacity(),
        }
    }
}

impl BufferPoolConfig {
    pub fn with_max_buffers_per_bucket(mut self, count: usize) -> Self {
        self.max_buffers_per_bucket = count;
        self
    }

    pub fn with_max_pooled_capacity(mut self, capacity: usize) -> Self {
        self.max_pooled_capacity = capacity;
        self
    }
}

fn default_max_buffers_per_bucket() -> usize {
    50
}

fn default_max_pooled_capacity() -> usize {
    1024 * 1024
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// `fsync()` on every commit. Committed data survives power loss.
    #[default]
    Full,

    /// Skip syncing the meta page on commit.
    ///
    /// An OS crash may lose the last transaction but the file stays
    /// consistent. Reference data can be reloaded, so this is a common choice
    /// for bulk loads.
    NoMetaSync,

    /// No `fsync()` at all; the OS page cache decides when to flush.
    ///
    /// **WARNING**: an OS crash can lose recent transactions or corrupt the
    /// file. Only for ephemeral or reproducible data.
    NoSync,
}

/// Configuration for an LMDB environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Directory holding `data.mdb` and `lock.mdb`
    pub path: PathBuf,

    /// Maximum size of the memory map in bytes (default: 1 GiB)
    ///
    /// Fixed at creation; there is no online grow. Writes that would exceed
    /// it fail with `ResourceExhausted`.
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: usize,

    /// Maximum number of named tables (default: 16)
    #[serde(default = "default_max_tables")]
    pub max_tables: u32,

    /// Maximum number of concurrent read transactions (default: 126)
    #[serde(default = "default_max_readers")]
    pub max_readers: u32,

    /// Sync mode for durability
    #[serde(default)]
    pub sync_mode: SyncMode,

    /// Bind reader slots to transactions instead of threads (LMDB `NO_TLS`)
    ///
    /// Transactions are never `Send`, so this does not let a transaction
    /// migrate between threads. It allows one thread to hold several read
    /// transactions at once and frees a reader slot as soon as its
    /// transaction ends rather than when the thread exits.
    #[serde(default)]
    pub thread_unconstrained: bool,

    /// How long `begin_read` waits for a free reader slot, in milliseconds
    /// (default: 5000). Zero fails immediately.
    #[serde(default = "default_reader_acquire_timeout")]
    pub reader_acquire_timeout_ms: u64,

    /// How long `begin_write` waits for the writer lock, in milliseconds
    ///
    /// `None` (the default) blocks until the lock is free.
    #[serde(default)]
    pub writer_acquire_timeout_ms: Option<u64>,

    /// Default capacity of value buffers when a value codec does not declare
    /// a smaller one (default: 1000)
    #[serde(default = "default_value_buffer_capacity")]
    pub value_buffer_capacity: usize,

    /// Buffer pool configuration
    #[serde(default)]
    pub buffer_pool: BufferPoolConfig,
}

fn default_max_size_bytes() -> usize {
    1024 * 1024 * 1024
}

fn default_max_tables() -> u32 {
    16
}

fn default_max_readers() -> u32 {
    126
}

fn default_reader_acquire_timeout() -> u64 {
    5000
}

fn default_value_buffer_capacity() -> usize {
    1000
}

impl EnvironmentConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_size_bytes: default_max_size_bytes(),
            max_tables: default_max_tables(),
            max_readers: default_max_readers(),
            sync_mode: SyncMode::default(),
            thread_unconstrained: false,
            reader_acquire_timeout_ms: default_reader_acquire_timeout(),
            writer_acquire_timeout_ms: None,
            value_buffer_capacity: default_value_buffer_capacity(),
            buffer_pool: BufferPoolConfig::default(),
        }
    }

    pub fn with_max_size_bytes(mut self, max_size_bytes: usize) -> Self {
        self.max_size_bytes = max_size_bytes;
        self
    }

    pub fn with_max_tables(mut self, max_tables: u32) -> Self {
        self.max_tables = max_tables;
        self
    }

    pub fn with_max_readers(mut self, max_readers: u32) -> Self {
        self.max_readers = max_readers;
        self
    }

    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    pub fn with_thread_unconstrained(mut self, enabled: bool) -> Self {
        self.thread_unconstrained = enabled;
        self
    }

    pub fn with_reader_timeout(mut self, timeout_ms: u64) -> Self {
        self.reader_acquire_timeout_ms = timeout_ms;
        self
    }

    pub fn with_writer_timeout(mut self, timeout_ms: u64) -> Self {
        self.writer_acquire_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_value_buffer_capacity(mut self, capacity: usize) -> Self {
        self.value_buffer_capacity = capacity;
        self
    }

    pub fn with_buffer_pool(mut self, config: BufferPoolConfig) -> Self {
        self.buffer_pool = config;
        self
    }

    /// Reject limits the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(StoreError::Environment("path must not be empty".into()));
        }
        if self.path.is_file() {
            return Err(StoreError::Environment(format!(
                "path {} is a file, expected a directory",
                self.path.display()
            )));
        }
        if self.max_size_bytes < MIN_MAP_SIZE {
            return Err(StoreError::Environment(format!(
                "max_size_bytes {} is below the minimum of {}",
                self.max_size_bytes, MIN_MAP_SIZE
            )));
        }
        if self.max_tables == 0 {
            return Err(StoreError::Environment("max_tables must be positive".into()));
        }
        if self.max_readers == 0 {
            return Err(StoreError::Environment("max_readers must be positive".into()));
        }
        if self.value_buffer_capacity == 0 {
            return Err(StoreError::Config(
                "value_buffer_capacity must be positive".into(),
            ));
        }
        if self.buffer_pool.max_pooled_capacity == 0 {
            return Err(StoreError::Config(
                "buffer_pool.max_pooled_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}
