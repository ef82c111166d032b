//! Refstore Core: shared types for the reference-data store
//!
//! This crate holds everything that does not touch the storage engine:
//! - Error taxonomy and the crate-wide `Result`
//! - Serde-backed configuration for environments, tables and the buffer pool
//! - The `Serde<T>` codec trait and stock codecs
//! - A bucketed pool of reusable byte buffers
//! - Key ranges for forward scans
//! - Optional metrics (`observe` feature)

pub mod buffer_pool;
pub mod codec;
pub mod config;
pub mod error;
pub mod key_range;
pub mod observe;
pub mod types;

pub use buffer_pool::{BufferPool, PooledBuffer, PooledBufferPair, MIN_BUCKET_CAPACITY};
pub use codec::{
    to_hex, BytesSerde, JsonSerde, NativeU32Serde, NativeU64Serde, Serde, StringSerde, U32Serde,
    U64Serde,
};
pub use config::{BufferPoolConfig, EnvironmentConfig, SyncMode, TableOptions, MIN_MAP_SIZE};
pub use error::{BufferOverflow, CodecError, Result, StoreError};
pub use key_range::{KeyRange, RangeType};
pub use types::{CommitInfo, EnvInfo, PutOutcome, TableInfo, TxnMode};
