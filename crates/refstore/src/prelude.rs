//! Refstore Prelude
//!
//! ```
//! use refstore::prelude::*;
//! ```

// Core types
pub use crate::{CommitInfo, PutOutcome, Result, StoreError, TxnMode};

// Configs
pub use crate::{BufferPoolConfig, EnvironmentConfig, SyncMode, TableOptions};

// Engine
pub use crate::{CursorRange, Environment, RawEntry, RawRange, RawView, Table, Txn};

// Codecs
pub use crate::{
    BytesSerde, JsonSerde, NativeU32Serde, NativeU64Serde, Serde, StringSerde, U32Serde, U64Serde,
};

// Ranges and buffers
pub use crate::{BufferPool, KeyRange, PooledBuffer, RangeType};
