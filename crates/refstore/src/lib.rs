//! Refstore: an embedded, typed reference-data store over LMDB
//!
//! Refstore gives fast, transactional lookups against a single-file,
//! memory-mapped database:
//! - **Environment**: one directory, many named tables, bounded readers
//! - **Tables**: typed `K -> V` with pluggable codecs and three key orderings
//! - **Transactions**: snapshot reads, a single writer, zero-copy views
//! - **Buffer pool**: reusable serialization buffers shared by all tables
//!
//! # Quick Start
//!
//! ```no_run
//! use refstore::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let env = Environment::open(EnvironmentConfig::new("./ref-data"))?;
//! let zones = env.open_table(
//!     "zones",
//!     StringSerde::new(),
//!     StringSerde::new(),
//!     TableOptions::new(),
//! )?;
//!
//! let mut txn = env.begin_write()?;
//! zones.put(&mut txn, &"GB".to_string(), &"Europe/London".to_string(), false)?;
//! txn.commit()?;
//!
//! let txn = env.begin_read()?;
//! assert_eq!(
//!     zones.get(&txn, &"GB".to_string())?.as_deref(),
//!     Some("Europe/London")
//! );
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub use refstore_core::{
    buffer_pool::{BufferPool, PooledBuffer, PooledBufferPair, MIN_BUCKET_CAPACITY},
    codec::{
        to_hex, BytesSerde, JsonSerde, NativeU32Serde, NativeU64Serde, Serde, StringSerde,
        U32Serde, U64Serde,
    },
    config::{BufferPoolConfig, EnvironmentConfig, SyncMode, TableOptions, MIN_MAP_SIZE},
    error::{BufferOverflow, CodecError, Result, StoreError},
    key_range::{KeyRange, RangeType},
    observe,
    types::{CommitInfo, EnvInfo, PutOutcome, TableInfo, TxnMode},
};

pub use refstore_lmdb::{CursorRange, Environment, RawEntry, RawRange, RawView, Table, Txn};
