//! LMDB-backed typed key/value tables
//!
//! Key features:
//! - Typed tables over named LMDB databases, with pooled serialization buffers
//! - Zero-copy views guarded by per-transaction generation stamps
//! - Single-writer semantics with fail-fast same-thread re-entry
//! - Reader slot limits with blocking, immediate and async acquisition
//! - Forward key-range scans compared with the table's own comparator

mod dump;
mod env;
mod error;
mod ffi;
pub mod range;
mod read_pool;
pub mod table;
pub mod txn;
pub mod view;
mod write_gate;

pub use env::Environment;
pub use range::{CursorRange, RawRange};
pub use table::Table;
pub use txn::Txn;
pub use view::{RawEntry, RawView};
