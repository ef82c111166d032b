//! Debug dumps of table contents through `tracing`.
//!
//! Meant for small tables while investigating; every entry becomes one
//! `info` event on the `refstore::dump` target.

use crate::table::Table;
use crate::txn::Txn;
use refstore_core::{to_hex, KeyRange, Result};
use std::fmt::Debug;
use tracing::info;

impl<K: Debug, V: Debug> Table<K, V> {
    /// Log every entry deserialized with `Debug`; returns the entry count.
    pub fn log_contents(&self, txn: &Txn<'_>) -> Result<usize> {
        info!(target: "refstore::dump", table = self.name(), "dumping table contents");
        let mut logged = 0;
        for entry in self.range(txn, &KeyRange::all())? {
            let (key, value) = entry?;
            info!(target: "refstore::dump", table = self.name(), ?key, ?value, "entry");
            logged += 1;
        }
        Ok(logged)
    }
}

impl<K, V> Table<K, V> {
    /// Log every entry as hex; returns the entry count.
    pub fn log_raw_contents(&self, txn: &Txn<'_>) -> Result<usize> {
        info!(target: "refstore::dump", table = self.name(), "dumping raw table contents");
        let mut logged = 0;
        for entry in self.range_bytes(txn, &KeyRange::all())? {
            let entry = entry?;
            info!(
                target: "refstore::dump",
                table = self.name(),
                key = %to_hex(entry.key()?),
                value = %to_hex(entry.value()?),
                "entry"
            );
            logged += 1;
        }
        Ok(logged)
    }
}
