use crate::env::{EnvShared, TableEntry};
use crate::error::engine_error;
use crate::ffi;
use crate::range::{CursorRange, RawRange};
use crate::txn::Txn;
use crate::view::RawView;
use lmdb::{Cursor, Database, WriteFlags};
use refstore_core::{
    to_hex, KeyRange, PooledBuffer, PutOutcome, Result, Serde, StoreError, TableInfo,
    TableOptions,
};
use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

struct TableInner<K, V> {
    env: Arc<EnvShared>,
    name: String,
    db: Database,
    options: TableOptions,
    key_serde: Box<dyn Serde<K>>,
    value_serde: Box<dyn Serde<V>>,
    key_capacity: usize,
    value_capacity: usize,
    key_width: Arc<AtomicUsize>,
}

/// A named, ordered table of `K -> V` inside an
/// [`Environment`](crate::Environment).
///
/// Operations take the transaction to run in: `&Txn` for reads, `&mut Txn`
/// for writes. Handles are cheap to clone and may be shared across threads.
pub struct Table<K, V> {
    inner: Arc<TableInner<K, V>>,
}

impl<K, V> Clone for Table<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for Table<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.inner.name)
            .field("options", &self.inner.options)
            .field("key_capacity", &self.inner.key_capacity)
            .field("value_capacity", &self.inner.value_capacity)
            .finish()
    }
}

impl<K, V> Table<K, V> {
    pub(crate) fn new(
        env: Arc<EnvShared>,
        name: &str,
        entry: TableEntry,
        key_serde: Box<dyn Serde<K>>,
        value_serde: Box<dyn Serde<V>>,
    ) -> Self {
        let key_capacity = key_serde
            .capacity()
            .map_or(env.max_key_size, |cap| cap.min(env.max_key_size));
        let value_capacity = value_serde
            .capacity()
            .unwrap_or(env.config.value_buffer_capacity);
        Self {
            inner: Arc::new(TableInner {
                name: name.to_string(),
                db: entry.db,
                options: entry.options,
                key_width: entry.key_width,
                key_serde,
                value_serde,
                key_capacity,
                value_capacity,
                env,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> TableOptions {
        self.inner.options
    }

    pub fn key_serde(&self) -> &dyn Serde<K> {
        self.inner.key_serde.as_ref()
    }

    pub fn value_serde(&self) -> &dyn Serde<V> {
        self.inner.value_serde.as_ref()
    }

    /// Size of the buffers keys are serialized into.
    pub fn key_capacity(&self) -> usize {
        self.inner.key_capacity
    }

    /// Size of the buffers values are serialized into.
    pub fn value_capacity(&self) -> usize {
        self.inner.value_capacity
    }

    /// Lease a buffer sized for this table's keys.
    pub fn pooled_key_buffer(&self) -> PooledBuffer {
        self.inner.env.pool.borrow(self.inner.key_capacity)
    }

    /// Lease a buffer sized for this table's values.
    pub fn pooled_value_buffer(&self) -> PooledBuffer {
        self.inner.env.pool.borrow(self.inner.value_capacity)
    }

    /// Value stored under `key`.
    ///
    /// On a duplicate-key table this is the first value in sort order.
    pub fn get(&self, txn: &Txn<'_>, key: &K) -> Result<Option<V>> {
        self.check_txn(txn)?;
        let key_buf = self.encode_key_in(txn, key)?;
        let key_bytes = key_buf.as_slice();
        txn.advance();
        trace!(table = %self.inner.name, key = %to_hex(key_bytes), "get");
        match txn.get_raw(self.inner.db, key_bytes, &self.inner.name)? {
            Some(bytes) => self.decode_value(key_bytes, bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Zero-copy view of the value stored under `key`.
    pub fn get_bytes<'t>(&self, txn: &'t Txn<'_>, key: &K) -> Result<Option<RawView<'t>>> {
        let key_buf = self.encode_key(key)?;
        self.get_bytes_raw(txn, key_buf.as_slice())
    }

    /// Zero-copy lookup by an already-serialized key.
    pub fn get_bytes_raw<'t>(&self, txn: &'t Txn<'_>, key: &[u8]) -> Result<Option<RawView<'t>>> {
        self.check_txn(txn)?;
        self.check_raw_key(txn, key)?;
        txn.advance();
        trace!(table = %self.inner.name, key = %to_hex(key), "get bytes");
        Ok(txn
            .get_raw(self.inner.db, key, &self.inner.name)?
            .map(|bytes| RawView::new(bytes, txn.generation_cell())))
    }

    pub fn exists(&self, txn: &Txn<'_>, key: &K) -> Result<bool> {
        let key_buf = self.encode_key(key)?;
        self.exists_raw(txn, key_buf.as_slice())
    }

    /// [`exists`](Self::exists) for an already-serialized key.
    pub fn exists_raw(&self, txn: &Txn<'_>, key: &[u8]) -> Result<bool> {
        self.check_txn(txn)?;
        self.check_raw_key(txn, key)?;
        txn.advance();
        Ok(txn.get_raw(self.inner.db, key, &self.inner.name)?.is_some())
    }

    /// Store `value` under `key`.
    ///
    /// With `overwrite == false` an existing key (or, on a duplicate-key
    /// table, an existing key/value pair) is left alone and `Duplicate` is
    /// returned.
    pub fn put(&self, txn: &mut Txn<'_>, key: &K, value: &V, overwrite: bool) -> Result<PutOutcome> {
        self.check_txn(txn)?;
        let key_buf = self.encode_key_in(txn, key)?;
        let value_buf = self.encode_value(key_buf.as_slice(), value)?;
        self.put_bytes(txn, key_buf.as_slice(), value_buf.as_slice(), overwrite)
    }

    /// [`put`](Self::put) for an already-serialized key and value.
    ///
    /// The value is bounded by [`value_capacity`](Self::value_capacity) like
    /// any serialized value.
    pub fn put_raw(
        &self,
        txn: &mut Txn<'_>,
        key: &[u8],
        value: &[u8],
        overwrite: bool,
    ) -> Result<PutOutcome> {
        self.check_txn(txn)?;
        self.check_raw_key(txn, key)?;
        if value.len() > self.inner.value_capacity {
            return Err(StoreError::Capacity {
                table: self.inner.name.clone(),
                needed: value.len(),
                available: self.inner.value_capacity,
            });
        }
        self.put_bytes(txn, key, value, overwrite)
    }

    fn put_bytes(
        &self,
        txn: &mut Txn<'_>,
        key: &[u8],
        value: &[u8],
        overwrite: bool,
    ) -> Result<PutOutcome> {
        txn.advance();
        let db = self.inner.db;
        let rw = txn.writer("put")?;
        let (outcome, wrote) = if self.inner.options.allow_duplicates {
            match rw.put(db, &key, &value, WriteFlags::NO_DUP_DATA) {
                Ok(()) => (PutOutcome::Inserted, true),
                Err(lmdb::Error::KeyExist) if overwrite => (PutOutcome::Replaced, false),
                Err(lmdb::Error::KeyExist) => (PutOutcome::Duplicate, false),
                Err(e) => return Err(self.write_error(e, "put", value.len())),
            }
        } else {
            match rw.put(db, &key, &value, WriteFlags::NO_OVERWRITE) {
                Ok(()) => (PutOutcome::Inserted, true),
                Err(lmdb::Error::KeyExist) if overwrite => {
                    rw.put(db, &key, &value, WriteFlags::empty())
                        .map_err(|e| self.write_error(e, "put", value.len()))?;
                    (PutOutcome::Replaced, true)
                }
                Err(lmdb::Error::KeyExist) => (PutOutcome::Duplicate, false),
                Err(e) => return Err(self.write_error(e, "put", value.len())),
            }
        };

        if wrote {
            txn.record_write();
            self.stage_key_width(txn, key.len());
        }
        trace!(table = %self.inner.name, key = %to_hex(key), ?outcome, "put");
        Ok(outcome)
    }

    /// Remove `key` (every value of it on a duplicate-key table).
    ///
    /// Returns whether anything was removed.
    pub fn delete(&self, txn: &mut Txn<'_>, key: &K) -> Result<bool> {
        let key_buf = self.encode_key(key)?;
        self.delete_raw(txn, key_buf.as_slice())
    }

    /// [`delete`](Self::delete) for an already-serialized key.
    pub fn delete_raw(&self, txn: &mut Txn<'_>, key: &[u8]) -> Result<bool> {
        self.check_txn(txn)?;
        self.check_raw_key(txn, key)?;
        txn.advance();
        let removed = match txn.writer("delete")?.del(self.inner.db, &key, None) {
            Ok(()) => true,
            Err(lmdb::Error::NotFound) => false,
            Err(e) => return Err(engine_error(e, "delete", Some(&self.inner.name))),
        };
        if removed {
            txn.record_write();
        }
        trace!(table = %self.inner.name, key = %to_hex(key), removed, "delete");
        Ok(removed)
    }

    /// Remove a single key/value pair.
    ///
    /// Meant for duplicate-key tables; on other tables the entry is removed
    /// only if its value matches. Returns whether the pair existed.
    pub fn delete_entry(&self, txn: &mut Txn<'_>, key: &K, value: &V) -> Result<bool> {
        self.check_txn(txn)?;
        let key_buf = self.encode_key_in(txn, key)?;
        let key_bytes = key_buf.as_slice();
        let value_buf = self.encode_value(key_bytes, value)?;
        let value_bytes = value_buf.as_slice();
        txn.advance();

        let name = self.inner.name.as_str();
        let rw = txn.writer("delete")?;
        let mut cursor = rw
            .open_rw_cursor(self.inner.db)
            .map_err(|e| engine_error(e, "delete", Some(name)))?;
        // GET_BOTH is only defined for duplicate-key tables.
        let found = if self.inner.options.allow_duplicates {
            cursor
                .get(Some(key_bytes), Some(value_bytes), lmdb_sys::MDB_GET_BOTH)
                .map(|_| true)
        } else {
            cursor
                .get(Some(key_bytes), None, lmdb_sys::MDB_SET_KEY)
                .map(|(_, stored)| stored == value_bytes)
        };
        let removed = match found {
            Ok(true) => {
                cursor
                    .del(WriteFlags::empty())
                    .map_err(|e| engine_error(e, "delete", Some(name)))?;
                true
            }
            Ok(false) | Err(lmdb::Error::NotFound) => false,
            Err(e) => return Err(engine_error(e, "delete", Some(name))),
        };
        drop(cursor);

        if removed {
            txn.record_write();
        }
        trace!(table = name, key = %to_hex(key_bytes), removed, "delete entry");
        Ok(removed)
    }

    /// Rewrite the value under `key` in place.
    ///
    /// `mutator` receives an owned copy of the current bytes. The entry is
    /// written back only if the bytes changed; the return value says whether
    /// a write happened. A missing key is an `Integrity` error.
    pub fn update_value(
        &self,
        txn: &mut Txn<'_>,
        key: &K,
        mutator: impl FnOnce(&mut Vec<u8>),
    ) -> Result<bool> {
        self.check_txn(txn)?;
        if self.inner.options.allow_duplicates {
            return Err(StoreError::InvalidState(format!(
                "update_value is not supported on duplicate-key table '{}'",
                self.inner.name
            )));
        }
        let key_buf = self.encode_key_in(txn, key)?;
        let key_bytes = key_buf.as_slice();
        txn.advance();

        let name = self.inner.name.as_str();
        let rw = txn.writer("update_value")?;
        let mut cursor = rw
            .open_rw_cursor(self.inner.db)
            .map_err(|e| engine_error(e, "update_value", Some(name)))?;

        let current = match cursor.get(Some(key_bytes), None, lmdb_sys::MDB_SET_KEY) {
            Ok((_, value)) => value.to_vec(),
            Err(lmdb::Error::NotFound) => {
                return Err(self.integrity_error(key_bytes, "no entry to update"));
            }
            Err(e) => return Err(engine_error(e, "update_value", Some(name))),
        };

        let mut updated = current.clone();
        mutator(&mut updated);
        if updated == current {
            drop(cursor);
            txn.record_skipped_write();
            trace!(table = name, key = %to_hex(key_bytes), "update_value unchanged");
            return Ok(false);
        }

        match cursor.put(&key_bytes, &updated, WriteFlags::CURRENT) {
            Ok(()) => {}
            Err(lmdb::Error::NotFound) => {
                return Err(self.integrity_error(key_bytes, "entry vanished before write"));
            }
            Err(e) => return Err(self.write_error(e, "update_value", updated.len())),
        }
        drop(cursor);
        txn.record_write();
        trace!(table = name, key = %to_hex(key_bytes), "update_value written");
        Ok(true)
    }

    /// Forward scan over `key_range`, deserializing each entry.
    pub fn range<'t>(
        &'t self,
        txn: &'t Txn<'_>,
        key_range: &KeyRange<K>,
    ) -> Result<CursorRange<'t, K, V>> {
        let raw = self.range_bytes(txn, key_range)?;
        Ok(CursorRange::new(self, raw))
    }

    /// Forward scan over `key_range` yielding zero-copy views.
    pub fn range_bytes<'t>(&'t self, txn: &'t Txn<'_>, key_range: &KeyRange<K>) -> Result<RawRange<'t>> {
        self.check_txn(txn)?;
        let start = key_range
            .start()
            .map(|k| self.encode_key_in(txn, k))
            .transpose()?;
        let stop = key_range
            .stop()
            .map(|k| self.encode_key_in(txn, k))
            .transpose()?;
        let cursor = txn.ro_cursor(self.inner.db, &self.inner.name)?;
        RawRange::new(
            txn,
            cursor,
            self.inner.db,
            &self.inner.name,
            key_range.range_type(),
            start,
            stop,
        )
    }

    /// Number of entries visible to `txn`.
    pub fn count(&self, txn: &Txn<'_>) -> Result<u64> {
        Ok(self.stat(txn)?.entries)
    }

    /// Engine statistics for this table as seen by `txn`.
    pub fn stat(&self, txn: &Txn<'_>) -> Result<TableInfo> {
        self.check_txn(txn)?;
        let stat = ffi::table_stat(txn.raw_ptr()?, self.inner.db)
            .map_err(|e| engine_error(e, "stat", Some(&self.inner.name)))?;
        Ok(TableInfo {
            name: self.inner.name.clone(),
            entries: stat.ms_entries as u64,
            depth: stat.ms_depth,
            page_size: stat.ms_psize,
            branch_pages: stat.ms_branch_pages as u64,
            leaf_pages: stat.ms_leaf_pages as u64,
            overflow_pages: stat.ms_overflow_pages as u64,
        })
    }

    /// Store every entry (overwriting) in one write transaction.
    ///
    /// Returns how many entries were stored. Nothing is stored if any entry
    /// fails.
    pub fn put_all<I>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut txn = self.inner.env.begin_write()?;
        let mut stored = 0;
        for (key, value) in entries {
            if self.put(&mut txn, &key, &value, true)?.is_success() {
                stored += 1;
            }
        }
        txn.commit()?;
        debug!(table = %self.inner.name, stored, "put_all committed");
        Ok(stored)
    }

    /// Delete every key in one write transaction; returns how many existed.
    pub fn delete_all<I>(&self, keys: I) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Borrow<K>,
    {
        let mut txn = self.inner.env.begin_write()?;
        let mut removed = 0;
        for key in keys {
            if self.delete(&mut txn, key.borrow())? {
                removed += 1;
            }
        }
        txn.commit()?;
        debug!(table = %self.inner.name, removed, "delete_all committed");
        Ok(removed)
    }

    /// [`get`](Self::get) in its own read transaction.
    pub fn fetch(&self, key: &K) -> Result<Option<V>> {
        let txn = self.begin_read()?;
        self.get(&txn, key)
    }

    /// [`exists`](Self::exists) in its own read transaction.
    pub fn contains(&self, key: &K) -> Result<bool> {
        let txn = self.begin_read()?;
        self.exists(&txn, key)
    }

    /// [`put`](Self::put) in its own write transaction.
    pub fn store(&self, key: &K, value: &V, overwrite: bool) -> Result<PutOutcome> {
        let mut txn = self.inner.env.begin_write()?;
        let outcome = self.put(&mut txn, key, value, overwrite)?;
        txn.commit()?;
        Ok(outcome)
    }

    /// [`delete`](Self::delete) in its own write transaction.
    pub fn remove(&self, key: &K) -> Result<bool> {
        let mut txn = self.inner.env.begin_write()?;
        let removed = self.delete(&mut txn, key)?;
        txn.commit()?;
        Ok(removed)
    }

    /// [`count`](Self::count) in its own read transaction.
    pub fn entry_count(&self) -> Result<u64> {
        let txn = self.begin_read()?;
        self.count(&txn)
    }

    /// [`update_value`](Self::update_value) in its own write transaction.
    ///
    /// Commits only when the bytes changed.
    pub fn update(&self, key: &K, mutator: impl FnOnce(&mut Vec<u8>)) -> Result<bool> {
        let mut txn = self.inner.env.begin_write()?;
        if self.update_value(&mut txn, key, mutator)? {
            txn.commit()?;
            return Ok(true);
        }
        txn.abort();
        Ok(false)
    }

    /// Apply `f` to the raw value under `key` inside a short-lived read
    /// transaction, without copying it out.
    pub fn map_value<T>(&self, key: &K, f: impl FnOnce(&[u8]) -> T) -> Result<Option<T>> {
        let txn = self.begin_read()?;
        let view = self.get_bytes(&txn, key)?;
        let mapped = match view {
            Some(view) => Some(f(view.bytes()?)),
            None => None,
        };
        Ok(mapped)
    }

    fn begin_read(&self) -> Result<Txn<'_>> {
        let env = &self.inner.env;
        env.begin_read_timeout(env.readers.default_timeout())
    }

    fn check_txn(&self, txn: &Txn<'_>) -> Result<()> {
        if !std::ptr::eq(txn.env(), Arc::as_ptr(&self.inner.env)) {
            return Err(StoreError::InvalidState(format!(
                "transaction for table '{}' belongs to a different environment",
                self.inner.name
            )));
        }
        Ok(())
    }

    /// Serialize `key` into a flipped pooled buffer and validate it.
    pub(crate) fn encode_key(&self, key: &K) -> Result<PooledBuffer> {
        let mut buffer = self.pooled_key_buffer();
        self.inner
            .key_serde
            .serialize(&mut buffer, key)
            .map_err(|e| e.into_store_error(&self.inner.name, None))?;
        buffer.flip();
        self.check_key_bytes(buffer.as_slice())?;
        Ok(buffer)
    }

    fn encode_value(&self, key: &[u8], value: &V) -> Result<PooledBuffer> {
        let mut buffer = self.pooled_value_buffer();
        self.inner
            .value_serde
            .serialize(&mut buffer, value)
            .map_err(|e| e.into_store_error(&self.inner.name, Some(to_hex(key))))?;
        buffer.flip();
        Ok(buffer)
    }

    pub(crate) fn decode_key(&self, bytes: &[u8]) -> Result<K> {
        self.inner
            .key_serde
            .deserialize(bytes)
            .map_err(|e| e.into_store_error(&self.inner.name, Some(to_hex(bytes))))
    }

    pub(crate) fn decode_value(&self, key: &[u8], bytes: &[u8]) -> Result<V> {
        self.inner
            .value_serde
            .deserialize(bytes)
            .map_err(|e| e.into_store_error(&self.inner.name, Some(to_hex(key))))
    }

    fn check_key_bytes(&self, key: &[u8]) -> Result<()> {
        let len = key.len();
        if len == 0 {
            return Err(StoreError::Codec {
                table: self.inner.name.clone(),
                key: None,
                message: "keys must not be empty".into(),
            });
        }
        if len > self.inner.env.max_key_size {
            return Err(StoreError::Capacity {
                table: self.inner.name.clone(),
                needed: len,
                available: self.inner.env.max_key_size,
            });
        }
        if self.inner.options.integer_key && len != 4 && len != 8 {
            return Err(StoreError::Codec {
                table: self.inner.name.clone(),
                key: Some(to_hex(key)),
                message: format!("integer keys must be 4 or 8 bytes, got {len}"),
            });
        }
        Ok(())
    }

    /// [`encode_key`](Self::encode_key) plus the integer width check
    /// against `txn`'s view.
    fn encode_key_in(&self, txn: &Txn<'_>, key: &K) -> Result<PooledBuffer> {
        let buffer = self.encode_key(key)?;
        self.check_key_width(txn, buffer.as_slice().len())?;
        Ok(buffer)
    }

    fn check_raw_key(&self, txn: &Txn<'_>, key: &[u8]) -> Result<()> {
        self.check_key_bytes(key)?;
        self.check_key_width(txn, key.len())
    }

    /// Integer-key tables hold one key width.
    ///
    /// The shared width only reflects committed data, so a miss is settled
    /// against the first key visible to `txn`: an empty table accepts either
    /// width.
    fn check_key_width(&self, txn: &Txn<'_>, len: usize) -> Result<()> {
        if !self.inner.options.integer_key
            || self.inner.key_width.load(Ordering::Acquire) == len
        {
            return Ok(());
        }
        match self.stored_key_width(txn)? {
            Some(width) if width != len => Err(StoreError::KeyWidth {
                table: self.inner.name.clone(),
                expected: width,
                actual: len,
            }),
            _ => Ok(()),
        }
    }

    fn stored_key_width(&self, txn: &Txn<'_>) -> Result<Option<usize>> {
        let cursor = txn.ro_cursor(self.inner.db, &self.inner.name)?;
        match cursor.get(None, None, lmdb_sys::MDB_FIRST) {
            Ok((Some(key), _)) => Ok(Some(key.len())),
            Ok((None, _)) | Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(engine_error(e, "key width", Some(&self.inner.name))),
        }
    }

    /// Published to the table when `txn` commits.
    fn stage_key_width(&self, txn: &Txn<'_>, len: usize) {
        if self.inner.options.integer_key && self.inner.key_width.load(Ordering::Acquire) != len {
            txn.stage_key_width(&self.inner.key_width, len);
        }
    }

    fn integrity_error(&self, key: &[u8], message: &str) -> StoreError {
        StoreError::Integrity {
            table: self.inner.name.clone(),
            key: to_hex(key),
            message: message.to_string(),
        }
    }

    /// Values on duplicate-key tables share the engine's key size limit.
    fn write_error(&self, err: lmdb::Error, op: &'static str, value_len: usize) -> StoreError {
        match err {
            lmdb::Error::BadValSize => StoreError::Capacity {
                table: self.inner.name.clone(),
                needed: value_len,
                available: self.inner.env.max_key_size,
            },
            other => engine_error(other, op, Some(&self.inner.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Environment;
    use refstore_core::{
        BytesSerde, EnvironmentConfig, NativeU32Serde, NativeU64Serde, StringSerde, U32Serde,
    };
    use tempfile::TempDir;

    fn open_env() -> (TempDir, Environment) {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::open(
            EnvironmentConfig::new(dir.path())
                .with_max_size_bytes(8 * 1024 * 1024)
                .with_value_buffer_capacity(64),
        )
        .unwrap();
        (dir, env)
    }

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn test_capacities() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("t", StringSerde::with_capacity(40), BytesSerde, TableOptions::new())
            .unwrap();
        assert_eq!(table.key_capacity(), 40);
        assert_eq!(table.value_capacity(), 64);
        assert!(table.pooled_key_buffer().capacity() >= 40);

        let unbounded = env
            .open_table("u", StringSerde::new(), U32Serde, TableOptions::new())
            .unwrap();
        assert_eq!(unbounded.key_capacity(), env.max_key_size());
        assert_eq!(unbounded.value_capacity(), 4);
    }

    #[test]
    fn test_oversized_value_is_capacity_error() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("t", StringSerde::new(), BytesSerde, TableOptions::new())
            .unwrap();
        let mut txn = env.begin_write().unwrap();
        let err = table
            .put(&mut txn, &s("k"), &vec![7u8; 65], true)
            .unwrap_err();
        match err {
            StoreError::Capacity { table, needed, .. } => {
                assert_eq!(table, "t");
                assert_eq!(needed, 65);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(txn.write_count(), 0);
    }

    #[test]
    fn test_oversized_key_is_capacity_error() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("t", StringSerde::new(), BytesSerde, TableOptions::new())
            .unwrap();
        let txn = env.begin_read().unwrap();
        let long = "x".repeat(env.max_key_size() + 1);
        let err = table.get(&txn, &long).unwrap_err();
        assert!(matches!(err, StoreError::Capacity { .. }), "{err}");
    }

    #[test]
    fn test_empty_key_rejected() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("t", StringSerde::new(), BytesSerde, TableOptions::new())
            .unwrap();
        let txn = env.begin_read().unwrap();
        let err = table.exists(&txn, &s("")).unwrap_err();
        assert!(matches!(err, StoreError::Codec { .. }));
    }

    #[test]
    fn test_decode_error_names_table_and_key() {
        let (_dir, env) = open_env();
        let raw = env
            .open_table("names", StringSerde::new(), BytesSerde, TableOptions::new())
            .unwrap();
        raw.store(&s("key"), &vec![0xff, 0xfe], true).unwrap();

        let typed = env
            .open_table("names", StringSerde::new(), StringSerde::new(), TableOptions::new())
            .unwrap();
        let err = typed.fetch(&s("key")).unwrap_err();
        match err {
            StoreError::Codec { table, key, .. } => {
                assert_eq!(table, "names");
                assert_eq!(key.as_deref(), Some("6b6579"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_integer_width_established_by_first_write() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("ints", NativeU32Serde, StringSerde::new(), TableOptions::new().with_integer_key())
            .unwrap();
        table.store(&7, &s("seven"), false).unwrap();

        let wide = env
            .open_table("ints", NativeU64Serde, StringSerde::new(), TableOptions::new().with_integer_key())
            .unwrap();
        let err = wide.store(&8, &s("eight"), false).unwrap_err();
        match err {
            StoreError::KeyWidth {
                expected, actual, ..
            } => {
                assert_eq!(expected, 4);
                assert_eq!(actual, 8);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_integer_width_seeded_from_existing_data() {
        let dir = tempfile::tempdir().unwrap();
        let config = EnvironmentConfig::new(dir.path()).with_max_size_bytes(8 * 1024 * 1024);
        {
            let env = Environment::open(config.clone()).unwrap();
            let table = env
                .open_table("ints", NativeU64Serde, U32Serde, TableOptions::new().with_integer_key())
                .unwrap();
            table.store(&1, &10, false).unwrap();
        }
        let env = Environment::open(config).unwrap();
        let narrow = env
            .open_table("ints", NativeU32Serde, U32Serde, TableOptions::new().with_integer_key())
            .unwrap();
        let err = narrow.fetch(&1).unwrap_err();
        assert!(matches!(err, StoreError::KeyWidth { expected: 8, actual: 4, .. }));
    }

    #[test]
    fn test_integer_keys_must_be_four_or_eight_bytes() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("ints", StringSerde::new(), U32Serde, TableOptions::new().with_integer_key())
            .unwrap();
        let err = table.store(&s("abc"), &1, false).unwrap_err();
        assert!(matches!(err, StoreError::Codec { .. }));
    }

    #[test]
    fn test_update_value_on_duplicate_table_rejected() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("dups", StringSerde::new(), StringSerde::new(), TableOptions::new().with_duplicates())
            .unwrap();
        let mut txn = env.begin_write().unwrap();
        table.put(&mut txn, &s("k"), &s("a"), false).unwrap();
        let err = table
            .update_value(&mut txn, &s("k"), |v| v.push(b'!'))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidState(_)));
    }

    #[test]
    fn test_update_value_missing_key_is_integrity_error() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("t", StringSerde::new(), StringSerde::new(), TableOptions::new())
            .unwrap();
        let mut txn = env.begin_write().unwrap();
        let err = table
            .update_value(&mut txn, &s("ghost"), |v| v.clear())
            .unwrap_err();
        match err {
            StoreError::Integrity { table, key, .. } => {
                assert_eq!(table, "t");
                assert_eq!(key, "67686f7374");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_update_value_changes_length() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("t", StringSerde::new(), StringSerde::new(), TableOptions::new())
            .unwrap();
        table.store(&s("k"), &s("short"), false).unwrap();

        let mut txn = env.begin_write().unwrap();
        let wrote = table
            .update_value(&mut txn, &s("k"), |v| v.extend_from_slice(b" and longer"))
            .unwrap();
        assert!(wrote);
        assert_eq!(table.get(&txn, &s("k")).unwrap(), Some(s("short and longer")));
        txn.commit().unwrap();
    }

    #[test]
    fn test_duplicate_table_put_and_delete_entry() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("dups", StringSerde::new(), StringSerde::new(), TableOptions::new().with_duplicates())
            .unwrap();
        let mut txn = env.begin_write().unwrap();
        assert_eq!(table.put(&mut txn, &s("k"), &s("b"), false).unwrap(), PutOutcome::Inserted);
        assert_eq!(table.put(&mut txn, &s("k"), &s("a"), false).unwrap(), PutOutcome::Inserted);
        assert_eq!(table.put(&mut txn, &s("k"), &s("a"), false).unwrap(), PutOutcome::Duplicate);
        assert_eq!(table.put(&mut txn, &s("k"), &s("a"), true).unwrap(), PutOutcome::Replaced);
        assert_eq!(table.count(&txn).unwrap(), 2);
        // First value in sort order
        assert_eq!(table.get(&txn, &s("k")).unwrap(), Some(s("a")));

        assert!(table.delete_entry(&mut txn, &s("k"), &s("a")).unwrap());
        assert!(!table.delete_entry(&mut txn, &s("k"), &s("a")).unwrap());
        assert_eq!(table.get(&txn, &s("k")).unwrap(), Some(s("b")));
        assert!(table.delete(&mut txn, &s("k")).unwrap());
        assert_eq!(table.count(&txn).unwrap(), 0);
    }

    #[test]
    fn test_stat_and_raw_lookup() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("t", StringSerde::new(), StringSerde::new(), TableOptions::new())
            .unwrap();
        table
            .put_all((0..10).map(|i| (format!("k{i}"), format!("v{i}"))))
            .unwrap();

        let txn = env.begin_read().unwrap();
        let info = table.stat(&txn).unwrap();
        assert_eq!(info.name, "t");
        assert_eq!(info.entries, 10);
        assert!(info.depth >= 1);
        assert!(info.leaf_pages >= 1);

        let view = table.get_bytes_raw(&txn, b"k3").unwrap().unwrap();
        assert_eq!(view.bytes().unwrap(), b"v3");
        assert!(table.get_bytes_raw(&txn, b"zz").unwrap().is_none());
    }

    #[test]
    fn test_map_value_and_helpers() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("t", StringSerde::new(), StringSerde::new(), TableOptions::new())
            .unwrap();
        assert_eq!(table.store(&s("a"), &s("alpha"), false).unwrap(), PutOutcome::Inserted);
        assert!(table.contains(&s("a")).unwrap());
        assert_eq!(table.map_value(&s("a"), |b| b.len()).unwrap(), Some(5));
        assert_eq!(table.map_value(&s("b"), |b| b.len()).unwrap(), None);
        assert_eq!(table.entry_count().unwrap(), 1);

        table.store(&s("b"), &s("beta"), false).unwrap();
        assert_eq!(table.delete_all([s("a"), s("b"), s("c")]).unwrap(), 2);
        assert_eq!(table.entry_count().unwrap(), 0);
        assert!(!table.remove(&s("a")).unwrap());
    }

    #[test]
    fn test_transaction_from_other_environment_rejected() {
        let (_dir_a, env_a) = open_env();
        let (_dir_b, env_b) = open_env();
        let table = env_a
            .open_table("t", StringSerde::new(), StringSerde::new(), TableOptions::new())
            .unwrap();
        let txn = env_b.begin_read().unwrap();
        let err = table.get(&txn, &s("a")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidState(_)));
    }

    #[test]
    fn test_log_contents_counts_entries() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("t", StringSerde::new(), StringSerde::new(), TableOptions::new())
            .unwrap();
        table
            .put_all(vec![(s("a"), s("1")), (s("b"), s("2"))])
            .unwrap();
        let txn = env.begin_read().unwrap();
        assert_eq!(table.log_contents(&txn).unwrap(), 2);
        assert_eq!(table.log_raw_contents(&txn).unwrap(), 2);
    }

    #[test]
    fn test_integer_width_released_by_abort() {
        let (_dir, env) = open_env();
        let narrow = env
            .open_table("ints", NativeU32Serde, StringSerde::new(), TableOptions::new().with_integer_key())
            .unwrap();
        let wide = env
            .open_table("ints", NativeU64Serde, StringSerde::new(), TableOptions::new().with_integer_key())
            .unwrap();

        let mut txn = env.begin_write().unwrap();
        narrow.put(&mut txn, &4, &s("four"), false).unwrap();
        // Mixed widths inside one transaction are still rejected
        let err = wide.put(&mut txn, &8, &s("eight"), false).unwrap_err();
        assert!(matches!(err, StoreError::KeyWidth { expected: 4, actual: 8, .. }));
        txn.abort();
        assert_eq!(narrow.entry_count().unwrap(), 0);

        assert_eq!(wide.store(&8, &s("eight"), false).unwrap(), PutOutcome::Inserted);
        let err = narrow.store(&4, &s("four"), false).unwrap_err();
        assert!(matches!(err, StoreError::KeyWidth { expected: 8, actual: 4, .. }));
    }

    #[test]
    fn test_integer_width_released_once_table_empties() {
        let (_dir, env) = open_env();
        let narrow = env
            .open_table("ints", NativeU32Serde, U32Serde, TableOptions::new().with_integer_key())
            .unwrap();
        let wide = env
            .open_table("ints", NativeU64Serde, U32Serde, TableOptions::new().with_integer_key())
            .unwrap();
        narrow.put_all(vec![(1, 10), (2, 20)]).unwrap();
        assert!(wide.store(&3, &30, false).is_err());

        assert_eq!(narrow.delete_all([1u32, 2]).unwrap(), 2);
        assert_eq!(wide.store(&3, &30, false).unwrap(), PutOutcome::Inserted);
        assert_eq!(wide.fetch(&3).unwrap(), Some(30));
        // Lookups of the old width on a non-empty table are rejected
        assert!(matches!(
            narrow.fetch(&1).unwrap_err(),
            StoreError::KeyWidth { expected: 8, actual: 4, .. }
        ));
    }

    #[test]
    fn test_delete_entry_of_last_value_removes_key() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("dups", StringSerde::new(), StringSerde::new(), TableOptions::new().with_duplicates())
            .unwrap();
        let mut txn = env.begin_write().unwrap();
        table.put(&mut txn, &s("k"), &s("a"), false).unwrap();
        table.put(&mut txn, &s("k"), &s("b"), false).unwrap();
        txn.commit().unwrap();

        let mut txn = env.begin_write().unwrap();
        assert!(table.delete_entry(&mut txn, &s("k"), &s("a")).unwrap());
        assert!(table.exists(&txn, &s("k")).unwrap());
        assert!(!table.delete_entry(&mut txn, &s("k"), &s("zz")).unwrap());
        assert!(!table.delete_entry(&mut txn, &s("missing"), &s("a")).unwrap());
        assert!(table.delete_entry(&mut txn, &s("k"), &s("b")).unwrap());
        assert!(!table.exists(&txn, &s("k")).unwrap());
        assert_eq!(txn.write_count(), 2);
        txn.commit().unwrap();

        assert!(!table.contains(&s("k")).unwrap());
        assert_eq!(table.entry_count().unwrap(), 0);
    }

    #[test]
    fn test_delete_entry_on_unique_table() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("t", StringSerde::new(), StringSerde::new(), TableOptions::new())
            .unwrap();
        table.store(&s("k"), &s("v"), false).unwrap();

        let mut txn = env.begin_write().unwrap();
        assert!(!table.delete_entry(&mut txn, &s("k"), &s("other")).unwrap());
        assert!(table.delete_entry(&mut txn, &s("k"), &s("v")).unwrap());
        assert!(!table.exists(&txn, &s("k")).unwrap());
        txn.commit().unwrap();
    }

    #[test]
    fn test_raw_key_operations() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("t", StringSerde::new(), StringSerde::new(), TableOptions::new())
            .unwrap();

        let mut txn = env.begin_write().unwrap();
        assert_eq!(table.put_raw(&mut txn, b"k", b"v1", false).unwrap(), PutOutcome::Inserted);
        assert_eq!(table.put_raw(&mut txn, b"k", b"v2", false).unwrap(), PutOutcome::Duplicate);
        assert_eq!(table.put_raw(&mut txn, b"k", b"v2", true).unwrap(), PutOutcome::Replaced);
        assert!(table.exists_raw(&txn, b"k").unwrap());
        assert!(!table.exists_raw(&txn, b"nope").unwrap());
        assert_eq!(table.get(&txn, &s("k")).unwrap(), Some(s("v2")));

        let err = table.put_raw(&mut txn, b"big", &[1u8; 65], true).unwrap_err();
        assert!(matches!(err, StoreError::Capacity { needed: 65, available: 64, .. }));
        let err = table.put_raw(&mut txn, b"", b"v", true).unwrap_err();
        assert!(matches!(err, StoreError::Codec { .. }));

        assert!(table.delete_raw(&mut txn, b"k").unwrap());
        assert!(!table.delete_raw(&mut txn, b"k").unwrap());
        assert!(!table.exists(&txn, &s("k")).unwrap());
        assert_eq!(txn.write_count(), 3);
        txn.commit().unwrap();
    }

    #[test]
    fn test_self_transacting_update() {
        let (_dir, env) = open_env();
        let table = env
            .open_table("t", StringSerde::new(), StringSerde::new(), TableOptions::new())
            .unwrap();
        table.store(&s("k"), &s("abc"), false).unwrap();
        let before = env.info().unwrap().last_txn_id;

        assert!(!table.update(&s("k"), |_| {}).unwrap());
        assert_eq!(env.info().unwrap().last_txn_id, before);

        assert!(table.update(&s("k"), |v| v.make_ascii_uppercase()).unwrap());
        assert_eq!(table.fetch(&s("k")).unwrap(), Some(s("ABC")));
        assert_eq!(env.info().unwrap().last_txn_id, before + 1);

        let err = table.update(&s("ghost"), |v| v.push(b'!')).unwrap_err();
        assert!(matches!(err, StoreError::Integrity { .. }));
        assert!(env.begin_write().is_ok());
    }
}
