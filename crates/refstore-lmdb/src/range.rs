//! Forward cursor scans over a key range.

use crate::error::engine_error;
use crate::ffi;
use crate::table::Table;
use crate::txn::Txn;
use crate::view::{RawEntry, RawView};
use lmdb::{Cursor, Database, RoCursor};
use lmdb_sys::MDB_txn;
use refstore_core::{PooledBuffer, RangeType, Result, StoreError};
use std::cell::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Fresh,
    Running,
    Done,
}

/// Scan yielding zero-copy [`RawEntry`]s.
///
/// Each step advances the transaction generation, so an entry is readable
/// only until the next step (or any other lookup on the transaction). Not
/// restartable; open a new range to scan again.
pub struct RawRange<'t> {
    cursor: RoCursor<'t>,
    txn_ptr: *mut MDB_txn,
    generation: &'t Cell<u64>,
    db: Database,
    table: &'t str,
    range_type: RangeType,
    start: Option<PooledBuffer>,
    stop: Option<PooledBuffer>,
    state: ScanState,
}

impl<'t> RawRange<'t> {
    pub(crate) fn new(
        txn: &'t Txn<'_>,
        cursor: RoCursor<'t>,
        db: Database,
        table: &'t str,
        range_type: RangeType,
        start: Option<PooledBuffer>,
        stop: Option<PooledBuffer>,
    ) -> Result<Self> {
        Ok(Self {
            cursor,
            txn_ptr: txn.raw_ptr()?,
            generation: txn.generation_cell(),
            db,
            table,
            range_type,
            start,
            stop,
            state: ScanState::Fresh,
        })
    }

    fn finish(&mut self, err: Option<StoreError>) -> Option<Result<RawEntry<'t>>> {
        self.state = ScanState::Done;
        err.map(Err)
    }
}

impl<'t> Iterator for RawRange<'t> {
    type Item = Result<RawEntry<'t>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let step = match self.state {
                ScanState::Done => return None,
                ScanState::Fresh => {
                    self.state = ScanState::Running;
                    match &self.start {
                        Some(start) => {
                            self.cursor
                                .get(Some(start.as_slice()), None, lmdb_sys::MDB_SET_RANGE)
                        }
                        None => self.cursor.get(None, None, lmdb_sys::MDB_FIRST),
                    }
                }
                ScanState::Running => self.cursor.get(None, None, lmdb_sys::MDB_NEXT),
            };
            self.generation.set(self.generation.get() + 1);

            let (key, value) = match step {
                Ok((Some(key), value)) => (key, value),
                Ok((None, _)) => {
                    return self.finish(Some(StoreError::Engine {
                        op: "range",
                        table: Some(self.table.to_string()),
                        message: "cursor returned no key".into(),
                    }));
                }
                Err(lmdb::Error::NotFound) => return self.finish(None),
                Err(e) => return self.finish(Some(engine_error(e, "range", Some(self.table)))),
            };

            if let Some(start) = &self.start {
                let ord = ffi::compare_keys(self.txn_ptr, self.db, key, start.as_slice());
                if !self.range_type.admits_after_start(ord) {
                    continue;
                }
            }
            if let Some(stop) = &self.stop {
                let ord = ffi::compare_keys(self.txn_ptr, self.db, key, stop.as_slice());
                if !self.range_type.admits_before_stop(ord) {
                    return self.finish(None);
                }
            }

            return Some(Ok(RawEntry::new(
                RawView::new(key, self.generation),
                RawView::new(value, self.generation),
            )));
        }
    }
}

/// Scan yielding deserialized `(K, V)` pairs.
pub struct CursorRange<'t, K, V> {
    table: &'t Table<K, V>,
    raw: RawRange<'t>,
}

impl<'t, K, V> CursorRange<'t, K, V> {
    pub(crate) fn new(table: &'t Table<K, V>, raw: RawRange<'t>) -> Self {
        Self { table, raw }
    }

    /// Switch to raw views for the remainder of the scan.
    pub fn into_raw(self) -> RawRange<'t> {
        self.raw
    }
}

impl<K, V> Iterator for CursorRange<'_, K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.raw.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };
        Some(entry.key().and_then(|key| {
            let value = entry.value()?;
            Ok((
                self.table.decode_key(key)?,
                self.table.decode_value(key, value)?,
            ))
        }))
    }
}

#[cfg(test)]
mod tests {
    use crate::Environment;
    use refstore_core::{EnvironmentConfig, KeyRange, StringSerde, TableOptions};

    fn keys(range: impl Iterator<Item = refstore_core::Result<(String, String)>>) -> Vec<String> {
        range.map(|e| e.unwrap().0).collect()
    }

    #[test]
    fn test_raw_entries_go_stale_on_next_step() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::open(
            EnvironmentConfig::new(dir.path()).with_max_size_bytes(4 * 1024 * 1024),
        )
        .unwrap();
        let table = env
            .open_table("t", StringSerde::new(), StringSerde::new(), TableOptions::new())
            .unwrap();
        table
            .put_all(vec![("a".into(), "1".into()), ("b".into(), "2".into())])
            .unwrap();

        let txn = env.begin_read().unwrap();
        let mut scan = table.range_bytes(&txn, &KeyRange::all()).unwrap();
        let first = scan.next().unwrap().unwrap();
        assert_eq!(first.key().unwrap(), b"a");
        let kept = first.copy_out().unwrap();

        let second = scan.next().unwrap().unwrap();
        assert!(first.key().unwrap_err().is_stale_view());
        assert_eq!(second.value().unwrap(), b"2");
        assert_eq!(kept, (b"a".to_vec(), b"1".to_vec()));

        assert!(scan.next().is_none());
        assert!(scan.next().is_none());
    }

    #[test]
    fn test_exclusive_start_skips_all_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::open(
            EnvironmentConfig::new(dir.path()).with_max_size_bytes(4 * 1024 * 1024),
        )
        .unwrap();
        let table = env
            .open_table(
                "dups",
                StringSerde::new(),
                StringSerde::new(),
                TableOptions::new().with_duplicates(),
            )
            .unwrap();
        let mut txn = env.begin_write().unwrap();
        for (k, v) in [("a", "1"), ("b", "1"), ("b", "2"), ("c", "1")] {
            table.put(&mut txn, &k.into(), &v.into(), false).unwrap();
        }

        let found = keys(table.range(&txn, &KeyRange::greater_than("b".into())).unwrap());
        assert_eq!(found, vec!["c"]);
        let found = keys(table.range(&txn, &KeyRange::closed("b".into(), "b".into())).unwrap());
        assert_eq!(found, vec!["b", "b"]);
    }
}
