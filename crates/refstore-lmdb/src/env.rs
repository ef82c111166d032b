use crate::error::engine_error;
use crate::ffi;
use crate::read_pool::ReaderSlots;
use crate::table::Table;
use crate::txn::Txn;
use crate::write_gate::WriteGate;
use lmdb::{Cursor, Database, DatabaseFlags, EnvironmentFlags, Transaction};
use parking_lot::Mutex;
use refstore_core::{
    BufferPool, EnvInfo, EnvironmentConfig, Result, Serde, StoreError, SyncMode, TableOptions,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Registry record for a table opened through this environment.
#[derive(Clone)]
pub(crate) struct TableEntry {
    pub(crate) db: Database,
    pub(crate) options: TableOptions,
    /// Integer key width of the last committed data, 0 while unknown.
    pub(crate) key_width: Arc<AtomicUsize>,
}

pub(crate) struct EnvShared {
    pub(crate) env: lmdb::Environment,
    pub(crate) config: EnvironmentConfig,
    pub(crate) readers: ReaderSlots,
    pub(crate) write_gate: WriteGate,
    pub(crate) pool: BufferPool,
    pub(crate) max_key_size: usize,
    tables: Mutex<HashMap<String, TableEntry>>,
    closed: AtomicBool,
}

impl EnvShared {
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::InvalidState(format!(
                "environment {} is closed",
                self.config.path.display()
            )));
        }
        Ok(())
    }

    pub(crate) fn begin_read_timeout(&self, timeout: Duration) -> Result<Txn<'_>> {
        self.ensure_open()?;
        let slot = self.readers.acquire_blocking(timeout)?;
        Txn::begin_read(self, slot)
    }

    pub(crate) fn begin_write(&self) -> Result<Txn<'_>> {
        self.ensure_open()?;
        let ticket = self.write_gate.acquire()?;
        Txn::begin_write(self, ticket)
    }

    fn create_table(&self, name: &str, options: TableOptions) -> Result<TableEntry> {
        let mut flags = DatabaseFlags::empty();
        if options.allow_duplicates {
            flags.insert(DatabaseFlags::DUP_SORT);
        }
        if options.integer_key {
            flags.insert(DatabaseFlags::INTEGER_KEY);
        }
        if options.reverse_key {
            flags.insert(DatabaseFlags::REVERSE_KEY);
        }

        let map_err = |e| engine_error(e, "open table", Some(name));
        let txn = self.env.begin_rw_txn().map_err(map_err)?;
        // SAFETY: the caller holds the write gate, so no other transaction in
        // this environment is opening a table concurrently.
        let db = unsafe { txn.create_db(Some(name), flags) }.map_err(map_err)?;

        let persistent =
            DatabaseFlags::DUP_SORT | DatabaseFlags::INTEGER_KEY | DatabaseFlags::REVERSE_KEY;
        let stored = txn.db_flags(db).map_err(map_err)? & persistent;
        if stored != flags {
            return Err(StoreError::Config(format!(
                "table '{name}' exists with flags {stored:?}, requested {flags:?}"
            )));
        }

        let mut width = 0;
        if options.integer_key {
            let cursor = txn.open_ro_cursor(db).map_err(map_err)?;
            if let Ok((Some(key), _)) = cursor.get(None, None, lmdb_sys::MDB_FIRST) {
                width = key.len();
            }
        }
        txn.commit().map_err(map_err)?;

        debug!(table = name, ?options, "table opened");
        Ok(TableEntry {
            db,
            options,
            key_width: Arc::new(AtomicUsize::new(width)),
        })
    }
}

/// An open LMDB environment: one directory, one memory map, many tables.
///
/// Cheap to clone; clones share the same engine handle, buffer pool and
/// reader slots.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvShared>,
}

impl Environment {
    /// Open (creating if needed) the environment described by `config`.
    pub fn open(config: EnvironmentConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.path).map_err(|e| {
            StoreError::Environment(format!("cannot create {}: {e}", config.path.display()))
        })?;

        let mut builder = lmdb::Environment::new();
        builder.set_max_dbs(config.max_tables);
        builder.set_map_size(config.max_size_bytes);
        builder.set_max_readers(config.max_readers);

        let mut flags = EnvironmentFlags::empty();
        match config.sync_mode {
            SyncMode::Full => {}
            SyncMode::NoMetaSync => flags.insert(EnvironmentFlags::NO_META_SYNC),
            SyncMode::NoSync => flags.insert(EnvironmentFlags::NO_SYNC),
        }
        if config.thread_unconstrained {
            flags.insert(EnvironmentFlags::NO_TLS);
        }
        builder.set_flags(flags);

        let env = builder.open(&config.path).map_err(|e| {
            StoreError::Environment(format!("cannot open {}: {e}", config.path.display()))
        })?;

        let cleared = ffi::reader_check(&env).map_err(|e| engine_error(e, "reader check", None))?;
        let max_key_size = ffi::max_key_size(&env);

        info!(
            path = %config.path.display(),
            max_size_bytes = config.max_size_bytes,
            max_tables = config.max_tables,
            max_readers = config.max_readers,
            stale_readers_cleared = cleared,
            "environment opened"
        );

        Ok(Self {
            inner: Arc::new(EnvShared {
                readers: ReaderSlots::new(
                    config.max_readers,
                    Duration::from_millis(config.reader_acquire_timeout_ms),
                ),
                write_gate: WriteGate::new(config.writer_acquire_timeout_ms.map(Duration::from_millis)),
                pool: BufferPool::new(config.buffer_pool.clone()),
                env,
                max_key_size,
                config,
                tables: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Open with default settings apart from the three engine limits.
    pub fn open_with_limits(
        path: impl Into<PathBuf>,
        max_size_bytes: usize,
        max_tables: u32,
        max_readers: u32,
    ) -> Result<Self> {
        Self::open(
            EnvironmentConfig::new(path)
                .with_max_size_bytes(max_size_bytes)
                .with_max_tables(max_tables)
                .with_max_readers(max_readers),
        )
    }

    /// Create the named table, or bind to it if it already exists.
    ///
    /// Reopening a name with different options is a `Config` error.
    pub fn open_table<K, V>(
        &self,
        name: &str,
        key_serde: impl Serde<K> + 'static,
        value_serde: impl Serde<V> + 'static,
        options: TableOptions,
    ) -> Result<Table<K, V>>
    where
        K: 'static,
        V: 'static,
    {
        let shared = self.shared()?;
        options.validate()?;
        if name.is_empty() {
            return Err(StoreError::Config("table name must not be empty".into()));
        }

        let entry = match self.registered(name, options)? {
            Some(entry) => entry,
            None => {
                // Gate before registry, the order every writer follows.
                let _ticket = shared.write_gate.acquire()?;
                match self.registered(name, options)? {
                    Some(entry) => entry,
                    None => {
                        let entry = shared.create_table(name, options)?;
                        shared.tables.lock().insert(name.to_string(), entry.clone());
                        entry
                    }
                }
            }
        };

        Ok(Table::new(
            Arc::clone(&self.inner),
            name,
            entry,
            Box::new(key_serde),
            Box::new(value_serde),
        ))
    }

    fn registered(&self, name: &str, options: TableOptions) -> Result<Option<TableEntry>> {
        match self.inner.tables.lock().get(name) {
            Some(entry) if entry.options != options => Err(StoreError::Config(format!(
                "table '{name}' already open with {:?}, requested {options:?}",
                entry.options
            ))),
            Some(entry) => Ok(Some(entry.clone())),
            None => Ok(None),
        }
    }

    /// Begin a read transaction, waiting up to the configured reader timeout
    /// for a free slot.
    pub fn begin_read(&self) -> Result<Txn<'_>> {
        self.inner
            .begin_read_timeout(self.inner.readers.default_timeout())
    }

    /// Begin a read transaction, waiting at most `timeout` for a slot.
    pub fn begin_read_timeout(&self, timeout: Duration) -> Result<Txn<'_>> {
        self.inner.begin_read_timeout(timeout)
    }

    /// Begin a read transaction only if a slot is free right now.
    pub fn try_begin_read(&self) -> Result<Option<Txn<'_>>> {
        let shared = self.shared()?;
        match shared.readers.try_acquire() {
            Some(slot) => Txn::begin_read(shared, slot).map(Some),
            None => Ok(None),
        }
    }

    /// Await a reader slot (up to the configured timeout), then begin.
    pub async fn begin_read_async(&self) -> Result<Txn<'_>> {
        let shared = self.shared()?;
        let slot = shared
            .readers
            .acquire(shared.readers.default_timeout())
            .await?;
        Txn::begin_read(shared, slot)
    }

    /// Begin the write transaction.
    ///
    /// Fails immediately if this thread already holds it; otherwise blocks,
    /// bounded by the configured writer timeout when one is set.
    pub fn begin_write(&self) -> Result<Txn<'_>> {
        self.inner.begin_write()
    }

    /// Run `f` in a read transaction.
    pub fn with_read_txn<R>(&self, f: impl FnOnce(&Txn<'_>) -> Result<R>) -> Result<R> {
        let txn = self.begin_read()?;
        let result = f(&txn)?;
        txn.commit()?;
        Ok(result)
    }

    /// Run `f` in a write transaction: commit on `Ok`, abort on `Err`.
    pub fn with_write_txn<R>(&self, f: impl FnOnce(&mut Txn<'_>) -> Result<R>) -> Result<R> {
        let mut txn = self.begin_write()?;
        match f(&mut txn) {
            Ok(result) => {
                txn.commit()?;
                Ok(result)
            }
            Err(e) => {
                txn.abort();
                Err(e)
            }
        }
    }

    pub fn info(&self) -> Result<EnvInfo> {
        let shared = self.shared()?;
        let raw = ffi::env_info(&shared.env).map_err(|e| engine_error(e, "env info", None))?;
        Ok(EnvInfo {
            map_size: raw.map_size,
            last_page: raw.last_page as u64,
            last_txn_id: raw.last_txn_id as u64,
            max_readers: raw.max_readers,
            num_readers: raw.num_readers,
            max_key_size: shared.max_key_size,
        })
    }

    /// Flush to disk; `force` syncs even under a relaxed sync mode.
    pub fn sync(&self, force: bool) -> Result<()> {
        self.shared()?
            .env
            .sync(force)
            .map_err(|e| engine_error(e, "sync", None))
    }

    /// Clear reader table entries left by dead threads or processes.
    pub fn reader_check(&self) -> Result<usize> {
        ffi::reader_check(&self.shared()?.env).map_err(|e| engine_error(e, "reader check", None))
    }

    /// Names of the tables opened through this environment, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.tables.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn available_reader_slots(&self) -> usize {
        self.inner.readers.available()
    }

    pub fn max_readers(&self) -> usize {
        self.inner.readers.capacity()
    }

    /// Largest key the engine accepts, in bytes.
    pub fn max_key_size(&self) -> usize {
        self.inner.max_key_size
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.inner.pool
    }

    pub fn path(&self) -> &Path {
        &self.inner.config.path
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.inner.config
    }

    /// Flush and close this environment.
    ///
    /// Tables still holding the environment fail their self-transacting
    /// helpers with `InvalidState` afterwards; the engine handle itself is
    /// released when the last of them is dropped.
    pub fn close(self) -> Result<()> {
        self.inner.ensure_open()?;
        let synced = self.inner.env.sync(true);
        self.inner.closed.store(true, Ordering::Release);
        synced.map_err(|e| engine_error(e, "close", None))?;
        info!(path = %self.inner.config.path.display(), "environment closed");
        Ok(())
    }

    fn shared(&self) -> Result<&EnvShared> {
        self.inner.ensure_open()?;
        Ok(&self.inner)
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("path", &self.inner.config.path)
            .field("tables", &self.table_names())
            .finish()
    }
}
