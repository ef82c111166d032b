use crate::env::EnvShared;
use crate::error::engine_error;
use crate::ffi;
use crate::write_gate::WriterTicket;
use lmdb::{Database, RoCursor, RoTransaction, RwTransaction, Transaction};
use lmdb_sys::MDB_txn;
use refstore_core::{observe, CommitInfo, Result, StoreError, TxnMode};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::SemaphorePermit;
use tracing::{debug, trace};

enum RawTxn<'env> {
    Read(RoTransaction<'env>),
    Write(RwTransaction<'env>),
}

/// A read or write transaction on an [`Environment`](crate::Environment).
///
/// Committing or aborting consumes the transaction; dropping an active one
/// aborts it. Transactions are bound to the thread that opened them.
///
/// Every lookup and cursor step advances the transaction's generation,
/// which invalidates [`RawView`](crate::RawView)s issued before it.
pub struct Txn<'env> {
    // Declared first so the engine transaction ends before the slot or
    // writer ticket is handed back.
    raw: Option<RawTxn<'env>>,
    env: &'env EnvShared,
    mode: TxnMode,
    generation: Cell<u64>,
    writes: Cell<u64>,
    skipped_writes: Cell<u64>,
    /// Integer key widths first stored by this transaction, published on
    /// commit.
    key_widths: RefCell<Vec<(Arc<AtomicUsize>, usize)>>,
    started: Instant,
    _slot: Option<SemaphorePermit<'env>>,
    _writer: Option<WriterTicket<'env>>,
}

impl<'env> Txn<'env> {
    pub(crate) fn begin_read(env: &'env EnvShared, slot: SemaphorePermit<'env>) -> Result<Self> {
        let txn = env
            .env
            .begin_ro_txn()
            .map_err(|e| engine_error(e, "begin read", None))?;
        trace!("read transaction started");
        Ok(Self::new(env, RawTxn::Read(txn), Some(slot), None))
    }

    pub(crate) fn begin_write(env: &'env EnvShared, ticket: WriterTicket<'env>) -> Result<Self> {
        let txn = env
            .env
            .begin_rw_txn()
            .map_err(|e| engine_error(e, "begin write", None))?;
        trace!("write transaction started");
        Ok(Self::new(env, RawTxn::Write(txn), None, Some(ticket)))
    }

    fn new(
        env: &'env EnvShared,
        raw: RawTxn<'env>,
        slot: Option<SemaphorePermit<'env>>,
        writer: Option<WriterTicket<'env>>,
    ) -> Self {
        let mode = match raw {
            RawTxn::Read(_) => TxnMode::Read,
            RawTxn::Write(_) => TxnMode::Write,
        };
        Self {
            raw: Some(raw),
            env,
            mode,
            generation: Cell::new(0),
            writes: Cell::new(0),
            skipped_writes: Cell::new(0),
            key_widths: RefCell::new(Vec::new()),
            started: Instant::now(),
            _slot: slot,
            _writer: writer,
        }
    }

    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == TxnMode::Read
    }

    /// Engine transaction id (the snapshot a read transaction sees).
    pub fn id(&self) -> Result<u64> {
        Ok(ffi::txn_id(self.raw_ptr()?))
    }

    /// Number of cursor-moving calls made so far.
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    /// Engine writes performed by this transaction.
    pub fn write_count(&self) -> u64 {
        self.writes.get()
    }

    /// Writes `update_value` skipped because the bytes were unchanged.
    pub fn skipped_write_count(&self) -> u64 {
        self.skipped_writes.get()
    }

    /// Commit and end the transaction.
    pub fn commit(mut self) -> Result<CommitInfo> {
        let raw = self.raw.take().ok_or_else(already_ended)?;
        let info = CommitInfo {
            writes: self.writes.get(),
            skipped_writes: self.skipped_writes.get(),
            duration_micros: self.started.elapsed().as_micros() as u64,
        };
        match raw {
            RawTxn::Read(txn) => {
                txn.commit().map_err(|e| engine_error(e, "commit", None))?;
            }
            RawTxn::Write(txn) => {
                txn.commit().map_err(|e| engine_error(e, "commit", None))?;
                for (width, len) in self.key_widths.take() {
                    width.store(len, Ordering::Release);
                }
                observe::record_commit(self.started.elapsed(), info.writes);
                debug!(
                    writes = info.writes,
                    skipped = info.skipped_writes,
                    micros = info.duration_micros,
                    "write transaction committed"
                );
            }
        }
        Ok(info)
    }

    /// Discard all changes and end the transaction.
    pub fn abort(self) {
        drop(self);
    }

    pub(crate) fn env(&self) -> &'env EnvShared {
        self.env
    }

    /// Advance the generation, returning the new value.
    pub(crate) fn advance(&self) -> u64 {
        let next = self.generation.get() + 1;
        self.generation.set(next);
        next
    }

    pub(crate) fn generation_cell(&self) -> &Cell<u64> {
        &self.generation
    }

    pub(crate) fn record_write(&self) {
        self.writes.set(self.writes.get() + 1);
    }

    pub(crate) fn record_skipped_write(&self) {
        self.skipped_writes.set(self.skipped_writes.get() + 1);
    }

    pub(crate) fn stage_key_width(&self, width: &Arc<AtomicUsize>, len: usize) {
        let mut staged = self.key_widths.borrow_mut();
        match staged.iter_mut().find(|(w, _)| Arc::ptr_eq(w, width)) {
            Some(entry) => entry.1 = len,
            None => staged.push((Arc::clone(width), len)),
        }
    }

    pub(crate) fn raw_ptr(&self) -> Result<*mut MDB_txn> {
        Ok(match self.raw()? {
            RawTxn::Read(txn) => txn.txn(),
            RawTxn::Write(txn) => txn.txn(),
        })
    }

    /// Point lookup; `Ok(None)` when absent.
    pub(crate) fn get_raw(&self, db: Database, key: &[u8], table: &str) -> Result<Option<&[u8]>> {
        let found = match self.raw()? {
            RawTxn::Read(txn) => txn.get(db, &key),
            RawTxn::Write(txn) => txn.get(db, &key),
        };
        match found {
            Ok(bytes) => Ok(Some(bytes)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(engine_error(e, "get", Some(table))),
        }
    }

    pub(crate) fn ro_cursor(&self, db: Database, table: &str) -> Result<RoCursor<'_>> {
        match self.raw()? {
            RawTxn::Read(txn) => txn.open_ro_cursor(db),
            RawTxn::Write(txn) => txn.open_ro_cursor(db),
        }
        .map_err(|e| engine_error(e, "open cursor", Some(table)))
    }

    /// The underlying write transaction, or `InvalidState` on a read
    /// transaction.
    pub(crate) fn writer(&mut self, op: &str) -> Result<&mut RwTransaction<'env>> {
        match self.raw.as_mut() {
            Some(RawTxn::Write(txn)) => Ok(txn),
            Some(RawTxn::Read(_)) => Err(StoreError::InvalidState(format!(
                "{op} requires a write transaction"
            ))),
            None => Err(already_ended()),
        }
    }

    fn raw(&self) -> Result<&RawTxn<'env>> {
        self.raw.as_ref().ok_or_else(already_ended)
    }
}

fn already_ended() -> StoreError {
    StoreError::InvalidState("transaction already ended".into())
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            if let RawTxn::Write(_) = raw {
                observe::record_abort();
                debug!(writes = self.writes.get(), "write transaction aborted");
            }
            drop(raw);
        }
    }
}

impl fmt::Debug for Txn<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Txn")
            .field("mode", &self.mode)
            .field("generation", &self.generation.get())
            .field("writes", &self.writes.get())
            .field("active", &self.raw.is_some())
            .finish()
    }
}
