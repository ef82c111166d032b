//! Thin wrappers over the few `lmdb-sys` calls the safe bindings do not
//! expose.

use libc::{c_int, c_void};
use lmdb::{Database, Environment};
use lmdb_sys::{MDB_envinfo, MDB_stat, MDB_txn, MDB_val};
use std::cmp::Ordering;
use std::mem::MaybeUninit;

fn check(rc: c_int) -> Result<(), lmdb::Error> {
    if rc == 0 {
        Ok(())
    } else {
        Err(lmdb::Error::from_err_code(rc))
    }
}

fn as_val(bytes: &[u8]) -> MDB_val {
    MDB_val {
        mv_size: bytes.len(),
        mv_data: bytes.as_ptr() as *mut c_void,
    }
}

/// Compare two keys with the table's own comparator.
///
/// `txn` must be a live transaction of the environment that owns `db`.
pub(crate) fn compare_keys(txn: *mut MDB_txn, db: Database, a: &[u8], b: &[u8]) -> Ordering {
    let a = as_val(a);
    let b = as_val(b);
    // SAFETY: callers pass the pointer of a transaction they borrow for the
    // duration of the call; mdb_cmp only reads the two values.
    let rc = unsafe { lmdb_sys::mdb_cmp(txn, db.dbi(), &a, &b) };
    rc.cmp(&0)
}

/// B-tree statistics for one table as seen by `txn`.
pub(crate) fn table_stat(txn: *mut MDB_txn, db: Database) -> Result<MDB_stat, lmdb::Error> {
    let mut stat = MaybeUninit::<MDB_stat>::uninit();
    // SAFETY: `txn` is live (see compare_keys) and mdb_stat fully initialises
    // `stat` when it returns 0.
    unsafe {
        check(lmdb_sys::mdb_stat(txn, db.dbi(), stat.as_mut_ptr()))?;
        Ok(stat.assume_init())
    }
}

pub(crate) struct RawEnvInfo {
    pub map_size: usize,
    pub last_page: usize,
    pub last_txn_id: usize,
    pub max_readers: u32,
    pub num_readers: u32,
}

pub(crate) fn env_info(env: &Environment) -> Result<RawEnvInfo, lmdb::Error> {
    let mut info = MaybeUninit::<MDB_envinfo>::uninit();
    // SAFETY: the environment handle is open for the lifetime of `env` and
    // mdb_env_info fully initialises `info` when it returns 0.
    let info = unsafe {
        check(lmdb_sys::mdb_env_info(env.env(), info.as_mut_ptr()))?;
        info.assume_init()
    };
    Ok(RawEnvInfo {
        map_size: info.me_mapsize,
        last_page: info.me_last_pgno,
        last_txn_id: info.me_last_txnid,
        max_readers: info.me_maxreaders,
        num_readers: info.me_numreaders,
    })
}

/// Largest key the engine accepts (511 bytes in a default LMDB build).
pub(crate) fn max_key_size(env: &Environment) -> usize {
    // SAFETY: reads a compile-time constant of the library through an open
    // environment handle.
    let size = unsafe { lmdb_sys::mdb_env_get_maxkeysize(env.env()) };
    size.max(0) as usize
}

pub(crate) fn txn_id(txn: *mut MDB_txn) -> u64 {
    // SAFETY: `txn` is live (see compare_keys).
    unsafe { lmdb_sys::mdb_txn_id(txn) as u64 }
}

/// Clear stale entries left in the reader table by dead processes or
/// threads; returns how many were cleared.
pub(crate) fn reader_check(env: &Environment) -> Result<usize, lmdb::Error> {
    let mut dead: c_int = 0;
    // SAFETY: the environment handle is open for the lifetime of `env`.
    unsafe { check(lmdb_sys::mdb_reader_check(env.env(), &mut dead))? };
    Ok(dead.max(0) as usize)
}
