use serde::{Deserialize, Serialize};

/// Result of a `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PutOutcome {
    /// The key (or key/value pair on duplicate-key tables) was new.
    Inserted,
    /// An existing entry was overwritten.
    Replaced,
    /// The entry already existed and `overwrite` was false; nothing changed.
    Duplicate,
}

impl PutOutcome {
    /// True when the value is now stored.
    pub fn is_success(self) -> bool {
        !matches!(self, PutOutcome::Duplicate)
    }

    /// True when an entry for the key already existed.
    pub fn is_duplicate(self) -> bool {
        !matches!(self, PutOutcome::Inserted)
    }
}

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxnMode {
    Read,
    Write,
}

/// Information about a committed transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Engine writes performed (puts and deletes that changed the table)
    pub writes: u64,

    /// Writes `update_value` skipped because the bytes were unchanged
    pub skipped_writes: u64,

    /// Wall time from begin to commit, in microseconds
    pub duration_micros: u64,
}

/// Engine statistics for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub entries: u64,
    pub depth: u32,
    pub page_size: u32,
    pub branch_pages: u64,
    pub leaf_pages: u64,
    pub overflow_pages: u64,
}

/// Engine statistics for an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvInfo {
    /// Size of the memory map in bytes
    pub map_size: usize,

    /// Last page number used in the file
    pub last_page: u64,

    /// Id of the last committed transaction
    pub last_txn_id: u64,

    /// Reader slot limit configured in the engine
    pub max_readers: u32,

    /// Reader slots currently in use according to the engine lock file
    pub num_readers: u32,

    /// Largest key the engine accepts, in bytes
    pub max_key_size: usize,
}
