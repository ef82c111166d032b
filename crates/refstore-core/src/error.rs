use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Codec error in table '{table}'{}: {message}", fmt_key(.key))]
    Codec {
        table: String,
        key: Option<String>,
        message: String,
    },

    #[error("Buffer too small in table '{table}': needed {needed} bytes, capacity {available}")]
    Capacity {
        table: String,
        needed: usize,
        available: usize,
    },

    #[error("Integer key width mismatch in table '{table}': expected {expected} bytes, got {actual}")]
    KeyWidth {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Integrity error in table '{table}' for key {key}: {message}")]
    Integrity {
        table: String,
        key: String,
        message: String,
    },

    #[error("Stale view: issued at generation {issued}, transaction is at generation {current}")]
    StaleView { issued: u64, current: u64 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Engine error during {op}{}: {message}", fmt_table(.table))]
    Engine {
        op: &'static str,
        table: Option<String>,
        message: String,
    },

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

fn fmt_key(key: &Option<String>) -> String {
    key.as_ref()
        .map(|k| format!(" (key {k})"))
        .unwrap_or_default()
}

fn fmt_table(table: &Option<String>) -> String {
    table
        .as_ref()
        .map(|t| format!(" on table '{t}'"))
        .unwrap_or_default()
}

impl StoreError {
    /// True for the error kinds a caller may resolve by waiting or by
    /// shortening other transactions (reader slots, writer lock, map size).
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, StoreError::ResourceExhausted(_))
    }

    pub fn is_stale_view(&self) -> bool {
        matches!(self, StoreError::StaleView { .. })
    }
}

/// Failure raised by a [`Serde`](crate::codec::Serde) implementation.
///
/// Codecs know nothing about tables, so the table layer lifts these into
/// [`StoreError::Codec`] or [`StoreError::Capacity`] with context attached.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("{0}")]
    Invalid(String),

    #[error("needed {needed} bytes, capacity {available}")]
    Capacity { needed: usize, available: usize },
}

impl CodecError {
    pub fn invalid(message: impl Into<String>) -> Self {
        CodecError::Invalid(message.into())
    }

    /// Attach table (and, where known, key) context.
    pub fn into_store_error(self, table: &str, key: Option<String>) -> StoreError {
        match self {
            CodecError::Invalid(message) => StoreError::Codec {
                table: table.to_string(),
                key,
                message,
            },
            CodecError::Capacity { needed, available } => StoreError::Capacity {
                table: table.to_string(),
                needed,
                available,
            },
        }
    }
}

/// A write past the limit of a pooled buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("buffer overflow: needed {needed} bytes, {available} remaining")]
pub struct BufferOverflow {
    pub needed: usize,
    pub available: usize,
}

impl From<BufferOverflow> for CodecError {
    fn from(err: BufferOverflow) -> Self {
        CodecError::Capacity {
            needed: err.needed,
            available: err.available,
        }
    }
}
