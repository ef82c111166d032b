use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// Per-table flags fixed when a table is first created
///
/// Reopening an existing table must use the same options.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TableOptions {
    /// Allow several values per key (LMDB `DUP_SORT`)
    #[serde(default)]
    pub allow_duplicates: bool,

    /// Order keys as native fixed-width integers (LMDB `INTEGER_KEY`)
    ///
    /// Every key must then be exactly 4 or 8 bytes, one width per table.
    #[serde(default)]
    pub integer_key: bool,

    /// Compare keys from the last byte backwards (LMDB `REVERSE_KEY`)
    #[serde(default)]
    pub reverse_key: bool,
}

impl TableOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duplicates(mut self) -> Self {
        self.allow_duplicates = true;
        self
    }

    pub fn with_integer_key(mut self) -> Self {
        self.integer_key = true;
        self
    }

    pub fn with_reverse_key(mut self) -> Self {
        self.reverse_key = true;
        self
    }

    /// Integer and reverse ordering are mutually exclusive.
    pub fn validate(&self) -> Result<()> {
        if self.integer_key && self.reverse_key {
            return Err(StoreError::Config(
                "integer_key and reverse_key cannot both be set".into(),
            ));
        }
        Ok(())
    }
}
