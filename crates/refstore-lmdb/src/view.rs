//! Zero-copy views of engine memory.
//!
//! A [`RawView`] borrows bytes straight out of the memory map. The borrow
//! ties it to its transaction; the generation stamp additionally fails it
//! with `StaleView` once any later lookup or cursor step runs on that
//! transaction. Use [`RawView::copy_out`] to keep the bytes longer.

use refstore_core::{Result, StoreError};
use std::cell::Cell;
use std::fmt;

#[derive(Clone, Copy)]
pub struct RawView<'txn> {
    bytes: &'txn [u8],
    issued: u64,
    generation: &'txn Cell<u64>,
}

impl<'txn> RawView<'txn> {
    pub(crate) fn new(bytes: &'txn [u8], generation: &'txn Cell<u64>) -> Self {
        Self {
            bytes,
            issued: generation.get(),
            generation,
        }
    }

    /// The viewed bytes, if no cursor-moving call has happened since issue.
    pub fn bytes(&self) -> Result<&[u8]> {
        let current = self.generation.get();
        if current != self.issued {
            return Err(StoreError::StaleView {
                issued: self.issued,
                current,
            });
        }
        Ok(self.bytes)
    }

    /// Owned copy of the bytes, subject to the same staleness check.
    pub fn copy_out(&self) -> Result<Vec<u8>> {
        self.bytes().map(<[u8]>::to_vec)
    }

    pub fn is_valid(&self) -> bool {
        self.generation.get() == self.issued
    }

    /// Generation the view was issued at.
    pub fn generation(&self) -> u64 {
        self.issued
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for RawView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawView")
            .field("len", &self.bytes.len())
            .field("issued", &self.issued)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// A key/value pair yielded by a raw scan. Both halves share a stamp.
#[derive(Debug, Clone, Copy)]
pub struct RawEntry<'txn> {
    key: RawView<'txn>,
    value: RawView<'txn>,
}

impl<'txn> RawEntry<'txn> {
    pub(crate) fn new(key: RawView<'txn>, value: RawView<'txn>) -> Self {
        Self { key, value }
    }

    pub fn key(&self) -> Result<&[u8]> {
        self.key.bytes()
    }

    pub fn value(&self) -> Result<&[u8]> {
        self.value.bytes()
    }

    pub fn key_view(&self) -> RawView<'txn> {
        self.key
    }

    pub fn value_view(&self) -> RawView<'txn> {
        self.value
    }

    /// Owned copies of key and value.
    pub fn copy_out(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        Ok((self.key.copy_out()?, self.value.copy_out()?))
    }
}
