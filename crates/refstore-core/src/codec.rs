//! Typed (de)serialization between Rust values and engine bytes.
//!
//! A [`Serde`] writes into a leased [`PooledBuffer`] and reads from a
//! borrowed engine slice. Key codecs must produce bytes whose order under the
//! table's comparator matches the intended key order: the integer codecs here
//! are big-endian for lexicographic tables and native-endian for
//! integer-key tables.

use crate::buffer_pool::PooledBuffer;
use crate::error::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Converts values of `T` to and from bytes.
pub trait Serde<T>: Send + Sync {
    /// Append the encoding of `value` at the buffer's position.
    fn serialize(&self, buffer: &mut PooledBuffer, value: &T) -> Result<(), CodecError>;

    /// Decode a value from exactly `bytes`.
    fn deserialize(&self, bytes: &[u8]) -> Result<T, CodecError>;

    /// Largest encoding this codec can produce, if bounded.
    ///
    /// Tables size their pooled buffers from this; unbounded codecs fall back
    /// to the environment's configured value capacity.
    fn capacity(&self) -> Option<usize> {
        None
    }
}

/// Lowercase hex rendering used for key context in errors and dumps.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// UTF-8 strings, optionally bounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerde {
    capacity: Option<usize>,
}

impl StringSerde {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound encodings to `capacity` bytes; longer strings fail with a
    /// capacity error.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
        }
    }
}

impl Serde<String> for StringSerde {
    fn serialize(&self, buffer: &mut PooledBuffer, value: &String) -> Result<(), CodecError> {
        if let Some(capacity) = self.capacity {
            if value.len() > capacity {
                return Err(CodecError::Capacity {
                    needed: value.len(),
                    available: capacity,
                });
            }
        }
        buffer.put_slice(value.as_bytes())?;
        Ok(())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String, CodecError> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| CodecError::invalid(format!("invalid utf-8: {e}")))
    }

    fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

/// Raw bytes, stored as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerde;

impl Serde<Vec<u8>> for BytesSerde {
    fn serialize(&self, buffer: &mut PooledBuffer, value: &Vec<u8>) -> Result<(), CodecError> {
        buffer.put_slice(value)?;
        Ok(())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N], CodecError> {
    bytes.try_into().map_err(|_| {
        CodecError::invalid(format!(
            "expected {N} bytes for {what}, got {}",
            bytes.len()
        ))
    })
}

/// `u32` as 4 big-endian bytes; sorts numerically under byte comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct U32Serde;

impl Serde<u32> for U32Serde {
    fn serialize(&self, buffer: &mut PooledBuffer, value: &u32) -> Result<(), CodecError> {
        Ok(buffer.put_u32(*value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(fixed(bytes, "u32")?))
    }

    fn capacity(&self) -> Option<usize> {
        Some(4)
    }
}

/// `u64` as 8 big-endian bytes; sorts numerically under byte comparison.
#[derive(Debug, Clone, Copy, Default)]
pub struct U64Serde;

impl Serde<u64> for U64Serde {
    fn serialize(&self, buffer: &mut PooledBuffer, value: &u64) -> Result<(), CodecError> {
        Ok(buffer.put_u64(*value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(fixed(bytes, "u64")?))
    }

    fn capacity(&self) -> Option<usize> {
        Some(8)
    }
}

/// `u32` in native byte order, for integer-key tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeU32Serde;

impl Serde<u32> for NativeU32Serde {
    fn serialize(&self, buffer: &mut PooledBuffer, value: &u32) -> Result<(), CodecError> {
        Ok(buffer.put_u32_ne(*value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<u32, CodecError> {
        Ok(u32::from_ne_bytes(fixed(bytes, "native u32")?))
    }

    fn capacity(&self) -> Option<usize> {
        Some(4)
    }
}

/// `u64` in native byte order, for integer-key tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeU64Serde;

impl Serde<u64> for NativeU64Serde {
    fn serialize(&self, buffer: &mut PooledBuffer, value: &u64) -> Result<(), CodecError> {
        Ok(buffer.put_u64_ne(*value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<u64, CodecError> {
        Ok(u64::from_ne_bytes(fixed(bytes, "native u64")?))
    }

    fn capacity(&self) -> Option<usize> {
        Some(8)
    }
}

/// Any serde type as JSON. Unbounded; not suitable for ordered keys.
pub struct JsonSerde<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerde<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSerde<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonSerde<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonSerde<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonSerde")
    }
}

impl<T> Serde<T> for JsonSerde<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, buffer: &mut PooledBuffer, value: &T) -> Result<(), CodecError> {
        let bytes = serde_json::to_vec(value).map_err(|e| CodecError::invalid(e.to_string()))?;
        buffer.put_slice(&bytes)?;
        Ok(())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::invalid(e.to_string()))
    }
}
