//! Key ordering for entry tuples.

use std::cmp::Ordering;
use std::fmt;

use smallvec::SmallVec;

use super::tuple::EntryTuple;
use crate::primitives::bytes::ord;
use crate::types::{GinError, Result};

/// How the keys of one indexed attribute are stored and ordered.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// Signed 64-bit integers in order-preserving big-endian form.
    Int64 = 1,
    /// UTF-8 text compared bytewise.
    Text = 2,
    /// Opaque bytes compared lexicographically.
    Bytes = 3,
}

impl KeyType {
    /// Raw byte recorded in the metapage.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for KeyType {
    type Error = GinError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(KeyType::Int64),
            2 => Ok(KeyType::Text),
            3 => Ok(KeyType::Bytes),
            _ => Err(GinError::Corruption("unknown attribute key type")),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyType::Int64 => "int64",
            KeyType::Text => "text",
            KeyType::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// Classification of an entry key relative to ordinary values.
///
/// Categories order by rank; only two `NotNull` keys look at the key bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum NullCategory {
    /// Placeholder produced by queries with no keys; sorts before everything.
    EmptyQuery,
    /// An ordinary value.
    NotNull,
    /// A null key extracted from a non-null item.
    NullKey,
    /// Marks an item that produced no keys.
    EmptyItem,
    /// Marks a null item.
    NullItem,
}

impl NullCategory {
    /// Sort rank of the category.
    pub const fn rank(self) -> i8 {
        match self {
            NullCategory::EmptyQuery => -1,
            NullCategory::NotNull => 0,
            NullCategory::NullKey => 1,
            NullCategory::EmptyItem => 2,
            NullCategory::NullItem => 3,
        }
    }

    /// On-disk byte: the rank as a two's complement `u8`.
    pub const fn to_byte(self) -> u8 {
        self.rank() as u8
    }

    /// Inverse of [`NullCategory::to_byte`].
    pub fn from_byte(value: u8) -> Result<Self> {
        match value as i8 {
            -1 => Ok(NullCategory::EmptyQuery),
            0 => Ok(NullCategory::NotNull),
            1 => Ok(NullCategory::NullKey),
            2 => Ok(NullCategory::EmptyItem),
            3 => Ok(NullCategory::NullItem),
            _ => Err(GinError::Corruption("unknown null category")),
        }
    }
}

/// Anything carrying an attribute number, a null category and key bytes.
pub trait EntryKey {
    /// 1-based attribute number.
    fn attnum(&self) -> u16;
    /// Null category of the key.
    fn category(&self) -> NullCategory;
    /// Key bytes.
    fn key(&self) -> &[u8];
}

impl EntryKey for EntryTuple {
    fn attnum(&self) -> u16 {
        self.attnum
    }

    fn category(&self) -> NullCategory {
        self.category
    }

    fn key(&self) -> &[u8] {
        &self.key
    }
}

/// Compares entry keys using the key types recorded for each attribute.
#[derive(Clone, Debug)]
pub struct KeyComparator {
    key_types: SmallVec<[KeyType; 4]>,
}

impl KeyComparator {
    /// Builds a comparator; attribute `n` (1-based) uses `key_types[n - 1]`.
    pub fn new(key_types: impl IntoIterator<Item = KeyType>) -> Self {
        Self {
            key_types: key_types.into_iter().collect(),
        }
    }

    /// Number of indexed attributes.
    pub fn attribute_count(&self) -> usize {
        self.key_types.len()
    }

    /// Key type of attribute `attnum`.
    pub fn key_type(&self, attnum: u16) -> Result<KeyType> {
        usize::from(attnum)
            .checked_sub(1)
            .and_then(|idx| self.key_types.get(idx))
            .copied()
            .ok_or(GinError::Corruption("attribute number out of range"))
    }

    /// Orders two keys of attribute `attnum`.
    pub fn compare_keys(
        &self,
        attnum: u16,
        a: &[u8],
        cat_a: NullCategory,
        b: &[u8],
        cat_b: NullCategory,
    ) -> Result<Ordering> {
        if cat_a != cat_b {
            return Ok(cat_a.rank().cmp(&cat_b.rank()));
        }
        if cat_a != NullCategory::NotNull {
            return Ok(Ordering::Equal);
        }
        match self.key_type(attnum)? {
            KeyType::Int64 => {
                let x = ord::get_i64_be(a).ok_or(GinError::Corruption("int64 key is not 8 bytes"))?;
                let y = ord::get_i64_be(b).ok_or(GinError::Corruption("int64 key is not 8 bytes"))?;
                Ok(x.cmp(&y))
            }
            KeyType::Text => {
                let x = std::str::from_utf8(a)
                    .map_err(|_| GinError::Corruption("text key is not valid UTF-8"))?;
                let y = std::str::from_utf8(b)
                    .map_err(|_| GinError::Corruption("text key is not valid UTF-8"))?;
                Ok(x.as_bytes().cmp(y.as_bytes()))
            }
            KeyType::Bytes => Ok(a.cmp(b)),
        }
    }

    /// Orders two entries: attribute number first, then key.
    pub fn compare_entries<A, B>(&self, a: &A, b: &B) -> Result<Ordering>
    where
        A: EntryKey + ?Sized,
        B: EntryKey + ?Sized,
    {
        match a.attnum().cmp(&b.attnum()) {
            Ordering::Equal => {
                self.compare_keys(a.attnum(), a.key(), a.category(), b.key(), b.category())
            }
            other => {
                // Both attribute numbers must exist even when they decide the order.
                self.key_type(a.attnum())?;
                self.key_type(b.attnum())?;
                Ok(other)
            }
        }
    }
}

/// Encodes an `i64` key in the order-preserving form used by [`KeyType::Int64`].
pub fn int64_key(value: i64) -> Vec<u8> {
    let mut buf = vec![0u8; 8];
    ord::put_i64_be(&mut buf, value);
    buf
}
