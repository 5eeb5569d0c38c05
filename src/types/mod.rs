#![forbid(unsafe_code)]
//! Identifiers, the low-level error type and on-disk primitives shared by the
//! pager and the GIN page format.

use std::fmt;

pub mod checksum;
pub mod page;

pub use checksum::page_crc32;

/// Block number of a page inside an index file. Block 0 is always the metapage,
/// so a zero link doubles as "no page".
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);

/// Log sequence number stamped on a page by its last writer.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Lsn(pub u64);

/// 1-based position of an item on a page.
pub type OffsetNumber = u16;

/// First valid item position on any page.
pub const FIRST_OFFSET: OffsetNumber = 1;

/// Number of low bits used for the offset when a heap pointer is packed into
/// an integer for delta compression.
pub const HEAP_OFFSET_BITS: u32 = 11;

/// Largest offset a heap pointer may carry.
pub const MAX_HEAP_OFFSET: u16 = (1 << HEAP_OFFSET_BITS) - 1;

/// Encoded width of a [`HeapPointer`].
pub const HEAP_POINTER_LEN: usize = 6;

/// Reference to a row in the base table: `(block, offset)`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct HeapPointer {
    /// Heap block number.
    pub block: u32,
    /// Line pointer offset within the heap block.
    pub offset: u16,
}

impl HeapPointer {
    /// Builds a pointer from its parts.
    pub const fn new(block: u32, offset: u16) -> Self {
        Self { block, offset }
    }

    /// A pointer is usable when neither half is zero and the offset fits the
    /// per-page maximum.
    pub fn is_valid(&self) -> bool {
        self.block != 0 && self.offset != 0 && self.offset <= MAX_HEAP_OFFSET
    }

    /// Packs the pointer into an order-preserving integer.
    pub fn to_packed(self) -> u64 {
        ((self.block as u64) << HEAP_OFFSET_BITS) | self.offset as u64
    }

    /// Inverse of [`HeapPointer::to_packed`].
    pub fn from_packed(value: u64) -> Result<Self> {
        let block = value >> HEAP_OFFSET_BITS;
        let block =
            u32::try_from(block).map_err(|_| GinError::Corruption("heap block exceeds u32"))?;
        let offset = (value & MAX_HEAP_OFFSET as u64) as u16;
        Ok(Self { block, offset })
    }

    /// Writes the 6-byte big-endian form into `dst`.
    pub fn encode(&self, dst: &mut [u8]) {
        dst[..4].copy_from_slice(&self.block.to_be_bytes());
        dst[4..HEAP_POINTER_LEN].copy_from_slice(&self.offset.to_be_bytes());
    }

    /// Reads the 6-byte big-endian form from `src`.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < HEAP_POINTER_LEN {
            return Err(GinError::Corruption("heap pointer truncated"));
        }
        let block = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        let offset = u16::from_be_bytes([src[4], src[5]]);
        Ok(Self { block, offset })
    }
}

/// Low-level failures raised while reading pages and decoding their contents.
#[derive(thiserror::Error, Debug)]
pub enum GinError {
    /// Underlying file I/O failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Bytes on a page do not decode into the expected structure.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an argument the operation cannot honor.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The requested page lies beyond the end of the store.
    #[error("page {0} not found")]
    NotFound(PageId),
}

/// Result alias used by the storage layers.
pub type Result<T> = std::result::Result<T, GinError>;

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for HeapPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.block, self.offset)
    }
}

impl From<u64> for PageId {
    fn from(value: u64) -> Self {
        PageId(value)
    }
}

impl From<PageId> for u64 {
    fn from(value: PageId) -> Self {
        value.0
    }
}
