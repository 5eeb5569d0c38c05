//! Shared on-disk page metadata used by pager components.

use core::convert::{TryFrom, TryInto};

use super::{GinError, PageId, Result};

/// Magic bytes opening every page.
pub const PAGE_MAGIC: [u8; 4] = *b"GINX";
/// Current page format version.
pub const PAGE_FORMAT_VERSION: u16 = 1;
/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: u32 = 8192;
/// Largest page size line pointers can address (15-bit offsets).
pub const MAX_PAGE_SIZE: u32 = 32768;
/// Length of the common page header.
pub const PAGE_HDR_LEN: usize = 32;

pub mod header {
    //! Byte offsets for fixed header fields.
    use core::ops::Range;

    /// Magic bytes.
    pub const MAGIC: Range<usize> = 0..4;
    /// Format version.
    pub const FORMAT_VERSION: Range<usize> = 4..6;
    /// Page kind byte.
    pub const PAGE_KIND: usize = 6;
    /// Must be zero.
    pub const RESERVED: usize = 7;
    /// Page size in bytes.
    pub const PAGE_SIZE: Range<usize> = 8..12;
    /// Block number the page was written to.
    pub const PAGE_NO: Range<usize> = 12..20;
    /// Per-index salt mixed into the checksum.
    pub const SALT: Range<usize> = 20..28;
    /// CRC32 over the page body.
    pub const CRC32: Range<usize> = 28..32;
}

/// What a page stores.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageKind {
    /// Block 0: index metadata.
    Meta = 1,
    /// Entry tree page holding line-pointer addressed entry tuples.
    Entry = 2,
    /// Posting tree page holding posting items or heap pointers.
    Data = 3,
}

impl PageKind {
    /// Raw byte stored in the header.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PageKind {
    type Error = GinError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PageKind::Meta),
            2 => Ok(PageKind::Entry),
            3 => Ok(PageKind::Data),
            _ => Err(GinError::Corruption("unknown page kind")),
        }
    }
}

/// Decoded common page header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PageHeader {
    /// Format version.
    pub format_version: u16,
    /// Page kind.
    pub kind: PageKind,
    /// Page size in bytes.
    pub page_size: u32,
    /// Block number recorded at write time.
    pub page_no: PageId,
    /// Checksum salt.
    pub salt: u64,
    /// Stored checksum.
    pub crc32: u32,
}

impl PageHeader {
    /// Creates a header with a zero checksum.
    pub fn new(page_no: PageId, kind: PageKind, page_size: u32, salt: u64) -> Result<Self> {
        if (page_size as usize) < PAGE_HDR_LEN {
            return Err(GinError::Invalid("page size smaller than header"));
        }
        if page_size > MAX_PAGE_SIZE {
            return Err(GinError::Invalid("page size above maximum"));
        }
        Ok(Self {
            format_version: PAGE_FORMAT_VERSION,
            kind,
            page_size,
            page_no,
            salt,
            crc32: 0,
        })
    }

    /// Returns the header with `crc32` set.
    pub fn with_crc32(mut self, crc32: u32) -> Self {
        self.crc32 = crc32;
        self
    }

    /// Writes the header into the first [`PAGE_HDR_LEN`] bytes of `dst`.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() < PAGE_HDR_LEN {
            return Err(GinError::Invalid("page header buffer too small"));
        }
        let hdr = &mut dst[..PAGE_HDR_LEN];
        hdr[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
        hdr[header::FORMAT_VERSION].copy_from_slice(&self.format_version.to_be_bytes());
        hdr[header::PAGE_KIND] = self.kind.as_u8();
        hdr[header::RESERVED] = 0;
        hdr[header::PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
        hdr[header::PAGE_NO].copy_from_slice(&self.page_no.0.to_be_bytes());
        hdr[header::SALT].copy_from_slice(&self.salt.to_be_bytes());
        hdr[header::CRC32].copy_from_slice(&self.crc32.to_be_bytes());
        Ok(())
    }

    /// Parses and validates the header at the start of `src`.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < PAGE_HDR_LEN {
            return Err(GinError::Corruption("page header truncated"));
        }
        let hdr = &src[..PAGE_HDR_LEN];
        if hdr[header::MAGIC] != PAGE_MAGIC {
            return Err(GinError::Corruption("invalid page magic"));
        }
        let format_version = u16::from_be_bytes(read_array(hdr, header::FORMAT_VERSION.start)?);
        if format_version != PAGE_FORMAT_VERSION {
            return Err(GinError::Corruption("unsupported page format version"));
        }
        if hdr[header::RESERVED] != 0 {
            return Err(GinError::Corruption("page header reserved byte not zero"));
        }
        let kind = PageKind::try_from(hdr[header::PAGE_KIND])?;
        let page_size = u32::from_be_bytes(read_array(hdr, header::PAGE_SIZE.start)?);
        if (page_size as usize) < PAGE_HDR_LEN || page_size > MAX_PAGE_SIZE {
            return Err(GinError::Corruption("page size out of range"));
        }
        let page_no = PageId(u64::from_be_bytes(read_array(hdr, header::PAGE_NO.start)?));
        let salt = u64::from_be_bytes(read_array(hdr, header::SALT.start)?);
        let crc32 = u32::from_be_bytes(read_array(hdr, header::CRC32.start)?);
        Ok(Self {
            format_version,
            kind,
            page_size,
            page_no,
            salt,
            crc32,
        })
    }
}

/// Zeroes the checksum field of an encoded header.
pub fn clear_crc32(buf: &mut [u8]) -> Result<()> {
    if buf.len() < header::CRC32.end {
        return Err(GinError::Invalid("page header buffer too small"));
    }
    buf[header::CRC32].fill(0);
    Ok(())
}

/// Recomputes the body checksum of `page` and stores it in the header.
pub fn stamp_crc32(page: &mut [u8]) -> Result<()> {
    let hdr = PageHeader::decode(page)?;
    let crc = super::page_crc32(hdr.page_no.0, hdr.salt, &page[PAGE_HDR_LEN..]);
    page[header::CRC32].copy_from_slice(&crc.to_be_bytes());
    Ok(())
}

fn read_array<const N: usize>(src: &[u8], at: usize) -> Result<[u8; N]> {
    src.get(at..at + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(GinError::Corruption("page header truncated"))
}
