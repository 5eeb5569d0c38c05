use smallvec::SmallVec;

use super::compare::{KeyComparator, KeyType};
use crate::primitives::bytes::buf::Cursor;
use crate::types::{
    page::{stamp_crc32, PageHeader, PageKind, PAGE_HDR_LEN},
    GinError, PageId, Result,
};

/// Block holding the metapage.
pub const META_BLOCK: PageId = PageId(0);

const META_VERSION: u16 = 1;

/// Index-wide metadata stored in block 0.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GinMeta {
    /// Salt mixed into every page checksum of the index.
    pub salt: u64,
    /// Key type per indexed attribute, attribute 1 first.
    pub key_types: SmallVec<[KeyType; 4]>,
    /// Entry tree pages written by the builder.
    pub entry_pages: u64,
    /// Posting tree pages written by the builder.
    pub data_pages: u64,
    /// Distinct entries stored.
    pub entries: u64,
}

impl GinMeta {
    /// Comparator for this index's attributes.
    pub fn comparator(&self) -> KeyComparator {
        KeyComparator::new(self.key_types.iter().copied())
    }

    /// Renders the metapage image.
    pub fn encode(&self, page_size: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; page_size as usize];
        PageHeader::new(META_BLOCK, PageKind::Meta, page_size, self.salt)?.encode(&mut buf)?;
        let nattrs = u16::try_from(self.key_types.len())
            .map_err(|_| GinError::Invalid("too many indexed attributes"))?;
        let mut body = Vec::with_capacity(28 + self.key_types.len());
        body.extend_from_slice(&META_VERSION.to_be_bytes());
        body.extend_from_slice(&nattrs.to_be_bytes());
        body.extend_from_slice(&self.entry_pages.to_be_bytes());
        body.extend_from_slice(&self.data_pages.to_be_bytes());
        body.extend_from_slice(&self.entries.to_be_bytes());
        body.extend(self.key_types.iter().map(|t| t.as_u8()));
        let dst = buf
            .get_mut(PAGE_HDR_LEN..PAGE_HDR_LEN + body.len())
            .ok_or(GinError::Invalid("metapage does not fit the page size"))?;
        dst.copy_from_slice(&body);
        stamp_crc32(&mut buf)?;
        Ok(buf)
    }

    /// Parses a metapage image.
    pub fn decode(page: &[u8]) -> Result<Self> {
        let header = PageHeader::decode(page)?;
        if header.kind != PageKind::Meta {
            return Err(GinError::Corruption("block 0 is not a metapage"));
        }
        let mut cursor = Cursor::new(&page[PAGE_HDR_LEN..]);
        let version = cursor.read_u16("metapage truncated")?;
        if version != META_VERSION {
            return Err(GinError::Corruption("unsupported metapage version"));
        }
        let nattrs = cursor.read_u16("metapage truncated")?;
        let entry_pages = read_u64(&mut cursor)?;
        let data_pages = read_u64(&mut cursor)?;
        let entries = read_u64(&mut cursor)?;
        if nattrs == 0 {
            return Err(GinError::Corruption("metapage lists no attributes"));
        }
        let key_types = cursor
            .take(nattrs as usize, "metapage attribute list truncated")?
            .iter()
            .map(|&b| KeyType::try_from(b))
            .collect::<Result<SmallVec<_>>>()?;
        Ok(Self {
            salt: header.salt,
            key_types,
            entry_pages,
            data_pages,
            entries,
        })
    }
}

fn read_u64(cursor: &mut Cursor<'_>) -> Result<u64> {
    let raw = cursor.take(8, "metapage truncated")?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(raw);
    Ok(u64::from_be_bytes(bytes))
}
