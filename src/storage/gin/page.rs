//! GIN page layout on top of the common page header.
//!
//! ```text
//! [common header: 32][opaque: 32][items ... free ... tuples]
//! ```
//!
//! Entry pages keep a line pointer array growing up from the opaque area and
//! tuples growing down from the end of the page. Data pages (posting trees)
//! store fixed-size posting items on internal pages and heap pointers on
//! leaves, either raw or as compressed segments.

use crate::types::{
    page::{stamp_crc32, PageHeader, PageKind, PAGE_HDR_LEN},
    GinError, HeapPointer, Lsn, OffsetNumber, PageId, Result, HEAP_POINTER_LEN,
};

use super::posting;
use super::tuple::{maxalign, ENTRY_TUPLE_HEADER_LEN};

/// Bytes of the GIN opaque area following the common header.
pub const GIN_OPAQUE_LEN: usize = 32;

/// First byte available for items.
pub const CONTENT_START: usize = PAGE_HDR_LEN + GIN_OPAQUE_LEN;

/// Encoded width of a [`LinePointer`].
pub const LINE_POINTER_LEN: usize = 4;

/// Encoded width of a [`PostingItem`].
pub const POSTING_ITEM_LEN: usize = HEAP_POINTER_LEN + 8;

/// Smallest storage any entry tuple can take, used for the capacity bound.
pub const MIN_ENTRY_TUPLE_SPACE: usize = maxalign(ENTRY_TUPLE_HEADER_LEN + 1);

/// Block of the entry tree root.
pub const ROOT_BLOCK: PageId = PageId(1);

const FLAGS_OFFSET: usize = PAGE_HDR_LEN;
const MAXOFF_OFFSET: usize = PAGE_HDR_LEN + 2;
const FREE_START_OFFSET: usize = PAGE_HDR_LEN + 4;
const FREE_END_OFFSET: usize = PAGE_HDR_LEN + 6;
const RIGHT_LINK_OFFSET: usize = PAGE_HDR_LEN + 8;
const LSN_OFFSET: usize = PAGE_HDR_LEN + 16;
const RIGHT_BOUND_OFFSET: usize = PAGE_HDR_LEN + 24;

/// Page flag bits stored in the opaque area.
pub mod flags {
    /// Page has no children.
    pub const LEAF: u16 = 0x0001;
    /// Page was unlinked by vacuum.
    pub const DELETED: u16 = 0x0002;
    /// Posting tree leaf holding compressed segments.
    pub const COMPRESSED: u16 = 0x0004;
    /// Every defined bit.
    pub const ALL: u16 = LEAF | DELETED | COMPRESSED;
}

/// Decoded opaque area.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Opaque {
    /// Flag bits, see [`flags`].
    pub flags: u16,
    /// Number of items on the page.
    pub max_offset: u16,
    /// End of the item array.
    pub free_start: u16,
    /// Start of tuple storage.
    pub free_end: u16,
    /// Right sibling, `None` on the rightmost page of a level.
    pub right_link: Option<PageId>,
    /// LSN of the last change.
    pub lsn: Lsn,
    /// Highest heap pointer a posting tree page may hold.
    pub right_bound: HeapPointer,
}

impl Opaque {
    /// Empty opaque area for a fresh page of `page_size` bytes.
    pub fn empty(flags: u16, page_size: usize) -> Self {
        Self {
            flags,
            max_offset: 0,
            free_start: CONTENT_START as u16,
            free_end: page_size.min(u16::MAX as usize) as u16,
            right_link: None,
            lsn: Lsn(0),
            right_bound: HeapPointer::default(),
        }
    }

    /// Reads the opaque area of `page`.
    pub fn decode(page: &[u8]) -> Result<Self> {
        if page.len() < CONTENT_START {
            return Err(GinError::Corruption("page too small for GIN opaque area"));
        }
        let flags = read_u16(page, FLAGS_OFFSET);
        if flags & !flags::ALL != 0 {
            return Err(GinError::Corruption("unknown GIN page flags"));
        }
        let right_link = match read_u64(page, RIGHT_LINK_OFFSET) {
            0 => None,
            block => Some(PageId(block)),
        };
        Ok(Self {
            flags,
            max_offset: read_u16(page, MAXOFF_OFFSET),
            free_start: read_u16(page, FREE_START_OFFSET),
            free_end: read_u16(page, FREE_END_OFFSET),
            right_link,
            lsn: Lsn(read_u64(page, LSN_OFFSET)),
            right_bound: HeapPointer::decode(
                &page[RIGHT_BOUND_OFFSET..RIGHT_BOUND_OFFSET + HEAP_POINTER_LEN],
            )?,
        })
    }

    /// Writes the opaque area into `page`.
    pub fn encode(&self, page: &mut [u8]) -> Result<()> {
        if page.len() < CONTENT_START {
            return Err(GinError::Invalid("page too small for GIN opaque area"));
        }
        page[FLAGS_OFFSET..FLAGS_OFFSET + 2].copy_from_slice(&self.flags.to_be_bytes());
        page[MAXOFF_OFFSET..MAXOFF_OFFSET + 2].copy_from_slice(&self.max_offset.to_be_bytes());
        page[FREE_START_OFFSET..FREE_START_OFFSET + 2]
            .copy_from_slice(&self.free_start.to_be_bytes());
        page[FREE_END_OFFSET..FREE_END_OFFSET + 2].copy_from_slice(&self.free_end.to_be_bytes());
        let link = self.right_link.map_or(0, |id| id.0);
        page[RIGHT_LINK_OFFSET..RIGHT_LINK_OFFSET + 8].copy_from_slice(&link.to_be_bytes());
        page[LSN_OFFSET..LSN_OFFSET + 8].copy_from_slice(&self.lsn.0.to_be_bytes());
        self.right_bound
            .encode(&mut page[RIGHT_BOUND_OFFSET..RIGHT_BOUND_OFFSET + HEAP_POINTER_LEN]);
        page[RIGHT_BOUND_OFFSET + HEAP_POINTER_LEN..CONTENT_START].fill(0);
        Ok(())
    }
}

/// State bits of a line pointer.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LinePointerFlags {
    /// Slot not in use.
    Unused = 0,
    /// Slot holds a tuple.
    Normal = 1,
    /// Slot forwards to another slot.
    Redirect = 2,
    /// Slot holds a dead tuple that still has storage.
    Dead = 3,
}

impl LinePointerFlags {
    fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => Self::Unused,
            1 => Self::Normal,
            2 => Self::Redirect,
            _ => Self::Dead,
        }
    }
}

/// Entry page slot: 15-bit offset, 2-bit flags, 15-bit length.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LinePointer {
    /// Byte offset of the tuple within the page.
    pub off: u16,
    /// Slot state.
    pub flags: LinePointerFlags,
    /// Stored tuple length.
    pub len: u16,
}

impl LinePointer {
    /// A normal slot.
    pub fn normal(off: u16, len: u16) -> Self {
        Self {
            off,
            flags: LinePointerFlags::Normal,
            len,
        }
    }

    /// Packs the slot into its 32-bit form.
    pub fn to_bits(self) -> u32 {
        ((self.off as u32 & 0x7fff) << 17) | ((self.flags as u32) << 15) | (self.len as u32 & 0x7fff)
    }

    /// Unpacks a 32-bit slot.
    pub fn from_bits(bits: u32) -> Self {
        Self {
            off: ((bits >> 17) & 0x7fff) as u16,
            flags: LinePointerFlags::from_bits(bits >> 15),
            len: (bits & 0x7fff) as u16,
        }
    }
}

/// Internal posting tree entry: child page and the highest pointer it covers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PostingItem {
    /// Upper bound of the child's heap pointers.
    pub key: HeapPointer,
    /// Child block.
    pub child: PageId,
}

impl PostingItem {
    fn encode(&self, dst: &mut [u8]) {
        self.key.encode(&mut dst[..HEAP_POINTER_LEN]);
        dst[HEAP_POINTER_LEN..POSTING_ITEM_LEN].copy_from_slice(&self.child.0.to_be_bytes());
    }

    fn decode(src: &[u8]) -> Result<Self> {
        let key = HeapPointer::decode(src)?;
        let child = src
            .get(HEAP_POINTER_LEN..POSTING_ITEM_LEN)
            .ok_or(GinError::Corruption("posting item truncated"))?;
        Ok(Self {
            key,
            child: PageId(read_u64(child, 0)),
        })
    }
}

/// Read-only view over a GIN page image.
#[derive(Clone, Copy, Debug)]
pub struct GinPage<'a> {
    data: &'a [u8],
    kind: PageKind,
    opaque: Opaque,
}

impl<'a> GinPage<'a> {
    /// Parses the common header and opaque area of a tree page.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = PageHeader::decode(data)?;
        if header.kind == PageKind::Meta {
            return Err(GinError::Corruption("metapage where a tree page was expected"));
        }
        let opaque = Opaque::decode(data)?;
        let len = data.len();
        let free_start = opaque.free_start as usize;
        let free_end = opaque.free_end as usize;
        if free_start < CONTENT_START || free_start > free_end || free_end > len {
            return Err(GinError::Corruption("GIN page free space pointers out of range"));
        }
        Ok(Self {
            data,
            kind: header.kind,
            opaque,
        })
    }

    /// Rebuilds a view from parts returned by an earlier [`GinPage::parse`]
    /// of the same bytes.
    pub(crate) fn from_parts(data: &'a [u8], kind: PageKind, opaque: Opaque) -> Self {
        Self { data, kind, opaque }
    }

    /// Raw page bytes.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Page kind from the common header.
    pub fn kind(&self) -> PageKind {
        self.kind
    }

    /// Decoded opaque area.
    pub fn opaque(&self) -> &Opaque {
        &self.opaque
    }

    /// True for leaf pages.
    pub fn is_leaf(&self) -> bool {
        self.opaque.flags & flags::LEAF != 0
    }

    /// True for posting tree pages.
    pub fn is_data(&self) -> bool {
        self.kind == PageKind::Data
    }

    /// True for pages unlinked by vacuum.
    pub fn is_deleted(&self) -> bool {
        self.opaque.flags & flags::DELETED != 0
    }

    /// True for posting tree leaves in compressed form.
    pub fn is_compressed(&self) -> bool {
        self.opaque.flags & flags::COMPRESSED != 0
    }

    /// True when the page has no right sibling.
    pub fn is_rightmost(&self) -> bool {
        self.opaque.right_link.is_none()
    }

    /// Right sibling.
    pub fn right_link(&self) -> Option<PageId> {
        self.opaque.right_link
    }

    /// Number of items recorded on the page.
    pub fn max_offset(&self) -> OffsetNumber {
        self.opaque.max_offset
    }

    /// Page LSN.
    pub fn lsn(&self) -> Lsn {
        self.opaque.lsn
    }

    /// Highest heap pointer this posting tree page covers.
    pub fn right_bound(&self) -> HeapPointer {
        self.opaque.right_bound
    }

    /// Most items a page of this shape can hold.
    pub fn max_item_capacity(&self) -> usize {
        item_capacity(self.data.len(), self.kind, self.opaque.flags)
    }

    /// Line pointer of item `offset` (1-based) on an entry page.
    pub fn line_pointer(&self, offset: OffsetNumber) -> Result<LinePointer> {
        let idx = item_index(offset)?;
        let pos = CONTENT_START + idx * LINE_POINTER_LEN;
        if pos + LINE_POINTER_LEN > self.opaque.free_start as usize {
            return Err(GinError::Corruption("line pointer beyond line pointer array"));
        }
        Ok(LinePointer::from_bits(read_u32(self.data, pos)))
    }

    /// Posting item `offset` (1-based) on an internal data page.
    pub fn posting_item(&self, offset: OffsetNumber) -> Result<PostingItem> {
        let idx = item_index(offset)?;
        let pos = CONTENT_START + idx * POSTING_ITEM_LEN;
        if pos + POSTING_ITEM_LEN > self.opaque.free_start as usize {
            return Err(GinError::Corruption("posting item beyond item array"));
        }
        PostingItem::decode(&self.data[pos..pos + POSTING_ITEM_LEN])
    }

    /// Every heap pointer on a data leaf. For compressed pages the decoded
    /// count may differ from [`GinPage::max_offset`]; callers compare.
    pub fn heap_pointers(&self) -> Result<Vec<HeapPointer>> {
        let area = &self.data[CONTENT_START..self.opaque.free_start as usize];
        if self.is_compressed() {
            return posting::decode(area);
        }
        let count = self.opaque.max_offset as usize;
        let bytes = area
            .get(..count * HEAP_POINTER_LEN)
            .ok_or(GinError::Corruption("heap pointers beyond item array"))?;
        bytes
            .chunks_exact(HEAP_POINTER_LEN)
            .map(HeapPointer::decode)
            .collect()
    }
}

/// Capacity bound for a page of the given size, kind and flags.
pub fn item_capacity(page_size: usize, kind: PageKind, page_flags: u16) -> usize {
    let space = page_size.saturating_sub(CONTENT_START);
    match kind {
        PageKind::Meta => 0,
        PageKind::Entry => space / (LINE_POINTER_LEN + MIN_ENTRY_TUPLE_SPACE),
        PageKind::Data if page_flags & flags::LEAF == 0 => space / POSTING_ITEM_LEN,
        // Every compressed item costs at least one byte.
        PageKind::Data if page_flags & flags::COMPRESSED != 0 => space,
        PageKind::Data => space / HEAP_POINTER_LEN,
    }
}

/// Assembles a GIN page image.
#[derive(Debug)]
pub struct PageBuilder {
    id: PageId,
    kind: PageKind,
    buf: Vec<u8>,
    opaque: Opaque,
}

impl PageBuilder {
    /// Starts an empty entry page.
    pub fn entry(id: PageId, page_size: u32, salt: u64, page_flags: u16) -> Result<Self> {
        Self::new(id, PageKind::Entry, page_size, salt, page_flags)
    }

    /// Starts an empty posting tree page.
    pub fn data(id: PageId, page_size: u32, salt: u64, page_flags: u16) -> Result<Self> {
        Self::new(id, PageKind::Data, page_size, salt, page_flags)
    }

    fn new(id: PageId, kind: PageKind, page_size: u32, salt: u64, page_flags: u16) -> Result<Self> {
        let header = PageHeader::new(id, kind, page_size, salt)?;
        if (page_size as usize) < CONTENT_START + MIN_ENTRY_TUPLE_SPACE {
            return Err(GinError::Invalid("page size too small for GIN pages"));
        }
        let mut buf = vec![0u8; page_size as usize];
        header.encode(&mut buf)?;
        Ok(Self {
            id,
            kind,
            buf,
            opaque: Opaque::empty(page_flags, page_size as usize),
        })
    }

    /// Block this page is built for.
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Kind of page being built.
    pub fn kind(&self) -> PageKind {
        self.kind
    }

    /// Bytes left between the item array and tuple storage.
    pub fn free_space(&self) -> usize {
        (self.opaque.free_end - self.opaque.free_start) as usize
    }

    /// True when an encoded tuple of `len` bytes still fits.
    pub fn fits_tuple(&self, len: usize) -> bool {
        LINE_POINTER_LEN + maxalign(len) <= self.free_space()
    }

    /// Appends an encoded entry tuple and returns its offset number.
    pub fn add_tuple(&mut self, tuple: &[u8]) -> Result<OffsetNumber> {
        if self.kind != PageKind::Entry {
            return Err(GinError::Invalid("tuples belong on entry pages"));
        }
        if !self.fits_tuple(tuple.len()) {
            return Err(GinError::Invalid("entry page full"));
        }
        let len = u16::try_from(tuple.len()).map_err(|_| GinError::Invalid("tuple too large"))?;
        let start = self.opaque.free_end as usize - maxalign(tuple.len());
        self.buf[start..start + tuple.len()].copy_from_slice(tuple);
        let slot = self.opaque.free_start as usize;
        let lp = LinePointer::normal(start as u16, len);
        self.buf[slot..slot + LINE_POINTER_LEN].copy_from_slice(&lp.to_bits().to_be_bytes());
        self.opaque.free_start += LINE_POINTER_LEN as u16;
        self.opaque.free_end = start as u16;
        self.opaque.max_offset += 1;
        Ok(self.opaque.max_offset)
    }

    /// Appends a posting item to an internal data page.
    pub fn add_posting_item(&mut self, item: PostingItem) -> Result<()> {
        if self.kind != PageKind::Data || self.opaque.flags & flags::LEAF != 0 {
            return Err(GinError::Invalid("posting items belong on internal data pages"));
        }
        if POSTING_ITEM_LEN > self.free_space() {
            return Err(GinError::Invalid("data page full"));
        }
        let pos = self.opaque.free_start as usize;
        item.encode(&mut self.buf[pos..pos + POSTING_ITEM_LEN]);
        self.opaque.free_start += POSTING_ITEM_LEN as u16;
        self.opaque.max_offset += 1;
        Ok(())
    }

    /// Stores the heap pointers of a data leaf, compressed when the page
    /// carries [`flags::COMPRESSED`].
    pub fn set_heap_pointers(&mut self, items: &[HeapPointer]) -> Result<()> {
        if self.kind != PageKind::Data || self.opaque.flags & flags::LEAF == 0 {
            return Err(GinError::Invalid("heap pointers belong on data leaves"));
        }
        let bytes = if self.opaque.flags & flags::COMPRESSED != 0 {
            posting::encode(items, posting::DEFAULT_SEGMENT_BYTES)?
        } else {
            let mut raw = vec![0u8; items.len() * HEAP_POINTER_LEN];
            for (chunk, item) in raw.chunks_exact_mut(HEAP_POINTER_LEN).zip(items) {
                item.encode(chunk);
            }
            raw
        };
        let room = self.opaque.free_end as usize - CONTENT_START;
        if bytes.len() > room {
            return Err(GinError::Invalid("data leaf full"));
        }
        self.buf[CONTENT_START..CONTENT_START + bytes.len()].copy_from_slice(&bytes);
        self.opaque.free_start = (CONTENT_START + bytes.len()) as u16;
        self.opaque.max_offset =
            u16::try_from(items.len()).map_err(|_| GinError::Invalid("too many heap pointers"))?;
        Ok(())
    }

    /// Sets the right sibling.
    pub fn set_right_link(&mut self, link: Option<PageId>) {
        self.opaque.right_link = link;
    }

    /// Sets the page LSN.
    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.opaque.lsn = lsn;
    }

    /// Sets the right bound of a posting tree page.
    pub fn set_right_bound(&mut self, bound: HeapPointer) {
        self.opaque.right_bound = bound;
    }

    /// Writes the opaque area, stamps the checksum and returns the image.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        self.opaque.encode(&mut self.buf)?;
        stamp_crc32(&mut self.buf)?;
        Ok(self.buf)
    }
}

fn item_index(offset: OffsetNumber) -> Result<usize> {
    (offset as usize)
        .checked_sub(1)
        .ok_or(GinError::Corruption("offset number zero"))
}

fn read_u16(src: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([src[at], src[at + 1]])
}

fn read_u32(src: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]])
}

fn read_u64(src: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&src[at..at + 8]);
    u64::from_be_bytes(bytes)
}
