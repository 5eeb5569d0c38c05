//! Entry tuple encoding.
//!
//! ```text
//! [size:u16][attnum:u16][category:u8][kind:u8][key_len:u16][key][payload]
//! ```
//!
//! `size` covers the whole tuple. The payload depends on `kind`:
//! a child block (`u64`), a raw posting list (`count:u16` then 6-byte
//! pointers), a compressed posting list (`count:u16` then segments) or a
//! posting tree root block (`u64`).

use super::compare::NullCategory;
use super::posting;
use crate::primitives::bytes::buf::Cursor;
use crate::types::{GinError, HeapPointer, PageId, Result, HEAP_POINTER_LEN};

/// Fixed bytes preceding the key.
pub const ENTRY_TUPLE_HEADER_LEN: usize = 8;

/// Alignment applied to tuple storage on entry pages.
pub const MAXALIGN: usize = 8;

/// Rounds `len` up to [`MAXALIGN`].
pub const fn maxalign(len: usize) -> usize {
    (len + (MAXALIGN - 1)) & !(MAXALIGN - 1)
}

const KIND_DOWNLINK: u8 = 0;
const KIND_RAW_LIST: u8 = 1;
const KIND_COMPRESSED_LIST: u8 = 2;
const KIND_POSTING_TREE: u8 = 3;

/// Storage format of an inline posting list.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ListFormat {
    /// Consecutive 6-byte heap pointers.
    Raw,
    /// Segments produced by [`posting::encode`].
    Compressed,
}

/// Posting list stored inside a leaf tuple, kept encoded until validated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InlineList {
    /// Item count recorded in the tuple.
    pub declared: u16,
    /// How `bytes` is encoded.
    pub format: ListFormat,
    /// Encoded pointers.
    pub bytes: Vec<u8>,
}

impl InlineList {
    /// Encodes `items` in the given format.
    pub fn new(items: &[HeapPointer], format: ListFormat) -> Result<Self> {
        let declared =
            u16::try_from(items.len()).map_err(|_| GinError::Invalid("too many inline postings"))?;
        let bytes = match format {
            ListFormat::Raw => encode_raw(items),
            ListFormat::Compressed => posting::encode(items, posting::DEFAULT_SEGMENT_BYTES)?,
        };
        Ok(Self {
            declared,
            format,
            bytes,
        })
    }

    /// Decodes every stored pointer. The result may disagree with
    /// `declared`; callers compare the two.
    pub fn decode(&self) -> Result<Vec<HeapPointer>> {
        match self.format {
            ListFormat::Raw => {
                if self.bytes.len() % HEAP_POINTER_LEN != 0 {
                    return Err(GinError::Corruption("raw posting list has a partial pointer"));
                }
                self.bytes
                    .chunks_exact(HEAP_POINTER_LEN)
                    .map(HeapPointer::decode)
                    .collect()
            }
            ListFormat::Compressed => posting::decode(&self.bytes),
        }
    }
}

/// What an entry tuple points at.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PostingPayload {
    /// Internal tuple: child page bounded by this tuple's key.
    Downlink(PageId),
    /// Leaf tuple with its posting list stored inline.
    Inline(InlineList),
    /// Leaf tuple whose postings live in a separate posting tree.
    PostingTree(PageId),
}

/// Decoded entry tuple, owned and detached from any page buffer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntryTuple {
    /// 1-based indexed attribute.
    pub attnum: u16,
    /// Null category of the key.
    pub category: NullCategory,
    /// Key bytes, empty for non-`NotNull` categories.
    pub key: Vec<u8>,
    /// Payload.
    pub payload: PostingPayload,
}

impl EntryTuple {
    /// Internal tuple pointing at `child`.
    pub fn downlink(attnum: u16, category: NullCategory, key: Vec<u8>, child: PageId) -> Self {
        Self {
            attnum,
            category,
            key,
            payload: PostingPayload::Downlink(child),
        }
    }

    /// Leaf tuple with a raw inline posting list.
    ///
    /// The declared count saturates at `u16::MAX`.
    pub fn leaf(attnum: u16, category: NullCategory, key: Vec<u8>, items: Vec<HeapPointer>) -> Self {
        Self {
            attnum,
            category,
            key,
            payload: PostingPayload::Inline(InlineList {
                declared: items.len().min(u16::MAX as usize) as u16,
                format: ListFormat::Raw,
                bytes: encode_raw(&items),
            }),
        }
    }

    /// Child page of an internal tuple.
    pub fn child(&self) -> Option<PageId> {
        match self.payload {
            PostingPayload::Downlink(child) => Some(child),
            _ => None,
        }
    }

    /// Size of the encoded tuple.
    pub fn encoded_len(&self) -> usize {
        let payload = match &self.payload {
            PostingPayload::Downlink(_) | PostingPayload::PostingTree(_) => 8,
            PostingPayload::Inline(list) => 2 + list.bytes.len(),
        };
        ENTRY_TUPLE_HEADER_LEN + self.key.len() + payload
    }

    /// Serializes the tuple.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let size = u16::try_from(self.encoded_len())
            .map_err(|_| GinError::Invalid("entry tuple too large"))?;
        let key_len =
            u16::try_from(self.key.len()).map_err(|_| GinError::Invalid("entry key too large"))?;
        let mut out = Vec::with_capacity(size as usize);
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(&self.attnum.to_be_bytes());
        out.push(self.category.to_byte());
        match &self.payload {
            PostingPayload::Downlink(child) => {
                out.push(KIND_DOWNLINK);
                out.extend_from_slice(&key_len.to_be_bytes());
                out.extend_from_slice(&self.key);
                out.extend_from_slice(&child.0.to_be_bytes());
            }
            PostingPayload::Inline(list) => {
                out.push(match list.format {
                    ListFormat::Raw => KIND_RAW_LIST,
                    ListFormat::Compressed => KIND_COMPRESSED_LIST,
                });
                out.extend_from_slice(&key_len.to_be_bytes());
                out.extend_from_slice(&self.key);
                out.extend_from_slice(&list.declared.to_be_bytes());
                out.extend_from_slice(&list.bytes);
            }
            PostingPayload::PostingTree(root) => {
                out.push(KIND_POSTING_TREE);
                out.extend_from_slice(&key_len.to_be_bytes());
                out.extend_from_slice(&self.key);
                out.extend_from_slice(&root.0.to_be_bytes());
            }
        }
        Ok(out)
    }

    /// Decodes the tuple starting at `src[0]`, reading exactly its
    /// self-described size.
    pub fn decode(src: &[u8]) -> Result<Self> {
        let size = stored_size(src)? as usize;
        if size < ENTRY_TUPLE_HEADER_LEN {
            return Err(GinError::Corruption("entry tuple shorter than its header"));
        }
        let bytes = src
            .get(..size)
            .ok_or(GinError::Corruption("entry tuple extends past page"))?;
        let mut cursor = Cursor::new(bytes);
        cursor.take(2, "entry tuple truncated")?;
        let attnum = cursor.read_u16("entry tuple truncated")?;
        let category = NullCategory::from_byte(cursor.take(1, "entry tuple truncated")?[0])?;
        let kind = cursor.take(1, "entry tuple truncated")?[0];
        let key_len = cursor.read_u16("entry tuple truncated")? as usize;
        let key = cursor.take(key_len, "entry key extends past tuple")?.to_vec();
        let payload = match kind {
            KIND_DOWNLINK => PostingPayload::Downlink(read_block(&mut cursor)?),
            KIND_POSTING_TREE => PostingPayload::PostingTree(read_block(&mut cursor)?),
            KIND_RAW_LIST | KIND_COMPRESSED_LIST => {
                let declared = cursor.read_u16("posting count truncated")?;
                let rest = cursor.remaining();
                let bytes = cursor.take(rest, "entry tuple truncated")?.to_vec();
                let format = if kind == KIND_RAW_LIST {
                    ListFormat::Raw
                } else {
                    ListFormat::Compressed
                };
                PostingPayload::Inline(InlineList {
                    declared,
                    format,
                    bytes,
                })
            }
            _ => return Err(GinError::Corruption("unknown entry tuple payload kind")),
        };
        if cursor.remaining() != 0 {
            return Err(GinError::Corruption("entry tuple has trailing bytes"));
        }
        Ok(Self {
            attnum,
            category,
            key,
            payload,
        })
    }
}

/// Reads the self-described size of the tuple at `src[0]`.
pub fn stored_size(src: &[u8]) -> Result<u16> {
    Cursor::new(src).read_u16("entry tuple size truncated")
}

fn encode_raw(items: &[HeapPointer]) -> Vec<u8> {
    let mut bytes = vec![0u8; items.len() * HEAP_POINTER_LEN];
    for (chunk, item) in bytes.chunks_exact_mut(HEAP_POINTER_LEN).zip(items) {
        item.encode(chunk);
    }
    bytes
}

fn read_block(cursor: &mut Cursor<'_>) -> Result<PageId> {
    let raw = cursor.take(8, "block number truncated")?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(raw);
    Ok(PageId(u64::from_be_bytes(bytes)))
}
