#![forbid(unsafe_code)]

//! On-disk GIN index format.
//!
//! Block 0 holds the [`GinMeta`] metapage and block 1 the entry tree root.
//! Entry tree leaves map `(attribute, key)` to an inline posting list or to
//! the root of a posting tree whose leaves store heap pointers.

pub mod build;
pub mod compare;
pub mod meta;
pub mod page;
pub mod posting;
pub mod tuple;

pub use build::{build_index, BuildOptions, BuildSummary, IndexEntry};
pub use compare::{int64_key, EntryKey, KeyComparator, KeyType, NullCategory};
pub use meta::{GinMeta, META_BLOCK};
pub use page::{
    flags, GinPage, LinePointer, LinePointerFlags, Opaque, PageBuilder, PostingItem,
    CONTENT_START, ROOT_BLOCK,
};
pub use tuple::{maxalign, stored_size, EntryTuple, InlineList, ListFormat, PostingPayload};
