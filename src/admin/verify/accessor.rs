//! One-page-at-a-time access for the walkers.
//!
//! Every page goes through the configured [`PageSanity`] check before it is
//! interpreted. A [`PageHandle`] owns the shared lock of its page; dropping
//! it is the only way the lock is released.

use std::cell::Cell;

use crate::admin::error::{CheckError, Corruption};
use crate::admin::sanity::PageSanity;
use crate::primitives::pager::{PageRef, PageStore};
use crate::storage::gin::{
    maxalign, stored_size, EntryTuple, GinMeta, GinPage, LinePointerFlags, Opaque, PostingItem,
    META_BLOCK,
};
use crate::types::{page::PageKind, GinError, HeapPointer, Lsn, OffsetNumber, PageId};

/// Builds the fatal error for a corruption found at `block`.
pub(crate) fn corrupted(
    relation: &str,
    block: PageId,
    offset: Option<OffsetNumber>,
    reason: Corruption,
) -> CheckError {
    CheckError::IndexCorrupted {
        relation: relation.to_owned(),
        block,
        offset,
        reason,
    }
}

pub(crate) struct PageAccessor<'a> {
    store: &'a dyn PageStore,
    sanity: &'a dyn PageSanity,
    relation: &'a str,
    page_count: Cell<u64>,
}

impl<'a> PageAccessor<'a> {
    pub(crate) fn new(
        store: &'a dyn PageStore,
        sanity: &'a dyn PageSanity,
        relation: &'a str,
    ) -> Result<Self, CheckError> {
        let accessor = Self {
            store,
            sanity,
            relation,
            page_count: Cell::new(0),
        };
        accessor.refresh_page_count(META_BLOCK)?;
        Ok(accessor)
    }

    fn read_error(&self, block: PageId, source: GinError) -> CheckError {
        CheckError::PageRead {
            relation: self.relation.to_owned(),
            block,
            source,
        }
    }

    fn refresh_page_count(&self, block: PageId) -> Result<u64, CheckError> {
        let count = self
            .store
            .page_count()
            .map_err(|err| self.read_error(block, err))?;
        self.page_count.set(count);
        Ok(count)
    }

    /// Reads the metapage and checks it like any other page.
    pub(crate) fn read_meta(&self) -> Result<GinMeta, CheckError> {
        let page = self
            .store
            .read_shared(META_BLOCK)
            .map_err(|err| self.read_error(META_BLOCK, err))?;
        self.sanity
            .check(META_BLOCK, page.data(), self.store.page_size())
            .map_err(|reason| corrupted(self.relation, META_BLOCK, None, reason))?;
        GinMeta::decode(page.data())
            .map_err(|err| corrupted(self.relation, META_BLOCK, None, err.into()))
    }

    /// True when `block` can hold a tree page. The page count is re-read
    /// before a block past the cached count is rejected, since the index
    /// may have grown since the walk started.
    pub(crate) fn is_valid_block(&self, block: PageId) -> Result<bool, CheckError> {
        if block == META_BLOCK {
            return Ok(false);
        }
        if block.0 < self.page_count.get() {
            return Ok(true);
        }
        Ok(block.0 < self.refresh_page_count(block)?)
    }

    /// Takes a shared lock on `block` and checks its generic shape.
    pub(crate) fn open(&self, block: PageId) -> Result<PageHandle, CheckError> {
        let page = self
            .store
            .read_shared(block)
            .map_err(|err| self.read_error(block, err))?;
        self.sanity
            .check(block, page.data(), self.store.page_size())
            .map_err(|reason| corrupted(self.relation, block, None, reason))?;
        let view = GinPage::parse(page.data())
            .map_err(|err| corrupted(self.relation, block, None, err.into()))?;
        let (kind, opaque) = (view.kind(), *view.opaque());
        Ok(PageHandle {
            block,
            kind,
            opaque,
            page,
        })
    }
}

/// A shared-locked tree page.
pub(crate) struct PageHandle {
    block: PageId,
    kind: PageKind,
    opaque: Opaque,
    page: PageRef,
}

impl PageHandle {
    fn view(&self) -> GinPage<'_> {
        GinPage::from_parts(self.page.data(), self.kind, self.opaque)
    }

    pub(crate) fn block(&self) -> PageId {
        self.block
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.view().is_leaf()
    }

    pub(crate) fn is_data(&self) -> bool {
        self.view().is_data()
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.view().is_deleted()
    }

    pub(crate) fn is_compressed(&self) -> bool {
        self.view().is_compressed()
    }

    pub(crate) fn is_rightmost(&self) -> bool {
        self.view().is_rightmost()
    }

    pub(crate) fn right_sibling(&self) -> Option<PageId> {
        self.opaque.right_link
    }

    pub(crate) fn tuple_count(&self) -> OffsetNumber {
        self.opaque.max_offset
    }

    pub(crate) fn max_tuple_capacity(&self) -> usize {
        self.view().max_item_capacity()
    }

    pub(crate) fn lsn(&self) -> Lsn {
        self.opaque.lsn
    }

    pub(crate) fn right_bound(&self) -> HeapPointer {
        self.opaque.right_bound
    }

    /// Entry tuple at `offset`, after the line pointer and size checks.
    pub(crate) fn tuple_at(&self, offset: OffsetNumber) -> Result<EntryTuple, Corruption> {
        let view = self.view();
        let data = view.data();
        let lp = view.line_pointer(offset)?;
        let (start, len) = (lp.off as usize, lp.len as usize);
        if start + len > data.len() {
            return Err(Corruption::LinePointerPastEnd {
                off: lp.off,
                len: lp.len,
                flags: lp.flags as u8,
            });
        }
        if matches!(
            lp.flags,
            LinePointerFlags::Unused | LinePointerFlags::Redirect
        ) || len == 0
        {
            return Err(Corruption::InvalidLinePointer {
                off: lp.off,
                len: lp.len,
                flags: lp.flags as u8,
            });
        }
        let src = &data[start..];
        let tuple_size = stored_size(src)?;
        if maxalign(len) != maxalign(tuple_size as usize) {
            return Err(Corruption::InconsistentTupleSize {
                line_pointer_len: lp.len,
                tuple_size,
            });
        }
        Ok(EntryTuple::decode(src)?)
    }

    pub(crate) fn posting_item_at(&self, offset: OffsetNumber) -> Result<PostingItem, Corruption> {
        Ok(self.view().posting_item(offset)?)
    }

    pub(crate) fn heap_pointers(&self) -> Result<Vec<HeapPointer>, Corruption> {
        Ok(self.view().heap_pointers()?)
    }
}
