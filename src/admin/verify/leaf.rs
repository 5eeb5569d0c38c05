//! Posting list checks shared by entry leaves and posting tree leaves.

use super::scope::VerifyScope;
use crate::admin::error::{CheckError, Corruption};
use crate::storage::gin::InlineList;
use crate::types::{HeapPointer, OffsetNumber, PageId};

/// Every pointer valid and strictly above its predecessor.
pub(crate) fn check_heap_pointers(items: &[HeapPointer]) -> Result<(), Corruption> {
    let mut prev: Option<HeapPointer> = None;
    for &item in items {
        if !item.is_valid() {
            return Err(Corruption::InvalidHeapPointer(item));
        }
        if prev.is_some_and(|prev| item <= prev) {
            return Err(Corruption::PostingOrder(item));
        }
        prev = Some(item);
    }
    Ok(())
}

/// Decodes the inline list of the leaf tuple at `block`/`offset`.
pub(crate) fn check_inline(
    scope: &mut VerifyScope<'_>,
    block: PageId,
    offset: OffsetNumber,
    list: &InlineList,
) -> Result<(), CheckError> {
    let items = list
        .decode()
        .map_err(|err| scope.corrupt(block, Some(offset), err.into()))?;
    if items.len() != list.declared as usize {
        return Err(scope.corrupt(
            block,
            Some(offset),
            Corruption::PostingCountMismatch {
                declared: list.declared,
                decoded: items.len(),
            },
        ));
    }
    check_heap_pointers(&items).map_err(|reason| scope.corrupt(block, Some(offset), reason))?;
    scope.counts.heap_pointers += items.len() as u64;
    Ok(())
}

/// Validates the posting tree root named by the leaf tuple at
/// `block`/`offset` before it is queued for a walk.
pub(crate) fn check_posting_root(
    scope: &VerifyScope<'_>,
    block: PageId,
    offset: OffsetNumber,
    root: PageId,
) -> Result<PageId, CheckError> {
    if !scope.pages.is_valid_block(root)? {
        return Err(scope.corrupt(
            block,
            Some(offset),
            Corruption::InvalidBlockReference(root),
        ));
    }
    Ok(root)
}
