//! Posting tree walk.
//!
//! Posting trees are not repaired across concurrent splits: a page reached
//! through a stale parent item is checked against that item's key only when
//! the page still has a right sibling, which a split preserves.

use tracing::{debug, info};

use super::leaf::check_heap_pointers;
use super::scope::VerifyScope;
use super::MAX_TREE_DEPTH;
use crate::admin::error::{CheckError, Corruption};
use crate::storage::gin::PostingItem;
use crate::types::{HeapPointer, FIRST_OFFSET, PageId};

struct PostingFrame {
    depth: u32,
    parent: Option<(PageId, PostingItem)>,
    block: PageId,
}

/// Walks the posting tree rooted at `root`.
pub(crate) fn check_posting_tree(
    scope: &mut VerifyScope<'_>,
    root: PageId,
) -> Result<(), CheckError> {
    info!(relation = scope.relation(), root = root.0, "gin.verify.posting_tree");
    scope.counts.posting_trees += 1;
    let mut stack = vec![PostingFrame {
        depth: 0,
        parent: None,
        block: root,
    }];
    let mut leaf_depth: Option<u32> = None;

    while let Some(frame) = stack.pop() {
        scope.check_interrupt()?;
        let block = frame.block;
        if frame.depth > MAX_TREE_DEPTH {
            return Err(scope.corrupt(block, None, Corruption::TreeTooDeep(MAX_TREE_DEPTH)));
        }
        let page = scope.pages.open(block)?;
        scope.counts.posting_pages += 1;
        debug!(block = block.0, depth = frame.depth, "gin.verify.posting_page");

        if !page.is_data() {
            return Err(scope.corrupt(
                block,
                None,
                Corruption::WrongPageKind {
                    found: "entry",
                    tree: "posting",
                },
            ));
        }
        let maxoff = page.tuple_count();
        if page.is_deleted() {
            if !page.is_leaf() {
                return Err(scope.corrupt(block, None, Corruption::DeletedInternalPage));
            }
            if maxoff > 0 {
                return Err(scope.corrupt(block, None, Corruption::DeletedPageWithTuples));
            }
            scope.counts.deleted_pages += 1;
            continue;
        }
        let capacity = page.max_tuple_capacity();
        if maxoff as usize > capacity {
            return Err(scope.corrupt(
                block,
                None,
                Corruption::TupleCountExceeded {
                    count: maxoff,
                    capacity,
                },
            ));
        }

        if page.is_leaf() {
            match leaf_depth {
                None => leaf_depth = Some(frame.depth),
                Some(expected) if expected != frame.depth => {
                    return Err(scope.corrupt(
                        block,
                        None,
                        Corruption::LeafDepthMismatch {
                            depth: frame.depth,
                            expected,
                        },
                    ));
                }
                Some(_) => {}
            }
        }

        let bound = page.right_bound();
        if let Some((parent_block, parent)) = frame.parent {
            if !page.is_rightmost() && parent.key.is_valid() && bound > parent.key {
                return Err(scope.corrupt(
                    block,
                    None,
                    Corruption::RightBoundAboveParent {
                        bound,
                        parent: parent.key,
                        parent_block,
                    },
                ));
            }
        }

        if page.is_leaf() {
            let items = page
                .heap_pointers()
                .map_err(|reason| scope.corrupt(block, None, reason))?;
            if page.is_compressed() && items.len() != maxoff as usize {
                return Err(scope.corrupt(
                    block,
                    None,
                    Corruption::PostingCountMismatch {
                        declared: maxoff,
                        decoded: items.len(),
                    },
                ));
            }
            check_heap_pointers(&items).map_err(|reason| scope.corrupt(block, None, reason))?;
            if let Some(&last) = items.last() {
                if !page.is_rightmost() && last > bound {
                    return Err(scope.corrupt(
                        block,
                        None,
                        Corruption::RightBoundExceeded {
                            pointer: last,
                            bound,
                        },
                    ));
                }
            }
            scope.counts.heap_pointers += items.len() as u64;
            continue;
        }

        if maxoff == 0 {
            return Err(scope.corrupt(block, None, Corruption::EmptyInternalPage));
        }
        let mut prev_key: Option<HeapPointer> = None;
        let mut children = Vec::with_capacity(maxoff as usize);
        for offset in FIRST_OFFSET..=maxoff {
            let item = page
                .posting_item_at(offset)
                .map_err(|reason| scope.corrupt(block, Some(offset), reason))?;
            // The last item of a rightmost page may leave its key unset,
            // meaning no upper bound.
            let unbounded = !item.key.is_valid() && offset == maxoff && page.is_rightmost();
            if !unbounded {
                if !item.key.is_valid() {
                    return Err(scope.corrupt(
                        block,
                        Some(offset),
                        Corruption::InvalidHeapPointer(item.key),
                    ));
                }
                if prev_key.is_some_and(|prev| item.key < prev) {
                    return Err(scope.corrupt(block, Some(offset), Corruption::PostingItemOrder));
                }
                prev_key = Some(item.key);
            }
            if !scope.pages.is_valid_block(item.child)? {
                return Err(scope.corrupt(
                    block,
                    Some(offset),
                    Corruption::InvalidBlockReference(item.child),
                ));
            }
            children.push(PostingFrame {
                depth: frame.depth + 1,
                parent: Some((block, item)),
                block: item.child,
            });
        }
        drop(page);
        stack.extend(children.into_iter().rev());
    }
    Ok(())
}
