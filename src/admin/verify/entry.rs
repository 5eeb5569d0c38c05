//! Entry tree walk.
//!
//! Pages are visited depth first, left to right, holding one shared page
//! lock at a time. Work that needs another page (re-reading a parent,
//! walking a posting tree) is deferred until the current page is released.

use std::cmp::Ordering;
use std::collections::HashSet;

use smallvec::SmallVec;
use tracing::{debug, info};

use super::accessor::PageHandle;
use super::leaf::{check_inline, check_posting_root};
use super::posting::check_posting_tree;
use super::scope::VerifyScope;
use super::{VerifySeverity, MAX_TREE_DEPTH};
use crate::admin::error::{CheckError, Corruption};
use crate::storage::gin::{EntryTuple, PostingPayload, ROOT_BLOCK};
use crate::types::{Lsn, OffsetNumber, PageId, FIRST_OFFSET};

/// A page waiting to be visited, with a private copy of the downlink that
/// led to it.
#[derive(Clone, Debug)]
struct ScanFrame {
    depth: u32,
    parent: Option<EntryTuple>,
    parent_block: Option<PageId>,
    parent_lsn: Lsn,
    block: PageId,
}

impl ScanFrame {
    fn root() -> Self {
        Self {
            depth: 0,
            parent: None,
            parent_block: None,
            parent_lsn: Lsn(0),
            block: ROOT_BLOCK,
        }
    }
}

/// Last tuple of a page that sorted above its downlink.
struct Recheck {
    tuple: EntryTuple,
    offset: OffsetNumber,
}

#[derive(Default)]
struct PageOutcome {
    recheck: Option<Recheck>,
    posting_roots: SmallVec<[PageId; 4]>,
}

struct EntryWalk {
    stack: Vec<ScanFrame>,
    leaf_depth: Option<u32>,
    /// Right siblings already queued by split detection.
    followed: HashSet<PageId>,
}

/// Walks the entry tree from the root.
pub(crate) fn check_entry_tree(scope: &mut VerifyScope<'_>) -> Result<(), CheckError> {
    let mut walk = EntryWalk {
        stack: vec![ScanFrame::root()],
        leaf_depth: None,
        followed: HashSet::new(),
    };
    while let Some(frame) = walk.stack.pop() {
        scope.check_interrupt()?;
        if frame.depth > MAX_TREE_DEPTH {
            return Err(scope.corrupt(
                frame.block,
                None,
                Corruption::TreeTooDeep(MAX_TREE_DEPTH),
            ));
        }
        let outcome = {
            let page = scope.pages.open(frame.block)?;
            walk.visit(scope, &frame, &page)?
        };
        if let Some(recheck) = outcome.recheck {
            refind_parent(scope, &frame, recheck)?;
        }
        for root in outcome.posting_roots {
            check_posting_tree(scope, root)?;
        }
    }
    scope.counts.leaf_depth = walk.leaf_depth;
    Ok(())
}

impl EntryWalk {
    fn visit(
        &mut self,
        scope: &mut VerifyScope<'_>,
        frame: &ScanFrame,
        page: &PageHandle,
    ) -> Result<PageOutcome, CheckError> {
        let block = page.block();
        let mut outcome = PageOutcome::default();
        scope.counts.entry_pages += 1;
        debug!(block = block.0, depth = frame.depth, "gin.verify.page");

        if page.is_data() {
            return Err(scope.corrupt(
                block,
                None,
                Corruption::WrongPageKind {
                    found: "posting",
                    tree: "entry",
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
            return Ok(outcome);
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

        self.follow_split(scope, frame, page)?;

        if page.is_leaf() {
            scope.counts.entry_leaf_pages += 1;
            match self.leaf_depth {
                None => self.leaf_depth = Some(frame.depth),
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
        } else if maxoff == 0 {
            return Err(scope.corrupt(block, None, Corruption::EmptyInternalPage));
        }

        let mut children = Vec::new();
        let mut prev: Option<EntryTuple> = None;
        for offset in FIRST_OFFSET..=maxoff {
            let tuple = page
                .tuple_at(offset)
                .map_err(|reason| scope.corrupt(block, Some(offset), reason))?;
            scope.counts.entry_tuples += 1;

            if let Some(prev) = &prev {
                if scope.compare(block, offset, prev, &tuple)? != Ordering::Less {
                    return Err(scope.corrupt(block, Some(offset), Corruption::WrongTupleOrder));
                }
            }

            if offset == maxoff {
                if let Some(parent) = &frame.parent {
                    if scope.compare(block, offset, &tuple, parent)? == Ordering::Greater {
                        outcome.recheck = Some(Recheck {
                            tuple: tuple.clone(),
                            offset,
                        });
                    }
                }
            }

            if page.is_leaf() {
                match &tuple.payload {
                    PostingPayload::Downlink(_) => {
                        return Err(scope.corrupt(
                            block,
                            Some(offset),
                            Corruption::UnexpectedDownlink,
                        ));
                    }
                    PostingPayload::Inline(list) if scope.validate_postings() => {
                        check_inline(scope, block, offset, list)?;
                    }
                    PostingPayload::PostingTree(root) if scope.validate_postings() => {
                        let root = check_posting_root(scope, block, offset, *root)?;
                        outcome.posting_roots.push(root);
                    }
                    _ => {}
                }
            } else {
                let child = tuple.child().ok_or_else(|| {
                    scope.corrupt(block, Some(offset), Corruption::MissingDownlink)
                })?;
                if !scope.pages.is_valid_block(child)? {
                    return Err(scope.corrupt(
                        block,
                        Some(offset),
                        Corruption::InvalidBlockReference(child),
                    ));
                }
                children.push(ScanFrame {
                    depth: frame.depth + 1,
                    parent: Some(tuple.clone()),
                    parent_block: Some(block),
                    parent_lsn: page.lsn(),
                    block: child,
                });
            }
            prev = Some(tuple);
        }
        self.stack.extend(children.into_iter().rev());
        Ok(outcome)
    }

    /// Queues the right sibling when this page's high key sorts below the
    /// downlink that led here: the keys in between moved right in a split.
    fn follow_split(
        &mut self,
        scope: &mut VerifyScope<'_>,
        frame: &ScanFrame,
        page: &PageHandle,
    ) -> Result<(), CheckError> {
        let (Some(parent), Some(sibling)) = (&frame.parent, page.right_sibling()) else {
            return Ok(());
        };
        let maxoff = page.tuple_count();
        if maxoff < FIRST_OFFSET {
            return Ok(());
        }
        let block = page.block();
        let high = page
            .tuple_at(maxoff)
            .map_err(|reason| scope.corrupt(block, Some(maxoff), reason))?;
        if scope.compare(block, maxoff, &high, parent)? != Ordering::Less {
            return Ok(());
        }
        if !scope.pages.is_valid_block(sibling)? {
            return Err(scope.corrupt(block, None, Corruption::InvalidBlockReference(sibling)));
        }
        scope.counts.splits_detected += 1;
        if !self.followed.insert(sibling) {
            debug!(block = block.0, sibling = sibling.0, "gin.verify.split.revisit");
            return Ok(());
        }
        info!(
            block = block.0,
            sibling = sibling.0,
            parent_lsn = frame.parent_lsn.0,
            "gin.verify.split"
        );
        scope.notice(
            VerifySeverity::Info,
            format!("split detected on block {block}, following right link to block {sibling}"),
        );
        self.stack.push(ScanFrame {
            depth: frame.depth,
            parent: Some(parent.clone()),
            parent_block: frame.parent_block,
            parent_lsn: frame.parent_lsn,
            block: sibling,
        });
        Ok(())
    }
}

/// Re-reads the parent of `frame` after its own lock is gone and repeats the
/// failed downlink comparison against the current downlink.
fn refind_parent(
    scope: &mut VerifyScope<'_>,
    frame: &ScanFrame,
    recheck: Recheck,
) -> Result<(), CheckError> {
    let Some(parent_block) = frame.parent_block else {
        return Ok(());
    };
    let fresh = find_downlink(scope, parent_block, frame.block)?;
    match fresh {
        None => {
            scope.notice(
                VerifySeverity::Notice,
                format!(
                    "Unable to find parent tuple for block {} on block {} due to concurrent split",
                    frame.block, parent_block
                ),
            );
            Ok(())
        }
        Some(parent) => {
            if scope.compare(frame.block, recheck.offset, &recheck.tuple, &parent)?
                == Ordering::Greater
            {
                return Err(scope.corrupt(
                    frame.block,
                    Some(recheck.offset),
                    Corruption::InconsistentRecords,
                ));
            }
            debug!(
                block = frame.block.0,
                parent = parent_block.0,
                "gin.verify.parent_refound"
            );
            scope.counts.parents_refound += 1;
            Ok(())
        }
    }
}

/// Copy of the downlink on `parent_block` pointing at `child`, if any.
fn find_downlink(
    scope: &VerifyScope<'_>,
    parent_block: PageId,
    child: PageId,
) -> Result<Option<EntryTuple>, CheckError> {
    let page = scope.pages.open(parent_block)?;
    if page.is_leaf() || page.is_data() {
        return Ok(None);
    }
    for offset in FIRST_OFFSET..=page.tuple_count() {
        let tuple = page
            .tuple_at(offset)
            .map_err(|reason| scope.corrupt(parent_block, Some(offset), reason))?;
        if tuple.child() == Some(child) {
            return Ok(Some(tuple));
        }
    }
    Ok(None)
}
