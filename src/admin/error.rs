use crate::admin::catalog::RelationId;
use crate::types::{GinError, HeapPointer, OffsetNumber, PageId};
use thiserror::Error;

/// A structural problem found on an index page.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Corruption {
    /// The page failed the generic sanity check.
    #[error("page failed sanity check: {0}")]
    Sanity(&'static str),
    /// An entry tree block holds a posting tree page or vice versa.
    #[error("unexpected {found} page in {tree} tree")]
    WrongPageKind {
        /// Kind found on disk.
        found: &'static str,
        /// Tree being walked.
        tree: &'static str,
    },
    /// Page or tuple bytes do not decode.
    #[error("malformed page content: {0}")]
    Malformed(&'static str),
    /// Deleted pages must be leaves.
    #[error("has deleted internal page")]
    DeletedInternalPage,
    /// Deleted pages must be empty.
    #[error("has deleted page with tuples")]
    DeletedPageWithTuples,
    /// More items than the page shape can hold.
    #[error("has page with exceeding count of tuples ({count} > {capacity})")]
    TupleCountExceeded {
        /// Recorded item count.
        count: u16,
        /// Capacity bound.
        capacity: usize,
    },
    /// Internal pages need at least one downlink.
    #[error("has internal page without downlinks")]
    EmptyInternalPage,
    /// Line pointer runs past the tuple space.
    #[error("line pointer points past end of tuple space (lp_off={off}, lp_len={len}, lp_flags={flags})")]
    LinePointerPastEnd {
        /// Tuple offset.
        off: u16,
        /// Tuple length.
        len: u16,
        /// Raw flag bits.
        flags: u8,
    },
    /// Line pointer is unused, redirected or has no storage.
    #[error("invalid line pointer storage (lp_off={off}, lp_len={len}, lp_flags={flags})")]
    InvalidLinePointer {
        /// Tuple offset.
        off: u16,
        /// Tuple length.
        len: u16,
        /// Raw flag bits.
        flags: u8,
    },
    /// Line pointer length and tuple header disagree after alignment.
    #[error("has inconsistent tuple sizes (line pointer {line_pointer_len}, tuple {tuple_size})")]
    InconsistentTupleSize {
        /// Length recorded in the line pointer.
        line_pointer_len: u16,
        /// Size recorded in the tuple.
        tuple_size: u16,
    },
    /// Tuples on a page are not strictly increasing.
    #[error("has wrong tuple order")]
    WrongTupleOrder,
    /// Child content exceeds the parent downlink, even after re-reading the parent.
    #[error("has inconsistent records")]
    InconsistentRecords,
    /// Leaves of one tree sit at different depths.
    #[error("internal pages traversal encountered leaf page unexpectedly at depth {depth} (leaves seen at depth {expected})")]
    LeafDepthMismatch {
        /// Depth of this leaf.
        depth: u32,
        /// Depth of the first leaf seen.
        expected: u32,
    },
    /// The walk went deeper than any sound tree can be.
    #[error("tree deeper than {0} levels")]
    TreeTooDeep(u32),
    /// A downlink or posting tree root names a block that cannot hold a tree page.
    #[error("references invalid block {0}")]
    InvalidBlockReference(PageId),
    /// Internal tuple without a child pointer.
    #[error("internal tuple carries no downlink")]
    MissingDownlink,
    /// Leaf tuple with a child pointer.
    #[error("leaf tuple carries a downlink")]
    UnexpectedDownlink,
    /// Compressed list decodes to a different number of items than recorded.
    #[error("number of items mismatch in GIN entry tuple, {declared} in tuple header, {decoded} decoded")]
    PostingCountMismatch {
        /// Count recorded on disk.
        declared: u16,
        /// Count actually decoded.
        decoded: usize,
    },
    /// A posting list holds a zero or out-of-range heap pointer.
    #[error("posting list contains invalid heap pointer {0}")]
    InvalidHeapPointer(HeapPointer),
    /// Heap pointers are not strictly increasing.
    #[error("posting list is not in increasing order at {0}")]
    PostingOrder(HeapPointer),
    /// Posting tree items are out of order.
    #[error("has wrong tuple order in posting tree")]
    PostingItemOrder,
    /// A posting tree leaf holds pointers above its right bound.
    #[error("heap pointer {pointer} exceeds page right bound {bound}")]
    RightBoundExceeded {
        /// Offending pointer.
        pointer: HeapPointer,
        /// Right bound of the page.
        bound: HeapPointer,
    },
    /// A posting tree page claims more than its parent item covers.
    #[error("right bound {bound} exceeds key {parent} of its item on parent block {parent_block}")]
    RightBoundAboveParent {
        /// Right bound of the page.
        bound: HeapPointer,
        /// Key of the parent posting item.
        parent: HeapPointer,
        /// Block holding the parent posting item.
        parent_block: PageId,
    },
}

impl From<GinError> for Corruption {
    fn from(err: GinError) -> Self {
        match err {
            GinError::Corruption(msg) | GinError::Invalid(msg) => Corruption::Malformed(msg),
            GinError::NotFound(_) => Corruption::Malformed("page not found"),
            GinError::Io(_) => Corruption::Malformed("I/O failure while decoding"),
        }
    }
}

/// Error type for index verification.
#[derive(Debug, Error)]
pub enum CheckError {
    /// No relation with this id.
    #[error("relation {0} does not exist")]
    RelationNotFound(RelationId),
    /// The relation is a table, not an index.
    #[error("\"{name}\" is not an index")]
    NotAnIndex {
        /// Relation name.
        name: String,
    },
    /// The index uses another access method.
    #[error("only GIN indexes are supported as targets for this verification: relation \"{name}\" is not a GIN index")]
    NotGinIndex {
        /// Relation name.
        name: String,
    },
    /// The index belongs to another session's temporary table.
    #[error("cannot access temporary tables of other sessions: index \"{name}\" is associated with temporary relation")]
    OtherSessionTemp {
        /// Relation name.
        name: String,
    },
    /// The index is not marked valid.
    #[error("cannot check index \"{name}\": index is not valid")]
    InvalidIndex {
        /// Relation name.
        name: String,
    },
    /// The index's table vanished or changed while locks were taken.
    #[error("could not open parent table of index {name}")]
    ParentTableMissing {
        /// Index name.
        name: String,
    },
    /// A page could not be read from the store.
    #[error("index \"{relation}\": could not read block {block}: {source}")]
    PageRead {
        /// Index name.
        relation: String,
        /// Block being read.
        block: PageId,
        /// Underlying failure.
        #[source]
        source: GinError,
    },
    /// First corruption found by the walk.
    #[error("index \"{relation}\" {reason}, block {block}{}", offset_suffix(.offset))]
    IndexCorrupted {
        /// Index name.
        relation: String,
        /// Block where the problem was found.
        block: PageId,
        /// Item offset on that block, when one applies.
        offset: Option<OffsetNumber>,
        /// What is wrong.
        reason: Corruption,
    },
    /// Cancellation was requested.
    #[error("verification of index \"{relation}\" was cancelled")]
    Cancelled {
        /// Index name.
        relation: String,
    },
}

impl CheckError {
    /// True for errors describing on-disk corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, CheckError::IndexCorrupted { .. })
    }

    /// Corruption details, if this is a corruption error.
    pub fn corruption(&self) -> Option<(PageId, Option<OffsetNumber>, &Corruption)> {
        match self {
            CheckError::IndexCorrupted {
                block,
                offset,
                reason,
                ..
            } => Some((*block, *offset, reason)),
            _ => None,
        }
    }
}

fn offset_suffix(offset: &Option<OffsetNumber>) -> String {
    match offset {
        Some(off) => format!(", offset {off}"),
        None => String::new(),
    }
}
