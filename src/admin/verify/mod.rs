//! GIN index verification.
//!
//! [`verify`] locks the index and its table, checks that the index can be
//! verified at all, then walks the entry tree and every posting tree it
//! references. The first corruption found ends the walk with
//! [`CheckError::IndexCorrupted`]; races with concurrent page splits that
//! cannot be told apart from corruption are reported as notices instead.

mod accessor;
mod entry;
mod leaf;
mod posting;
mod scope;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::admin::catalog::{AccessMethod, Catalog, Persistence, Relation, RelationId};
use crate::admin::error::CheckError;
use crate::admin::options::VerifyOptions;

use accessor::PageAccessor;
use scope::VerifyScope;

/// Deepest level a walk descends to before the tree is declared corrupt.
pub const MAX_TREE_DEPTH: u32 = 64;

/// How much a notice matters.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Progress information, such as a followed page split.
    Info,
    /// Something the caller should see that is not corruption.
    Notice,
}

/// Non-fatal message produced during verification.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Notice {
    /// Severity.
    pub severity: VerifySeverity,
    /// Human-readable text.
    pub message: String,
}

/// Statistics collected during the walk.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct VerifyCounts {
    /// Entry tree pages visited, including revisits through split detection.
    pub entry_pages: u64,
    /// Entry tree leaves visited.
    pub entry_leaf_pages: u64,
    /// Entry tuples examined.
    pub entry_tuples: u64,
    /// Deleted pages seen in either tree.
    pub deleted_pages: u64,
    /// Posting trees walked.
    pub posting_trees: u64,
    /// Posting tree pages visited.
    pub posting_pages: u64,
    /// Heap pointers decoded from inline lists and posting tree leaves.
    pub heap_pointers: u64,
    /// Pages whose high key showed a concurrent split.
    pub splits_detected: u64,
    /// Downlink mismatches resolved by re-reading the parent.
    pub parents_refound: u64,
    /// Depth of entry tree leaves, root being 0.
    pub leaf_depth: Option<u32>,
}

/// Result of a successful [`verify`] call.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// Name of the verified index.
    pub relation: String,
    /// True when the index was not walked, see the notices for why.
    pub skipped: bool,
    /// Non-fatal messages in the order they were produced.
    pub notices: Vec<Notice>,
    /// Walk statistics.
    pub counts: VerifyCounts,
}

/// Verifies the GIN index `index` registered in `catalog`.
///
/// Shared locks on the index's table and on the index are held for the whole
/// call; page locks are taken one at a time.
///
/// # Errors
///
/// Precondition errors when the relation is not a verifiable GIN index,
/// [`CheckError::PageRead`] when a page cannot be read,
/// [`CheckError::IndexCorrupted`] for the first corruption found and
/// [`CheckError::Cancelled`] when `options.cancel` fires.
pub fn verify(
    catalog: &Catalog,
    index: RelationId,
    options: &VerifyOptions,
) -> Result<VerifyReport, CheckError> {
    let locks = catalog.lock_for_check(index)?;
    let relation = locks.index();
    if !check_eligible(relation, options)? {
        let message = format!(
            "cannot verify unlogged index \"{}\" during recovery, skipping",
            relation.name
        );
        warn!(relation = %relation.name, "gin.verify.skip");
        return Ok(VerifyReport {
            relation: relation.name.clone(),
            skipped: true,
            notices: vec![Notice {
                severity: VerifySeverity::Notice,
                message,
            }],
            counts: VerifyCounts::default(),
        });
    }
    let store = relation
        .store
        .clone()
        .ok_or(CheckError::RelationNotFound(relation.id))?;

    debug!(
        relation = %relation.name,
        heap = %locks.heap().name,
        validate_postings = options.validate_postings,
        "gin.verify.start"
    );
    let pages = PageAccessor::new(store.as_ref(), options.sanity.as_ref(), &relation.name)?;
    let meta = pages.read_meta()?;
    let mut scope = VerifyScope::new(&relation.name, pages, meta.comparator(), options);
    entry::check_entry_tree(&mut scope)?;
    let report = scope.finish();
    info!(
        relation = %report.relation,
        entry_pages = report.counts.entry_pages,
        posting_pages = report.counts.posting_pages,
        notices = report.notices.len(),
        "gin.verify.done"
    );
    Ok(report)
}

/// Checks that `index` may be verified by this session. `Ok(false)` means it
/// is skipped: unlogged indexes have no contents while the host is in
/// recovery.
fn check_eligible(index: &Relation, options: &VerifyOptions) -> Result<bool, CheckError> {
    if index.access_method != AccessMethod::Gin {
        return Err(CheckError::NotGinIndex {
            name: index.name.clone(),
        });
    }
    match index.persistence {
        Persistence::Temporary { owner } if owner != options.session => {
            return Err(CheckError::OtherSessionTemp {
                name: index.name.clone(),
            });
        }
        _ => {}
    }
    if !index.valid {
        return Err(CheckError::InvalidIndex {
            name: index.name.clone(),
        });
    }
    Ok(!(index.persistence == Persistence::Unlogged && options.in_recovery))
}
