#![forbid(unsafe_code)]

//! Index administration: the relation catalog and GIN verification.
//!
//! Verification only reads the index. It reports the first corruption it
//! finds as an error and collects non-fatal notices in the returned report.

mod catalog;
mod error;
mod options;
mod sanity;
mod verify;

/// Relations known to the process and the locks guarding them.
pub use catalog::{
    AccessMethod, Catalog, CheckLocks, Persistence, Relation, RelationId, RelationKind,
    RelationLock, SessionId,
};

/// Error types for verification.
pub use error::{CheckError, Corruption};

/// Options controlling a verification run.
pub use options::{CancelToken, VerifyOptions};

/// Generic page checks run before GIN-specific ones.
pub use sanity::{DefaultPageSanity, PageSanity};

/// GIN index verification.
pub use verify::{
    verify, Notice, VerifyCounts, VerifyReport, VerifySeverity, MAX_TREE_DEPTH,
};
