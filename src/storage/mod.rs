//! Index storage formats.
//!
//! Only the GIN layout lives here; paging and file I/O sit in
//! [`crate::primitives`].

/// GIN entry tree, posting trees and their bulk builder.
pub mod gin;
