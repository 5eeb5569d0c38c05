//! Low-level primitives underneath the GIN page format.
//!
//! Includes byte utilities, positioned file I/O and the paging layer that
//! hands out share-locked page images.

/// Byte-level utilities and encoding/decoding.
pub mod bytes;

/// I/O abstractions and utilities.
pub mod io;

/// Page store trait and the file-backed pager.
pub mod pager;
