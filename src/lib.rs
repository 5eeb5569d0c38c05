//! Structural verification of GIN inverted indexes stored as fixed-size pages.
//!
//! The [`admin`] module holds the verifier and the relation catalog it locks
//! through; [`storage::gin`] defines the on-disk format and a bulk builder;
//! [`primitives`] supplies positioned file I/O and the page store.

#![warn(missing_docs)]

pub mod admin;
pub mod logging;
pub mod primitives;
pub mod storage;
pub mod types;
