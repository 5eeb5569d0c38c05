#![forbid(unsafe_code)]

mod frame;
mod pager;

pub use pager::{PageRef, PageStore, Pager, PagerOptions, PagerStats};
