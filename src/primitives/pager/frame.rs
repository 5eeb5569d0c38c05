use parking_lot::{lock_api::ArcRwLockReadGuard, RawRwLock, RwLock};
use std::sync::Arc;

/// Cached image of one page. Readers and the write path coordinate through
/// the frame's `RwLock`; a reader keeps the frame alive even after eviction.
#[derive(Clone)]
pub struct Frame {
    pub buf: Arc<RwLock<Box<[u8]>>>,
}

impl Frame {
    pub fn new(page_size: usize) -> Self {
        Self {
            buf: Arc::new(RwLock::new(vec![0u8; page_size].into_boxed_slice())),
        }
    }

    pub fn share(&self) -> ArcRwLockReadGuard<RawRwLock, Box<[u8]>> {
        self.buf.read_arc()
    }
}
