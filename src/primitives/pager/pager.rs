use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{lock_api::ArcRwLockReadGuard, Mutex, RawRwLock};
use tracing::{debug, trace};

use super::frame::Frame;
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{
    page::{self, PageHeader, PAGE_HDR_LEN},
    GinError, PageId, Result,
};

/// Configuration options for the pager.
#[derive(Clone, Debug)]
pub struct PagerOptions {
    /// Size of each page in bytes. Ignored by [`Pager::open`], which takes the
    /// size recorded in block 0.
    pub page_size: u32,
    /// Number of page frames kept cached in memory.
    pub cache_pages: usize,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            page_size: page::DEFAULT_PAGE_SIZE,
            cache_pages: 128,
        }
    }
}

/// Read access to fixed-size pages with per-page shared locks.
///
/// `read_shared` must hand out a guard that keeps the page image stable and
/// blocks writers of that page until it is dropped.
pub trait PageStore: Send + Sync {
    /// Returns the page size in bytes.
    fn page_size(&self) -> u32;
    /// Number of pages currently backed by the store.
    fn page_count(&self) -> Result<u64>;
    /// Acquires a shared lock on `id` and returns its image.
    fn read_shared(&self, id: PageId) -> Result<PageRef>;
}

/// Shared-locked view of one page. Dropping it releases the lock.
pub struct PageRef {
    /// Page identifier.
    pub id: PageId,
    guard: ArcRwLockReadGuard<RawRwLock, Box<[u8]>>,
    _pin: PinHandle,
}

impl PageRef {
    /// Returns the page data as a byte slice.
    pub fn data(&self) -> &[u8] {
        &self.guard
    }
}

impl std::fmt::Debug for PageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRef")
            .field("id", &self.id)
            .field("len", &self.guard.len())
            .finish()
    }
}

/// Snapshot of pager counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct PagerStats {
    /// Page size in bytes.
    pub page_size: u32,
    /// Shared page reads served.
    pub reads: u64,
    /// Reads served from a cached frame.
    pub cache_hits: u64,
    /// Reads that loaded the page from disk.
    pub cache_misses: u64,
    /// Pages written through [`Pager::write_page`].
    pub writes: u64,
    /// Shared page locks currently held.
    pub active_pins: u64,
    /// Highest number of shared page locks held at once.
    pub peak_pins: u64,
}

struct PinMetrics {
    active: AtomicU64,
    peak: AtomicU64,
}

impl PinMetrics {
    fn new() -> Self {
        Self {
            active: AtomicU64::new(0),
            peak: AtomicU64::new(0),
        }
    }

    fn on_pin(&self) {
        let now = self.active.fetch_add(1, AtomicOrdering::Relaxed) + 1;
        self.peak.fetch_max(now, AtomicOrdering::Relaxed);
    }

    fn on_unpin(&self) {
        self.active.fetch_sub(1, AtomicOrdering::Relaxed);
    }
}

struct PinHandle {
    metrics: Arc<PinMetrics>,
}

impl PinHandle {
    fn new(metrics: Arc<PinMetrics>) -> Self {
        metrics.on_pin();
        Self { metrics }
    }
}

impl Drop for PinHandle {
    fn drop(&mut self) {
        self.metrics.on_unpin();
    }
}

#[derive(Default)]
struct Counters {
    reads: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    writes: AtomicU64,
}

/// File-backed page store with an LRU frame cache.
pub struct Pager {
    io: Arc<dyn FileIo>,
    page_size: u32,
    frames: Mutex<LruCache<PageId, Frame>>,
    pins: Arc<PinMetrics>,
    counters: Counters,
}

impl Pager {
    /// Creates (or reuses) a writable index file with the configured page size.
    pub fn create(path: impl AsRef<Path>, options: PagerOptions) -> Result<Self> {
        let io = StdFileIo::open_rw(path)?;
        Self::with_io(Arc::new(io), options)
    }

    /// Opens an existing index file read-only, taking the page size from block 0.
    pub fn open(path: impl AsRef<Path>, options: PagerOptions) -> Result<Self> {
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open_read_only(path)?);
        let page_size = probe_page_size(io.as_ref())?;
        Self::with_io(
            io,
            PagerOptions {
                page_size,
                ..options
            },
        )
    }

    /// Builds a pager over an arbitrary [`FileIo`].
    pub fn with_io(io: Arc<dyn FileIo>, options: PagerOptions) -> Result<Self> {
        if (options.page_size as usize) < PAGE_HDR_LEN || options.page_size > page::MAX_PAGE_SIZE
        {
            return Err(GinError::Invalid("page size out of range"));
        }
        let cache_pages = NonZeroUsize::new(options.cache_pages.max(1))
            .ok_or(GinError::Invalid("cache must hold at least one page"))?;
        debug!(
            page_size = options.page_size,
            cache_pages = cache_pages.get(),
            "pager.open"
        );
        Ok(Self {
            io,
            page_size: options.page_size,
            frames: Mutex::new(LruCache::new(cache_pages)),
            pins: Arc::new(PinMetrics::new()),
            counters: Counters::default(),
        })
    }

    /// Replaces the image of page `id`, blocking until no reader holds it.
    ///
    /// Writes go straight to the file so that frames evicted later reload the
    /// new image.
    pub fn write_page(&self, id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != self.page_size as usize {
            return Err(GinError::Invalid("page image has wrong length"));
        }
        let frame = self.frame(id, true)?;
        let mut guard = frame.buf.write();
        self.io.write_at(page_offset(id, self.page_size), data)?;
        guard.copy_from_slice(data);
        self.counters.writes.fetch_add(1, AtomicOrdering::Relaxed);
        trace!(page = id.0, "pager.write_page");
        Ok(())
    }

    /// Flushes file contents to durable storage.
    pub fn sync(&self) -> Result<()> {
        self.io.sync_all()
    }

    /// Returns a snapshot of pager statistics.
    pub fn stats(&self) -> PagerStats {
        PagerStats {
            page_size: self.page_size,
            reads: self.counters.reads.load(AtomicOrdering::Relaxed),
            cache_hits: self.counters.cache_hits.load(AtomicOrdering::Relaxed),
            cache_misses: self.counters.cache_misses.load(AtomicOrdering::Relaxed),
            writes: self.counters.writes.load(AtomicOrdering::Relaxed),
            active_pins: self.pins.active.load(AtomicOrdering::Relaxed),
            peak_pins: self.pins.peak.load(AtomicOrdering::Relaxed),
        }
    }

    fn frame(&self, id: PageId, for_write: bool) -> Result<Frame> {
        let mut frames = self.frames.lock();
        if let Some(frame) = frames.get(&id) {
            self.counters.cache_hits.fetch_add(1, AtomicOrdering::Relaxed);
            return Ok(frame.clone());
        }
        let count = self.page_count()?;
        let frame = Frame::new(self.page_size as usize);
        if id.0 < count {
            let mut buf = frame.buf.write();
            self.io.read_at(page_offset(id, self.page_size), &mut buf)?;
        } else if !for_write {
            return Err(GinError::NotFound(id));
        }
        self.counters
            .cache_misses
            .fetch_add(1, AtomicOrdering::Relaxed);
        frames.put(id, frame.clone());
        Ok(frame)
    }
}

impl PageStore for Pager {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> Result<u64> {
        Ok(self.io.len()? / self.page_size as u64)
    }

    fn read_shared(&self, id: PageId) -> Result<PageRef> {
        let frame = self.frame(id, false)?;
        self.counters.reads.fetch_add(1, AtomicOrdering::Relaxed);
        let guard = frame.share();
        Ok(PageRef {
            id,
            guard,
            _pin: PinHandle::new(self.pins.clone()),
        })
    }
}

impl<S: PageStore + ?Sized> PageStore for Arc<S> {
    fn page_size(&self) -> u32 {
        (**self).page_size()
    }

    fn page_count(&self) -> Result<u64> {
        (**self).page_count()
    }

    fn read_shared(&self, id: PageId) -> Result<PageRef> {
        (**self).read_shared(id)
    }
}

fn page_offset(id: PageId, page_size: u32) -> u64 {
    id.0 * page_size as u64
}

fn probe_page_size(io: &dyn FileIo) -> Result<u32> {
    if io.len()? < PAGE_HDR_LEN as u64 {
        return Err(GinError::Corruption("file shorter than a page header"));
    }
    let mut hdr = [0u8; PAGE_HDR_LEN];
    io.read_at(0, &mut hdr)?;
    Ok(PageHeader::decode(&hdr)?.page_size)
}
