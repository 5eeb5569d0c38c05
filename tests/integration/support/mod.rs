//! Fixtures shared by the integration tests: hand-built trees, page
//! tampering and a store that applies writes in the middle of a walk.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use gincheck::{
    admin::{AccessMethod, Catalog, Persistence, RelationId},
    primitives::pager::{PageRef, PageStore, Pager, PagerOptions},
    storage::gin::{
        flags, int64_key, EntryTuple, GinMeta, KeyType, NullCategory, Opaque, PageBuilder,
        PostingItem, META_BLOCK,
    },
    types::{page::stamp_crc32, HeapPointer, Lsn, PageId, Result},
};
use parking_lot::Mutex;
use tempfile::TempDir;

pub const PAGE_SIZE: u32 = 1024;
pub const SALT: u64 = 0x5EED;

/// Heap pointer stored for `key` in hand-built leaves.
pub fn row(key: i64) -> HeapPointer {
    HeapPointer::new(key as u32 + 1, 1)
}

pub fn leaf_tuple(key: i64) -> EntryTuple {
    EntryTuple::leaf(1, NullCategory::NotNull, int64_key(key), vec![row(key)])
}

pub fn downlink(key: i64, child: u64) -> EntryTuple {
    EntryTuple::downlink(1, NullCategory::NotNull, int64_key(key), PageId(child))
}

/// Renders an entry page holding `tuples` in order.
pub fn entry_page(
    id: u64,
    page_flags: u16,
    tuples: &[EntryTuple],
    right_link: Option<u64>,
) -> Result<Vec<u8>> {
    let mut page = PageBuilder::entry(PageId(id), PAGE_SIZE, SALT, page_flags)?;
    for tuple in tuples {
        page.add_tuple(&tuple.encode()?)?;
    }
    page.set_right_link(right_link.map(PageId));
    page.set_lsn(Lsn(1));
    page.finish()
}

pub fn leaf_page(id: u64, keys: impl IntoIterator<Item = i64>, right_link: Option<u64>) -> Result<Vec<u8>> {
    let tuples: Vec<EntryTuple> = keys.into_iter().map(leaf_tuple).collect();
    entry_page(id, flags::LEAF, &tuples, right_link)
}

pub fn internal_page(id: u64, downlinks: &[(i64, u64)], right_link: Option<u64>) -> Result<Vec<u8>> {
    let tuples: Vec<EntryTuple> = downlinks
        .iter()
        .map(|&(key, child)| downlink(key, child))
        .collect();
    entry_page(id, 0, &tuples, right_link)
}

/// Raw data leaf holding `items` as given, without validation.
pub fn data_leaf(id: u64, items: &[HeapPointer], right_link: Option<u64>) -> Result<Vec<u8>> {
    let mut page = PageBuilder::data(PageId(id), PAGE_SIZE, SALT, flags::LEAF)?;
    page.set_heap_pointers(items)?;
    page.set_right_bound(items.last().copied().unwrap_or_default());
    page.set_right_link(right_link.map(PageId));
    page.finish()
}

/// Compressed data leaf holding `items`; `max_offset` matches the list.
pub fn compressed_data_leaf(id: u64, items: &[HeapPointer]) -> Result<Vec<u8>> {
    let mut page =
        PageBuilder::data(PageId(id), PAGE_SIZE, SALT, flags::LEAF | flags::COMPRESSED)?;
    page.set_heap_pointers(items)?;
    page.set_right_bound(items.last().copied().unwrap_or_default());
    page.finish()
}

pub fn data_internal(id: u64, items: &[PostingItem]) -> Result<Vec<u8>> {
    let mut page = PageBuilder::data(PageId(id), PAGE_SIZE, SALT, 0)?;
    for item in items {
        page.add_posting_item(*item)?;
    }
    page.finish()
}

/// Catalog with one table and one GIN index over `store`.
pub struct Registered {
    pub catalog: Catalog,
    pub table: RelationId,
    pub index: RelationId,
}

pub fn register(store: Arc<dyn PageStore>) -> Registered {
    register_with(store, AccessMethod::Gin, Persistence::Permanent)
}

pub fn register_with(
    store: Arc<dyn PageStore>,
    access_method: AccessMethod,
    persistence: Persistence,
) -> Registered {
    let catalog = Catalog::new();
    let table = catalog.create_table("docs", Persistence::Permanent);
    let index = catalog
        .create_index("docs_gin", table, access_method, persistence, store)
        .expect("register index");
    Registered {
        catalog,
        table,
        index,
    }
}

/// Index file written page by page.
pub struct ManualIndex {
    pub dir: TempDir,
    pub pager: Arc<Pager>,
}

impl ManualIndex {
    /// Creates the file and its metapage for one `Int64` attribute.
    pub fn create() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let pager = Pager::create(
            dir.path().join("manual.gin"),
            PagerOptions {
                page_size: PAGE_SIZE,
                cache_pages: 16,
            },
        )?;
        let meta = GinMeta {
            salt: SALT,
            key_types: [KeyType::Int64].into_iter().collect(),
            entry_pages: 0,
            data_pages: 0,
            entries: 0,
        };
        pager.write_page(META_BLOCK, &meta.encode(PAGE_SIZE)?)?;
        Ok(Self {
            dir,
            pager: Arc::new(pager),
        })
    }

    pub fn put(&self, id: u64, image: Vec<u8>) -> Result<()> {
        self.pager.write_page(PageId(id), &image)
    }

    pub fn read(&self, id: u64) -> Result<Vec<u8>> {
        Ok(self.pager.read_shared(PageId(id))?.data().to_vec())
    }

    /// Applies `edit` to page `id`, restamping the checksum afterwards.
    pub fn tamper(&self, id: u64, edit: impl FnOnce(&mut Vec<u8>)) -> Result<()> {
        let mut image = self.read(id)?;
        edit(&mut image);
        stamp_crc32(&mut image)?;
        self.put(id, image)
    }

    /// Rewrites the opaque area of page `id`.
    pub fn tamper_opaque(&self, id: u64, edit: impl FnOnce(&mut Opaque)) -> Result<()> {
        let mut image = self.read(id)?;
        let mut opaque = Opaque::decode(&image)?;
        edit(&mut opaque);
        opaque.encode(&mut image)?;
        stamp_crc32(&mut image)?;
        self.put(id, image)
    }
}

/// Root (block 1) over three leaves: keys 1..=10 on block 2, 11..=20 on
/// block 3 and 21..=30 on block 4. The downlink for block 3 carries
/// `middle_key`.
pub fn three_leaf_tree(middle_key: i64) -> Result<ManualIndex> {
    let index = ManualIndex::create()?;
    index.put(1, internal_page(1, &[(10, 2), (middle_key, 3), (30, 4)], None)?)?;
    index.put(2, leaf_page(2, 1..=10, Some(3))?)?;
    index.put(3, leaf_page(3, 11..=20, Some(4))?)?;
    index.put(4, leaf_page(4, 21..=30, None)?)?;
    Ok(index)
}

struct ScriptedWrite {
    trigger: PageId,
    nth_read: usize,
    target: PageId,
    image: Vec<u8>,
}

/// Page store that replays scripted writes just before a given read, the
/// way a concurrent writer would slip in between two page visits.
pub struct ScriptedStore {
    inner: Arc<Pager>,
    reads: Mutex<HashMap<PageId, usize>>,
    script: Mutex<Vec<ScriptedWrite>>,
}

impl ScriptedStore {
    pub fn new(inner: Arc<Pager>) -> Self {
        Self {
            inner,
            reads: Mutex::new(HashMap::new()),
            script: Mutex::new(Vec::new()),
        }
    }

    /// Before the `nth_read`-th read (1-based) of `trigger`, write `image`
    /// to `target`.
    pub fn before_read(&self, trigger: u64, nth_read: usize, target: u64, image: Vec<u8>) {
        self.script.lock().push(ScriptedWrite {
            trigger: PageId(trigger),
            nth_read,
            target: PageId(target),
            image,
        });
    }

    pub fn reads_of(&self, id: u64) -> usize {
        self.reads.lock().get(&PageId(id)).copied().unwrap_or(0)
    }

    pub fn pending(&self) -> usize {
        self.script.lock().len()
    }
}

impl PageStore for ScriptedStore {
    fn page_size(&self) -> u32 {
        self.inner.page_size()
    }

    fn page_count(&self) -> Result<u64> {
        self.inner.page_count()
    }

    fn read_shared(&self, id: PageId) -> Result<PageRef> {
        let nth = {
            let mut reads = self.reads.lock();
            let count = reads.entry(id).or_insert(0);
            *count += 1;
            *count
        };
        let due: Vec<ScriptedWrite> = {
            let mut script = self.script.lock();
            let (due, keep): (Vec<_>, Vec<_>) = script
                .drain(..)
                .partition(|write| write.trigger == id && write.nth_read == nth);
            *script = keep;
            due
        };
        for write in due {
            self.inner.write_page(write.target, &write.image)?;
        }
        self.inner.read_shared(id)
    }
}
