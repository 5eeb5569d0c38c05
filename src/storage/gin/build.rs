//! Bulk construction of a GIN index file from a set of entries.
//!
//! Pages are written bottom-up: posting trees first, then the entry tree
//! leaves and internal levels. The entry root always lands on block 1 and
//! the metapage on block 0.

use std::cmp::Ordering;

use tracing::{debug, info};

use super::compare::{EntryKey, KeyComparator, KeyType, NullCategory};
use super::meta::{GinMeta, META_BLOCK};
use super::page::{
    flags, PageBuilder, PostingItem, CONTENT_START, LINE_POINTER_LEN, POSTING_ITEM_LEN, ROOT_BLOCK,
};
use super::tuple::{
    maxalign, EntryTuple, InlineList, ListFormat, PostingPayload, ENTRY_TUPLE_HEADER_LEN,
};
use crate::primitives::pager::{PageStore, Pager};
use crate::types::{page::PageKind, GinError, HeapPointer, Lsn, PageId, Result, HEAP_POINTER_LEN};

/// One key of the index and the rows containing it.
#[derive(Clone, Debug)]
pub struct IndexEntry {
    /// 1-based attribute.
    pub attnum: u16,
    /// Null category of the key.
    pub category: NullCategory,
    /// Key bytes in the attribute's key type encoding.
    pub key: Vec<u8>,
    /// Rows containing the key.
    pub postings: Vec<HeapPointer>,
}

impl IndexEntry {
    /// Entry with an ordinary key.
    pub fn new(attnum: u16, key: impl Into<Vec<u8>>, postings: Vec<HeapPointer>) -> Self {
        Self {
            attnum,
            category: NullCategory::NotNull,
            key: key.into(),
            postings,
        }
    }

    /// Entry for a placeholder category such as [`NullCategory::NullItem`].
    pub fn placeholder(attnum: u16, category: NullCategory, postings: Vec<HeapPointer>) -> Self {
        Self {
            attnum,
            category,
            key: Vec::new(),
            postings,
        }
    }
}

impl EntryKey for IndexEntry {
    fn attnum(&self) -> u16 {
        self.attnum
    }

    fn category(&self) -> NullCategory {
        self.category
    }

    fn key(&self) -> &[u8] {
        &self.key
    }
}

/// Knobs for [`build_index`].
#[derive(Clone, Debug)]
pub struct BuildOptions {
    /// Key type of each attribute, attribute 1 first.
    pub key_types: Vec<KeyType>,
    /// Compress inline lists and posting tree leaves.
    pub compress_postings: bool,
    /// Longest posting list kept inline before a posting tree is built.
    pub max_inline_postings: usize,
    /// Percentage of each page filled before starting the next.
    pub fill_percent: u8,
    /// Checksum salt; random when `None`.
    pub salt: Option<u64>,
    /// LSN stamped on every page.
    pub lsn: Lsn,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            key_types: vec![KeyType::Int64],
            compress_postings: true,
            max_inline_postings: 32,
            fill_percent: 100,
            salt: None,
            lsn: Lsn(1),
        }
    }
}

/// Layout of the written index.
#[derive(Clone, Debug, Default)]
pub struct BuildSummary {
    /// Checksum salt used.
    pub salt: u64,
    /// Entry tree blocks per level, leaves first; the last level is the root.
    pub entry_levels: Vec<Vec<PageId>>,
    /// Root block of every posting tree, in entry order.
    pub posting_roots: Vec<PageId>,
    /// Entry pages written.
    pub entry_pages: u64,
    /// Posting tree pages written.
    pub data_pages: u64,
    /// Entries stored.
    pub entries: u64,
}

/// Writes a complete index for `entries` through `pager`.
///
/// Entries are sorted with the attribute comparators; duplicate keys and
/// invalid heap pointers are rejected.
pub fn build_index(
    pager: &Pager,
    mut entries: Vec<IndexEntry>,
    options: &BuildOptions,
) -> Result<BuildSummary> {
    if options.key_types.is_empty() {
        return Err(GinError::Invalid("index needs at least one attribute"));
    }
    if !(1..=100).contains(&options.fill_percent) {
        return Err(GinError::Invalid("fill percent must be within 1..=100"));
    }
    let comparator = KeyComparator::new(options.key_types.iter().copied());
    sort_entries(&comparator, &mut entries)?;
    for entry in &mut entries {
        entry.postings.sort();
        entry.postings.dedup();
        if entry.postings.iter().any(|p| !p.is_valid()) {
            return Err(GinError::Invalid("entry references an invalid heap pointer"));
        }
    }

    let salt = options.salt.unwrap_or_else(rand::random);
    let mut writer = Writer {
        pager,
        page_size: pager.page_size(),
        salt,
        options,
        next_block: ROOT_BLOCK.0 + 1,
        summary: BuildSummary {
            salt,
            entries: entries.len() as u64,
            ..BuildSummary::default()
        },
    };

    let mut leaf_tuples = Vec::with_capacity(entries.len());
    for entry in entries {
        leaf_tuples.push(writer.leaf_tuple(entry)?);
    }
    writer.write_entry_tree(leaf_tuples)?;

    let meta = GinMeta {
        salt,
        key_types: options.key_types.iter().copied().collect(),
        entry_pages: writer.summary.entry_pages,
        data_pages: writer.summary.data_pages,
        entries: writer.summary.entries,
    };
    pager.write_page(META_BLOCK, &meta.encode(writer.page_size)?)?;
    pager.sync()?;
    info!(
        entries = writer.summary.entries,
        entry_pages = writer.summary.entry_pages,
        data_pages = writer.summary.data_pages,
        "gin.build.done"
    );
    Ok(writer.summary)
}

fn sort_entries(comparator: &KeyComparator, entries: &mut [IndexEntry]) -> Result<()> {
    for entry in entries.iter() {
        // Comparing an entry with itself validates its attribute and key.
        comparator.compare_entries(entry, entry)?;
    }
    let mut failure = None;
    entries.sort_by(|a, b| {
        comparator.compare_entries(a, b).unwrap_or_else(|err| {
            failure.get_or_insert(err);
            Ordering::Equal
        })
    });
    if let Some(err) = failure {
        return Err(err);
    }
    for pair in entries.windows(2) {
        if comparator.compare_entries(&pair[0], &pair[1])? != Ordering::Less {
            return Err(GinError::Invalid("duplicate index entry"));
        }
    }
    Ok(())
}

struct Writer<'a> {
    pager: &'a Pager,
    page_size: u32,
    salt: u64,
    options: &'a BuildOptions,
    next_block: u64,
    summary: BuildSummary,
}

impl Writer<'_> {
    fn allocate(&mut self) -> PageId {
        let id = PageId(self.next_block);
        self.next_block += 1;
        id
    }

    fn budget(&self) -> usize {
        (self.page_size as usize - CONTENT_START) * self.options.fill_percent as usize / 100
    }

    fn list_format(&self) -> ListFormat {
        if self.options.compress_postings {
            ListFormat::Compressed
        } else {
            ListFormat::Raw
        }
    }

    fn leaf_tuple(&mut self, entry: IndexEntry) -> Result<EntryTuple> {
        // Internal pages must fit two downlinks so that every level shrinks.
        let downlink_cost =
            LINE_POINTER_LEN + maxalign(ENTRY_TUPLE_HEADER_LEN + entry.key.len() + 8);
        if 2 * downlink_cost > self.budget() {
            return Err(GinError::Invalid("entry key too large for a page"));
        }
        let max_space = self.page_size as usize - CONTENT_START;
        if entry.postings.is_empty() || entry.postings.len() <= self.options.max_inline_postings {
            let tuple = EntryTuple {
                attnum: entry.attnum,
                category: entry.category,
                key: entry.key.clone(),
                payload: PostingPayload::Inline(InlineList::new(
                    &entry.postings,
                    self.list_format(),
                )?),
            };
            if LINE_POINTER_LEN + maxalign(tuple.encoded_len()) <= max_space {
                return Ok(tuple);
            }
        }
        let root = self.write_posting_tree(&entry.postings)?;
        self.summary.posting_roots.push(root);
        Ok(EntryTuple {
            attnum: entry.attnum,
            category: entry.category,
            key: entry.key,
            payload: PostingPayload::PostingTree(root),
        })
    }

    fn write_posting_tree(&mut self, items: &[HeapPointer]) -> Result<PageId> {
        let space = self.budget();
        let per_leaf = if self.options.compress_postings {
            // Worst case: one segment header per item.
            space / (HEAP_POINTER_LEN + 2)
        } else {
            space / HEAP_POINTER_LEN
        };
        let leaf_flags = if self.options.compress_postings {
            flags::LEAF | flags::COMPRESSED
        } else {
            flags::LEAF
        };

        let chunks: Vec<&[HeapPointer]> = items.chunks(per_leaf.max(1)).collect();
        let ids: Vec<PageId> = chunks.iter().map(|_| self.allocate()).collect();
        let mut level = Vec::with_capacity(chunks.len());
        for (idx, chunk) in chunks.iter().enumerate() {
            let bound = chunk.last().copied().unwrap_or_default();
            let mut page = PageBuilder::data(ids[idx], self.page_size, self.salt, leaf_flags)?;
            page.set_heap_pointers(chunk)?;
            page.set_right_bound(bound);
            page.set_right_link(ids.get(idx + 1).copied());
            page.set_lsn(self.options.lsn);
            self.write(page)?;
            level.push(PostingItem {
                key: bound,
                child: ids[idx],
            });
        }

        let per_internal = (space / POSTING_ITEM_LEN).max(2);
        while level.len() > 1 {
            let groups: Vec<&[PostingItem]> = level.chunks(per_internal).collect();
            let ids: Vec<PageId> = groups.iter().map(|_| self.allocate()).collect();
            let mut parents = Vec::with_capacity(groups.len());
            for (idx, group) in groups.iter().enumerate() {
                let mut page = PageBuilder::data(ids[idx], self.page_size, self.salt, 0)?;
                for item in group.iter() {
                    page.add_posting_item(*item)?;
                }
                let bound = group.last().map(|item| item.key).unwrap_or_default();
                page.set_right_bound(bound);
                page.set_right_link(ids.get(idx + 1).copied());
                page.set_lsn(self.options.lsn);
                self.write(page)?;
                parents.push(PostingItem {
                    key: bound,
                    child: ids[idx],
                });
            }
            level = parents;
        }
        let root = level
            .first()
            .map(|item| item.child)
            .ok_or(GinError::Invalid("posting tree without pages"))?;
        debug!(root = root.0, items = items.len(), "gin.build.posting_tree");
        Ok(root)
    }

    fn pack(&self, tuples: Vec<EntryTuple>) -> Vec<Vec<EntryTuple>> {
        let budget = self.budget();
        let mut pages = Vec::new();
        let mut current: Vec<EntryTuple> = Vec::new();
        let mut used = 0usize;
        for tuple in tuples {
            let cost = LINE_POINTER_LEN + maxalign(tuple.encoded_len());
            if !current.is_empty() && used + cost > budget {
                pages.push(std::mem::take(&mut current));
                used = 0;
            }
            used += cost;
            current.push(tuple);
        }
        if !current.is_empty() || pages.is_empty() {
            pages.push(current);
        }
        pages
    }

    fn write_entry_tree(&mut self, leaf_tuples: Vec<EntryTuple>) -> Result<()> {
        let mut levels = vec![self.pack(leaf_tuples)];
        loop {
            let below = &levels[levels.len() - 1];
            if below.len() <= 1 {
                break;
            }
            let mut downlinks = Vec::with_capacity(below.len());
            for page in below {
                let high = page
                    .last()
                    .ok_or(GinError::Invalid("empty non-root entry page"))?;
                downlinks.push(EntryTuple::downlink(
                    high.attnum,
                    high.category,
                    high.key.clone(),
                    PageId(0),
                ));
            }
            let packed = self.pack(downlinks);
            levels.push(packed);
        }

        // Root on block 1, everything else after the posting trees.
        let height = levels.len();
        let mut ids: Vec<Vec<PageId>> = Vec::with_capacity(height);
        for (depth, level) in levels.iter().enumerate() {
            if depth + 1 == height {
                ids.push(vec![ROOT_BLOCK]);
            } else {
                ids.push(level.iter().map(|_| self.allocate()).collect());
            }
        }

        for (depth, level) in levels.into_iter().enumerate() {
            let page_flags = if depth == 0 { flags::LEAF } else { 0 };
            let mut child_idx = 0usize;
            for (idx, tuples) in level.into_iter().enumerate() {
                let id = ids[depth][idx];
                let mut page = PageBuilder::entry(id, self.page_size, self.salt, page_flags)?;
                for mut tuple in tuples {
                    if depth > 0 {
                        tuple.payload = PostingPayload::Downlink(ids[depth - 1][child_idx]);
                        child_idx += 1;
                    }
                    page.add_tuple(&tuple.encode()?)?;
                }
                page.set_right_link(ids[depth].get(idx + 1).copied());
                page.set_lsn(self.options.lsn);
                self.write(page)?;
            }
        }
        self.summary.entry_levels = ids;
        Ok(())
    }

    fn write(&mut self, page: PageBuilder) -> Result<()> {
        let id = page.id();
        let is_data = page.kind() == PageKind::Data;
        let image = page.finish()?;
        self.pager.write_page(id, &image)?;
        if is_data {
            self.summary.data_pages += 1;
        } else {
            self.summary.entry_pages += 1;
        }
        Ok(())
    }
}
