#![allow(missing_docs)]

mod support;

use std::error::Error;
use std::sync::Arc;

use gincheck::{
    admin::{
        verify, CheckError, Corruption, DefaultPageSanity, VerifyOptions, VerifyReport,
        VerifySeverity,
    },
    primitives::pager::{Pager, PagerOptions},
    storage::gin::{
        build_index, flags, int64_key, BuildOptions, EntryTuple, IndexEntry, InlineList,
        ListFormat, NullCategory, PostingItem, PostingPayload, CONTENT_START,
    },
    types::{HeapPointer, PageId},
};
use support::{
    compressed_data_leaf, data_internal, data_leaf, entry_page, internal_page, leaf_page, leaf_tuple, register,
    three_leaf_tree, ManualIndex, PAGE_SIZE,
};

type TestResult = Result<(), Box<dyn Error>>;

fn run(index: &ManualIndex, options: &VerifyOptions) -> Result<VerifyReport, CheckError> {
    let reg = register(index.pager.clone());
    verify(&reg.catalog, reg.index, options)
}

fn expect_corruption(
    result: Result<VerifyReport, CheckError>,
) -> (PageId, Option<u16>, Corruption) {
    match result {
        Err(err) => {
            let (block, offset, reason) = err
                .corruption()
                .unwrap_or_else(|| panic!("expected corruption, got {err}"));
            (block, offset, reason.clone())
        }
        Ok(report) => panic!("expected corruption, got {report:?}"),
    }
}

fn posting_tree_tuple(key: i64, root: u64) -> EntryTuple {
    EntryTuple {
        attnum: 1,
        category: NullCategory::NotNull,
        key: int64_key(key),
        payload: PostingPayload::PostingTree(PageId(root)),
    }
}

/// Rewrites the line pointer of item `offset` on page `id`.
fn tamper_line_pointer(
    index: &ManualIndex,
    id: u64,
    offset: usize,
    edit: impl FnOnce(u32) -> u32,
) -> TestResult {
    index.tamper(id, |image| {
        let pos = CONTENT_START + (offset - 1) * 4;
        let bits =
            u32::from_be_bytes([image[pos], image[pos + 1], image[pos + 2], image[pos + 3]]);
        image[pos..pos + 4].copy_from_slice(&edit(bits).to_be_bytes());
    })?;
    Ok(())
}

/// Entry root leaf pointing at a posting tree on block 2: an internal page
/// over leaves 3 (up to (5,1)) and 4 (unbounded).
fn posting_tree_index() -> Result<ManualIndex, Box<dyn Error>> {
    let index = ManualIndex::create()?;
    index.put(
        1,
        entry_page(1, flags::LEAF, &[leaf_tuple(1), posting_tree_tuple(7, 2)], None)?,
    )?;
    index.put(
        2,
        data_internal(
            2,
            &[
                PostingItem {
                    key: HeapPointer::new(5, 1),
                    child: PageId(3),
                },
                PostingItem {
                    key: HeapPointer::default(),
                    child: PageId(4),
                },
            ],
        )?,
    )?;
    index.put(
        3,
        data_leaf(3, &[HeapPointer::new(1, 1), HeapPointer::new(5, 1)], Some(4))?,
    )?;
    index.put(
        4,
        data_leaf(4, &[HeapPointer::new(6, 1), HeapPointer::new(9, 1)], None)?,
    )?;
    Ok(index)
}

#[test]
fn clean_three_leaf_tree_passes() -> TestResult {
    let index = three_leaf_tree(20)?;
    let report = run(&index, &VerifyOptions::default())?;
    assert!(!report.skipped);
    assert!(report.notices.is_empty(), "{:?}", report.notices);
    assert_eq!(report.relation, "docs_gin");
    assert_eq!(report.counts.entry_pages, 4);
    assert_eq!(report.counts.entry_leaf_pages, 3);
    assert_eq!(report.counts.entry_tuples, 33);
    assert_eq!(report.counts.heap_pointers, 30);
    assert_eq!(report.counts.leaf_depth, Some(1));
    assert_eq!(report.counts.splits_detected, 0);
    Ok(())
}

#[test]
fn leaf_below_expected_depth_is_reported() -> TestResult {
    let index = ManualIndex::create()?;
    index.put(1, internal_page(1, &[(10, 2), (30, 3)], None)?)?;
    index.put(2, leaf_page(2, 1..=10, None)?)?;
    index.put(3, internal_page(3, &[(30, 4)], None)?)?;
    index.put(4, leaf_page(4, 21..=30, None)?)?;

    let (block, offset, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!(block, PageId(4));
    assert_eq!(offset, None);
    assert_eq!(
        reason,
        Corruption::LeafDepthMismatch {
            depth: 2,
            expected: 1
        }
    );
    Ok(())
}

#[test]
fn inline_count_mismatch_is_reported() -> TestResult {
    let items: Vec<HeapPointer> = (1..=4).map(|b| HeapPointer::new(b, 1)).collect();
    let mut list = InlineList::new(&items, ListFormat::Raw)?;
    list.declared = 5;
    let broken = EntryTuple {
        attnum: 1,
        category: NullCategory::NotNull,
        key: int64_key(2),
        payload: PostingPayload::Inline(list),
    };
    let index = ManualIndex::create()?;
    index.put(1, entry_page(1, flags::LEAF, &[leaf_tuple(1), broken], None)?)?;

    let (block, offset, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!((block, offset), (PageId(1), Some(2)));
    assert_eq!(
        reason,
        Corruption::PostingCountMismatch {
            declared: 5,
            decoded: 4
        }
    );

    // Without posting validation the list is never decoded.
    let options = VerifyOptions {
        validate_postings: false,
        ..VerifyOptions::default()
    };
    let report = run(&index, &options)?;
    assert_eq!(report.counts.entry_tuples, 2);
    assert_eq!(report.counts.heap_pointers, 0);
    Ok(())
}

#[test]
fn posting_tree_with_zero_offset_pointer_is_reported() -> TestResult {
    let index = ManualIndex::create()?;
    index.put(1, entry_page(1, flags::LEAF, &[posting_tree_tuple(3, 2)], None)?)?;
    let bad = HeapPointer::new(2, 0);
    index.put(2, data_leaf(2, &[HeapPointer::new(1, 1), bad], None)?)?;

    let (block, offset, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!((block, offset), (PageId(2), None));
    assert_eq!(reason, Corruption::InvalidHeapPointer(bad));
    Ok(())
}

#[test]
fn clean_posting_tree_is_walked() -> TestResult {
    let index = posting_tree_index()?;
    let report = run(&index, &VerifyOptions::default())?;
    assert_eq!(report.counts.posting_trees, 1);
    assert_eq!(report.counts.posting_pages, 3);
    // One inline pointer plus four in the posting tree.
    assert_eq!(report.counts.heap_pointers, 5);
    Ok(())
}

#[test]
fn posting_leaf_above_its_right_bound_is_reported() -> TestResult {
    let index = posting_tree_index()?;
    index.tamper_opaque(3, |opaque| opaque.right_bound = HeapPointer::new(4, 1))?;

    let (block, _, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!(block, PageId(3));
    assert_eq!(
        reason,
        Corruption::RightBoundExceeded {
            pointer: HeapPointer::new(5, 1),
            bound: HeapPointer::new(4, 1),
        }
    );
    Ok(())
}

#[test]
fn posting_page_bound_above_parent_item_is_reported() -> TestResult {
    let index = posting_tree_index()?;
    index.tamper_opaque(3, |opaque| opaque.right_bound = HeapPointer::new(7, 1))?;

    let (block, _, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!(block, PageId(3));
    assert_eq!(
        reason,
        Corruption::RightBoundAboveParent {
            bound: HeapPointer::new(7, 1),
            parent: HeapPointer::new(5, 1),
            parent_block: PageId(2),
        }
    );
    Ok(())
}

#[test]
fn posting_leaves_at_different_depths_are_reported() -> TestResult {
    let index = ManualIndex::create()?;
    index.put(1, entry_page(1, flags::LEAF, &[posting_tree_tuple(7, 2)], None)?)?;
    index.put(
        2,
        data_internal(
            2,
            &[
                PostingItem {
                    key: HeapPointer::new(5, 1),
                    child: PageId(3),
                },
                PostingItem {
                    key: HeapPointer::default(),
                    child: PageId(4),
                },
            ],
        )?,
    )?;
    index.put(
        3,
        data_leaf(3, &[HeapPointer::new(1, 1), HeapPointer::new(5, 1)], None)?,
    )?;
    index.put(
        4,
        data_internal(
            4,
            &[PostingItem {
                key: HeapPointer::default(),
                child: PageId(5),
            }],
        )?,
    )?;
    index.put(
        5,
        data_leaf(5, &[HeapPointer::new(6, 1), HeapPointer::new(9, 1)], None)?,
    )?;

    let err = run(&index, &VerifyOptions::default()).unwrap_err();
    assert!(
        err.to_string()
            .contains("encountered leaf page unexpectedly at depth 2 (leaves seen at depth 1)"),
        "{err}"
    );
    let (block, offset, reason) = expect_corruption(Err(err));
    assert_eq!((block, offset), (PageId(5), None));
    assert_eq!(
        reason,
        Corruption::LeafDepthMismatch {
            depth: 2,
            expected: 1
        }
    );
    Ok(())
}

#[test]
fn posting_item_pointing_at_its_own_page_stops_at_depth_limit() -> TestResult {
    let index = ManualIndex::create()?;
    index.put(1, entry_page(1, flags::LEAF, &[posting_tree_tuple(7, 2)], None)?)?;
    index.put(
        2,
        data_internal(
            2,
            &[PostingItem {
                key: HeapPointer::default(),
                child: PageId(2),
            }],
        )?,
    )?;

    let (block, offset, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!((block, offset), (PageId(2), None));
    assert_eq!(reason, Corruption::TreeTooDeep(64));
    Ok(())
}

#[test]
fn entry_downlink_to_its_own_page_stops_at_depth_limit() -> TestResult {
    let index = ManualIndex::create()?;
    index.put(1, internal_page(1, &[(10, 1)], None)?)?;

    let (block, offset, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!((block, offset), (PageId(1), None));
    assert_eq!(reason, Corruption::TreeTooDeep(64));
    Ok(())
}

#[test]
fn compressed_posting_leaf_count_mismatch_is_reported() -> TestResult {
    let index = ManualIndex::create()?;
    index.put(1, entry_page(1, flags::LEAF, &[posting_tree_tuple(7, 2)], None)?)?;
    let items = [
        HeapPointer::new(2, 1),
        HeapPointer::new(2, 5),
        HeapPointer::new(8, 3),
    ];
    index.put(2, compressed_data_leaf(2, &items)?)?;
    assert!(run(&index, &VerifyOptions::default())?.notices.is_empty());

    index.tamper_opaque(2, |opaque| opaque.max_offset = 4)?;
    let (block, offset, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!((block, offset), (PageId(2), None));
    assert_eq!(
        reason,
        Corruption::PostingCountMismatch {
            declared: 4,
            decoded: 3
        }
    );
    Ok(())
}

#[test]
fn posting_items_out_of_order_are_reported() -> TestResult {
    let index = posting_tree_index()?;
    index.put(
        2,
        data_internal(
            2,
            &[
                PostingItem {
                    key: HeapPointer::new(5, 1),
                    child: PageId(3),
                },
                PostingItem {
                    key: HeapPointer::new(4, 1),
                    child: PageId(4),
                },
            ],
        )?,
    )?;

    let (block, offset, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!((block, offset), (PageId(2), Some(2)));
    assert_eq!(reason, Corruption::PostingItemOrder);
    Ok(())
}

#[test]
fn unset_key_before_the_last_item_is_reported() -> TestResult {
    let index = posting_tree_index()?;
    index.put(
        2,
        data_internal(
            2,
            &[
                PostingItem {
                    key: HeapPointer::default(),
                    child: PageId(3),
                },
                PostingItem {
                    key: HeapPointer::default(),
                    child: PageId(4),
                },
            ],
        )?,
    )?;

    let (block, offset, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!((block, offset), (PageId(2), Some(1)));
    assert_eq!(reason, Corruption::InvalidHeapPointer(HeapPointer::default()));
    Ok(())
}

#[test]
fn posting_root_on_entry_page_is_reported() -> TestResult {
    let index = ManualIndex::create()?;
    index.put(1, entry_page(1, flags::LEAF, &[posting_tree_tuple(3, 1)], None)?)?;

    let (block, _, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!(block, PageId(1));
    assert_eq!(
        reason,
        Corruption::WrongPageKind {
            found: "entry",
            tree: "posting"
        }
    );
    Ok(())
}

#[test]
fn deleted_internal_page_is_reported() -> TestResult {
    let index = three_leaf_tree(20)?;
    index.put(3, entry_page(3, flags::DELETED, &[], Some(4))?)?;

    let (block, _, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!(block, PageId(3));
    assert_eq!(reason, Corruption::DeletedInternalPage);
    Ok(())
}

#[test]
fn deleted_page_with_tuples_is_reported() -> TestResult {
    let index = three_leaf_tree(20)?;
    index.tamper_opaque(3, |opaque| opaque.flags |= flags::DELETED)?;

    let (block, _, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!(block, PageId(3));
    assert_eq!(reason, Corruption::DeletedPageWithTuples);
    Ok(())
}

#[test]
fn empty_deleted_leaf_is_skipped() -> TestResult {
    let index = three_leaf_tree(20)?;
    index.put(3, entry_page(3, flags::LEAF | flags::DELETED, &[], Some(4))?)?;

    let report = run(&index, &VerifyOptions::default())?;
    assert_eq!(report.counts.deleted_pages, 1);
    assert_eq!(report.counts.entry_leaf_pages, 2);
    Ok(())
}

#[test]
fn empty_internal_page_is_reported() -> TestResult {
    let index = three_leaf_tree(20)?;
    index.put(3, entry_page(3, 0, &[], Some(4))?)?;

    let (block, _, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!(block, PageId(3));
    assert_eq!(reason, Corruption::EmptyInternalPage);
    Ok(())
}

#[test]
fn line_pointer_past_page_end_is_reported() -> TestResult {
    let index = three_leaf_tree(20)?;
    tamper_line_pointer(&index, 1, 1, |bits| bits | 0x7fff)?;

    let (block, offset, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!((block, offset), (PageId(1), Some(1)));
    assert!(
        matches!(reason, Corruption::LinePointerPastEnd { len: 0x7fff, .. }),
        "{reason:?}"
    );
    Ok(())
}

#[test]
fn unused_line_pointer_is_reported() -> TestResult {
    let index = three_leaf_tree(20)?;
    tamper_line_pointer(&index, 1, 2, |bits| bits & !(0x3 << 15))?;

    let (block, offset, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!((block, offset), (PageId(1), Some(2)));
    assert!(
        matches!(reason, Corruption::InvalidLinePointer { flags: 0, .. }),
        "{reason:?}"
    );
    Ok(())
}

#[test]
fn line_pointer_length_disagreeing_with_tuple_is_reported() -> TestResult {
    let index = three_leaf_tree(20)?;
    tamper_line_pointer(&index, 1, 3, |bits| bits - 8)?;

    let (block, offset, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!((block, offset), (PageId(1), Some(3)));
    assert!(
        matches!(reason, Corruption::InconsistentTupleSize { .. }),
        "{reason:?}"
    );
    Ok(())
}

#[test]
fn misordered_leaf_tuples_are_reported() -> TestResult {
    let index = ManualIndex::create()?;
    index.put(1, leaf_page(1, [1, 3, 2], None)?)?;

    let (block, offset, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!((block, offset), (PageId(1), Some(3)));
    assert_eq!(reason, Corruption::WrongTupleOrder);
    Ok(())
}

#[test]
fn inflated_tuple_count_is_reported() -> TestResult {
    let index = three_leaf_tree(20)?;
    index.tamper_opaque(1, |opaque| opaque.max_offset = 500)?;

    let (block, offset, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!((block, offset), (PageId(1), None));
    assert!(
        matches!(reason, Corruption::TupleCountExceeded { count: 500, .. }),
        "{reason:?}"
    );
    Ok(())
}

#[test]
fn downlink_past_end_of_index_is_reported() -> TestResult {
    let index = ManualIndex::create()?;
    index.put(1, internal_page(1, &[(10, 2), (20, 99)], None)?)?;
    index.put(2, leaf_page(2, 1..=10, None)?)?;

    let (block, offset, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!((block, offset), (PageId(1), Some(2)));
    assert_eq!(reason, Corruption::InvalidBlockReference(PageId(99)));
    Ok(())
}

#[test]
fn checksum_mismatch_fails_sanity_unless_disabled() -> TestResult {
    let index = three_leaf_tree(20)?;
    // Byte 500 of block 2 lies in free space, so only the checksum changes.
    let mut image = index.read(2)?;
    image[500] ^= 0xff;
    index.put(2, image)?;

    let (block, _, reason) = expect_corruption(run(&index, &VerifyOptions::default()));
    assert_eq!(block, PageId(2));
    assert_eq!(reason, Corruption::Sanity("page checksum mismatch"));

    let options = VerifyOptions {
        sanity: Arc::new(DefaultPageSanity {
            verify_checksums: false,
        }),
        ..VerifyOptions::default()
    };
    let report = run(&index, &options)?;
    assert!(report.notices.is_empty());
    Ok(())
}

#[test]
fn built_index_with_posting_trees_passes() -> TestResult {
    let dir = tempfile::tempdir()?;
    let pager = Pager::create(
        dir.path().join("built.gin"),
        PagerOptions {
            page_size: PAGE_SIZE,
            cache_pages: 32,
        },
    )?;
    let entries: Vec<IndexEntry> = (1..=400u32)
        .map(|key| {
            let count = if key % 50 == 0 { 120 } else { key % 5 + 1 };
            let postings = (0..count)
                .map(|i| HeapPointer::new(key + 1, i as u16 + 1))
                .collect();
            IndexEntry::new(1, int64_key(key as i64), postings)
        })
        .collect();
    let expected_pointers: u64 = entries.iter().map(|e| e.postings.len() as u64).sum();
    let summary = build_index(&pager, entries, &BuildOptions::default())?;
    assert!(!summary.posting_roots.is_empty());
    assert!(summary.entry_levels.len() > 1);

    let reg = register(Arc::new(pager));
    let report = verify(&reg.catalog, reg.index, &VerifyOptions::default())?;
    assert!(report.notices.is_empty(), "{:?}", report.notices);
    assert_eq!(report.counts.posting_trees, summary.posting_roots.len() as u64);
    assert_eq!(report.counts.heap_pointers, expected_pointers);
    assert!(report.counts.entry_tuples >= 400);
    assert_eq!(
        report.counts.leaf_depth,
        Some(summary.entry_levels.len() as u32 - 1)
    );

    let keys_only = VerifyOptions {
        validate_postings: false,
        ..VerifyOptions::default()
    };
    let report = verify(&reg.catalog, reg.index, &keys_only)?;
    assert_eq!(report.counts.posting_trees, 0);
    assert_eq!(report.counts.heap_pointers, 0);
    assert!(report
        .notices
        .iter()
        .all(|n| n.severity != VerifySeverity::Notice));
    Ok(())
}
