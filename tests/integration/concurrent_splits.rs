#![allow(missing_docs)]

mod support;

use std::error::Error;
use std::sync::Arc;

use gincheck::admin::{verify, Corruption, VerifyOptions, VerifySeverity};
use gincheck::types::PageId;
use support::{internal_page, leaf_page, register, three_leaf_tree, ManualIndex, ScriptedStore};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn vanished_downlink_becomes_a_notice() -> TestResult {
    let index = three_leaf_tree(15)?;
    let store = Arc::new(ScriptedStore::new(index.pager.clone()));
    // The downlink for block 3 disappears while block 2 is being checked.
    store.before_read(3, 1, 1, internal_page(1, &[(10, 2), (30, 4)], None)?);

    let reg = register(store.clone());
    let report = verify(&reg.catalog, reg.index, &VerifyOptions::default())?;
    assert_eq!(store.pending(), 0);
    assert_eq!(store.reads_of(1), 2);

    let notices: Vec<_> = report
        .notices
        .iter()
        .filter(|n| n.severity == VerifySeverity::Notice)
        .collect();
    assert_eq!(notices.len(), 1);
    assert_eq!(
        notices[0].message,
        "Unable to find parent tuple for block 3 on block 1 due to concurrent split"
    );
    assert_eq!(report.counts.parents_refound, 0);
    assert_eq!(report.counts.entry_leaf_pages, 3);
    Ok(())
}

#[test]
fn stale_downlink_confirmed_on_reread_is_corruption() -> TestResult {
    let index = three_leaf_tree(15)?;
    let reg = register(index.pager.clone());
    let err = verify(&reg.catalog, reg.index, &VerifyOptions::default())
        .expect_err("keys above the downlink");

    let (block, offset, reason) = err.corruption().expect("corruption");
    assert_eq!(block, PageId(3));
    assert_eq!(offset, Some(10));
    assert_eq!(reason, &Corruption::InconsistentRecords);
    assert_eq!(
        err.to_string(),
        "index \"docs_gin\" has inconsistent records, block 3, offset 10"
    );
    Ok(())
}

#[test]
fn updated_downlink_found_on_reread_passes() -> TestResult {
    let index = three_leaf_tree(15)?;
    let store = Arc::new(ScriptedStore::new(index.pager.clone()));
    // A concurrent insert raised the downlink before block 3 was read.
    store.before_read(3, 1, 1, internal_page(1, &[(10, 2), (20, 3), (30, 4)], None)?);

    let reg = register(store);
    let report = verify(&reg.catalog, reg.index, &VerifyOptions::default())?;
    assert_eq!(report.counts.parents_refound, 1);
    assert!(report.notices.is_empty(), "{:?}", report.notices);
    Ok(())
}

#[test]
fn split_before_visit_is_followed_through_right_link() -> TestResult {
    let index = ManualIndex::create()?;
    index.put(1, internal_page(1, &[(10, 2), (20, 3)], None)?)?;
    index.put(2, leaf_page(2, 1..=10, Some(3))?)?;
    index.put(3, leaf_page(3, 11..=20, None)?)?;

    let store = Arc::new(ScriptedStore::new(index.pager.clone()));
    // Block 2 splits into 2 and a new block 4 after the root was read.
    store.before_read(2, 1, 4, leaf_page(4, 6..=10, Some(3))?);
    store.before_read(2, 1, 2, leaf_page(2, 1..=5, Some(4))?);

    let reg = register(store.clone());
    let report = verify(&reg.catalog, reg.index, &VerifyOptions::default())?;
    assert_eq!(report.counts.splits_detected, 1);
    assert_eq!(report.counts.entry_leaf_pages, 3);
    assert_eq!(report.counts.entry_tuples, 2 + 20);
    assert_eq!(store.reads_of(4), 1);
    assert!(report
        .notices
        .iter()
        .all(|n| n.severity == VerifySeverity::Info));
    assert_eq!(report.notices.len(), 1);
    assert_eq!(
        report.notices[0].message,
        "split detected on block 2, following right link to block 4"
    );
    assert_eq!(index.pager.stats().peak_pins, 1);
    Ok(())
}

#[test]
fn sibling_reached_twice_is_walked_once() -> TestResult {
    // Blocks 2 and 3 both sort below their downlinks and both link to 4.
    let index = ManualIndex::create()?;
    index.put(1, internal_page(1, &[(10, 2), (20, 3), (30, 4)], None)?)?;
    index.put(2, leaf_page(2, 1..=5, Some(4))?)?;
    index.put(3, leaf_page(3, 11..=15, Some(4))?)?;
    index.put(4, leaf_page(4, 21..=30, None)?)?;

    let store = Arc::new(ScriptedStore::new(index.pager.clone()));
    let reg = register(store.clone());
    let report = verify(&reg.catalog, reg.index, &VerifyOptions::default())?;
    assert_eq!(report.counts.splits_detected, 2);
    // Once through the split on block 2 and once through its own downlink.
    assert_eq!(store.reads_of(4), 2);
    assert_eq!(
        report
            .notices
            .iter()
            .filter(|n| n.severity == VerifySeverity::Info)
            .count(),
        1
    );
    Ok(())
}

#[test]
fn walk_holds_one_page_lock_at_a_time() -> TestResult {
    let index = three_leaf_tree(20)?;
    let reg = register(index.pager.clone());
    verify(&reg.catalog, reg.index, &VerifyOptions::default())?;
    let stats = index.pager.stats();
    assert_eq!(stats.peak_pins, 1);
    assert_eq!(stats.active_pins, 0);
    Ok(())
}
