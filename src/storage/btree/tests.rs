use super::{page, BTree};
use crate::primitives::pager::{AtomicOperation, MemPager, PageAccess, PageStore};
use crate::types::{PageId, Result, ScanDirection};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::ops::Bound;

// 256-byte pages hold 12 records of u64 -> u64, so splits happen early.
const SMALL_PAGE: u32 = 256;

fn new_tree(pager: &MemPager) -> Result<BTree<u64, u64>> {
    let mut op = pager.begin_atomic()?;
    let tree = BTree::create(op.as_mut())?;
    op.commit()?;
    Ok(tree)
}

fn collect(
    tree: &BTree<u64, u64>,
    pages: &dyn PageAccess,
    lo: Bound<u64>,
    hi: Bound<u64>,
    direction: ScanDirection,
) -> Result<Vec<(u64, u64)>> {
    tree.range(pages, lo, hi, direction)?.collect()
}

fn leaf_depth(tree: &BTree<u64, u64>, pages: &dyn PageAccess) -> Result<usize> {
    let mut depth = 1;
    let mut current = tree.root_page();
    loop {
        let page = pages.page(current)?;
        let header = page::Header::parse(page.data())?;
        if header.is_leaf() {
            return Ok(depth);
        }
        depth += 1;
        current = header.leftmost_child.unwrap_or(PageId(0));
    }
}

#[test]
fn empty_tree_get_returns_none() -> Result<()> {
    let pager = MemPager::new(SMALL_PAGE)?;
    let tree = new_tree(&pager)?;
    assert!(tree.get(&pager, &42)?.is_none());
    assert!(collect(&tree, &pager, Bound::Unbounded, Bound::Unbounded, ScanDirection::Ascending)?.is_empty());
    Ok(())
}

#[test]
fn put_reports_new_keys_and_overwrites() -> Result<()> {
    let pager = MemPager::new(SMALL_PAGE)?;
    let tree = new_tree(&pager)?;
    let mut op = pager.begin_atomic()?;
    assert!(tree.put(op.as_mut(), &5, &123)?);
    assert!(!tree.put(op.as_mut(), &5, &124)?);
    assert_eq!(tree.get(op.pages(), &5)?, Some(124));
    op.commit()?;
    assert_eq!(tree.get(&pager, &5)?, Some(124));
    assert_eq!(tree.stats().snapshot().updates, 1);
    Ok(())
}

#[test]
fn splits_keep_every_key_reachable() -> Result<()> {
    let pager = MemPager::new(SMALL_PAGE)?;
    let tree = new_tree(&pager)?;
    let mut op = pager.begin_atomic()?;
    for key in (0..2_000u64).rev() {
        tree.put(op.as_mut(), &key, &(key * 2))?;
    }
    op.commit()?;

    for key in 0..2_000u64 {
        assert_eq!(tree.get(&pager, &key)?, Some(key * 2));
    }
    assert!(leaf_depth(&tree, &pager)? >= 3, "expected internal splits");
    let stats = tree.stats().snapshot();
    assert!(stats.leaf_splits > 0);
    assert!(stats.internal_splits > 0);
    assert!(stats.root_splits >= 2);

    let all = collect(&tree, &pager, Bound::Unbounded, Bound::Unbounded, ScanDirection::Ascending)?;
    assert_eq!(all.len(), 2_000);
    assert!(all.windows(2).all(|w| w[0].0 < w[1].0));
    Ok(())
}

#[test]
fn descending_range_is_reverse_of_ascending() -> Result<()> {
    let pager = MemPager::new(SMALL_PAGE)?;
    let tree = new_tree(&pager)?;
    let mut op = pager.begin_atomic()?;
    for key in (0..500u64).map(|k| k * 3) {
        tree.put(op.as_mut(), &key, &key)?;
    }
    op.commit()?;

    let bounds = [
        (Bound::Included(30), Bound::Included(900)),
        (Bound::Excluded(30), Bound::Excluded(900)),
        (Bound::Included(31), Bound::Included(899)),
        (Bound::Unbounded, Bound::Included(100)),
        (Bound::Included(1_200), Bound::Unbounded),
    ];
    for (lo, hi) in bounds {
        let asc = collect(&tree, &pager, lo, hi, ScanDirection::Ascending)?;
        let mut desc = collect(&tree, &pager, lo, hi, ScanDirection::Descending)?;
        desc.reverse();
        assert_eq!(asc, desc, "bounds {lo:?}..{hi:?}");
        assert!(!asc.is_empty());
    }
    Ok(())
}

#[test]
fn inverted_or_empty_ranges_yield_nothing() -> Result<()> {
    let pager = MemPager::new(SMALL_PAGE)?;
    let tree = new_tree(&pager)?;
    let mut op = pager.begin_atomic()?;
    for key in 0..100u64 {
        tree.put(op.as_mut(), &key, &key)?;
    }
    op.commit()?;
    for direction in [ScanDirection::Ascending, ScanDirection::Descending] {
        assert!(collect(&tree, &pager, Bound::Included(50), Bound::Included(10), direction)?.is_empty());
        assert!(collect(&tree, &pager, Bound::Excluded(10), Bound::Excluded(10), direction)?.is_empty());
        assert_eq!(
            collect(&tree, &pager, Bound::Included(10), Bound::Included(10), direction)?,
            vec![(10, 10)]
        );
    }
    Ok(())
}

#[test]
fn scans_skip_leaves_emptied_by_deletes() -> Result<()> {
    let pager = MemPager::new(SMALL_PAGE)?;
    let tree = new_tree(&pager)?;
    let mut op = pager.begin_atomic()?;
    for key in 0..400u64 {
        tree.put(op.as_mut(), &key, &key)?;
    }
    for key in 20..380u64 {
        assert_eq!(tree.delete(op.as_mut(), &key)?, Some(key));
    }
    assert_eq!(tree.delete(op.as_mut(), &200)?, None);
    op.commit()?;

    let expected: Vec<u64> = (0..20).chain(380..400).collect();
    let asc: Vec<u64> = collect(&tree, &pager, Bound::Unbounded, Bound::Unbounded, ScanDirection::Ascending)?
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(asc, expected);
    let desc: Vec<u64> = collect(&tree, &pager, Bound::Unbounded, Bound::Unbounded, ScanDirection::Descending)?
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(desc, expected.into_iter().rev().collect::<Vec<_>>());
    Ok(())
}

#[test]
fn rolled_back_operation_leaves_tree_untouched() -> Result<()> {
    let pager = MemPager::new(SMALL_PAGE)?;
    let tree = new_tree(&pager)?;
    {
        let mut op = pager.begin_atomic()?;
        for key in 0..300u64 {
            tree.put(op.as_mut(), &key, &key)?;
        }
    }
    assert!(collect(&tree, &pager, Bound::Unbounded, Bound::Unbounded, ScanDirection::Ascending)?.is_empty());
    let reopened = BTree::<u64, u64>::open(&pager, tree.root_page())?;
    assert!(reopened.get(&pager, &1)?.is_none());
    Ok(())
}

#[test]
fn randomized_ops_match_reference() -> Result<()> {
    let pager = MemPager::new(SMALL_PAGE)?;
    let tree = new_tree(&pager)?;
    let mut reference = BTreeMap::new();
    let mut rng = ChaCha8Rng::seed_from_u64(0xDEADBEEF);
    for round in 0..20 {
        let mut op = pager.begin_atomic()?;
        for _ in 0..200 {
            let key = rng.gen_range(0..1_000u64);
            if rng.gen_bool(0.7) {
                let value = rng.gen::<u64>();
                let fresh = tree.put(op.as_mut(), &key, &value)?;
                assert_eq!(fresh, reference.insert(key, value).is_none());
            } else {
                assert_eq!(tree.delete(op.as_mut(), &key)?, reference.remove(&key));
            }
        }
        op.commit()?;
        let scanned = collect(&tree, &pager, Bound::Unbounded, Bound::Unbounded, ScanDirection::Ascending)?;
        let expected: Vec<(u64, u64)> = reference.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(scanned, expected, "round {round}");
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn bounded_scans_match_btreemap(
        keys in proptest::collection::btree_set(0u64..5_000, 0..600),
        lo in 0u64..5_000,
        span in 0u64..2_500,
    ) {
        let pager = MemPager::new(SMALL_PAGE).unwrap();
        let tree = new_tree(&pager).unwrap();
        let mut op = pager.begin_atomic().unwrap();
        for key in &keys {
            tree.put(op.as_mut(), key, key).unwrap();
        }
        op.commit().unwrap();

        let hi = lo + span;
        let expected: Vec<u64> = keys.range(lo..=hi).copied().collect();
        let asc: Vec<u64> = collect(&tree, &pager, Bound::Included(lo), Bound::Included(hi), ScanDirection::Ascending)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        prop_assert_eq!(&asc, &expected);
        let mut desc: Vec<u64> = collect(&tree, &pager, Bound::Included(lo), Bound::Included(hi), ScanDirection::Descending)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        desc.reverse();
        prop_assert_eq!(desc, expected);
    }
}
