#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sombra_linkbag::{
    primitives::pager::{MemPager, PageStore},
    storage::{linkbag::SubjectIndex, CounterMetrics},
    tx::{
        ascending_between, descending_between, get_multi, get_single, range_from, MergeScan,
        TxIndexChanges, ValueMode,
    },
    types::{FileId, Result, ScanDirection},
    LinkBagOptions, Rid, SharedLinkBagBTree, Transaction,
};

const SUBJECTS: &str = "subjects";

fn rid(cid: i32, pos: i64) -> Rid {
    Rid { cid, pos }
}

fn seeded_tree(pager: &MemPager, entries: &[(i64, Rid)]) -> Result<SharedLinkBagBTree> {
    let mut op = pager.begin_atomic()?;
    let tree = SharedLinkBagBTree::create(op.as_mut(), FileId(0))?;
    for (bag, target) in entries {
        tree.bag(*bag).put(op.as_mut(), *target, 1)?;
    }
    op.commit()?;
    Ok(tree)
}

#[test]
fn add_then_remove_in_one_transaction_cancels_out() -> Result<()> {
    let pager = MemPager::new(512)?;
    let tree = seeded_tree(&pager, &[(1, rid(5, 1)), (3, rid(5, 3))])?;
    let metrics = Arc::new(CounterMetrics::default());
    let options = LinkBagOptions::default().with_metrics(metrics.clone());
    let mut tx = Transaction::begin(&pager, Some(&tree), &options)?;
    {
        let overlay = tx.index_changes::<i64>(SUBJECTS)?;
        overlay.put(2, rid(5, 2));
        overlay.remove(2, rid(5, 2));
        overlay.put(4, rid(5, 4));
    }

    let index = SubjectIndex::new(&tree, tx.pages());
    let seen: Vec<(i64, Rid)> = tx
        .scan_index::<i64>(
            SUBJECTS,
            &index,
            Bound::Unbounded,
            Bound::Unbounded,
            ScanDirection::Ascending,
            ValueMode::Multi,
        )?
        .collect::<Result<_>>()?;
    assert_eq!(seen, vec![(1, rid(5, 1)), (3, rid(5, 3)), (4, rid(5, 4))]);
    assert!(get_multi(tx.overlay::<i64>(SUBJECTS), &index, &2)?.is_empty());
    assert_eq!(metrics.scans_ascending.load(Ordering::Relaxed), 1);
    Ok(())
}

#[test]
fn overlay_removal_hides_persisted_values() -> Result<()> {
    let pager = MemPager::new(512)?;
    let tree = seeded_tree(
        &pager,
        &[(1, rid(5, 1)), (1, rid(5, 2)), (2, rid(6, 1)), (2, rid(6, 2))],
    )?;
    let mut overlay = TxIndexChanges::<i64>::new();
    overlay.remove(1, rid(5, 2));
    overlay.remove_key(2);
    overlay.put(2, rid(6, 9));

    let pages = pager.read_view();
    let index = SubjectIndex::new(&tree, pages);
    let seen: Vec<(i64, Rid)> = ascending_between(
        Some(&overlay),
        &index,
        Bound::Included(&1),
        Bound::Included(&2),
        ValueMode::Multi,
    )?
    .collect::<Result<_>>()?;
    assert_eq!(seen, vec![(1, rid(5, 1)), (2, rid(6, 9))]);
    Ok(())
}

#[test]
fn merged_scans_match_a_model_in_both_directions() -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(0x3E_46E);
    let mut persisted = Vec::new();
    let mut model: BTreeMap<i64, BTreeSet<Rid>> = BTreeMap::new();
    for _ in 0..120 {
        let bag = rng.gen_range(0..20);
        let target = rid(rng.gen_range(0..3), rng.gen_range(0..8));
        persisted.push((bag, target));
        model.entry(bag).or_default().insert(target);
    }
    let pager = MemPager::new(256)?;
    let tree = seeded_tree(&pager, &persisted)?;

    let mut overlay = TxIndexChanges::<i64>::new();
    for _ in 0..80 {
        let bag = rng.gen_range(0..24);
        let target = rid(rng.gen_range(0..3), rng.gen_range(0..8));
        match rng.gen_range(0..10) {
            0 => {
                overlay.remove_key(bag);
                model.remove(&bag);
            }
            1..=4 => {
                overlay.remove(bag, target);
                if let Some(values) = model.get_mut(&bag) {
                    values.remove(&target);
                }
            }
            _ => {
                overlay.put(bag, target);
                model.entry(bag).or_default().insert(target);
            }
        }
    }

    let index = SubjectIndex::new(&tree, pager.read_view());
    for (lo, hi) in [(0i64, 23i64), (3, 3), (5, 17), (18, 23)] {
        let expected: Vec<(i64, Rid)> = model
            .range(lo..=hi)
            .flat_map(|(bag, values)| values.iter().map(move |v| (*bag, *v)))
            .collect();
        let ascending: Vec<(i64, Rid)> = ascending_between(
            Some(&overlay),
            &index,
            Bound::Included(&lo),
            Bound::Included(&hi),
            ValueMode::Multi,
        )?
        .collect::<Result<_>>()?;
        assert_eq!(ascending, expected, "ascending {lo}..={hi}");

        let mut descending: Vec<(i64, Rid)> = descending_between(
            Some(&overlay),
            &index,
            Bound::Included(&lo),
            Bound::Included(&hi),
            ValueMode::Multi,
        )?
        .collect::<Result<_>>()?;
        descending.reverse();
        assert_eq!(descending, expected, "descending {lo}..={hi}");
    }

    for bag in 0..24 {
        let expected = model.get(&bag).cloned().unwrap_or_default();
        assert_eq!(get_multi(Some(&overlay), &index, &bag)?, expected);
    }
    Ok(())
}

fn keys(scan: MergeScan<'_, i64>) -> Result<Vec<i64>> {
    scan.map(|e| e.map(|(k, _)| k)).collect()
}

#[test]
fn open_ended_scans_respect_inclusivity() -> Result<()> {
    let pager = MemPager::new(512)?;
    let tree = seeded_tree(&pager, &[(1, rid(1, 1)), (2, rid(1, 2)), (4, rid(1, 4))])?;
    let mut overlay = TxIndexChanges::<i64>::new();
    overlay.put(3, rid(1, 3));
    let index = SubjectIndex::new(&tree, pager.read_view());

    assert_eq!(
        keys(range_from(Some(&overlay), &index, &2, true, true, ValueMode::Multi)?)?,
        vec![2, 3, 4]
    );
    assert_eq!(
        keys(range_from(Some(&overlay), &index, &2, false, true, ValueMode::Multi)?)?,
        vec![3, 4]
    );
    assert_eq!(
        keys(range_from(Some(&overlay), &index, &3, false, false, ValueMode::Multi)?)?,
        vec![2, 1]
    );
    assert!(keys(ascending_between(
        Some(&overlay),
        &index,
        Bound::Included(&4),
        Bound::Excluded(&2),
        ValueMode::Multi,
    )?)?
    .is_empty());
    Ok(())
}

#[test]
fn single_value_lookups_apply_changes_in_order() -> Result<()> {
    let pager = MemPager::new(512)?;
    let tree = seeded_tree(&pager, &[(1, rid(2, 1)), (2, rid(2, 2))])?;
    let index = SubjectIndex::new(&tree, pager.read_view());
    let mut overlay = TxIndexChanges::<i64>::new();
    overlay.put(1, rid(2, 10));
    overlay.remove(2, rid(2, 99));
    overlay.put(3, rid(2, 3));
    overlay.remove(3, rid(2, 3));

    assert_eq!(get_single(Some(&overlay), &index, &1)?, Some(rid(2, 10)));
    assert_eq!(get_single(Some(&overlay), &index, &2)?, Some(rid(2, 2)));
    assert_eq!(get_single(Some(&overlay), &index, &3)?, None);
    assert_eq!(get_single::<i64>(None, &index, &1)?, Some(rid(2, 1)));

    let seen: Vec<(i64, Rid)> = descending_between(
        Some(&overlay),
        &index,
        Bound::Unbounded,
        Bound::Unbounded,
        ValueMode::Single,
    )?
    .collect::<Result<_>>()?;
    assert_eq!(seen, vec![(2, rid(2, 2)), (1, rid(2, 10))]);
    Ok(())
}

#[test]
fn cleared_overlay_ignores_persisted_entries() -> Result<()> {
    let pager = MemPager::new(512)?;
    let tree = seeded_tree(&pager, &[(1, rid(1, 1)), (2, rid(1, 2))])?;
    let index = SubjectIndex::new(&tree, pager.read_view());
    let mut overlay = TxIndexChanges::<i64>::new();
    overlay.clear();
    overlay.put(5, rid(1, 5));

    let seen: Vec<(i64, Rid)> = ascending_between(
        Some(&overlay),
        &index,
        Bound::Unbounded,
        Bound::Unbounded,
        ValueMode::Multi,
    )?
    .collect::<Result<_>>()?;
    assert_eq!(seen, vec![(5, rid(1, 5))]);
    assert!(get_multi(Some(&overlay), &index, &1)?.is_empty());
    Ok(())
}
