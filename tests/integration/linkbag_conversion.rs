#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sombra_linkbag::{
    primitives::pager::{MemPager, PageStore},
    storage::CounterMetrics,
    types::{FileId, Result},
    LinkBagOptions, LinkCollection, RepresentationKind, Rid, SharedLinkBagBTree, SombraError,
    Transaction,
};

fn rid(cid: i32, pos: i64) -> Rid {
    Rid { cid, pos }
}

fn fresh_tree(pager: &MemPager) -> Result<SharedLinkBagBTree> {
    let mut op = pager.begin_atomic()?;
    let tree = SharedLinkBagBTree::create(op.as_mut(), FileId(0))?;
    op.commit()?;
    Ok(tree)
}

fn contents(bag: &LinkCollection, tx: &Transaction<'_>) -> Result<Vec<(Rid, u32)>> {
    bag.entries(tx)?.collect()
}

#[test]
fn grows_into_tree_then_shrinks_back_across_transactions() -> Result<()> {
    let pager = MemPager::new(1024)?;
    let tree = fresh_tree(&pager)?;
    let options = LinkBagOptions::default().with_thresholds(3, 1);

    let mut tx = Transaction::begin(&pager, Some(&tree), &options)?;
    let mut bag = LinkCollection::new(&tx)?;
    bag.add_all(&mut tx, [rid(1, 1), rid(1, 2), rid(1, 3)])?;
    assert_eq!(bag.kind(), RepresentationKind::Tree);
    assert_eq!(bag.flush(&mut tx)?, 3);
    let mut inline = Vec::new();
    bag.serialize(&mut inline)?;
    tx.commit()?;

    let mut tx = Transaction::begin(&pager, Some(&tree), &options)?;
    let (mut reopened, used) = LinkCollection::deserialize(&tx, &inline)?;
    assert_eq!(used, inline.len());
    assert_eq!(reopened.size(), 3);
    let pointer = reopened
        .pointer()
        .ok_or(SombraError::Invalid("tree bag should be materialized"))?;

    assert!(reopened.remove(&mut tx, rid(1, 1))?);
    assert_eq!(reopened.kind(), RepresentationKind::Tree);
    assert!(reopened.remove(&mut tx, rid(1, 3))?);
    assert_eq!(reopened.kind(), RepresentationKind::Embedded);
    assert_eq!(contents(&reopened, &tx)?, vec![(rid(1, 2), 1)]);
    assert_eq!(tx.pending_bag_deletes(), &[pointer]);
    tx.commit()?;

    let leftover = tree
        .bag_for(pointer)?
        .total_multiplicity(pager.read_view())?;
    assert_eq!(leftover, 0);
    Ok(())
}

#[test]
fn thresholds_hold_after_every_mutation() -> Result<()> {
    let pager = MemPager::new(512)?;
    let tree = fresh_tree(&pager)?;
    let (top, bottom) = (8usize, 3usize);
    let options = LinkBagOptions::default().with_thresholds(top as i32, bottom as i32);
    let mut tx = Transaction::begin(&pager, Some(&tree), &options)?;
    let mut bag = LinkCollection::new(&tx)?;
    let mut model: BTreeMap<Rid, u32> = BTreeMap::new();
    let mut rng = ChaCha8Rng::seed_from_u64(0xB46_5EED);

    for step in 0..600 {
        let target = rid(rng.gen_range(0..3), rng.gen_range(0..12));
        if rng.gen_bool(0.55) {
            assert!(bag.add(&mut tx, target)?);
            *model.entry(target).or_default() += 1;
        } else {
            let expected = match model.get_mut(&target) {
                Some(count) => {
                    *count -= 1;
                    if *count == 0 {
                        model.remove(&target);
                    }
                    true
                }
                None => false,
            };
            assert_eq!(bag.remove(&mut tx, target)?, expected);
        }

        let size = bag.size();
        if size >= top {
            assert_eq!(bag.kind(), RepresentationKind::Tree, "step {step} size {size}");
        }
        if size <= bottom {
            assert_eq!(bag.kind(), RepresentationKind::Embedded, "step {step} size {size}");
        }
        assert_eq!(size as u32, model.values().sum::<u32>());
        if step % 25 == 0 {
            bag.flush(&mut tx)?;
            let expected: Vec<(Rid, u32)> = model.iter().map(|(r, c)| (*r, *c)).collect();
            assert_eq!(contents(&bag, &tx)?, expected);
        }
    }
    tx.commit()?;
    Ok(())
}

#[test]
fn conversion_round_trip_preserves_the_multiset() -> Result<()> {
    let pager = MemPager::new(512)?;
    let tree = fresh_tree(&pager)?;
    let never = LinkBagOptions::default().with_thresholds(-1, -1);
    let adaptive = LinkBagOptions::default().with_thresholds(6, 2);
    let mut tx = Transaction::begin(&pager, Some(&tree), &never)?;
    let mut plain = LinkCollection::new(&never)?;
    let mut converting = LinkCollection::new(&adaptive)?;
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    let mut added = Vec::new();
    for _ in 0..40 {
        let target = rid(rng.gen_range(0..2), rng.gen_range(0..6));
        plain.add(&mut tx, target)?;
        converting.add(&mut tx, target)?;
        added.push(target);
    }
    assert_eq!(converting.kind(), RepresentationKind::Tree);
    converting.flush(&mut tx)?;
    for target in added.iter().skip(2) {
        plain.remove(&mut tx, *target)?;
        converting.remove(&mut tx, *target)?;
    }
    assert_eq!(converting.kind(), RepresentationKind::Embedded);
    assert_eq!(contents(&plain, &tx)?, contents(&converting, &tx)?);
    assert!(plain.same_content(&converting, &tx)?);
    Ok(())
}

#[test]
fn remote_session_keeps_bag_embedded_until_a_tree_appears() -> Result<()> {
    let pager = MemPager::new(512)?;
    let tree = fresh_tree(&pager)?;
    let metrics = Arc::new(CounterMetrics::default());
    let options = LinkBagOptions::default()
        .with_thresholds(4, -1)
        .with_metrics(metrics.clone());

    let mut remote = Transaction::begin(&pager, None, &options)?;
    let mut bag = LinkCollection::new(&remote)?;
    bag.add_all(&mut remote, (0..10).map(|pos| rid(3, pos)))?;
    assert_eq!(bag.kind(), RepresentationKind::Embedded);
    assert_eq!(bag.size(), 10);
    assert!(bag.contains(&remote, rid(3, 9))?);
    remote.commit()?;
    assert_eq!(metrics.skipped.load(Ordering::Relaxed), 7);

    let mut local = Transaction::begin(&pager, Some(&tree), &options)?;
    bag.add(&mut local, rid(3, 10))?;
    assert_eq!(bag.kind(), RepresentationKind::Tree);
    assert_eq!(metrics.to_tree.load(Ordering::Relaxed), 1);
    Ok(())
}

#[test]
fn materialized_tree_bag_needs_the_tree() -> Result<()> {
    let pager = MemPager::new(512)?;
    let tree = fresh_tree(&pager)?;
    let options = LinkBagOptions::default().with_thresholds(2, -1);
    let mut tx = Transaction::begin(&pager, Some(&tree), &options)?;
    let mut bag = LinkCollection::new(&tx)?;
    bag.add_all(&mut tx, [rid(1, 1), rid(1, 2)])?;
    bag.flush(&mut tx)?;
    tx.commit()?;

    let remote = Transaction::begin(&pager, None, &options)?;
    assert!(matches!(
        bag.contains(&remote, rid(1, 1)),
        Err(SombraError::SubstrateUnavailable)
    ));
    assert!(bag.iter(&remote).is_err());
    Ok(())
}

#[test]
fn dropped_transaction_leaves_tree_untouched() -> Result<()> {
    let pager = MemPager::new(512)?;
    let tree = fresh_tree(&pager)?;
    let options = LinkBagOptions::default().with_thresholds(2, -1);
    let mut tx = Transaction::begin(&pager, Some(&tree), &options)?;
    let mut bag = LinkCollection::new(&tx)?;
    bag.add_all(&mut tx, [rid(1, 1), rid(1, 2), rid(1, 2)])?;
    bag.flush(&mut tx)?;
    let pointer = bag
        .pointer()
        .ok_or(SombraError::Invalid("tree bag should be materialized"))?;
    tx.rollback();

    assert_eq!(
        tree.bag_for(pointer)?
            .total_multiplicity(pager.read_view())?,
        0
    );
    assert!(pager.stats().rollbacks >= 1);

    let mut tx = Transaction::begin(&pager, Some(&tree), &options)?;
    let reused = tree.allocate_bag(tx.operation())?;
    assert_eq!(reused, pointer);
    Ok(())
}

#[test]
fn contradictory_thresholds_fail_at_construction() {
    let options = LinkBagOptions::default().with_thresholds(4, 4);
    let err = LinkCollection::new(&options).unwrap_err();
    assert!(matches!(err, SombraError::Config(_)));
}
