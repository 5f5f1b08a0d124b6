#![allow(missing_docs)]

use std::collections::BTreeMap;

use proptest::prelude::*;
use sombra_linkbag::{
    primitives::pager::{MemPager, PageStore},
    types::{FileId, Result},
    LinkBagOptions, LinkCollection, RepresentationKind, Rid, SharedLinkBagBTree, Transaction,
};

#[derive(Clone, Debug)]
enum Op {
    Add(Rid),
    Remove(Rid),
    Flush,
    Rollback,
}

fn op() -> impl Strategy<Value = Op> {
    let rid = (0i32..4, 0i64..10).prop_map(|(cid, pos)| Rid { cid, pos });
    prop_oneof![
        6 => rid.clone().prop_map(Op::Add),
        4 => rid.prop_map(Op::Remove),
        1 => Just(Op::Flush),
        1 => Just(Op::Rollback),
    ]
}

fn thresholds() -> impl Strategy<Value = (i32, i32)> {
    prop_oneof![
        Just((-1, -1)),
        (1i32..12).prop_map(|top| (top, -1)),
        (2i32..12).prop_flat_map(|top| (Just(top), 0..top)),
    ]
}

fn run(ops: &[Op], (top, bottom): (i32, i32)) -> Result<()> {
    let pager = MemPager::new(512)?;
    let tree = {
        let mut op = pager.begin_atomic()?;
        let tree = SharedLinkBagBTree::create(op.as_mut(), FileId(0))?;
        op.commit()?;
        tree
    };
    let options = LinkBagOptions::default().with_thresholds(top, bottom);
    let mut tx = Transaction::begin(&pager, Some(&tree), &options)?;
    let mut bag = LinkCollection::new(&tx)?;
    let mut model: BTreeMap<Rid, u32> = BTreeMap::new();
    let mut committed: BTreeMap<Rid, u32> = BTreeMap::new();

    for op in ops {
        match op {
            Op::Add(rid) => {
                bag.add(&mut tx, *rid)?;
                *model.entry(*rid).or_default() += 1;
            }
            Op::Remove(rid) => {
                let expected = model.get(rid).is_some_and(|c| *c > 0);
                assert_eq!(bag.remove(&mut tx, *rid)?, expected);
                if let Some(count) = model.get_mut(rid) {
                    *count -= 1;
                    if *count == 0 {
                        model.remove(rid);
                    }
                }
            }
            Op::Flush => {
                bag.flush(&mut tx)?;
                committed = model.clone();
                bag.transaction_finished();
            }
            Op::Rollback => {
                bag.rollback_changes(&mut tx)?;
                model = committed.clone();
            }
        }

        let size = bag.size();
        assert_eq!(size as u32, model.values().sum::<u32>());
        if top >= 0 && size >= top as usize {
            assert_eq!(bag.kind(), RepresentationKind::Tree);
        }
        if top < 0 || (bottom >= 0 && size <= bottom as usize) {
            assert_eq!(bag.kind(), RepresentationKind::Embedded);
        }
    }

    let entries: Vec<(Rid, u32)> = bag.entries(&tx)?.collect::<Result<_>>()?;
    let expected: Vec<(Rid, u32)> = model.iter().map(|(r, c)| (*r, *c)).collect();
    assert_eq!(entries, expected);
    let flattened = bag.iter(&tx)?.collect::<Result<Vec<_>>>()?;
    assert_eq!(flattened.len(), bag.size());
    assert!(flattened.windows(2).all(|w| w[0] <= w[1]));

    bag.flush(&mut tx)?;
    let mut inline = Vec::new();
    bag.serialize(&mut inline)?;
    let (restored, used) = LinkCollection::deserialize(&tx, &inline)?;
    assert_eq!(used, inline.len());
    assert!(restored.same_content(&bag, &tx)?);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn bag_tracks_a_multiset_model(
        ops in prop::collection::vec(op(), 0..120),
        limits in thresholds(),
    ) {
        prop_assert!(run(&ops, limits).is_ok());
    }
}
