#![allow(missing_docs)]

use std::cmp::Ordering;
use std::ops::Bound;

use proptest::prelude::*;
use sombra_linkbag::{
    primitives::pager::{MemPager, PageStore},
    storage::{btree::KeyCodec, linkbag::EdgeKey},
    types::{FileId, Result, ScanDirection},
    Rid, SharedLinkBagBTree,
};

fn rid(cid: i32, pos: i64) -> Rid {
    Rid { cid, pos }
}

#[test]
fn bags_only_see_their_own_entries() -> Result<()> {
    let pager = MemPager::new(512)?;
    let mut op = pager.begin_atomic()?;
    let tree = SharedLinkBagBTree::create(op.as_mut(), FileId(2))?;
    for pos in [3, 1, 2] {
        tree.bag(7).put(op.as_mut(), rid(10, pos), 1)?;
    }
    tree.bag(9).put(op.as_mut(), rid(10, 5), 4)?;
    op.commit()?;

    let pages = pager.read_view();
    let seven: Vec<(Rid, u32)> = tree
        .bag(7)
        .entries(pages, ScanDirection::Ascending)?
        .collect::<Result<_>>()?;
    assert_eq!(seven, vec![(rid(10, 1), 1), (rid(10, 2), 1), (rid(10, 3), 1)]);
    let nine: Vec<(Rid, u32)> = tree
        .bag(9)
        .entries(pages, ScanDirection::Descending)?
        .collect::<Result<_>>()?;
    assert_eq!(nine, vec![(rid(10, 5), 4)]);

    assert_eq!(tree.bag(7).first_key(pages)?, Some(rid(10, 1)));
    assert_eq!(tree.bag(7).last_key(pages)?, Some(rid(10, 3)));
    assert_eq!(tree.bag(8).first_key(pages)?, None);
    assert_eq!(tree.bag(8).entries(pages, ScanDirection::Ascending)?.count(), 0);

    let tail: Vec<Rid> = tree
        .bag(7)
        .range_from(pages, rid(10, 2), false, true)?
        .map(|e| e.map(|(r, _)| r))
        .collect::<Result<_>>()?;
    assert_eq!(tail, vec![rid(10, 3)]);
    let head: Vec<Rid> = tree
        .bag(7)
        .range_from(pages, rid(10, 2), true, false)?
        .map(|e| e.map(|(r, _)| r))
        .collect::<Result<_>>()?;
    assert_eq!(head, vec![rid(10, 2), rid(10, 1)]);
    Ok(())
}

#[test]
fn negative_positions_stay_inside_their_bag() -> Result<()> {
    let pager = MemPager::new(512)?;
    let mut op = pager.begin_atomic()?;
    let tree = SharedLinkBagBTree::create(op.as_mut(), FileId(0))?;
    tree.bag(1).put(op.as_mut(), rid(-2, -5), 1)?;
    tree.bag(1).put(op.as_mut(), rid(0, 0), 1)?;
    tree.bag(0).put(op.as_mut(), rid(i32::MAX - 1, 1), 1)?;
    tree.bag(2).put(op.as_mut(), rid(-2, -9), 1)?;

    let pages = op.pages();
    let one: Vec<Rid> = tree
        .bag(1)
        .entries(pages, ScanDirection::Ascending)?
        .map(|e| e.map(|(r, _)| r))
        .collect::<Result<_>>()?;
    assert_eq!(one, vec![rid(-2, -5), rid(0, 0)]);
    Ok(())
}

#[test]
fn clear_and_reopen_survive_splits() -> Result<()> {
    let pager = MemPager::new(256)?;
    let mut op = pager.begin_atomic()?;
    let tree = SharedLinkBagBTree::create(op.as_mut(), FileId(0))?;
    let first = tree.allocate_bag(op.as_mut())?;
    let second = tree.allocate_bag(op.as_mut())?;
    assert_ne!(first, second);
    for pos in 0..300 {
        tree.bag_for(first)?.put(op.as_mut(), rid(4, pos), 1)?;
        tree.bag_for(second)?.put(op.as_mut(), rid(4, pos), 2)?;
    }
    op.commit()?;
    assert!(tree.stats().snapshot().leaf_splits > 0);

    let mut op = pager.begin_atomic()?;
    assert_eq!(tree.bag_for(first)?.clear(op.as_mut())?, 300);
    assert_eq!(tree.bag_for(first)?.total_multiplicity(op.pages())?, 0);
    assert_eq!(tree.bag_for(second)?.total_multiplicity(op.pages())?, 600);
    op.commit()?;

    let reopened = SharedLinkBagBTree::open(pager.read_view(), FileId(0), tree.meta_page())?;
    let pages = pager.read_view();
    assert_eq!(reopened.bag_for(second)?.get(pages, rid(4, 123))?, Some(2));
    assert_eq!(reopened.bag_for(first)?.get(pages, rid(4, 123))?, None);
    let window: Vec<Rid> = reopened
        .bag_for(second)?
        .range(
            pages,
            Bound::Excluded(rid(4, 10)),
            Bound::Included(rid(4, 14)),
            ScanDirection::Descending,
        )?
        .map(|e| e.map(|(r, _)| r))
        .collect::<Result<_>>()?;
    assert_eq!(window, (11..=14).rev().map(|p| rid(4, p)).collect::<Vec<_>>());

    let mut op = pager.begin_atomic()?;
    let third = reopened.allocate_bag(op.as_mut())?;
    assert_eq!(third.bag_id, 2);
    Ok(())
}

#[test]
fn pointers_from_another_file_are_rejected() -> Result<()> {
    let pager = MemPager::new(512)?;
    let mut op = pager.begin_atomic()?;
    let tree = SharedLinkBagBTree::create(op.as_mut(), FileId(3))?;
    let mut pointer = tree.allocate_bag(op.as_mut())?;
    pointer.file_id = FileId(4);
    assert!(tree.bag_for(pointer).is_err());
    assert!(tree.bag(0).put(op.as_mut(), rid(1, 1), 0).is_err());
    Ok(())
}

fn edge_key() -> impl Strategy<Value = EdgeKey> {
    (any::<i64>(), any::<i32>(), any::<i64>()).prop_map(|(bag_id, target_cid, target_pos)| {
        EdgeKey {
            bag_id,
            target_cid,
            target_pos,
        }
    })
}

proptest! {
    #[test]
    fn encoded_order_matches_key_order(a in edge_key(), b in edge_key()) {
        let mut ea = Vec::new();
        let mut eb = Vec::new();
        EdgeKey::encode_key(&a, &mut ea);
        EdgeKey::encode_key(&b, &mut eb);
        prop_assert_eq!(ea.len(), EdgeKey::WIDTH);
        prop_assert_eq!(EdgeKey::compare_encoded(&ea, &eb), a.cmp(&b));
        prop_assert_eq!(EdgeKey::decode_key(&ea).ok(), Some(a));
    }

    #[test]
    fn sentinels_bracket_every_rid(bag in -1000i64..1000, cid in any::<i32>(), pos in any::<i64>()) {
        let key = EdgeKey::new(bag, Rid { cid, pos });
        prop_assert_ne!(EdgeKey::bag_min(bag).cmp(&key), Ordering::Greater);
        prop_assert_ne!(EdgeKey::bag_max(bag).cmp(&key), Ordering::Less);
        prop_assert!(EdgeKey::bag_max(bag - 1) < key);
        prop_assert!(EdgeKey::bag_min(bag + 1) > key);
    }
}
