use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use smallvec::SmallVec;

use crate::types::Rid;

/// Kind of a pending index mutation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum IndexOp {
    /// Associates a value with the key.
    Put,
    /// Dissociates a value, or every value when none is given.
    Remove,
}

/// One pending `{op, value}` tuple.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct IndexChange {
    /// Operation to apply.
    pub op: IndexOp,
    /// Affected value. `None` is only meaningful for [`IndexOp::Remove`].
    pub value: Option<Rid>,
}

impl IndexChange {
    /// `PUT(value)`.
    pub fn put(value: Rid) -> Self {
        Self {
            op: IndexOp::Put,
            value: Some(value),
        }
    }

    /// `REMOVE(value)`.
    pub fn remove(value: Rid) -> Self {
        Self {
            op: IndexOp::Remove,
            value: Some(value),
        }
    }

    /// `REMOVE` of every value of the key.
    pub fn remove_all() -> Self {
        Self {
            op: IndexOp::Remove,
            value: None,
        }
    }
}

/// Pending changes recorded for one key, in recorded order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct KeyChanges {
    entries: SmallVec<[IndexChange; 2]>,
}

impl KeyChanges {
    /// Changes in the order they were recorded.
    pub fn entries(&self) -> &[IndexChange] {
        &self.entries
    }

    /// Applies the changes to the persisted value of a single-value key.
    pub fn apply_single(&self, persisted: Option<Rid>) -> Option<Rid> {
        let mut value = persisted;
        for change in &self.entries {
            match (change.op, change.value) {
                (IndexOp::Put, v) => value = v,
                (IndexOp::Remove, None) => value = None,
                (IndexOp::Remove, Some(v)) => {
                    if value == Some(v) {
                        value = None;
                    }
                }
            }
        }
        value
    }

    /// Applies the changes to the persisted values of a multi-value key.
    pub fn apply_multi<I>(&self, persisted: I) -> BTreeSet<Rid>
    where
        I: IntoIterator<Item = Rid>,
    {
        let mut values: BTreeSet<Rid> = persisted.into_iter().collect();
        for change in &self.entries {
            match (change.op, change.value) {
                (IndexOp::Put, Some(v)) => {
                    values.insert(v);
                }
                (IndexOp::Put, None) => {}
                (IndexOp::Remove, Some(v)) => {
                    values.remove(&v);
                }
                (IndexOp::Remove, None) => values.clear(),
            }
        }
        values
    }
}

/// Per-transaction overlay of pending changes for one index, sorted by key.
#[derive(Clone, Debug)]
pub struct TxIndexChanges<K> {
    changes: BTreeMap<K, KeyChanges>,
    cleared: bool,
}

impl<K> Default for TxIndexChanges<K> {
    fn default() -> Self {
        Self {
            changes: BTreeMap::new(),
            cleared: false,
        }
    }
}

impl<K: Ord + Clone> TxIndexChanges<K> {
    /// Creates an empty overlay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `PUT(value)` under `key`.
    pub fn put(&mut self, key: K, value: Rid) {
        self.record(key, IndexChange::put(value));
    }

    /// Records `REMOVE(value)` under `key`.
    pub fn remove(&mut self, key: K, value: Rid) {
        self.record(key, IndexChange::remove(value));
    }

    /// Records a `REMOVE` that drops every value of `key`.
    pub fn remove_key(&mut self, key: K) {
        self.record(key, IndexChange::remove_all());
    }

    /// Appends `change` to the log of `key`.
    pub fn record(&mut self, key: K, change: IndexChange) {
        self.changes.entry(key).or_default().entries.push(change);
    }

    /// Forgets pending changes and hides every persisted entry of the index.
    pub fn clear(&mut self) {
        self.changes.clear();
        self.cleared = true;
    }

    /// Whether [`clear`](Self::clear) was called in this transaction.
    pub fn is_cleared(&self) -> bool {
        self.cleared
    }

    /// Returns true when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of keys with pending changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Pending changes of `key`.
    pub fn changes(&self, key: &K) -> Option<&KeyChanges> {
        self.changes.get(key)
    }

    /// Smallest and largest pending keys inside the bounds, or `None` when
    /// the range holds no pending key. Inverted bounds are an empty range.
    pub fn first_and_last_keys(&self, from: Bound<&K>, to: Bound<&K>) -> Option<(&K, &K)> {
        if !valid_range(from, to) {
            return None;
        }
        let mut range = self.changes.range::<K, _>((from, to));
        let first = range.next()?.0;
        let last = range.next_back().map_or(first, |(k, _)| k);
        Some((first, last))
    }

    /// Smallest pending key strictly above `key`.
    pub fn higher_key(&self, key: &K) -> Option<&K> {
        self.changes
            .range::<K, _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| k)
    }

    /// Largest pending key strictly below `key`.
    pub fn lower_key(&self, key: &K) -> Option<&K> {
        self.changes
            .range::<K, _>((Bound::Unbounded, Bound::Excluded(key)))
            .next_back()
            .map(|(k, _)| k)
    }

    /// Smallest pending key.
    pub fn first_key(&self) -> Option<&K> {
        self.changes.keys().next()
    }

    /// Largest pending key.
    pub fn last_key(&self) -> Option<&K> {
        self.changes.keys().next_back()
    }
}

/// `BTreeMap::range` panics on inverted bounds and on equal bounds that are
/// both excluded, so those are filtered first.
pub(crate) fn valid_range<K: Ord>(from: Bound<&K>, to: Bound<&K>) -> bool {
    match (from, to) {
        (Bound::Included(a), Bound::Included(b)) => a <= b,
        (Bound::Included(a), Bound::Excluded(b))
        | (Bound::Excluded(a), Bound::Included(b))
        | (Bound::Excluded(a), Bound::Excluded(b)) => a < b,
        _ => true,
    }
}
