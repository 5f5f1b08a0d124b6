//! Merge scans over persisted index data and a transaction's pending changes.
//!
//! A scan walks the persisted entries in key order and, whenever it reaches
//! a key that has pending changes, replaces that key's persisted values with
//! the net result of replaying the changes on top of them. Keys whose net
//! result is empty are skipped. Everything is pulled lazily, one entry at a
//! time, so large persisted ranges are never materialized.

use std::collections::{BTreeSet, VecDeque};
use std::iter::Peekable;
use std::ops::Bound;

use tracing::trace;

use super::changes::{valid_range, TxIndexChanges};
use crate::types::{Result, Rid, ScanDirection, SombraError};

/// Boxed `(key, value)` stream produced by a [`PersistedIndex`].
pub type PersistedEntries<'a, K> = Box<dyn Iterator<Item = Result<(K, Rid)>> + 'a>;

/// Committed index contents a merge scan reads from.
pub trait PersistedIndex<K> {
    /// Values stored under `key`, in value order.
    fn values(&self, key: &K) -> Result<Vec<Rid>>;

    /// Entries between the bounds in `direction` order. Values of one key
    /// are yielded in value order for ascending scans and reversed for
    /// descending ones.
    fn scan<'a>(
        &'a self,
        from: Bound<&K>,
        to: Bound<&K>,
        direction: ScanDirection,
    ) -> Result<PersistedEntries<'a, K>>;
}

/// How many values one key may carry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ValueMode {
    /// Unique index: at most one value per key.
    Single,
    /// Bag or non-unique index: a set of values per key.
    Multi,
}

/// Lazy, sorted merge of persisted entries with pending overlay changes.
pub struct MergeScan<'a, K> {
    overlay: Option<&'a TxIndexChanges<K>>,
    persisted: Peekable<PersistedEntries<'a, K>>,
    mode: ValueMode,
    direction: ScanDirection,
    next_key: Option<&'a K>,
    last_key: Option<&'a K>,
    last_persisted: Option<K>,
    pending: VecDeque<(K, Rid)>,
    exhausted: bool,
}

impl<'a, K: Ord + Clone + 'a> MergeScan<'a, K> {
    /// Opens a scan between two bounds.
    pub fn open(
        overlay: Option<&'a TxIndexChanges<K>>,
        persisted: &'a dyn PersistedIndex<K>,
        from: Bound<&K>,
        to: Bound<&K>,
        direction: ScanDirection,
        mode: ValueMode,
    ) -> Result<Self> {
        if !valid_range(from, to) {
            return Ok(Self::empty(direction, mode));
        }
        let persisted_entries: PersistedEntries<'a, K> = match overlay {
            Some(changes) if changes.is_cleared() => Box::new(std::iter::empty()),
            _ => persisted.scan(from, to, direction)?,
        };
        let (next_key, last_key) = match overlay.and_then(|o| o.first_and_last_keys(from, to)) {
            Some((first, last)) => match direction {
                ScanDirection::Ascending => (Some(first), Some(last)),
                ScanDirection::Descending => (Some(last), Some(first)),
            },
            None => (None, None),
        };
        trace!(
            target: "sombra_tx::merge",
            ?direction,
            ?mode,
            overlay_keys = overlay.map_or(0, |o| o.len()),
            has_overlay_range = next_key.is_some(),
            "opened merge scan"
        );
        Ok(Self {
            overlay,
            persisted: persisted_entries.peekable(),
            mode,
            direction,
            next_key,
            last_key,
            last_persisted: None,
            pending: VecDeque::new(),
            exhausted: false,
        })
    }

    fn empty(direction: ScanDirection, mode: ValueMode) -> Self {
        let persisted: PersistedEntries<'a, K> = Box::new(std::iter::empty());
        Self {
            overlay: None,
            persisted: persisted.peekable(),
            mode,
            direction,
            next_key: None,
            last_key: None,
            last_persisted: None,
            pending: VecDeque::new(),
            exhausted: true,
        }
    }

    /// Direction of the scan.
    pub fn direction(&self) -> ScanDirection {
        self.direction
    }

    fn pull_persisted(&mut self) -> Result<Option<(K, Rid)>> {
        let Some(entry) = self.persisted.next() else {
            return Ok(None);
        };
        let (key, value) = entry?;
        if let Some(prev) = &self.last_persisted {
            if self.direction.order(prev, &key) == std::cmp::Ordering::Greater {
                return Err(SombraError::Consistency(
                    "persisted entries returned out of order",
                ));
            }
        }
        self.last_persisted = Some(key.clone());
        Ok(Some((key, value)))
    }

    fn peek_persisted_key(&mut self) -> Result<Option<&K>> {
        if matches!(self.persisted.peek(), Some(Err(_))) {
            return match self.persisted.next() {
                Some(Err(err)) => Err(err),
                _ => Err(SombraError::Consistency("persisted scan changed while peeked")),
            };
        }
        Ok(self
            .persisted
            .peek()
            .and_then(|entry| entry.as_ref().ok())
            .map(|(key, _)| key))
    }

    fn advance_overlay(&mut self, current: &'a K) {
        let Some(overlay) = self.overlay else {
            self.next_key = None;
            return;
        };
        let candidate = match self.direction {
            ScanDirection::Ascending => overlay.higher_key(current),
            ScanDirection::Descending => overlay.lower_key(current),
        };
        self.next_key = match (candidate, self.last_key) {
            (Some(next), Some(last))
                if self.direction.order(next, last) != std::cmp::Ordering::Greater =>
            {
                Some(next)
            }
            _ => None,
        };
    }

    fn merge_key(&mut self, key: &'a K) -> Result<()> {
        let mut persisted_values = Vec::new();
        while matches!(self.peek_persisted_key()?, Some(k) if k == key) {
            if let Some((_, value)) = self.pull_persisted()? {
                persisted_values.push(value);
            }
        }
        let Some(changes) = self.overlay.and_then(|o| o.changes(key)) else {
            self.advance_overlay(key);
            return Ok(());
        };
        match self.mode {
            ValueMode::Single => {
                if let Some(value) = changes.apply_single(persisted_values.first().copied()) {
                    self.pending.push_back((key.clone(), value));
                }
            }
            ValueMode::Multi => {
                let net = changes.apply_multi(persisted_values);
                match self.direction {
                    ScanDirection::Ascending => self
                        .pending
                        .extend(net.into_iter().map(|value| (key.clone(), value))),
                    ScanDirection::Descending => self
                        .pending
                        .extend(net.into_iter().rev().map(|value| (key.clone(), value))),
                }
            }
        }
        self.advance_overlay(key);
        Ok(())
    }

    fn step(&mut self) -> Result<Option<(K, Rid)>> {
        loop {
            if let Some(entry) = self.pending.pop_front() {
                return Ok(Some(entry));
            }
            if self.exhausted {
                return Ok(None);
            }
            let overlay_key = self.next_key;
            let direction = self.direction;
            let persisted_first = match (self.peek_persisted_key()?, overlay_key) {
                (None, None) => {
                    self.exhausted = true;
                    return Ok(None);
                }
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (Some(pk), Some(ok)) => direction.order(pk, ok) == std::cmp::Ordering::Less,
            };
            if persisted_first {
                return self.pull_persisted();
            }
            if let Some(key) = overlay_key {
                self.merge_key(key)?;
            }
        }
    }
}

impl<K: Ord + Clone> Iterator for MergeScan<'_, K> {
    type Item = Result<(K, Rid)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(err) => {
                self.exhausted = true;
                self.pending.clear();
                Some(Err(err))
            }
        }
    }
}

/// Ascending scan over `[from, to]` with the given bound kinds.
pub fn ascending_between<'a, K: Ord + Clone + 'a>(
    overlay: Option<&'a TxIndexChanges<K>>,
    persisted: &'a dyn PersistedIndex<K>,
    from: Bound<&K>,
    to: Bound<&K>,
    mode: ValueMode,
) -> Result<MergeScan<'a, K>> {
    MergeScan::open(overlay, persisted, from, to, ScanDirection::Ascending, mode)
}

/// Descending scan over `[from, to]`; yields the reverse of [`ascending_between`].
pub fn descending_between<'a, K: Ord + Clone + 'a>(
    overlay: Option<&'a TxIndexChanges<K>>,
    persisted: &'a dyn PersistedIndex<K>,
    from: Bound<&K>,
    to: Bound<&K>,
    mode: ValueMode,
) -> Result<MergeScan<'a, K>> {
    MergeScan::open(overlay, persisted, from, to, ScanDirection::Descending, mode)
}

/// Open-ended scan starting at `from`, towards larger keys when `ascending`.
pub fn range_from<'a, K: Ord + Clone + 'a>(
    overlay: Option<&'a TxIndexChanges<K>>,
    persisted: &'a dyn PersistedIndex<K>,
    from: &K,
    inclusive: bool,
    ascending: bool,
    mode: ValueMode,
) -> Result<MergeScan<'a, K>> {
    let bound = if inclusive {
        Bound::Included(from)
    } else {
        Bound::Excluded(from)
    };
    if ascending {
        MergeScan::open(overlay, persisted, bound, Bound::Unbounded, ScanDirection::Ascending, mode)
    } else {
        MergeScan::open(overlay, persisted, Bound::Unbounded, bound, ScanDirection::Descending, mode)
    }
}

/// Value of `key` in a single-value index as seen by the transaction.
pub fn get_single<K: Ord + Clone>(
    overlay: Option<&TxIndexChanges<K>>,
    persisted: &dyn PersistedIndex<K>,
    key: &K,
) -> Result<Option<Rid>> {
    let cleared = overlay.is_some_and(|o| o.is_cleared());
    let changes = overlay.and_then(|o| o.changes(key));
    let base = if cleared {
        None
    } else {
        persisted.values(key)?.first().copied()
    };
    Ok(match changes {
        Some(changes) => changes.apply_single(base),
        None => base,
    })
}

/// Values of `key` in a multi-value index as seen by the transaction.
pub fn get_multi<K: Ord + Clone>(
    overlay: Option<&TxIndexChanges<K>>,
    persisted: &dyn PersistedIndex<K>,
    key: &K,
) -> Result<BTreeSet<Rid>> {
    let cleared = overlay.is_some_and(|o| o.is_cleared());
    let base = if cleared {
        Vec::new()
    } else {
        persisted.values(key)?
    };
    Ok(match overlay.and_then(|o| o.changes(key)) {
        Some(changes) => changes.apply_multi(base),
        None => base.into_iter().collect(),
    })
}
