use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::Serialize;

/// Snapshot of B+ tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BTreeStatsSnapshot {
    /// Root-to-leaf descents
    pub searches: u64,
    /// Keys inserted for the first time
    pub inserts: u64,
    /// Existing keys whose value was overwritten
    pub updates: u64,
    /// Keys removed
    pub deletes: u64,
    /// Leaf page splits
    pub leaf_splits: u64,
    /// Internal page splits
    pub internal_splits: u64,
    /// Splits that grew the tree by one level
    pub root_splits: u64,
    /// Sibling hops taken by cursors
    pub cursor_page_hops: u64,
}

/// Thread-safe statistics tracking for B+ tree operations.
#[derive(Default, Debug)]
pub struct BTreeStats {
    searches: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    leaf_splits: AtomicU64,
    internal_splits: AtomicU64,
    root_splits: AtomicU64,
    cursor_page_hops: AtomicU64,
}

impl BTreeStats {
    pub(crate) fn inc_searches(&self) {
        self.searches.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_inserts(&self) {
        self.inserts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_updates(&self) {
        self.updates.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_deletes(&self) {
        self.deletes.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_leaf_splits(&self) {
        self.leaf_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_internal_splits(&self) {
        self.internal_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_root_splits(&self) {
        self.root_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_cursor_page_hops(&self) {
        self.cursor_page_hops.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Creates a snapshot of all current statistics.
    pub fn snapshot(&self) -> BTreeStatsSnapshot {
        let load = |c: &AtomicU64| c.load(AtomicOrdering::Relaxed);
        BTreeStatsSnapshot {
            searches: load(&self.searches),
            inserts: load(&self.inserts),
            updates: load(&self.updates),
            deletes: load(&self.deletes),
            leaf_splits: load(&self.leaf_splits),
            internal_splits: load(&self.internal_splits),
            root_splits: load(&self.root_splits),
            cursor_page_hops: load(&self.cursor_page_hops),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "sombra_btree::stats",
            searches = snapshot.searches,
            inserts = snapshot.inserts,
            updates = snapshot.updates,
            deletes = snapshot.deletes,
            leaf_splits = snapshot.leaf_splits,
            internal_splits = snapshot.internal_splits,
            root_splits = snapshot.root_splits,
            cursor_page_hops = snapshot.cursor_page_hops,
            "btree stats snapshot"
        );
    }
}
