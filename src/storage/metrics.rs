use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::ScanDirection;

/// Trait for tracking link bag activity.
///
/// Implementations collect statistics about representation changes, tree
/// writes and merge scans. This information can be used for monitoring and
/// for tuning the conversion thresholds.
pub trait LinkBagMetrics: Send + Sync {
    /// Records an embedded bag moving into the shared tree.
    ///
    /// # Parameters
    /// * `size` - Number of links in the bag at conversion time.
    fn converted_to_tree(&self, size: usize);

    /// Records a tree bag shrinking back into its owner.
    ///
    /// # Parameters
    /// * `size` - Number of links in the bag at conversion time.
    fn converted_to_embedded(&self, size: usize);

    /// Records a conversion to tree that was skipped because no tree is available.
    fn conversion_skipped(&self);

    /// Records a tree bag writing its buffered changes.
    fn tree_bag_flushed(&self, entries: usize);

    /// Records a merge scan being opened.
    fn merge_scan_opened(&self, direction: ScanDirection);

    /// Records a tree bag key-space being deleted at commit.
    fn bag_deleted(&self);
}

/// A no-op implementation of [`LinkBagMetrics`] that discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl LinkBagMetrics for NoopMetrics {
    fn converted_to_tree(&self, _size: usize) {}
    fn converted_to_embedded(&self, _size: usize) {}
    fn conversion_skipped(&self) {}
    fn tree_bag_flushed(&self, _entries: usize) {}
    fn merge_scan_opened(&self, _direction: ScanDirection) {}
    fn bag_deleted(&self) {}
}

/// A thread-safe counter-based implementation of [`LinkBagMetrics`].
#[derive(Default, Debug)]
pub struct CounterMetrics {
    /// Embedded to tree conversions.
    pub to_tree: AtomicU64,

    /// Tree to embedded conversions.
    pub to_embedded: AtomicU64,

    /// Conversions skipped for lack of a tree.
    pub skipped: AtomicU64,

    /// Tree bag flushes.
    pub flushes: AtomicU64,

    /// Entries written by tree bag flushes.
    pub flushed_entries: AtomicU64,

    /// Ascending merge scans opened.
    pub scans_ascending: AtomicU64,

    /// Descending merge scans opened.
    pub scans_descending: AtomicU64,

    /// Bag key-spaces deleted.
    pub bags_deleted: AtomicU64,
}

impl LinkBagMetrics for CounterMetrics {
    fn converted_to_tree(&self, _size: usize) {
        self.to_tree.fetch_add(1, Ordering::Relaxed);
    }

    fn converted_to_embedded(&self, _size: usize) {
        self.to_embedded.fetch_add(1, Ordering::Relaxed);
    }

    fn conversion_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    fn tree_bag_flushed(&self, entries: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.flushed_entries
            .fetch_add(entries as u64, Ordering::Relaxed);
    }

    fn merge_scan_opened(&self, direction: ScanDirection) {
        match direction {
            ScanDirection::Ascending => self.scans_ascending.fetch_add(1, Ordering::Relaxed),
            ScanDirection::Descending => self.scans_descending.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn bag_deleted(&self) {
        self.bags_deleted.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics sink.
pub fn default_metrics() -> Arc<dyn LinkBagMetrics> {
    Arc::new(NoopMetrics)
}
