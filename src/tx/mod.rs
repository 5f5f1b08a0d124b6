//! Write transactions over the link bag store.
//!
//! A [`Transaction`] owns the atomic operation all structural changes go
//! through, the per-index change overlays read by merge scans, and the
//! queue of bag key-spaces to drop when it commits.

use std::any::Any;
use std::collections::HashMap;
use std::ops::Bound;
use std::sync::Arc;

use tracing::debug;

mod changes;
mod merge;

pub use changes::{IndexChange, IndexOp, KeyChanges, TxIndexChanges};
pub use merge::{
    ascending_between, descending_between, get_multi, get_single, range_from, MergeScan,
    PersistedEntries, PersistedIndex, ValueMode,
};

use crate::primitives::pager::{AtomicOperation, PageAccess, PageStore};
use crate::storage::linkbag::{LinkBagContext, LinkBagPointer, SharedLinkBagBTree};
use crate::storage::{default_metrics, ConfigProvider, LinkBagMetrics, LinkBagOptions};
use crate::types::{Result, ScanDirection, SombraError};

/// Single-writer transaction.
///
/// Dropping it without calling [`commit`](Self::commit) rolls back every
/// page change and forgets the overlays.
pub struct Transaction<'s> {
    op: Box<dyn AtomicOperation + 's>,
    tree: Option<&'s SharedLinkBagBTree>,
    options: LinkBagOptions,
    metrics: Arc<dyn LinkBagMetrics>,
    overlays: HashMap<String, Box<dyn Any>>,
    pending_bag_deletes: Vec<LinkBagPointer>,
}

impl<'s> Transaction<'s> {
    /// Starts a transaction on `store`. `tree` is `None` for sessions
    /// without a local link bag tree.
    pub fn begin(
        store: &'s dyn PageStore,
        tree: Option<&'s SharedLinkBagBTree>,
        config: &dyn ConfigProvider,
    ) -> Result<Self> {
        let op = store.begin_atomic()?;
        Self::with_operation(op, tree, config)
    }

    /// Wraps an already started atomic operation.
    pub fn with_operation(
        op: Box<dyn AtomicOperation + 's>,
        tree: Option<&'s SharedLinkBagBTree>,
        config: &dyn ConfigProvider,
    ) -> Result<Self> {
        let options = config.link_bag_options()?;
        let metrics = options.metrics.clone().unwrap_or_else(default_metrics);
        Ok(Self {
            op,
            tree,
            options,
            metrics,
            overlays: HashMap::new(),
            pending_bag_deletes: Vec::new(),
        })
    }

    /// Pages as seen by this transaction, including its own writes.
    pub fn pages(&self) -> &dyn PageAccess {
        self.op.pages()
    }

    /// The atomic operation structural changes go through.
    pub fn operation(&mut self) -> &mut dyn AtomicOperation {
        self.op.as_mut()
    }

    /// Shared link bag tree, absent in remote sessions.
    pub fn link_bags(&self) -> Option<&'s SharedLinkBagBTree> {
        self.tree
    }

    /// Read context handed to tree-backed bags.
    pub fn context(&self) -> LinkBagContext<'_> {
        LinkBagContext {
            pages: self.op.pages(),
            tree: self.tree,
        }
    }

    /// Validated options this transaction was started with.
    pub fn options(&self) -> &LinkBagOptions {
        &self.options
    }

    /// Metrics sink.
    pub fn metrics(&self) -> &dyn LinkBagMetrics {
        self.metrics.as_ref()
    }

    /// Overlay of the index called `name`, created on first use.
    pub fn index_changes<K>(&mut self, name: &str) -> Result<&mut TxIndexChanges<K>>
    where
        K: Ord + Clone + 'static,
    {
        self.overlays
            .entry(name.to_string())
            .or_insert_with(|| Box::new(TxIndexChanges::<K>::new()))
            .downcast_mut::<TxIndexChanges<K>>()
            .ok_or(SombraError::Invalid("index overlay registered with another key type"))
    }

    /// Overlay of the index called `name`, if anything was recorded.
    pub fn overlay<K>(&self, name: &str) -> Option<&TxIndexChanges<K>>
    where
        K: Ord + Clone + 'static,
    {
        self.overlays
            .get(name)
            .and_then(|boxed| boxed.downcast_ref::<TxIndexChanges<K>>())
    }

    /// Opens a merge scan over the index `name` between two bounds.
    pub fn scan_index<'a, K>(
        &'a self,
        name: &str,
        persisted: &'a dyn PersistedIndex<K>,
        from: Bound<&K>,
        to: Bound<&K>,
        direction: ScanDirection,
        mode: ValueMode,
    ) -> Result<MergeScan<'a, K>>
    where
        K: Ord + Clone + 'static,
    {
        self.metrics.merge_scan_opened(direction);
        MergeScan::open(self.overlay(name), persisted, from, to, direction, mode)
    }

    /// Queues the key-space of `pointer` for deletion at commit.
    pub fn defer_bag_delete(&mut self, pointer: LinkBagPointer) {
        if pointer.is_valid() && !self.pending_bag_deletes.contains(&pointer) {
            debug!(
                target: "sombra_linkbag::convert",
                bag = %pointer,
                "queued link bag for deletion"
            );
            self.pending_bag_deletes.push(pointer);
        }
    }

    /// Bags that will be deleted at commit.
    pub fn pending_bag_deletes(&self) -> &[LinkBagPointer] {
        &self.pending_bag_deletes
    }

    /// Deletes queued bags, then publishes every page change.
    pub fn commit(mut self) -> Result<()> {
        let deletes = std::mem::take(&mut self.pending_bag_deletes);
        if !deletes.is_empty() {
            let tree = self.tree.ok_or(SombraError::SubstrateUnavailable)?;
            for pointer in deletes {
                let removed = tree.bag_for(pointer)?.delete(self.op.as_mut())?;
                self.metrics.bag_deleted();
                debug!(
                    target: "sombra_linkbag::convert",
                    bag = %pointer,
                    entries = removed,
                    "deleted link bag"
                );
            }
        }
        self.op.commit()
    }

    /// Discards every change made by the transaction.
    pub fn rollback(self) {
        debug!(
            target: "sombra_tx::rollback",
            overlays = self.overlays.len(),
            "rolled back transaction"
        );
    }
}

impl ConfigProvider for Transaction<'_> {
    fn link_bag_options(&self) -> Result<LinkBagOptions> {
        Ok(self.options.clone())
    }
}
