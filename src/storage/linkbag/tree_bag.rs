use std::collections::btree_map;
use std::collections::BTreeMap;
use std::iter::Peekable;

use tracing::debug;

use super::shared_tree::{BagEntries, IsolatedLinkBagBTree, LinkBagPointer, SharedLinkBagBTree};
use crate::primitives::pager::{AtomicOperation, PageAccess};
use crate::types::{Result, Rid, ScanDirection, SombraError};

/// Read context for tree-backed bags: the page view of the running atomic
/// operation and the shared tree, when this session has one.
#[derive(Copy, Clone)]
pub struct LinkBagContext<'a> {
    /// Pages as seen by the current atomic operation.
    pub pages: &'a dyn PageAccess,
    /// Shared tree; `None` in sessions without a local tree.
    pub tree: Option<&'a SharedLinkBagBTree>,
}

/// Bag stored in the shared tree, with not-yet-flushed changes kept in
/// memory as absolute multiplicities (zero meaning removed).
#[derive(Clone, Debug)]
pub struct TreeLinkBag {
    pointer: LinkBagPointer,
    changes: BTreeMap<Rid, u32>,
    size: usize,
}

impl Default for TreeLinkBag {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeLinkBag {
    /// Empty bag that has no key-space yet.
    pub fn new() -> Self {
        Self {
            pointer: LinkBagPointer::INVALID,
            changes: BTreeMap::new(),
            size: 0,
        }
    }

    /// Bag already materialized at `pointer` holding `size` links.
    pub fn from_pointer(pointer: LinkBagPointer, size: usize) -> Self {
        Self {
            pointer,
            changes: BTreeMap::new(),
            size,
        }
    }

    /// Where the bag lives, or [`LinkBagPointer::INVALID`].
    pub fn pointer(&self) -> LinkBagPointer {
        self.pointer
    }

    /// Returns true when changes are waiting for [`flush`](Self::flush).
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Sum of multiplicities.
    pub fn size(&self) -> usize {
        self.size
    }

    fn persisted<'a>(&self, ctx: &LinkBagContext<'a>) -> Result<Option<IsolatedLinkBagBTree<'a>>> {
        if !self.pointer.is_valid() {
            return Ok(None);
        }
        let tree = ctx.tree.ok_or(SombraError::SubstrateUnavailable)?;
        tree.bag_for(self.pointer).map(Some)
    }

    /// Occurrences of `rid`, local changes first.
    pub fn multiplicity(&self, ctx: &LinkBagContext<'_>, rid: Rid) -> Result<u32> {
        if let Some(count) = self.changes.get(&rid) {
            return Ok(*count);
        }
        match self.persisted(ctx)? {
            Some(bag) => Ok(bag.get(ctx.pages, rid)?.unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Adds one occurrence of `rid` unless it already reached `max`.
    pub fn add(&mut self, ctx: &LinkBagContext<'_>, rid: Rid, max: u32) -> Result<bool> {
        let current = self.multiplicity(ctx, rid)?;
        if current >= max {
            return Ok(false);
        }
        self.changes.insert(rid, current + 1);
        self.size += 1;
        Ok(true)
    }

    /// Removes one occurrence of `rid`.
    pub fn remove(&mut self, ctx: &LinkBagContext<'_>, rid: Rid) -> Result<bool> {
        let current = self.multiplicity(ctx, rid)?;
        if current == 0 {
            return Ok(false);
        }
        self.changes.insert(rid, current - 1);
        self.size -= 1;
        Ok(true)
    }

    /// Overwrites the multiplicity of `rid` in an unmaterialized bag.
    pub(crate) fn set_multiplicity(&mut self, rid: Rid, multiplicity: u32) {
        debug_assert!(!self.pointer.is_valid(), "replicating into a persisted bag");
        let old = self.changes.insert(rid, multiplicity).unwrap_or(0);
        self.size = self.size - old as usize + multiplicity as usize;
    }

    /// Distinct RIDs with their effective multiplicities, in RID order.
    pub fn entries<'a>(&'a self, ctx: &LinkBagContext<'a>) -> Result<TreeBagEntries<'a>> {
        let persisted = match self.persisted(ctx)? {
            Some(bag) => Some(bag.entries(ctx.pages, ScanDirection::Ascending)?.peekable()),
            None => None,
        };
        Ok(TreeBagEntries {
            local: self.changes.iter().peekable(),
            persisted,
        })
    }

    /// Writes buffered changes through `op`, allocating a bag id on first use.
    /// Returns the number of entries written.
    pub fn flush(&mut self, op: &mut dyn AtomicOperation, tree: &SharedLinkBagBTree) -> Result<usize> {
        if self.pointer.is_valid() && self.changes.is_empty() {
            return Ok(0);
        }
        if self
            .changes
            .iter()
            .any(|(rid, count)| *count > 0 && !rid.is_persistent())
        {
            return Err(SombraError::Invalid(
                "cannot persist a link to a record without a position",
            ));
        }
        if !self.pointer.is_valid() {
            self.pointer = tree.allocate_bag(op)?;
        }
        let bag = tree.bag_for(self.pointer).map_err(|_| {
            SombraError::Consistency("tree bag flushed into a different tree")
        })?;
        let written = self.changes.len();
        for (&rid, &count) in &self.changes {
            if count == 0 {
                bag.remove(op, rid)?;
            } else {
                bag.put(op, rid, count)?;
            }
        }
        self.changes.clear();
        debug!(
            target: "sombra_linkbag::flush",
            bag = %self.pointer,
            entries = written,
            size = self.size,
            "flushed tree link bag"
        );
        Ok(written)
    }
}

/// Merge of a tree bag's local changes with its persisted entries.
///
/// Local values override persisted ones and zero multiplicities are skipped.
pub struct TreeBagEntries<'a> {
    local: Peekable<btree_map::Iter<'a, Rid, u32>>,
    persisted: Option<Peekable<BagEntries<'a>>>,
}

impl Iterator for TreeBagEntries<'_> {
    type Item = Result<(Rid, u32)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let persisted_head = match self.persisted.as_mut().and_then(|p| p.peek()) {
                Some(Ok((rid, _))) => Some(*rid),
                Some(Err(_)) => return self.persisted.as_mut().and_then(|p| p.next()),
                None => None,
            };
            let local_head = self.local.peek().map(|(rid, _)| **rid);
            let take_local = match (local_head, persisted_head) {
                (None, None) => return None,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (Some(l), Some(p)) => {
                    if l == p {
                        // local value shadows the persisted one
                        self.persisted.as_mut().and_then(|p| p.next());
                    }
                    l <= p
                }
            };
            if take_local {
                let (rid, count) = self.local.next()?;
                if *count == 0 {
                    continue;
                }
                return Some(Ok((*rid, *count)));
            }
            return self.persisted.as_mut().and_then(|p| p.next());
        }
    }
}
