use std::ops::Bound;

use super::shared_tree::SharedLinkBagBTree;
use crate::primitives::pager::PageAccess;
use crate::tx::{PersistedEntries, PersistedIndex};
use crate::types::{Result, Rid, ScanDirection};

/// The shared tree read as a multi-value index from bag id to linked RIDs.
///
/// Multiplicities are not visible through this view; a RID linked several
/// times from one bag appears once.
#[derive(Copy, Clone)]
pub struct SubjectIndex<'a> {
    tree: &'a SharedLinkBagBTree,
    pages: &'a dyn PageAccess,
}

impl<'a> SubjectIndex<'a> {
    /// Reads `tree` through `pages`.
    pub fn new(tree: &'a SharedLinkBagBTree, pages: &'a dyn PageAccess) -> Self {
        Self { tree, pages }
    }
}

impl PersistedIndex<i64> for SubjectIndex<'_> {
    fn values(&self, key: &i64) -> Result<Vec<Rid>> {
        self.tree
            .bag(*key)
            .entries(self.pages, ScanDirection::Ascending)?
            .map(|entry| entry.map(|(rid, _)| rid))
            .collect()
    }

    fn scan<'s>(
        &'s self,
        from: Bound<&i64>,
        to: Bound<&i64>,
        direction: ScanDirection,
    ) -> Result<PersistedEntries<'s, i64>> {
        let cursor = self
            .tree
            .scan_bags(self.pages, from.cloned(), to.cloned(), direction)?;
        Ok(Box::new(
            cursor.map(|entry| entry.map(|(key, _)| (key.bag_id, key.rid()))),
        ))
    }
}
