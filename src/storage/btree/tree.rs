use std::marker::PhantomData;
use std::ops::Bound;
use std::sync::Arc;

use tracing::trace;

use super::codecs::{KeyCodec, ValCodec};
use super::cursor::Cursor;
use super::page::{self, Header, InternalNode, Layout, LeafNode};
use super::stats::BTreeStats;
use crate::primitives::pager::{AtomicOperation, PageAccess, PageRef};
use crate::types::page::PageKind;
use crate::types::{PageId, Result, ScanDirection, SombraError};

/// Smallest record count a node must hold for splits to make progress.
const MIN_FANOUT: usize = 3;

/// B+ tree with fixed-width keys and values.
///
/// The root page never moves: when it splits, its contents are copied into
/// two fresh children and the root is rewritten as an internal node. Deletes
/// do not rebalance; empty leaves stay linked and are skipped by cursors.
pub struct BTree<K: KeyCodec, V: ValCodec> {
    root: PageId,
    layout: Layout,
    leaf_capacity: usize,
    internal_capacity: usize,
    stats: Arc<BTreeStats>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: KeyCodec, V: ValCodec> BTree<K, V> {
    /// Allocates an empty tree.
    pub fn create(op: &mut dyn AtomicOperation) -> Result<Self> {
        let mut tree = Self::with_root(PageId(0), op.page_size())?;
        let root = op.allocate_page()?;
        page::init_node(op.page_mut(root)?, root, PageKind::BTreeLeaf)?;
        tree.root = root;
        Ok(tree)
    }

    /// Opens a tree rooted at `root`.
    pub fn open(pages: &dyn PageAccess, root: PageId) -> Result<Self> {
        let tree = Self::with_root(root, pages.page_size())?;
        let page = pages.page(root)?;
        Header::parse(page.data())?;
        Ok(tree)
    }

    fn with_root(root: PageId, page_size: u32) -> Result<Self> {
        let layout = Layout {
            key_len: K::WIDTH,
            val_len: V::WIDTH,
        };
        let leaf_capacity = layout.leaf_capacity(page_size);
        let internal_capacity = layout.internal_capacity(page_size);
        if leaf_capacity < MIN_FANOUT || internal_capacity < MIN_FANOUT {
            return Err(SombraError::Invalid("page size too small for btree records"));
        }
        Ok(Self {
            root,
            layout,
            leaf_capacity,
            internal_capacity,
            stats: Arc::new(BTreeStats::default()),
            _marker: PhantomData,
        })
    }

    /// Page holding the root node.
    pub fn root_page(&self) -> PageId {
        self.root
    }

    /// Operation counters for this tree.
    pub fn stats(&self) -> &BTreeStats {
        &self.stats
    }

    pub(crate) fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Looks up the value stored under `key`.
    pub fn get(&self, pages: &dyn PageAccess, key: &K) -> Result<Option<V>> {
        let encoded = encode_key(key);
        let (leaf, _) = self.find_leaf(pages, &encoded, false)?;
        let data = leaf.data();
        let header = Header::parse(data)?;
        let stride = self.layout.leaf_stride();
        let (mut lo, mut hi) = (0usize, header.count);
        while lo < hi {
            let mid = (lo + hi) / 2;
            let rec = page::record(data, stride, mid)?;
            match K::compare_encoded(&rec[..self.layout.key_len], &encoded) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => {
                    return V::decode_val(&rec[self.layout.key_len..]).map(Some)
                }
            }
        }
        Ok(None)
    }

    /// Inserts or overwrites `key`. Returns true when the key was not present.
    pub fn put(&self, op: &mut dyn AtomicOperation, key: &K, value: &V) -> Result<bool> {
        let encoded = encode_key(key);
        let mut val = Vec::with_capacity(V::WIDTH);
        V::encode_val(value, &mut val);
        if val.len() != V::WIDTH {
            return Err(SombraError::Invalid("value codec width mismatch"));
        }
        let (leaf_page, path) = self.find_leaf(op.pages(), &encoded, true)?;
        let leaf_id = leaf_page.id;
        let mut leaf = LeafNode::load(leaf_page.data(), &self.layout)?;
        drop(leaf_page);
        match leaf.search(&encoded, K::compare_encoded) {
            Ok(idx) => {
                leaf.entries[idx].1 = val;
                leaf.store(op.page_mut(leaf_id)?, &self.layout)?;
                self.stats.inc_updates();
                return Ok(false);
            }
            Err(idx) => leaf.entries.insert(idx, (encoded, val)),
        }
        self.stats.inc_inserts();
        if leaf.entries.len() <= self.leaf_capacity {
            leaf.store(op.page_mut(leaf_id)?, &self.layout)?;
        } else {
            self.split_leaf(op, leaf_id, leaf, path)?;
        }
        Ok(true)
    }

    /// Removes `key`, returning its previous value.
    pub fn delete(&self, op: &mut dyn AtomicOperation, key: &K) -> Result<Option<V>> {
        let encoded = encode_key(key);
        let (leaf_page, _) = self.find_leaf(op.pages(), &encoded, false)?;
        let leaf_id = leaf_page.id;
        let mut leaf = LeafNode::load(leaf_page.data(), &self.layout)?;
        drop(leaf_page);
        let Ok(idx) = leaf.search(&encoded, K::compare_encoded) else {
            return Ok(None);
        };
        let (_, old) = leaf.entries.remove(idx);
        leaf.store(op.page_mut(leaf_id)?, &self.layout)?;
        self.stats.inc_deletes();
        V::decode_val(&old).map(Some)
    }

    /// Opens a cursor over `[lo, hi]` walking in `direction`.
    pub fn range<'a>(
        &'a self,
        pages: &'a dyn PageAccess,
        lo: Bound<K>,
        hi: Bound<K>,
        direction: ScanDirection,
    ) -> Result<Cursor<'a, K, V>> {
        Cursor::new(self, pages, lo, hi, direction)
    }

    /// Descends to the leaf covering `key`, optionally recording the
    /// internal pages visited from the root down.
    pub(crate) fn find_leaf(
        &self,
        pages: &dyn PageAccess,
        key: &[u8],
        record_path: bool,
    ) -> Result<(PageRef, Vec<PageId>)> {
        self.stats.inc_searches();
        let mut path = Vec::new();
        let mut current = self.root;
        loop {
            let page = pages.page(current)?;
            let header = Header::parse(page.data())?;
            if header.is_leaf() {
                return Ok((page, path));
            }
            if record_path {
                path.push(current);
            }
            current = page::child_for(
                page.data(),
                &header,
                &self.layout,
                key,
                K::compare_encoded,
            )?;
        }
    }

    /// Descends along the first (or last) child of every internal node.
    pub(crate) fn find_edge_leaf(
        &self,
        pages: &dyn PageAccess,
        direction: ScanDirection,
    ) -> Result<PageRef> {
        self.stats.inc_searches();
        let mut current = self.root;
        loop {
            let page = pages.page(current)?;
            let header = Header::parse(page.data())?;
            if header.is_leaf() {
                return Ok(page);
            }
            current = match direction {
                ScanDirection::Ascending => header
                    .leftmost_child
                    .ok_or(SombraError::Corruption("internal node without leftmost child"))?,
                ScanDirection::Descending => {
                    page::last_child(page.data(), &header, &self.layout)?
                }
            };
        }
    }

    fn split_leaf(
        &self,
        op: &mut dyn AtomicOperation,
        leaf_id: PageId,
        mut leaf: LeafNode,
        path: Vec<PageId>,
    ) -> Result<()> {
        self.stats.inc_leaf_splits();
        let mid = leaf.entries.len() / 2;
        let right_entries = leaf.entries.split_off(mid);
        let separator = right_entries[0].0.clone();

        if leaf_id == self.root {
            let left_id = self.new_node(op, PageKind::BTreeLeaf)?;
            let right_id = self.new_node(op, PageKind::BTreeLeaf)?;
            let left = LeafNode {
                entries: leaf.entries,
                left: None,
                right: Some(right_id),
            };
            let right = LeafNode {
                entries: right_entries,
                left: Some(left_id),
                right: None,
            };
            left.store(op.page_mut(left_id)?, &self.layout)?;
            right.store(op.page_mut(right_id)?, &self.layout)?;
            self.grow_root(op, left_id, separator, right_id)?;
            trace!(
                target: "sombra_btree::split",
                root = self.root.0,
                left = left_id.0,
                right = right_id.0,
                "root leaf split"
            );
            return Ok(());
        }

        let right_id = self.new_node(op, PageKind::BTreeLeaf)?;
        let right = LeafNode {
            entries: right_entries,
            left: Some(leaf_id),
            right: leaf.right,
        };
        if let Some(next) = leaf.right {
            page::set_left_sibling(op.page_mut(next)?, Some(right_id))?;
        }
        leaf.right = Some(right_id);
        leaf.store(op.page_mut(leaf_id)?, &self.layout)?;
        right.store(op.page_mut(right_id)?, &self.layout)?;
        trace!(
            target: "sombra_btree::split",
            leaf = leaf_id.0,
            right = right_id.0,
            "leaf split"
        );
        self.insert_into_parent(op, path, separator, right_id)
    }

    fn insert_into_parent(
        &self,
        op: &mut dyn AtomicOperation,
        mut path: Vec<PageId>,
        mut separator: Vec<u8>,
        mut child: PageId,
    ) -> Result<()> {
        while let Some(parent_id) = path.pop() {
            let mut node = InternalNode::load(op.page(parent_id)?.data(), &self.layout)?;
            let idx = node
                .entries
                .partition_point(|(k, _)| K::compare_encoded(k, &separator).is_le());
            node.entries.insert(idx, (separator, child));
            if node.entries.len() <= self.internal_capacity {
                return node.store(op.page_mut(parent_id)?, &self.layout);
            }

            self.stats.inc_internal_splits();
            let mid = node.entries.len() / 2;
            let mut right_entries = node.entries.split_off(mid);
            let (up_separator, up_child) = right_entries.remove(0);

            if parent_id == self.root {
                let left_id = self.new_node(op, PageKind::BTreeInternal)?;
                let right_id = self.new_node(op, PageKind::BTreeInternal)?;
                node.store(op.page_mut(left_id)?, &self.layout)?;
                InternalNode {
                    leftmost: up_child,
                    entries: right_entries,
                }
                .store(op.page_mut(right_id)?, &self.layout)?;
                self.grow_root(op, left_id, up_separator, right_id)?;
                trace!(
                    target: "sombra_btree::split",
                    root = self.root.0,
                    "root internal split"
                );
                return Ok(());
            }

            let right_id = self.new_node(op, PageKind::BTreeInternal)?;
            node.store(op.page_mut(parent_id)?, &self.layout)?;
            InternalNode {
                leftmost: up_child,
                entries: right_entries,
            }
            .store(op.page_mut(right_id)?, &self.layout)?;
            separator = up_separator;
            child = right_id;
        }
        Err(SombraError::Consistency("split propagated past the root"))
    }

    fn grow_root(
        &self,
        op: &mut dyn AtomicOperation,
        left: PageId,
        separator: Vec<u8>,
        right: PageId,
    ) -> Result<()> {
        self.stats.inc_root_splits();
        InternalNode {
            leftmost: left,
            entries: vec![(separator, right)],
        }
        .store(op.page_mut(self.root)?, &self.layout)
    }

    fn new_node(&self, op: &mut dyn AtomicOperation, kind: PageKind) -> Result<PageId> {
        let id = op.allocate_page()?;
        page::init_node(op.page_mut(id)?, id, kind)?;
        Ok(id)
    }
}

pub(crate) fn encode_key<K: KeyCodec>(key: &K) -> Vec<u8> {
    let mut buf = Vec::with_capacity(K::WIDTH);
    K::encode_key(key, &mut buf);
    debug_assert_eq!(buf.len(), K::WIDTH, "key codec width mismatch");
    buf
}
