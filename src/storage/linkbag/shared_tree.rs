use std::fmt;
use std::ops::Bound;

use tracing::debug;

use super::key::EdgeKey;
use crate::primitives::bytes::be;
use crate::primitives::pager::{AtomicOperation, PageAccess};
use crate::storage::btree::{BTree, BTreeStats, Cursor};
use crate::types::page::{PageHeader, PageKind, PAGE_HDR_LEN};
use crate::types::{FileId, PageId, Result, Rid, ScanDirection, SombraError};

const META_MAGIC: [u8; 4] = *b"LBAG";
const META_ROOT: usize = PAGE_HDR_LEN + 4;
const META_NEXT_BAG: usize = PAGE_HDR_LEN + 12;

/// Location of a tree-backed bag: the file holding the shared tree and the
/// bag's key-space prefix inside it.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct LinkBagPointer {
    /// File holding the shared tree.
    pub file_id: FileId,
    /// Leading component of every key of the bag.
    pub bag_id: i64,
}

impl LinkBagPointer {
    /// Marks a bag that has not been written to a tree yet.
    pub const INVALID: LinkBagPointer = LinkBagPointer {
        file_id: FileId(-1),
        bag_id: -1,
    };

    /// Returns true once the bag has a key-space in some tree.
    pub fn is_valid(&self) -> bool {
        self.file_id.0 >= 0 && self.bag_id >= 0
    }
}

impl fmt::Display for LinkBagPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_id, self.bag_id)
    }
}

/// One B+ tree shared by every tree-backed bag of a file.
///
/// Bags are isolated purely by the leading `bag_id` of [`EdgeKey`]. A meta
/// page records the root and the next bag id to hand out.
pub struct SharedLinkBagBTree {
    file_id: FileId,
    meta_page: PageId,
    tree: BTree<EdgeKey, u32>,
}

impl SharedLinkBagBTree {
    /// Creates the meta page and an empty tree.
    pub fn create(op: &mut dyn AtomicOperation, file_id: FileId) -> Result<Self> {
        if file_id.0 < 0 {
            return Err(SombraError::Invalid("negative file id"));
        }
        let tree = BTree::create(op)?;
        let meta_page = op.allocate_page()?;
        let page_size = op.page_size();
        let buf = op.page_mut(meta_page)?;
        PageHeader::new(meta_page, PageKind::Meta, page_size, 0)?.encode(buf)?;
        buf[PAGE_HDR_LEN..PAGE_HDR_LEN + 4].copy_from_slice(&META_MAGIC);
        be::put_u64(&mut buf[META_ROOT..], tree.root_page().0);
        be::put_i64(&mut buf[META_NEXT_BAG..], 0);
        debug!(
            target: "sombra_linkbag::tree",
            file = file_id.0,
            meta = meta_page.0,
            root = tree.root_page().0,
            "created shared link bag tree"
        );
        Ok(Self {
            file_id,
            meta_page,
            tree,
        })
    }

    /// Opens a tree from its meta page.
    pub fn open(pages: &dyn PageAccess, file_id: FileId, meta_page: PageId) -> Result<Self> {
        let page = pages.page(meta_page)?;
        let data = page.data();
        if PageHeader::decode(data)?.kind != PageKind::Meta
            || data[PAGE_HDR_LEN..PAGE_HDR_LEN + 4] != META_MAGIC
        {
            return Err(SombraError::Corruption("not a link bag meta page"));
        }
        let root = PageId(be::get_u64(&data[META_ROOT..]));
        let tree = BTree::open(pages, root)?;
        Ok(Self {
            file_id,
            meta_page,
            tree,
        })
    }

    /// File holding this tree.
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Page holding the tree metadata.
    pub fn meta_page(&self) -> PageId {
        self.meta_page
    }

    /// Operation counters of the underlying tree.
    pub fn stats(&self) -> &BTreeStats {
        self.tree.stats()
    }

    /// Reserves a fresh bag id.
    pub fn allocate_bag(&self, op: &mut dyn AtomicOperation) -> Result<LinkBagPointer> {
        let buf = op.page_mut(self.meta_page)?;
        let bag_id = be::get_i64(&buf[META_NEXT_BAG..]);
        let next = bag_id
            .checked_add(1)
            .ok_or(SombraError::Invalid("bag id space exhausted"))?;
        be::put_i64(&mut buf[META_NEXT_BAG..], next);
        Ok(LinkBagPointer {
            file_id: self.file_id,
            bag_id,
        })
    }

    /// View of one bag's key-space.
    pub fn bag(&self, bag_id: i64) -> IsolatedLinkBagBTree<'_> {
        IsolatedLinkBagBTree { tree: self, bag_id }
    }

    /// View of the bag `pointer` refers to.
    pub fn bag_for(&self, pointer: LinkBagPointer) -> Result<IsolatedLinkBagBTree<'_>> {
        if !pointer.is_valid() {
            return Err(SombraError::Invalid("link bag pointer is not materialized"));
        }
        if pointer.file_id != self.file_id {
            return Err(SombraError::Invalid("link bag pointer refers to another file"));
        }
        Ok(self.bag(pointer.bag_id))
    }

    /// Ordered scan over whole bags, from bag `lo` to bag `hi` inclusive.
    pub(crate) fn scan_bags<'a>(
        &'a self,
        pages: &'a dyn PageAccess,
        lo: Bound<i64>,
        hi: Bound<i64>,
        direction: ScanDirection,
    ) -> Result<Cursor<'a, EdgeKey, u32>> {
        let lo = match lo {
            Bound::Included(bag) => Bound::Included(EdgeKey::bag_min(bag)),
            Bound::Excluded(bag) => Bound::Excluded(EdgeKey::bag_max(bag)),
            Bound::Unbounded => Bound::Unbounded,
        };
        let hi = match hi {
            Bound::Included(bag) => Bound::Included(EdgeKey::bag_max(bag)),
            Bound::Excluded(bag) => Bound::Excluded(EdgeKey::bag_min(bag)),
            Bound::Unbounded => Bound::Unbounded,
        };
        self.tree.range(pages, lo, hi, direction)
    }
}

/// Operations on one bag of a [`SharedLinkBagBTree`].
///
/// Every lookup and scan is bounded by the bag's sentinel keys, so it never
/// observes another bag's entries.
#[derive(Copy, Clone)]
pub struct IsolatedLinkBagBTree<'t> {
    tree: &'t SharedLinkBagBTree,
    bag_id: i64,
}

impl<'t> IsolatedLinkBagBTree<'t> {
    /// Bag id of this view.
    pub fn bag_id(&self) -> i64 {
        self.bag_id
    }

    /// Pointer persisted by owners of this bag.
    pub fn pointer(&self) -> LinkBagPointer {
        LinkBagPointer {
            file_id: self.tree.file_id,
            bag_id: self.bag_id,
        }
    }

    /// Multiplicity recorded for `rid`.
    pub fn get(&self, pages: &dyn PageAccess, rid: Rid) -> Result<Option<u32>> {
        self.tree.tree.get(pages, &EdgeKey::new(self.bag_id, rid))
    }

    /// Records `multiplicity` for `rid`. Returns true when `rid` was absent.
    pub fn put(&self, op: &mut dyn AtomicOperation, rid: Rid, multiplicity: u32) -> Result<bool> {
        if multiplicity == 0 {
            return Err(SombraError::Invalid("multiplicity must be positive"));
        }
        self.tree
            .tree
            .put(op, &EdgeKey::new(self.bag_id, rid), &multiplicity)
    }

    /// Drops `rid`, returning its previous multiplicity.
    pub fn remove(&self, op: &mut dyn AtomicOperation, rid: Rid) -> Result<Option<u32>> {
        self.tree.tree.delete(op, &EdgeKey::new(self.bag_id, rid))
    }

    /// Deletes every entry of the bag. Returns the number of entries removed.
    pub fn clear(&self, op: &mut dyn AtomicOperation) -> Result<usize> {
        let keys: Vec<EdgeKey> = self
            .tree
            .tree
            .range(
                op.pages(),
                Bound::Included(EdgeKey::bag_min(self.bag_id)),
                Bound::Included(EdgeKey::bag_max(self.bag_id)),
                ScanDirection::Ascending,
            )?
            .map(|entry| entry.map(|(key, _)| key))
            .collect::<Result<_>>()?;
        for key in &keys {
            self.tree.tree.delete(op, key)?;
        }
        Ok(keys.len())
    }

    /// Same as [`clear`](Self::clear).
    pub fn delete(&self, op: &mut dyn AtomicOperation) -> Result<usize> {
        self.clear(op)
    }

    /// Scans from `rid` towards the end (`ascending`) or the start of the bag.
    pub fn range_from<'a>(
        &self,
        pages: &'a dyn PageAccess,
        rid: Rid,
        inclusive: bool,
        ascending: bool,
    ) -> Result<BagEntries<'a>>
    where
        't: 'a,
    {
        let from = if inclusive {
            Bound::Included(rid)
        } else {
            Bound::Excluded(rid)
        };
        if ascending {
            self.range(pages, from, Bound::Unbounded, ScanDirection::Ascending)
        } else {
            self.range(pages, Bound::Unbounded, from, ScanDirection::Descending)
        }
    }

    /// Scans the bag between two RID bounds.
    pub fn range<'a>(
        &self,
        pages: &'a dyn PageAccess,
        lo: Bound<Rid>,
        hi: Bound<Rid>,
        direction: ScanDirection,
    ) -> Result<BagEntries<'a>>
    where
        't: 'a,
    {
        let bag = self.bag_id;
        let lo = match lo {
            Bound::Included(rid) => Bound::Included(EdgeKey::new(bag, rid)),
            Bound::Excluded(rid) => Bound::Excluded(EdgeKey::new(bag, rid)),
            Bound::Unbounded => Bound::Included(EdgeKey::bag_min(bag)),
        };
        let hi = match hi {
            Bound::Included(rid) => Bound::Included(EdgeKey::new(bag, rid)),
            Bound::Excluded(rid) => Bound::Excluded(EdgeKey::new(bag, rid)),
            Bound::Unbounded => Bound::Included(EdgeKey::bag_max(bag)),
        };
        let tree: &'a SharedLinkBagBTree = self.tree;
        Ok(BagEntries {
            cursor: tree.tree.range(pages, lo, hi, direction)?,
        })
    }

    /// Every entry of the bag in `direction` order.
    pub fn entries<'a>(
        &self,
        pages: &'a dyn PageAccess,
        direction: ScanDirection,
    ) -> Result<BagEntries<'a>>
    where
        't: 'a,
    {
        self.range(pages, Bound::Unbounded, Bound::Unbounded, direction)
    }

    /// Smallest RID in the bag.
    pub fn first_key(&self, pages: &dyn PageAccess) -> Result<Option<Rid>> {
        self.edge_key(pages, ScanDirection::Ascending)
    }

    /// Largest RID in the bag.
    pub fn last_key(&self, pages: &dyn PageAccess) -> Result<Option<Rid>> {
        self.edge_key(pages, ScanDirection::Descending)
    }

    fn edge_key(&self, pages: &dyn PageAccess, direction: ScanDirection) -> Result<Option<Rid>> {
        match self.entries(pages, direction)?.next() {
            Some(entry) => entry.map(|(rid, _)| Some(rid)),
            None => Ok(None),
        }
    }

    /// Sum of multiplicities over the bag.
    pub fn total_multiplicity(&self, pages: &dyn PageAccess) -> Result<u64> {
        self.entries(pages, ScanDirection::Ascending)?
            .try_fold(0u64, |acc, entry| entry.map(|(_, m)| acc + u64::from(m)))
    }
}

/// Lazy `(rid, multiplicity)` scan over one bag.
pub struct BagEntries<'a> {
    cursor: Cursor<'a, EdgeKey, u32>,
}

impl Iterator for BagEntries<'_> {
    type Item = Result<(Rid, u32)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor
            .next()
            .map(|entry| entry.map(|(key, multiplicity)| (key.rid(), multiplicity)))
    }
}
