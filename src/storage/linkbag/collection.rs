use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::embedded::EmbeddedLinkBag;
use super::shared_tree::LinkBagPointer;
use super::tracker::{ChangeEvent, ChangeKind, ChangeTracker, RecordOwner};
use super::tree_bag::{LinkBagContext, TreeLinkBag};
use crate::primitives::bytes::var;
use crate::storage::ConfigProvider;
use crate::tx::Transaction;
use crate::types::{FileId, Result, Rid, SombraError};

const MODE_EMBEDDED: u8 = 1;
const MODE_TREE: u8 = 2;

/// Which representation a bag currently uses.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RepresentationKind {
    /// Stored inline with the owner.
    Embedded,
    /// Stored in the shared link bag tree.
    Tree,
}

/// Storage strategy in force for one bag.
#[derive(Clone, Debug)]
pub enum Representation {
    /// Inline multiset.
    Embedded(EmbeddedLinkBag),
    /// Key-space of the shared tree plus buffered changes.
    Tree(TreeLinkBag),
}

impl Representation {
    /// Kind tag.
    pub fn kind(&self) -> RepresentationKind {
        match self {
            Representation::Embedded(_) => RepresentationKind::Embedded,
            Representation::Tree(_) => RepresentationKind::Tree,
        }
    }

    /// Sum of multiplicities.
    pub fn size(&self) -> usize {
        match self {
            Representation::Embedded(bag) => bag.size(),
            Representation::Tree(bag) => bag.size(),
        }
    }

    fn add(&mut self, ctx: &LinkBagContext<'_>, rid: Rid, max: u32) -> Result<bool> {
        match self {
            Representation::Embedded(bag) => Ok(bag.add(rid, max)),
            Representation::Tree(bag) => bag.add(ctx, rid, max),
        }
    }

    fn remove(&mut self, ctx: &LinkBagContext<'_>, rid: Rid) -> Result<bool> {
        match self {
            Representation::Embedded(bag) => Ok(bag.remove(rid)),
            Representation::Tree(bag) => bag.remove(ctx, rid),
        }
    }

    fn multiplicity(&self, ctx: &LinkBagContext<'_>, rid: Rid) -> Result<u32> {
        match self {
            Representation::Embedded(bag) => Ok(bag.multiplicity(rid)),
            Representation::Tree(bag) => bag.multiplicity(ctx, rid),
        }
    }

    fn entries<'a>(&'a self, ctx: &LinkBagContext<'a>) -> Result<LinkBagEntries<'a>> {
        let inner: Box<dyn Iterator<Item = Result<(Rid, u32)>> + 'a> = match self {
            Representation::Embedded(bag) => Box::new(bag.entries().map(Ok)),
            Representation::Tree(bag) => Box::new(bag.entries(ctx)?),
        };
        Ok(LinkBagEntries { inner })
    }
}

/// Distinct RIDs of a bag with their multiplicities, in RID order.
pub struct LinkBagEntries<'a> {
    inner: Box<dyn Iterator<Item = Result<(Rid, u32)>> + 'a>,
}

impl Iterator for LinkBagEntries<'_> {
    type Item = Result<(Rid, u32)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Every RID of a bag, repeated according to its multiplicity.
pub struct LinkBagIter<'a> {
    entries: LinkBagEntries<'a>,
    current: Option<(Rid, u32)>,
}

impl Iterator for LinkBagIter<'_> {
    type Item = Result<Rid>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((rid, remaining)) = self.current.as_mut() {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Some(Ok(*rid));
                }
            }
            match self.entries.next()? {
                Ok(entry) => self.current = Some(entry),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Multiset of record references that switches between an inline and a
/// tree-backed representation as it grows and shrinks.
///
/// The bag always starts embedded. After every mutation it compares its size
/// against the two thresholds read at construction and converts when one is
/// crossed. Conversion builds the new representation completely before it
/// replaces the old one.
pub struct LinkCollection {
    repr: Representation,
    top_threshold: i32,
    bottom_threshold: i32,
    max_multiplicity: u32,
    tracker: ChangeTracker,
    owner: Option<Arc<dyn RecordOwner>>,
    dirty: bool,
    transaction_modified: bool,
    skip_logged: bool,
}

impl fmt::Debug for LinkCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkCollection")
            .field("kind", &self.repr.kind())
            .field("size", &self.repr.size())
            .field("top_threshold", &self.top_threshold)
            .field("bottom_threshold", &self.bottom_threshold)
            .field("dirty", &self.dirty)
            .field("has_owner", &self.owner.is_some())
            .finish()
    }
}

impl LinkCollection {
    /// Empty embedded bag configured from `config`.
    pub fn new(config: &dyn ConfigProvider) -> Result<Self> {
        let options = config.link_bag_options()?;
        Ok(Self {
            repr: Representation::Embedded(EmbeddedLinkBag::new()),
            top_threshold: options.embedded_to_tree_threshold,
            bottom_threshold: options.tree_to_embedded_threshold,
            max_multiplicity: options.max_multiplicity,
            tracker: ChangeTracker::default(),
            owner: None,
            dirty: false,
            transaction_modified: false,
            skip_logged: false,
        })
    }

    /// Bag already materialized in a shared tree.
    pub fn from_tree(config: &dyn ConfigProvider, pointer: LinkBagPointer, size: usize) -> Result<Self> {
        if !pointer.is_valid() {
            return Err(SombraError::Invalid("link bag pointer is not materialized"));
        }
        let mut bag = Self::new(config)?;
        bag.repr = Representation::Tree(TreeLinkBag::from_pointer(pointer, size));
        Ok(bag)
    }

    /// Active representation kind.
    pub fn kind(&self) -> RepresentationKind {
        self.repr.kind()
    }

    /// Returns true while the bag is stored inline.
    pub fn is_embedded(&self) -> bool {
        self.kind() == RepresentationKind::Embedded
    }

    /// Active representation.
    pub fn representation(&self) -> &Representation {
        &self.repr
    }

    /// Tree location when the bag is tree-backed and materialized.
    pub fn pointer(&self) -> Option<LinkBagPointer> {
        match &self.repr {
            Representation::Tree(bag) if bag.pointer().is_valid() => Some(bag.pointer()),
            _ => None,
        }
    }

    /// Sum of multiplicities.
    pub fn size(&self) -> usize {
        self.repr.size()
    }

    /// Returns true when the bag holds nothing.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether the bag changed since it was last marked clean.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the bag saved.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Whether the running transaction changed the bag.
    pub fn is_transaction_modified(&self) -> bool {
        self.transaction_modified
    }

    /// Change tracker.
    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    /// Mutable change tracker, for enabling and disabling recording.
    pub fn tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }

    /// Owner the bag reports changes to.
    pub fn owner(&self) -> Option<&Arc<dyn RecordOwner>> {
        self.owner.as_ref()
    }

    /// Binds the bag to `owner`.
    pub fn set_owner(&mut self, owner: Arc<dyn RecordOwner>) -> Result<()> {
        if owner.is_embedded() {
            return Err(SombraError::Invalid(
                "link bags cannot be stored inside embedded records",
            ));
        }
        if let Some(current) = &self.owner {
            if !Arc::ptr_eq(current, &owner) {
                return Err(SombraError::Invalid("link bag is already bound to another record"));
            }
        }
        self.owner = Some(owner);
        Ok(())
    }

    /// Adds one occurrence of `rid`. Returns whether the bag changed.
    pub fn add(&mut self, tx: &mut Transaction<'_>, rid: Rid) -> Result<bool> {
        if !rid.is_valid() {
            return Err(SombraError::Invalid("cannot link an invalid record id"));
        }
        let changed = self.repr.add(&tx.context(), rid, self.max_multiplicity)?;
        if changed {
            self.changed(ChangeEvent {
                kind: ChangeKind::Add,
                rid,
            });
        }
        self.check_and_convert(tx)?;
        Ok(changed)
    }

    /// Adds every RID in order. Returns how many additions changed the bag.
    pub fn add_all<I>(&mut self, tx: &mut Transaction<'_>, rids: I) -> Result<usize>
    where
        I: IntoIterator<Item = Rid>,
    {
        let mut added = 0;
        for rid in rids {
            if self.add(tx, rid)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Removes one occurrence of `rid`. Returns whether it was present.
    pub fn remove(&mut self, tx: &mut Transaction<'_>, rid: Rid) -> Result<bool> {
        let removed = self.repr.remove(&tx.context(), rid)?;
        if removed {
            self.changed(ChangeEvent {
                kind: ChangeKind::Remove,
                rid,
            });
        } else if rid.is_persistent() {
            if let Some(owner) = &self.owner {
                owner.set_dirty_no_changed();
            }
        }
        self.check_and_convert(tx)?;
        Ok(removed)
    }

    /// Membership test. On a tree-backed bag this reads the shared tree.
    pub fn contains(&self, tx: &Transaction<'_>, rid: Rid) -> Result<bool> {
        if let Representation::Tree(bag) = &self.repr {
            warn!(
                target: "sombra_linkbag::tree",
                bag = %bag.pointer(),
                %rid,
                "contains() on a tree-backed link bag reads the shared tree"
            );
        }
        Ok(self.repr.multiplicity(&tx.context(), rid)? > 0)
    }

    /// Occurrences of `rid`.
    pub fn multiplicity(&self, tx: &Transaction<'_>, rid: Rid) -> Result<u32> {
        self.repr.multiplicity(&tx.context(), rid)
    }

    /// Distinct RIDs with their multiplicities.
    pub fn entries<'a>(&'a self, tx: &'a Transaction<'_>) -> Result<LinkBagEntries<'a>> {
        self.repr.entries(&tx.context())
    }

    /// Every RID, repeated according to its multiplicity.
    pub fn iter<'a>(&'a self, tx: &'a Transaction<'_>) -> Result<LinkBagIter<'a>> {
        Ok(LinkBagIter {
            entries: self.entries(tx)?,
            current: None,
        })
    }

    /// Writes buffered tree changes through the transaction.
    pub fn flush(&mut self, tx: &mut Transaction<'_>) -> Result<usize> {
        let Representation::Tree(bag) = &mut self.repr else {
            return Ok(0);
        };
        if bag.pointer().is_valid() && !bag.has_changes() {
            return Ok(0);
        }
        let tree = tx.link_bags().ok_or(SombraError::SubstrateUnavailable)?;
        let written = bag.flush(tx.operation(), tree)?;
        tx.metrics().tree_bag_flushed(written);
        Ok(written)
    }

    /// Drops the bag's contents; a materialized tree key-space is deleted
    /// when the transaction commits.
    pub fn delete(&mut self, tx: &mut Transaction<'_>) {
        if let Some(pointer) = self.pointer() {
            tx.defer_bag_delete(pointer);
        }
        self.repr = Representation::Embedded(EmbeddedLinkBag::new());
        self.tracker.clear();
        self.dirty = true;
        self.transaction_modified = true;
        if let Some(owner) = &self.owner {
            owner.set_dirty();
        }
    }

    /// Undoes every change recorded in the running transaction, newest first.
    /// No change events are emitted.
    pub fn rollback_changes(&mut self, tx: &mut Transaction<'_>) -> Result<()> {
        let events = self.tracker.take_transaction_timeline();
        {
            let ctx = tx.context();
            for event in events.iter().rev() {
                match event.kind {
                    ChangeKind::Add => {
                        self.repr.remove(&ctx, event.rid)?;
                    }
                    ChangeKind::Remove => {
                        self.repr.add(&ctx, event.rid, u32::MAX)?;
                    }
                }
            }
        }
        self.transaction_modified = false;
        self.check_and_convert(tx)
    }

    /// Content as it was before the running transaction, every RID repeated
    /// according to its multiplicity. The bag itself is left untouched.
    pub fn original_state(&self, tx: &Transaction<'_>) -> Result<Vec<Rid>> {
        let mut counts: BTreeMap<Rid, u32> = BTreeMap::new();
        for entry in self.entries(tx)? {
            let (rid, count) = entry?;
            counts.insert(rid, count);
        }
        for event in self.tracker.transaction_timeline().iter().rev() {
            match event.kind {
                ChangeKind::Add => {
                    if let Some(count) = counts.get_mut(&event.rid) {
                        *count -= 1;
                        if *count == 0 {
                            counts.remove(&event.rid);
                        }
                    }
                }
                ChangeKind::Remove => *counts.entry(event.rid).or_default() += 1,
            }
        }
        Ok(counts
            .into_iter()
            .flat_map(|(rid, count)| std::iter::repeat(rid).take(count as usize))
            .collect())
    }

    /// Forgets the transaction timeline once the transaction is over.
    pub fn transaction_finished(&mut self) {
        self.tracker.take_transaction_timeline();
        self.transaction_modified = false;
    }

    /// Same representation kind and same RID sequence.
    pub fn same_content(&self, other: &LinkCollection, tx: &Transaction<'_>) -> Result<bool> {
        if self.kind() != other.kind() || self.size() != other.size() {
            return Ok(false);
        }
        let mut left = self.iter(tx)?;
        let mut right = other.iter(tx)?;
        loop {
            match (left.next().transpose()?, right.next().transpose()?) {
                (None, None) => return Ok(true),
                (a, b) if a == b => {}
                _ => return Ok(false),
            }
        }
    }

    fn changed(&mut self, event: ChangeEvent) {
        self.tracker.record(event);
        self.dirty = true;
        self.transaction_modified = true;
        if let Some(owner) = &self.owner {
            owner.set_dirty();
        }
    }

    fn check_and_convert(&mut self, tx: &mut Transaction<'_>) -> Result<()> {
        let size = self.repr.size();
        match self.repr.kind() {
            RepresentationKind::Embedded
                if self.top_threshold >= 0 && size >= self.top_threshold as usize =>
            {
                if tx.link_bags().is_some() {
                    self.convert_to_tree(tx);
                } else {
                    tx.metrics().conversion_skipped();
                    if !self.skip_logged {
                        self.skip_logged = true;
                        debug!(
                            target: "sombra_linkbag::convert",
                            size,
                            top = self.top_threshold,
                            "no link bag tree in this session, staying embedded"
                        );
                    }
                }
            }
            RepresentationKind::Tree
                if self.bottom_threshold >= 0 && size <= self.bottom_threshold as usize =>
            {
                self.convert_to_embedded(tx)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn convert_to_tree(&mut self, tx: &mut Transaction<'_>) {
        let Representation::Embedded(old) = &self.repr else {
            return;
        };
        let mut bag = TreeLinkBag::new();
        for (rid, count) in old.entries() {
            bag.set_multiplicity(rid, count);
        }
        let size = bag.size();
        self.repr = Representation::Tree(bag);
        self.dirty = true;
        if let Some(owner) = &self.owner {
            owner.set_dirty();
        }
        tx.metrics().converted_to_tree(size);
        debug!(
            target: "sombra_linkbag::convert",
            from = "embedded",
            to = "tree",
            size,
            top = self.top_threshold,
            bottom = self.bottom_threshold,
            "converted link bag"
        );
    }

    fn convert_to_embedded(&mut self, tx: &mut Transaction<'_>) -> Result<()> {
        let Representation::Tree(old) = &self.repr else {
            return Ok(());
        };
        let pointer = old.pointer();
        let mut bag = EmbeddedLinkBag::new();
        {
            let ctx = tx.context();
            for entry in old.entries(&ctx)? {
                let (rid, count) = entry?;
                bag.set_multiplicity(rid, count);
            }
        }
        let size = bag.size();
        self.repr = Representation::Embedded(bag);
        self.dirty = true;
        if let Some(owner) = &self.owner {
            owner.set_dirty();
        }
        tx.defer_bag_delete(pointer);
        tx.metrics().converted_to_embedded(size);
        debug!(
            target: "sombra_linkbag::convert",
            from = "tree",
            to = "embedded",
            size,
            top = self.top_threshold,
            bottom = self.bottom_threshold,
            "converted link bag"
        );
        Ok(())
    }

    /// Appends the inline form of the bag to `out`.
    ///
    /// Embedded bags write the mode byte, the number of distinct RIDs and a
    /// `(cid, pos, multiplicity)` triple per RID. Tree bags write the mode
    /// byte, their pointer and their size, and must be flushed first.
    pub fn serialize(&self, out: &mut Vec<u8>) -> Result<()> {
        match &self.repr {
            Representation::Embedded(bag) => {
                out.push(MODE_EMBEDDED);
                var::encode_u64(bag.distinct() as u64, out);
                for (rid, count) in bag.entries() {
                    var::encode_i64(i64::from(rid.cid), out);
                    var::encode_i64(rid.pos, out);
                    var::encode_u64(u64::from(count), out);
                }
            }
            Representation::Tree(bag) => {
                if bag.has_changes() || !bag.pointer().is_valid() {
                    return Err(SombraError::Invalid(
                        "tree link bag must be flushed before it is serialized",
                    ));
                }
                let pointer = bag.pointer();
                out.push(MODE_TREE);
                var::encode_i64(pointer.file_id.0, out);
                var::encode_i64(pointer.bag_id, out);
                var::encode_u64(bag.size() as u64, out);
            }
        }
        Ok(())
    }

    /// Reads a bag written by [`serialize`](Self::serialize). Returns the bag
    /// and the number of bytes consumed.
    pub fn deserialize(config: &dyn ConfigProvider, src: &[u8]) -> Result<(Self, usize)> {
        let mode = *src
            .first()
            .ok_or(SombraError::Corruption("link bag truncated"))?;
        let mut off = 1;
        let repr = match mode {
            MODE_EMBEDDED => {
                let distinct = var::decode_u64(src, &mut off)?;
                let mut bag = EmbeddedLinkBag::new();
                let mut previous: Option<Rid> = None;
                for _ in 0..distinct {
                    let cid = i32::try_from(var::decode_i64(src, &mut off)?)
                        .map_err(|_| SombraError::Corruption("link bag container id out of range"))?;
                    let pos = var::decode_i64(src, &mut off)?;
                    let count = u32::try_from(var::decode_u64(src, &mut off)?)
                        .map_err(|_| SombraError::Corruption("link bag multiplicity out of range"))?;
                    let rid = Rid { cid, pos };
                    if count == 0 {
                        return Err(SombraError::Corruption("link bag entry with zero multiplicity"));
                    }
                    if previous.is_some_and(|p| p >= rid) {
                        return Err(SombraError::Corruption("link bag entries out of order"));
                    }
                    previous = Some(rid);
                    bag.set_multiplicity(rid, count);
                }
                Representation::Embedded(bag)
            }
            MODE_TREE => {
                let file_id = FileId(var::decode_i64(src, &mut off)?);
                let bag_id = var::decode_i64(src, &mut off)?;
                let size = usize::try_from(var::decode_u64(src, &mut off)?)
                    .map_err(|_| SombraError::Corruption("link bag size out of range"))?;
                let pointer = LinkBagPointer { file_id, bag_id };
                if !pointer.is_valid() {
                    return Err(SombraError::Corruption("tree link bag without a pointer"));
                }
                Representation::Tree(TreeLinkBag::from_pointer(pointer, size))
            }
            _ => return Err(SombraError::Corruption("unknown link bag mode")),
        };
        let mut bag = Self::new(config)?;
        bag.repr = repr;
        Ok((bag, off))
    }
}
