use crate::types::Rid;

/// Record that owns a link bag field.
///
/// A bag reports every effective mutation to its owner so the owner can be
/// scheduled for saving.
pub trait RecordOwner: Send + Sync {
    /// True for sub-documents stored inside another record; those cannot own bags.
    fn is_embedded(&self) -> bool;
    /// The owner's content changed.
    fn set_dirty(&self);
    /// The owner must be saved even though its visible content is unchanged.
    fn set_dirty_no_changed(&self);
}

/// Kind of a bag mutation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ChangeKind {
    /// One occurrence added.
    Add,
    /// One occurrence removed.
    Remove,
}

/// One effective bag mutation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: ChangeKind,
    /// Which record reference was affected.
    pub rid: Rid,
}

/// Timeline of mutations, kept while tracking is enabled.
///
/// The transaction timeline survives disable/enable cycles and is only
/// reset when the owning transaction finishes.
#[derive(Clone, Debug)]
pub struct ChangeTracker {
    enabled: bool,
    timeline: Vec<ChangeEvent>,
    transaction_timeline: Vec<ChangeEvent>,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self {
            enabled: true,
            timeline: Vec::new(),
            transaction_timeline: Vec::new(),
        }
    }
}

impl ChangeTracker {
    /// Whether events are being recorded.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Starts recording.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Stops recording and forgets the current timeline.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.timeline.clear();
    }

    /// Appends an event when tracking is enabled. Returns whether it was kept.
    pub fn record(&mut self, event: ChangeEvent) -> bool {
        if !self.enabled {
            return false;
        }
        self.timeline.push(event);
        self.transaction_timeline.push(event);
        true
    }

    /// Events since tracking was last enabled.
    pub fn timeline(&self) -> &[ChangeEvent] {
        &self.timeline
    }

    /// Events recorded inside the running transaction.
    pub fn transaction_timeline(&self) -> &[ChangeEvent] {
        &self.transaction_timeline
    }

    pub(crate) fn take_transaction_timeline(&mut self) -> Vec<ChangeEvent> {
        self.timeline.clear();
        std::mem::take(&mut self.transaction_timeline)
    }

    /// Forgets every recorded event.
    pub fn clear(&mut self) {
        self.timeline.clear();
        self.transaction_timeline.clear();
    }
}
