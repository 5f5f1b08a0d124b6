use smallvec::SmallVec;

use crate::types::Rid;

/// Inline multiset kept sorted by RID, stored with its owner.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmbeddedLinkBag {
    entries: SmallVec<[(Rid, u32); 8]>,
    size: usize,
}

impl EmbeddedLinkBag {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one occurrence of `rid` unless it already reached `max`.
    pub fn add(&mut self, rid: Rid, max: u32) -> bool {
        match self.entries.binary_search_by(|(r, _)| r.cmp(&rid)) {
            Ok(idx) => {
                let count = &mut self.entries[idx].1;
                if *count >= max {
                    return false;
                }
                *count += 1;
            }
            Err(idx) => {
                if max == 0 {
                    return false;
                }
                self.entries.insert(idx, (rid, 1));
            }
        }
        self.size += 1;
        true
    }

    /// Removes one occurrence of `rid`.
    pub fn remove(&mut self, rid: Rid) -> bool {
        let Ok(idx) = self.entries.binary_search_by(|(r, _)| r.cmp(&rid)) else {
            return false;
        };
        let count = &mut self.entries[idx].1;
        *count -= 1;
        if *count == 0 {
            self.entries.remove(idx);
        }
        self.size -= 1;
        true
    }

    /// Occurrences of `rid`.
    pub fn multiplicity(&self, rid: Rid) -> u32 {
        self.entries
            .binary_search_by(|(r, _)| r.cmp(&rid))
            .map_or(0, |idx| self.entries[idx].1)
    }

    /// Overwrites the multiplicity of `rid`; zero drops it.
    pub fn set_multiplicity(&mut self, rid: Rid, multiplicity: u32) {
        let old = match self.entries.binary_search_by(|(r, _)| r.cmp(&rid)) {
            Ok(idx) if multiplicity == 0 => self.entries.remove(idx).1,
            Ok(idx) => std::mem::replace(&mut self.entries[idx].1, multiplicity),
            Err(_) if multiplicity == 0 => 0,
            Err(idx) => {
                self.entries.insert(idx, (rid, multiplicity));
                0
            }
        };
        self.size = self.size - old as usize + multiplicity as usize;
    }

    /// Sum of multiplicities.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns true when the bag holds nothing.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Distinct RIDs with their multiplicities, in RID order.
    pub fn entries(&self) -> impl Iterator<Item = (Rid, u32)> + '_ {
        self.entries.iter().copied()
    }

    /// Number of distinct RIDs.
    pub fn distinct(&self) -> usize {
        self.entries.len()
    }
}
