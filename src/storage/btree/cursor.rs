use std::cmp::Ordering;
use std::ops::Bound;

use crate::primitives::pager::{PageAccess, PageRef};
use crate::types::{Result, ScanDirection};

use super::codecs::{KeyCodec, ValCodec};
use super::page::{self, Header};
use super::tree::{encode_key, BTree};

/// A cursor over a bounded range of a B+ tree, walking leaves through their
/// sibling links in either direction.
///
/// The cursor pins the leaf it is positioned on until it moves or is dropped.
pub struct Cursor<'a, K: KeyCodec, V: ValCodec> {
    tree: &'a BTree<K, V>,
    pages: &'a dyn PageAccess,
    lower: EncodedBound,
    upper: EncodedBound,
    direction: ScanDirection,
    current_page: Option<PageRef>,
    current_header: Option<Header>,
    // Ascending: index of the next record. Descending: one past it.
    slot_index: usize,
    done: bool,
}

impl<'a, K: KeyCodec, V: ValCodec> Cursor<'a, K, V> {
    pub(crate) fn new(
        tree: &'a BTree<K, V>,
        pages: &'a dyn PageAccess,
        lo: Bound<K>,
        hi: Bound<K>,
        direction: ScanDirection,
    ) -> Result<Self> {
        let lower = EncodedBound::from_bound::<K>(lo);
        let upper = EncodedBound::from_bound::<K>(hi);
        let done = EncodedBound::range_is_empty::<K>(&lower, &upper);
        let mut cursor = Self {
            tree,
            pages,
            lower,
            upper,
            direction,
            current_page: None,
            current_header: None,
            slot_index: 0,
            done,
        };
        if !cursor.done {
            cursor.initialize()?;
        }
        Ok(cursor)
    }

    /// Direction the cursor walks in.
    pub fn direction(&self) -> ScanDirection {
        self.direction
    }

    /// Advances the cursor and returns the next key-value pair, if any.
    pub fn next_entry(&mut self) -> Result<Option<(K, V)>> {
        match self.next_record()? {
            Some((key, value)) => Ok(Some((K::decode_key(&key)?, V::decode_val(&value)?))),
            None => Ok(None),
        }
    }

    fn next_record(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let layout = *self.tree.layout();
        let stride = layout.leaf_stride();
        loop {
            if self.done {
                return Ok(None);
            }
            let Some((page, header)) = self.current_pair() else {
                self.finish();
                return Ok(None);
            };
            let count = header.count;
            match self.direction {
                ScanDirection::Ascending => {
                    if self.slot_index >= count {
                        self.advance()?;
                        continue;
                    }
                    let rec = page::record(page.data(), stride, self.slot_index)?;
                    let (key, value) = rec.split_at(layout.key_len);
                    if self.is_past_upper(key) {
                        self.finish();
                        return Ok(None);
                    }
                    let out = (key.to_vec(), value.to_vec());
                    self.slot_index += 1;
                    return Ok(Some(out));
                }
                ScanDirection::Descending => {
                    if self.slot_index == 0 {
                        self.advance()?;
                        continue;
                    }
                    let rec = page::record(page.data(), stride, self.slot_index - 1)?;
                    let (key, value) = rec.split_at(layout.key_len);
                    if !self.lower_allows(key) {
                        self.finish();
                        return Ok(None);
                    }
                    let out = (key.to_vec(), value.to_vec());
                    self.slot_index -= 1;
                    return Ok(Some(out));
                }
            }
        }
    }

    fn initialize(&mut self) -> Result<()> {
        let seek = match self.direction {
            ScanDirection::Ascending => self.lower.key_bytes(),
            ScanDirection::Descending => self.upper.key_bytes(),
        };
        let page = match seek {
            Some(key) => self.tree.find_leaf(self.pages, key, false)?.0,
            None => self.tree.find_edge_leaf(self.pages, self.direction)?,
        };
        let header = Header::parse(page.data())?;
        let layout = *self.tree.layout();
        let stride = layout.leaf_stride();
        // position on the first record inside the near bound
        let mut idx = 0;
        while idx < header.count {
            let rec = page::record(page.data(), stride, idx)?;
            let key = &rec[..layout.key_len];
            let inside = match self.direction {
                ScanDirection::Ascending => self.lower_allows(key),
                ScanDirection::Descending => self.is_past_upper(key),
            };
            if inside {
                break;
            }
            idx += 1;
        }
        self.slot_index = idx;
        self.current_page = Some(page);
        self.current_header = Some(header);
        Ok(())
    }

    fn advance(&mut self) -> Result<()> {
        let next = self.current_header.as_ref().and_then(|h| match self.direction {
            ScanDirection::Ascending => h.right_sibling,
            ScanDirection::Descending => h.left_sibling,
        });
        let Some(next) = next else {
            self.finish();
            return Ok(());
        };
        self.tree.stats().inc_cursor_page_hops();
        let page = self.pages.page(next)?;
        let header = Header::parse(page.data())?;
        self.slot_index = match self.direction {
            ScanDirection::Ascending => 0,
            ScanDirection::Descending => header.count,
        };
        self.current_page = Some(page);
        self.current_header = Some(header);
        Ok(())
    }

    fn current_pair(&self) -> Option<(&PageRef, &Header)> {
        self.current_page
            .as_ref()
            .and_then(|page| self.current_header.as_ref().map(|header| (page, header)))
    }

    fn finish(&mut self) {
        self.done = true;
        self.current_page = None;
        self.current_header = None;
        self.slot_index = 0;
    }

    fn lower_allows(&self, key: &[u8]) -> bool {
        match &self.lower {
            EncodedBound::Unbounded => true,
            EncodedBound::Included(bound) => K::compare_encoded(key, bound) != Ordering::Less,
            EncodedBound::Excluded(bound) => K::compare_encoded(key, bound) == Ordering::Greater,
        }
    }

    fn is_past_upper(&self, key: &[u8]) -> bool {
        match &self.upper {
            EncodedBound::Unbounded => false,
            EncodedBound::Included(bound) => K::compare_encoded(key, bound) == Ordering::Greater,
            EncodedBound::Excluded(bound) => K::compare_encoded(key, bound) != Ordering::Less,
        }
    }
}

impl<K: KeyCodec, V: ValCodec> Iterator for Cursor<'_, K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(err) => {
                self.finish();
                Some(Err(err))
            }
        }
    }
}

#[derive(Clone)]
enum EncodedBound {
    Unbounded,
    Included(Vec<u8>),
    Excluded(Vec<u8>),
}

impl EncodedBound {
    fn from_bound<K: KeyCodec>(bound: Bound<K>) -> Self {
        match bound {
            Bound::Unbounded => EncodedBound::Unbounded,
            Bound::Included(key) => EncodedBound::Included(encode_key(&key)),
            Bound::Excluded(key) => EncodedBound::Excluded(encode_key(&key)),
        }
    }

    fn key_bytes(&self) -> Option<&[u8]> {
        match self {
            EncodedBound::Unbounded => None,
            EncodedBound::Included(bytes) | EncodedBound::Excluded(bytes) => Some(bytes.as_slice()),
        }
    }

    fn range_is_empty<K: KeyCodec>(lower: &EncodedBound, upper: &EncodedBound) -> bool {
        let (Some(lo), Some(hi)) = (lower.key_bytes(), upper.key_bytes()) else {
            return false;
        };
        match K::compare_encoded(lo, hi) {
            Ordering::Greater => true,
            Ordering::Equal => !matches!(
                (lower, upper),
                (EncodedBound::Included(_), EncodedBound::Included(_))
            ),
            Ordering::Less => false,
        }
    }
}
