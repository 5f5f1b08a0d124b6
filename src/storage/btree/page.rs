//! Fixed-slot B+ tree node layout.
//!
//! After the common page header every node carries a 32-byte node header:
//! `[count:2][reserved:2][left:8][right:8][leftmost_child:8][pad:4]`, with
//! `0` standing for "no page". Records follow back to back:
//! leaves store `key ‖ value`, internal nodes store `separator ‖ child`.
//! A separator is the smallest key reachable through its child.

use std::cmp::Ordering;

use crate::primitives::bytes::be;
use crate::types::page::{self as page_hdr, PageHeader, PageKind, PAGE_HDR_LEN};
use crate::types::{PageId, Result, SombraError};

const COUNT: usize = PAGE_HDR_LEN;
const LEFT: usize = PAGE_HDR_LEN + 4;
const RIGHT: usize = PAGE_HDR_LEN + 12;
const LEFTMOST: usize = PAGE_HDR_LEN + 20;
/// Offset of the first record.
pub const RECORDS_OFFSET: usize = PAGE_HDR_LEN + 32;
const CHILD_LEN: usize = 8;

/// Record widths of one tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Layout {
    /// Encoded key width.
    pub key_len: usize,
    /// Encoded value width.
    pub val_len: usize,
}

impl Layout {
    /// Bytes per leaf record.
    pub fn leaf_stride(&self) -> usize {
        self.key_len + self.val_len
    }

    /// Bytes per internal record.
    pub fn internal_stride(&self) -> usize {
        self.key_len + CHILD_LEN
    }

    /// Leaf records that fit in a page.
    pub fn leaf_capacity(&self, page_size: u32) -> usize {
        (page_size as usize).saturating_sub(RECORDS_OFFSET) / self.leaf_stride()
    }

    /// Internal records that fit in a page.
    pub fn internal_capacity(&self, page_size: u32) -> usize {
        (page_size as usize).saturating_sub(RECORDS_OFFSET) / self.internal_stride()
    }
}

/// Decoded node header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Header {
    /// Leaf or internal.
    pub kind: PageKind,
    /// Number of records.
    pub count: usize,
    /// Previous leaf.
    pub left_sibling: Option<PageId>,
    /// Next leaf.
    pub right_sibling: Option<PageId>,
    /// Child holding keys below the first separator (internal only).
    pub leftmost_child: Option<PageId>,
}

impl Header {
    /// Parses the node header of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RECORDS_OFFSET {
            return Err(SombraError::Corruption("btree page truncated"));
        }
        let kind = page_hdr::page_kind(data)?;
        if !matches!(kind, PageKind::BTreeLeaf | PageKind::BTreeInternal) {
            return Err(SombraError::Corruption("page is not a btree node"));
        }
        Ok(Self {
            kind,
            count: be::get_u16(&data[COUNT..]) as usize,
            left_sibling: link(be::get_u64(&data[LEFT..])),
            right_sibling: link(be::get_u64(&data[RIGHT..])),
            leftmost_child: link(be::get_u64(&data[LEFTMOST..])),
        })
    }

    /// Returns true for leaves.
    pub fn is_leaf(&self) -> bool {
        self.kind == PageKind::BTreeLeaf
    }

    fn write(&self, buf: &mut [u8]) -> Result<()> {
        page_hdr::set_page_kind(buf, self.kind)?;
        let count = u16::try_from(self.count)
            .map_err(|_| SombraError::Invalid("node record count overflow"))?;
        be::put_u16(&mut buf[COUNT..], count);
        be::put_u16(&mut buf[COUNT + 2..], 0);
        be::put_u64(&mut buf[LEFT..], unlink(self.left_sibling));
        be::put_u64(&mut buf[RIGHT..], unlink(self.right_sibling));
        be::put_u64(&mut buf[LEFTMOST..], unlink(self.leftmost_child));
        Ok(())
    }
}

fn link(raw: u64) -> Option<PageId> {
    (raw != 0).then_some(PageId(raw))
}

fn unlink(id: Option<PageId>) -> u64 {
    id.map_or(0, |id| id.0)
}

/// Stamps a fresh node header onto a newly allocated page.
pub fn init_node(buf: &mut [u8], id: PageId, kind: PageKind) -> Result<()> {
    let page_size =
        u32::try_from(buf.len()).map_err(|_| SombraError::Invalid("page size overflow"))?;
    PageHeader::new(id, kind, page_size, 0)?.encode(buf)?;
    buf[PAGE_HDR_LEN..].fill(0);
    Header {
        kind,
        count: 0,
        left_sibling: None,
        right_sibling: None,
        leftmost_child: None,
    }
    .write(buf)
}

/// Returns the raw bytes of record `idx`.
pub fn record(data: &[u8], stride: usize, idx: usize) -> Result<&[u8]> {
    let start = RECORDS_OFFSET + idx * stride;
    data.get(start..start + stride)
        .ok_or(SombraError::Corruption("btree record out of bounds"))
}

/// Updates only the left sibling link of a leaf.
pub fn set_left_sibling(buf: &mut [u8], left: Option<PageId>) -> Result<()> {
    if buf.len() < RECORDS_OFFSET {
        return Err(SombraError::Corruption("btree page truncated"));
    }
    be::put_u64(&mut buf[LEFT..], unlink(left));
    Ok(())
}

/// Owned copy of a leaf used while mutating it.
#[derive(Clone, Debug, Default)]
pub struct LeafNode {
    /// Encoded `(key, value)` records in key order.
    pub entries: Vec<(Vec<u8>, Vec<u8>)>,
    /// Previous leaf.
    pub left: Option<PageId>,
    /// Next leaf.
    pub right: Option<PageId>,
}

impl LeafNode {
    /// Decodes a leaf page.
    pub fn load(data: &[u8], layout: &Layout) -> Result<Self> {
        let header = Header::parse(data)?;
        if !header.is_leaf() {
            return Err(SombraError::Corruption("expected btree leaf"));
        }
        let stride = layout.leaf_stride();
        let mut entries = Vec::with_capacity(header.count + 1);
        for idx in 0..header.count {
            let rec = record(data, stride, idx)?;
            let (key, val) = rec.split_at(layout.key_len);
            entries.push((key.to_vec(), val.to_vec()));
        }
        Ok(Self {
            entries,
            left: header.left_sibling,
            right: header.right_sibling,
        })
    }

    /// Binary search by encoded key.
    pub fn search(&self, key: &[u8], cmp: fn(&[u8], &[u8]) -> Ordering) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|(k, _)| cmp(k, key))
    }

    /// Writes the leaf into `buf`, which must already carry a page header.
    pub fn store(&self, buf: &mut [u8], layout: &Layout) -> Result<()> {
        let stride = layout.leaf_stride();
        if RECORDS_OFFSET + self.entries.len() * stride > buf.len() {
            return Err(SombraError::Invalid("leaf overflow"));
        }
        Header {
            kind: PageKind::BTreeLeaf,
            count: self.entries.len(),
            left_sibling: self.left,
            right_sibling: self.right,
            leftmost_child: None,
        }
        .write(buf)?;
        for (idx, (key, val)) in self.entries.iter().enumerate() {
            let start = RECORDS_OFFSET + idx * stride;
            buf[start..start + layout.key_len].copy_from_slice(key);
            buf[start + layout.key_len..start + stride].copy_from_slice(val);
        }
        let tail = RECORDS_OFFSET + self.entries.len() * stride;
        buf[tail..].fill(0);
        Ok(())
    }
}

/// Owned copy of an internal node used while mutating it.
#[derive(Clone, Debug)]
pub struct InternalNode {
    /// Child for keys below the first separator.
    pub leftmost: PageId,
    /// `(separator, child)` pairs in separator order.
    pub entries: Vec<(Vec<u8>, PageId)>,
}

impl InternalNode {
    /// Decodes an internal page.
    pub fn load(data: &[u8], layout: &Layout) -> Result<Self> {
        let header = Header::parse(data)?;
        if header.is_leaf() {
            return Err(SombraError::Corruption("expected btree internal node"));
        }
        let leftmost = header
            .leftmost_child
            .ok_or(SombraError::Corruption("internal node without leftmost child"))?;
        let stride = layout.internal_stride();
        let mut entries = Vec::with_capacity(header.count + 1);
        for idx in 0..header.count {
            let rec = record(data, stride, idx)?;
            let (key, child) = rec.split_at(layout.key_len);
            entries.push((key.to_vec(), PageId(be::get_u64(child))));
        }
        Ok(Self { leftmost, entries })
    }

    /// Writes the node into `buf`, which must already carry a page header.
    pub fn store(&self, buf: &mut [u8], layout: &Layout) -> Result<()> {
        let stride = layout.internal_stride();
        if RECORDS_OFFSET + self.entries.len() * stride > buf.len() {
            return Err(SombraError::Invalid("internal node overflow"));
        }
        Header {
            kind: PageKind::BTreeInternal,
            count: self.entries.len(),
            left_sibling: None,
            right_sibling: None,
            leftmost_child: Some(self.leftmost),
        }
        .write(buf)?;
        for (idx, (key, child)) in self.entries.iter().enumerate() {
            let start = RECORDS_OFFSET + idx * stride;
            buf[start..start + layout.key_len].copy_from_slice(key);
            be::put_u64(&mut buf[start + layout.key_len..], child.0);
        }
        let tail = RECORDS_OFFSET + self.entries.len() * stride;
        buf[tail..].fill(0);
        Ok(())
    }
}

/// Picks the child of an internal page that covers `key`, reading records in place.
pub fn child_for(
    data: &[u8],
    header: &Header,
    layout: &Layout,
    key: &[u8],
    cmp: fn(&[u8], &[u8]) -> Ordering,
) -> Result<PageId> {
    let stride = layout.internal_stride();
    let (mut lo, mut hi) = (0usize, header.count);
    // first separator strictly greater than key
    while lo < hi {
        let mid = (lo + hi) / 2;
        let rec = record(data, stride, mid)?;
        if cmp(&rec[..layout.key_len], key) == Ordering::Greater {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    if lo == 0 {
        return header
            .leftmost_child
            .ok_or(SombraError::Corruption("internal node without leftmost child"));
    }
    let rec = record(data, stride, lo - 1)?;
    Ok(PageId(be::get_u64(&rec[layout.key_len..])))
}

/// Returns the last child of an internal page.
pub fn last_child(data: &[u8], header: &Header, layout: &Layout) -> Result<PageId> {
    if header.count == 0 {
        return header
            .leftmost_child
            .ok_or(SombraError::Corruption("internal node without leftmost child"));
    }
    let rec = record(data, layout.internal_stride(), header.count - 1)?;
    Ok(PageId(be::get_u64(&rec[layout.key_len..])))
}
