use std::cmp::Ordering;
use std::fmt;

use crate::primitives::bytes::be;
use crate::storage::btree::KeyCodec;
use crate::types::{Rid, Result, SombraError};

/// Encoded width of an [`EdgeKey`].
pub const EDGE_KEY_LEN: usize = 20;

/// Composite key of the shared link bag tree.
///
/// Encoded as `[bag_id:8][target_cid:4][target_pos:8]`, all big-endian
/// two's complement. Encoded keys are compared field by field as signed
/// integers, never as raw bytes, so negative sentinels sort below real
/// positions. This layout is persisted and must not change.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct EdgeKey {
    /// Bag the entry belongs to.
    pub bag_id: i64,
    /// Container id of the referenced record.
    pub target_cid: i32,
    /// Position of the referenced record.
    pub target_pos: i64,
}

impl EdgeKey {
    /// Key for `rid` inside `bag_id`.
    pub fn new(bag_id: i64, rid: Rid) -> Self {
        Self {
            bag_id,
            target_cid: rid.cid,
            target_pos: rid.pos,
        }
    }

    /// Sorts below every entry of `bag_id`.
    pub fn bag_min(bag_id: i64) -> Self {
        Self {
            bag_id,
            target_cid: i32::MIN,
            target_pos: i64::MIN,
        }
    }

    /// Sorts above every entry of `bag_id`.
    pub fn bag_max(bag_id: i64) -> Self {
        Self {
            bag_id,
            target_cid: i32::MAX,
            target_pos: i64::MAX,
        }
    }

    /// The referenced record.
    pub fn rid(&self) -> Rid {
        Rid {
            cid: self.target_cid,
            pos: self.target_pos,
        }
    }

    /// Writes the 20-byte form into `dst`.
    pub fn write_to(&self, dst: &mut [u8; EDGE_KEY_LEN]) {
        be::put_i64(&mut dst[0..8], self.bag_id);
        be::put_i32(&mut dst[8..12], self.target_cid);
        be::put_i64(&mut dst[12..20], self.target_pos);
    }

    /// Parses the 20-byte form.
    pub fn read_from(src: &[u8]) -> Result<Self> {
        if src.len() != EDGE_KEY_LEN {
            return Err(SombraError::Corruption("edge key width mismatch"));
        }
        Ok(Self {
            bag_id: be::get_i64(&src[0..8]),
            target_cid: be::get_i32(&src[8..12]),
            target_pos: be::get_i64(&src[12..20]),
        })
    }
}

impl Ord for EdgeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bag_id
            .cmp(&other.bag_id)
            .then_with(|| self.target_cid.cmp(&other.target_cid))
            .then_with(|| self.target_pos.cmp(&other.target_pos))
    }
}

impl PartialOrd for EdgeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/#{}:{}", self.bag_id, self.target_cid, self.target_pos)
    }
}

impl KeyCodec for EdgeKey {
    const WIDTH: usize = EDGE_KEY_LEN;

    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        let mut buf = [0u8; EDGE_KEY_LEN];
        key.write_to(&mut buf);
        out.extend_from_slice(&buf);
    }

    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
        be::get_i64(&a[0..8])
            .cmp(&be::get_i64(&b[0..8]))
            .then_with(|| be::get_i32(&a[8..12]).cmp(&be::get_i32(&b[8..12])))
            .then_with(|| be::get_i64(&a[12..20]).cmp(&be::get_i64(&b[12..20])))
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Self::read_from(bytes)
    }
}
