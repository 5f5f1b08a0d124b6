use std::cmp::Ordering;

use crate::primitives::bytes::be;
use crate::types::{Result, SombraError};

/// Trait implemented by key types that can be stored in the B+ tree.
///
/// Keys are fixed width so that nodes can be addressed by slot index.
pub trait KeyCodec: Sized {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Encode `key` into `out`.
    fn encode_key(key: &Self, out: &mut Vec<u8>);

    /// Compare two encoded keys.
    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering;

    /// Decode a key from its encoded representation.
    fn decode_key(bytes: &[u8]) -> Result<Self>;
}

/// Trait implemented by value types that can be stored in the B+ tree.
pub trait ValCodec: Sized {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Encode `value` into `out`.
    fn encode_val(value: &Self, out: &mut Vec<u8>);

    /// Decode a value from `src`.
    fn decode_val(src: &[u8]) -> Result<Self>;
}

impl KeyCodec for u64 {
    const WIDTH: usize = 8;

    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&key.to_be_bytes());
    }

    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != <Self as KeyCodec>::WIDTH {
            return Err(SombraError::Corruption("u64 key width mismatch"));
        }
        Ok(be::get_u64(bytes))
    }
}

impl KeyCodec for i64 {
    const WIDTH: usize = 8;

    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&key.to_be_bytes());
    }

    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
        be::get_i64(a).cmp(&be::get_i64(b))
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != <Self as KeyCodec>::WIDTH {
            return Err(SombraError::Corruption("i64 key width mismatch"));
        }
        Ok(be::get_i64(bytes))
    }
}

/// Multiplicities are stored as 4-byte big-endian counters.
impl ValCodec for u32 {
    const WIDTH: usize = 4;

    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        if src.len() != <Self as ValCodec>::WIDTH {
            return Err(SombraError::Corruption("u32 value width mismatch"));
        }
        Ok(be::get_u32(src))
    }
}

impl ValCodec for u64 {
    const WIDTH: usize = 8;

    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        if src.len() != <Self as ValCodec>::WIDTH {
            return Err(SombraError::Corruption("u64 value width mismatch"));
        }
        Ok(be::get_u64(src))
    }
}
