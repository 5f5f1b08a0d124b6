//! Byte helpers shared by the page codecs and the inline bag format.

pub mod be {
    //! Fixed-width big-endian readers and writers.
    //!
    //! Readers take slices that callers have already bounds-checked against
    //! a fixed layout.

    /// Writes `v` into the first four bytes of `dst`.
    pub fn put_i32(dst: &mut [u8], v: i32) {
        dst[..4].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads a signed 32-bit value from the first four bytes of `src`.
    pub fn get_i32(src: &[u8]) -> i32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&src[..4]);
        i32::from_be_bytes(buf)
    }

    /// Writes `v` into the first four bytes of `dst`.
    pub fn put_u32(dst: &mut [u8], v: u32) {
        dst[..4].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads an unsigned 32-bit value from the first four bytes of `src`.
    pub fn get_u32(src: &[u8]) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&src[..4]);
        u32::from_be_bytes(buf)
    }

    /// Writes `v` into the first eight bytes of `dst`.
    pub fn put_i64(dst: &mut [u8], v: i64) {
        dst[..8].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads a signed 64-bit value from the first eight bytes of `src`.
    pub fn get_i64(src: &[u8]) -> i64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&src[..8]);
        i64::from_be_bytes(buf)
    }

    /// Writes `v` into the first eight bytes of `dst`.
    pub fn put_u64(dst: &mut [u8], v: u64) {
        dst[..8].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads an unsigned 64-bit value from the first eight bytes of `src`.
    pub fn get_u64(src: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&src[..8]);
        u64::from_be_bytes(buf)
    }

    /// Writes `v` into the first two bytes of `dst`.
    pub fn put_u16(dst: &mut [u8], v: u16) {
        dst[..2].copy_from_slice(&v.to_be_bytes());
    }

    /// Reads an unsigned 16-bit value from the first two bytes of `src`.
    pub fn get_u16(src: &[u8]) -> u16 {
        u16::from_be_bytes([src[0], src[1]])
    }
}

pub mod var {
    //! Unsigned varints and ZigZag signed integers.

    use crate::types::{Result, SombraError};

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a u64 varint from a slice, advancing `off`.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src
                .get(*off)
                .ok_or(SombraError::Corruption("varint truncated"))?;
            *off += 1;
            let payload = u64::from(byte & 0x7f);
            if i == 9 && payload > 1 {
                return Err(SombraError::Corruption("varint overflows 64 bits"));
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(SombraError::Corruption("varint longer than 10 bytes"))
    }

    /// Encodes an i64 as a ZigZag varint.
    pub fn encode_i64(v: i64, out: &mut Vec<u8>) {
        encode_u64(((v << 1) ^ (v >> 63)) as u64, out);
    }

    /// Decodes a ZigZag varint, advancing `off`.
    pub fn decode_i64(src: &[u8], off: &mut usize) -> Result<i64> {
        let zigzag = decode_u64(src, off)?;
        Ok(((zigzag >> 1) as i64) ^ (-((zigzag & 1) as i64)))
    }
}
