//! Common header stamped on every committed page.
//!
//! Layout (big-endian):
//! `[magic:4][version:2][kind:1][reserved:1][page_size:4][page_no:8][salt:8][crc32:4]`.
//! The checksum covers the page number, the salt and the full page with the
//! crc field zeroed.

use super::{PageId, Result, SombraError};

/// Magic prefix of every page.
pub const PAGE_MAGIC: [u8; 4] = *b"SOMB";
/// Current page format revision.
pub const PAGE_FORMAT_VERSION: u16 = 1;
/// Length of the common header.
pub const PAGE_HDR_LEN: usize = 32;

/// Byte offsets of the header fields.
pub mod header {
    use core::ops::Range;

    /// Magic bytes.
    pub const MAGIC: Range<usize> = 0..4;
    /// Format version.
    pub const FORMAT_VERSION: Range<usize> = 4..6;
    /// Page kind tag.
    pub const PAGE_KIND: usize = 6;
    /// Always zero.
    pub const RESERVED: usize = 7;
    /// Page size in bytes.
    pub const PAGE_SIZE: Range<usize> = 8..12;
    /// Page number.
    pub const PAGE_NO: Range<usize> = 12..20;
    /// Store salt.
    pub const SALT: Range<usize> = 20..28;
    /// Page checksum.
    pub const CRC32: Range<usize> = 28..32;
}

/// What a page holds.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageKind {
    /// Tree metadata (root pointer, bag id counter).
    Meta = 1,
    /// B-tree leaf.
    BTreeLeaf = 3,
    /// B-tree internal node.
    BTreeInternal = 4,
}

impl TryFrom<u8> for PageKind {
    type Error = SombraError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PageKind::Meta),
            3 => Ok(PageKind::BTreeLeaf),
            4 => Ok(PageKind::BTreeInternal),
            _ => Err(SombraError::Corruption("unknown page kind")),
        }
    }
}

/// Decoded page header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PageHeader {
    /// Format version.
    pub format_version: u16,
    /// Page kind.
    pub kind: PageKind,
    /// Page size in bytes.
    pub page_size: u32,
    /// Page number.
    pub page_no: PageId,
    /// Store salt.
    pub salt: u64,
    /// Stored checksum.
    pub crc32: u32,
}

impl PageHeader {
    /// Creates a header with an empty checksum.
    pub fn new(page_no: PageId, kind: PageKind, page_size: u32, salt: u64) -> Result<Self> {
        if (page_size as usize) < PAGE_HDR_LEN {
            return Err(SombraError::Invalid("page size smaller than header"));
        }
        Ok(Self {
            format_version: PAGE_FORMAT_VERSION,
            kind,
            page_size,
            page_no,
            salt,
            crc32: 0,
        })
    }

    /// Writes the header into the first [`PAGE_HDR_LEN`] bytes of `dst`.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() < PAGE_HDR_LEN {
            return Err(SombraError::Invalid("page header buffer too small"));
        }
        let hdr = &mut dst[..PAGE_HDR_LEN];
        hdr[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
        hdr[header::FORMAT_VERSION].copy_from_slice(&self.format_version.to_be_bytes());
        hdr[header::PAGE_KIND] = self.kind as u8;
        hdr[header::RESERVED] = 0;
        hdr[header::PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
        hdr[header::PAGE_NO].copy_from_slice(&self.page_no.0.to_be_bytes());
        hdr[header::SALT].copy_from_slice(&self.salt.to_be_bytes());
        hdr[header::CRC32].copy_from_slice(&self.crc32.to_be_bytes());
        Ok(())
    }

    /// Parses and validates a header.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < PAGE_HDR_LEN {
            return Err(SombraError::Corruption("page header truncated"));
        }
        if src[header::MAGIC] != PAGE_MAGIC {
            return Err(SombraError::Corruption("invalid page magic"));
        }
        let format_version = u16::from_be_bytes([src[4], src[5]]);
        if format_version != PAGE_FORMAT_VERSION {
            return Err(SombraError::Corruption("unsupported page format version"));
        }
        if src[header::RESERVED] != 0 {
            return Err(SombraError::Corruption("page header reserved byte not zero"));
        }
        let kind = PageKind::try_from(src[header::PAGE_KIND])?;
        let page_size = read_u32(&src[header::PAGE_SIZE]);
        if (page_size as usize) < PAGE_HDR_LEN {
            return Err(SombraError::Corruption("page size smaller than header"));
        }
        Ok(Self {
            format_version,
            kind,
            page_size,
            page_no: PageId(read_u64(&src[header::PAGE_NO])),
            salt: read_u64(&src[header::SALT]),
            crc32: read_u32(&src[header::CRC32]),
        })
    }
}

/// Reads only the kind tag, without validating the rest of the header.
pub fn page_kind(src: &[u8]) -> Result<PageKind> {
    if src.len() < PAGE_HDR_LEN {
        return Err(SombraError::Corruption("page header truncated"));
    }
    PageKind::try_from(src[header::PAGE_KIND])
}

/// Overwrites the kind tag of an already initialised page.
pub fn set_page_kind(dst: &mut [u8], kind: PageKind) -> Result<()> {
    if dst.len() < PAGE_HDR_LEN {
        return Err(SombraError::Invalid("page header buffer too small"));
    }
    dst[header::PAGE_KIND] = kind as u8;
    Ok(())
}

/// Computes the checksum of a full page, treating the crc field as zero.
pub fn page_crc32(page_no: PageId, salt: u64, page: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page_no.0.to_be_bytes());
    hasher.update(&salt.to_be_bytes());
    if page.len() >= PAGE_HDR_LEN {
        hasher.update(&page[..header::CRC32.start]);
        hasher.update(&[0u8; 4]);
        hasher.update(&page[header::CRC32.end..]);
    } else {
        hasher.update(page);
    }
    hasher.finalize()
}

/// Stamps the checksum of `page` into its header.
pub fn seal_page(page_no: PageId, salt: u64, page: &mut [u8]) -> Result<()> {
    if page.len() < PAGE_HDR_LEN {
        return Err(SombraError::Invalid("page header buffer too small"));
    }
    let crc = page_crc32(page_no, salt, page);
    page[header::CRC32].copy_from_slice(&crc.to_be_bytes());
    Ok(())
}

/// Checks the stored checksum and page number of `page`.
pub fn verify_page(page_no: PageId, salt: u64, page: &[u8]) -> Result<()> {
    let hdr = PageHeader::decode(page)?;
    if hdr.page_no != page_no {
        return Err(SombraError::Corruption("page number mismatch"));
    }
    if hdr.crc32 != page_crc32(page_no, salt, page) {
        return Err(SombraError::Corruption("page checksum mismatch"));
    }
    Ok(())
}

fn read_u32(src: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&src[..4]);
    u32::from_be_bytes(buf)
}

fn read_u64(src: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&src[..8]);
    u64::from_be_bytes(buf)
}
