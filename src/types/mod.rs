//! Core identifiers, the record locator and the crate-wide error type.

use std::fmt;

pub mod page;
mod rid;

pub use rid::{Rid, COLLECTION_ID_INVALID, COLLECTION_MAX, COLLECTION_POS_INVALID};

/// Identifier of a page inside a page store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);

/// Identifier of the file a shared link bag tree lives in.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct FileId(pub i64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of an ordered scan.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ScanDirection {
    /// Smallest key first.
    Ascending,
    /// Largest key first.
    Descending,
}

impl ScanDirection {
    /// Orders `a` relative to `b` in scan order.
    pub fn order<T: Ord + ?Sized>(self, a: &T, b: &T) -> std::cmp::Ordering {
        match self {
            ScanDirection::Ascending => a.cmp(b),
            ScanDirection::Descending => b.cmp(a),
        }
    }
}

/// Errors surfaced by the link bag storage layer.
#[derive(thiserror::Error, Debug)]
pub enum SombraError {
    /// Underlying I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted bytes failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an argument the operation cannot accept.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Contradictory or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// A tree-backed bag was accessed without a local B-tree.
    #[error("link bag tree is not available in this session")]
    SubstrateUnavailable,
    /// An iteration or ownership invariant was broken.
    #[error("consistency violation: {0}")]
    Consistency(&'static str),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SombraError>;
