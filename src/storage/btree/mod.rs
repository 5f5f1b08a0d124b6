#![forbid(unsafe_code)]

//! Fixed-width B+ tree used as the persistence substrate for link bags.

/// Encoding and decoding utilities for keys and values.
pub mod codecs;
mod cursor;
/// B+ tree page format.
pub mod page;
mod stats;
mod tree;

pub use codecs::{KeyCodec, ValCodec};
pub use cursor::Cursor;
pub use stats::{BTreeStats, BTreeStatsSnapshot};
pub use tree::BTree;

#[cfg(test)]
mod tests;
