//! Low-level primitives the link bag storage is built on.
//!
//! Includes byte utilities and the paging abstractions that form the
//! durability boundary.

/// Byte-level utilities and encoding/decoding.
pub mod bytes;

/// Page access traits, atomic operations and the in-memory page store.
pub mod pager;
