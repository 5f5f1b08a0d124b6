#![forbid(unsafe_code)]

//! Page access seen by the B-tree and the link bag layer.
//!
//! Reads go through [`PageAccess`]. Every structural change goes through an
//! [`AtomicOperation`], which is the durability boundary: either all of its
//! page writes become visible on [`AtomicOperation::commit`], or none do when
//! it is dropped.

use std::sync::Arc;

use serde::Serialize;

use crate::types::{PageId, Result};

mod mem;

pub use mem::{MemAtomicOperation, MemPager};

/// Immutable, cheaply clonable view of one page.
#[derive(Clone, Debug)]
pub struct PageRef {
    /// Page identifier.
    pub id: PageId,
    data: Arc<[u8]>,
}

impl PageRef {
    /// Wraps page bytes.
    pub fn new(id: PageId, data: Arc<[u8]>) -> Self {
        Self { id, data }
    }

    /// Returns the page data as a byte slice.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Read access to pages.
pub trait PageAccess {
    /// Returns the page size in bytes.
    fn page_size(&self) -> u32;
    /// Fetches a page.
    fn page(&self, id: PageId) -> Result<PageRef>;
}

/// A unit of page mutations that commits or rolls back as a whole.
///
/// Reads through an atomic operation observe its own uncommitted writes.
/// Dropping an operation without calling [`commit`](Self::commit) discards
/// every change it made.
pub trait AtomicOperation: PageAccess {
    /// Returns the operation as a plain read view.
    fn pages(&self) -> &dyn PageAccess;
    /// Returns a writable copy of a page.
    fn page_mut(&mut self, id: PageId) -> Result<&mut [u8]>;
    /// Allocates a zeroed page.
    fn allocate_page(&mut self) -> Result<PageId>;
    /// Returns a page to the store once the operation commits.
    fn free_page(&mut self, id: PageId) -> Result<()>;
    /// Publishes every change made by this operation.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// A store of fixed-size pages.
pub trait PageStore: PageAccess + Send + Sync {
    /// Returns a view of the committed pages.
    fn read_view(&self) -> &dyn PageAccess;
    /// Starts an atomic operation. Writers are serialized.
    fn begin_atomic(&self) -> Result<Box<dyn AtomicOperation + '_>>;
    /// Returns a snapshot of store statistics.
    fn stats(&self) -> PagerStats;
}

/// Counters describing page store activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PagerStats {
    /// Committed pages handed to readers.
    pub pages_read: u64,
    /// Pages written by committed operations.
    pub pages_written: u64,
    /// Pages allocated by committed operations.
    pub pages_allocated: u64,
    /// Pages freed by committed operations.
    pub pages_freed: u64,
    /// Committed atomic operations.
    pub commits: u64,
    /// Atomic operations dropped without committing.
    pub rollbacks: u64,
}
