//! Adjacency storage for the Sombra engine: link bags that stay inline while
//! small and move into a shared B+ tree once they grow, plus transactional
//! merge scans that read persisted data through pending changes.

#![warn(missing_docs)]

pub mod primitives;
pub mod storage;
pub mod tx;
pub mod types;

pub use storage::linkbag::{LinkCollection, RepresentationKind, SharedLinkBagBTree};
pub use storage::{ConfigProvider, FileConfig, LinkBagOptions};
pub use tx::Transaction;
pub use types::{Result, Rid, SombraError};
