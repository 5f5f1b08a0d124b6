//! Link bags: multisets of record references attached to a record.
//!
//! Small bags live inline with their owner ([`EmbeddedLinkBag`]). Large ones
//! move into a B+ tree shared by every bag of a file
//! ([`SharedLinkBagBTree`]), keyed by [`EdgeKey`]. [`LinkCollection`] picks
//! between the two and converts as the bag grows and shrinks.

mod collection;
mod embedded;
mod index;
mod key;
mod shared_tree;
mod tracker;
mod tree_bag;

pub use collection::{
    LinkBagEntries, LinkBagIter, LinkCollection, Representation, RepresentationKind,
};
pub use embedded::EmbeddedLinkBag;
pub use index::SubjectIndex;
pub use key::{EdgeKey, EDGE_KEY_LEN};
pub use shared_tree::{BagEntries, IsolatedLinkBagBTree, LinkBagPointer, SharedLinkBagBTree};
pub use tracker::{ChangeEvent, ChangeKind, ChangeTracker, RecordOwner};
pub use tree_bag::{LinkBagContext, TreeBagEntries, TreeLinkBag};
