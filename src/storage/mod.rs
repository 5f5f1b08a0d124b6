//! Link bag storage and the B+ tree it is built on.

/// Fixed-width B+ tree used as the shared link bag substrate.
pub mod btree;

/// Embedded and tree-backed link bags.
pub mod linkbag;

mod metrics;
mod options;

/// Metrics and profiling.
pub use metrics::{default_metrics, CounterMetrics, LinkBagMetrics, NoopMetrics};

/// Link bag configuration.
pub use options::{
    ConfigProvider, FileConfig, LinkBagOptions, LinkBagSection, DEFAULT_EMBEDDED_TO_TREE_THRESHOLD,
    DEFAULT_TREE_TO_EMBEDDED_THRESHOLD, ENV_EMBEDDED_TO_TREE, ENV_TREE_TO_EMBEDDED,
};
