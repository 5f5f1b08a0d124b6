use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::metrics::LinkBagMetrics;
use crate::types::{Result, SombraError};

/// Default size at which an embedded bag moves into the shared tree.
pub const DEFAULT_EMBEDDED_TO_TREE_THRESHOLD: i32 = 40;
/// Default size at which a tree bag moves back inline; negative disables it.
pub const DEFAULT_TREE_TO_EMBEDDED_THRESHOLD: i32 = -1;

/// Environment variable overriding [`LinkBagOptions::embedded_to_tree_threshold`].
pub const ENV_EMBEDDED_TO_TREE: &str = "SOMBRA_LINKBAG_EMBEDDED_TO_TREE_THRESHOLD";
/// Environment variable overriding [`LinkBagOptions::tree_to_embedded_threshold`].
pub const ENV_TREE_TO_EMBEDDED: &str = "SOMBRA_LINKBAG_TREE_TO_EMBEDDED_THRESHOLD";

/// Settings read once when a link bag is constructed.
#[derive(Clone)]
pub struct LinkBagOptions {
    /// Size at which an embedded bag converts to the tree; negative never converts.
    pub embedded_to_tree_threshold: i32,
    /// Size at or below which a tree bag converts back; negative never converts.
    pub tree_to_embedded_threshold: i32,
    /// Cap on the multiplicity of a single RID; 1 gives set semantics.
    pub max_multiplicity: u32,
    /// Optional metrics collection implementation
    pub metrics: Option<Arc<dyn LinkBagMetrics>>,
}

impl Default for LinkBagOptions {
    fn default() -> Self {
        Self {
            embedded_to_tree_threshold: DEFAULT_EMBEDDED_TO_TREE_THRESHOLD,
            tree_to_embedded_threshold: DEFAULT_TREE_TO_EMBEDDED_THRESHOLD,
            max_multiplicity: u32::MAX,
            metrics: None,
        }
    }
}

impl fmt::Debug for LinkBagOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkBagOptions")
            .field("embedded_to_tree_threshold", &self.embedded_to_tree_threshold)
            .field("tree_to_embedded_threshold", &self.tree_to_embedded_threshold)
            .field("max_multiplicity", &self.max_multiplicity)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl LinkBagOptions {
    /// Sets both conversion thresholds.
    pub fn with_thresholds(mut self, embedded_to_tree: i32, tree_to_embedded: i32) -> Self {
        self.embedded_to_tree_threshold = embedded_to_tree;
        self.tree_to_embedded_threshold = tree_to_embedded;
        self
    }

    /// Sets the per-RID multiplicity cap.
    pub fn with_max_multiplicity(mut self, max: u32) -> Self {
        self.max_multiplicity = max;
        self
    }

    /// Installs a metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn LinkBagMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Rejects settings that would make a bag flip between representations.
    pub fn validate(&self) -> Result<()> {
        let top = self.embedded_to_tree_threshold;
        let bottom = self.tree_to_embedded_threshold;
        if top >= 0 && bottom >= 0 && bottom >= top {
            return Err(SombraError::Config(format!(
                "tree_to_embedded_threshold ({bottom}) must be below embedded_to_tree_threshold ({top})"
            )));
        }
        if self.max_multiplicity == 0 {
            return Err(SombraError::Config(
                "max_multiplicity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`, keyed by the `ENV_*` names.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_EMBEDDED_TO_TREE) {
            self.embedded_to_tree_threshold = parse_threshold(ENV_EMBEDDED_TO_TREE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TREE_TO_EMBEDDED) {
            self.tree_to_embedded_threshold = parse_threshold(ENV_TREE_TO_EMBEDDED, &raw)?;
        }
        Ok(self)
    }
}

fn parse_threshold(name: &str, raw: &str) -> Result<i32> {
    raw.trim()
        .parse::<i32>()
        .map_err(|err| SombraError::Config(format!("{name}={raw:?} is not an integer: {err}")))
}

/// Supplies link bag settings.
pub trait ConfigProvider {
    /// Returns validated settings.
    fn link_bag_options(&self) -> Result<LinkBagOptions>;
}

impl ConfigProvider for LinkBagOptions {
    fn link_bag_options(&self) -> Result<LinkBagOptions> {
        self.validate()?;
        Ok(self.clone())
    }
}

/// `[linkbag]` table of a TOML configuration file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkBagSection {
    /// See [`LinkBagOptions::embedded_to_tree_threshold`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_to_tree_threshold: Option<i32>,
    /// See [`LinkBagOptions::tree_to_embedded_threshold`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_to_embedded_threshold: Option<i32>,
    /// See [`LinkBagOptions::max_multiplicity`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_multiplicity: Option<u32>,
}

/// Configuration file contents.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    /// Link bag settings.
    #[serde(default)]
    pub linkbag: LinkBagSection,
}

impl FileConfig {
    /// Reads and parses a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|err| {
            SombraError::Config(format!("failed to read config {}: {err}", path.display()))
        })?;
        toml::from_str(&contents).map_err(|err| {
            SombraError::Config(format!("failed to parse config {}: {err}", path.display()))
        })
    }

    /// Parses TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|err| SombraError::Config(format!("failed to parse config: {err}")))
    }

    /// Renders the file back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self)
            .map_err(|err| SombraError::Config(format!("failed to serialize config: {err}")))
    }

    /// Settings from the file, falling back to defaults for missing keys.
    pub fn resolve(&self) -> LinkBagOptions {
        let mut options = LinkBagOptions::default();
        let section = &self.linkbag;
        if let Some(top) = section.embedded_to_tree_threshold {
            options.embedded_to_tree_threshold = top;
        }
        if let Some(bottom) = section.tree_to_embedded_threshold {
            options.tree_to_embedded_threshold = bottom;
        }
        if let Some(max) = section.max_multiplicity {
            options.max_multiplicity = max;
        }
        options
    }
}

impl ConfigProvider for FileConfig {
    fn link_bag_options(&self) -> Result<LinkBagOptions> {
        let options = self.resolve();
        options.validate()?;
        Ok(options)
    }
}
