//! Engine configuration
//!
//! An [`EngineConfig`] names the declared root manifests and the reserved
//! keys the engine looks for inside manifest fragments. Every field has a
//! default, so an empty TOML document is a valid configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

fn default_imports_key() -> String {
    "imports".to_string()
}

fn default_package_key() -> String {
    "$package".to_string()
}

fn default_entities_key() -> String {
    "entities".to_string()
}

fn default_prototype_key() -> String {
    "$prototype".to_string()
}

fn default_map_prefix() -> String {
    "backend://".to_string()
}

/// Configuration of one [`Engine`](crate::Engine) instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Root manifest URIs, loaded in order; later roots override earlier ones
    #[serde(default)]
    pub roots: Vec<String>,

    /// Key holding the ordered list of imported URIs
    #[serde(default = "default_imports_key")]
    pub imports_key: String,

    /// Key holding package declarations and their dependencies
    #[serde(default = "default_package_key")]
    pub package_key: String,

    /// Root key listing the entity sections expanded for inheritance
    #[serde(default = "default_entities_key")]
    pub entities_key: String,

    /// Key linking an entity to the sibling it inherits from
    #[serde(default = "default_prototype_key")]
    pub prototype_key: String,

    /// Prefix of the opaque locations published for source files
    #[serde(default = "default_map_prefix")]
    pub map_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            imports_key: default_imports_key(),
            package_key: default_package_key(),
            entities_key: default_entities_key(),
            prototype_key: default_prototype_key(),
            map_prefix: default_map_prefix(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from TOML content
    ///
    /// # Example
    ///
    /// ```
    /// use manifest_core::EngineConfig;
    ///
    /// let config = EngineConfig::parse(r#"
    /// roots = ["metamodel.yaml", "dochub.yaml"]
    /// prototype_key = "$base"
    /// "#).unwrap();
    ///
    /// assert_eq!(config.roots.len(), 2);
    /// assert_eq!(config.imports_key, "imports");
    /// ```
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config {
            path: "<inline>".into(),
            reason: e.to_string(),
        })
    }

    /// Read a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        tracing::debug!(?path, "Loading engine config");
        toml::from_str(&content).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Builder-style helper adding a root URI
    pub fn with_root(mut self, uri: impl Into<String>) -> Self {
        self.roots.push(uri.into());
        self
    }
}
