use crate::CoreError;
use pkgindex_schema::SchemaVersion;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What to do when a dependency does not resolve against the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Log the missing node and admit the manifest.
    Warn,
    #[default]
    Reject,
}

/// Engine behaviour, read from `pkgindex.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Applies to missing nodes and unsatisfiable minimum versions.
    pub strictness: Strictness,
    /// Let a single-version manifest depend on another version of its own package.
    pub allow_multi_version_self_dependency: bool,
    /// Schema version of newly created indexes; the latest when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_schema_version: Option<String>,
    pub vacuum_on_packaging: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strictness: Strictness::Reject,
            allow_multi_version_self_dependency: false,
            create_schema_version: None,
            vacuum_on_packaging: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml(input: &str) -> Result<Self, CoreError> {
        let config: Self =
            toml::from_str(input).map_err(|e| CoreError::Config(format!("invalid engine config: {e}")))?;
        config.schema_version()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CoreError::Config(format!("TOML serialization failed: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parsed `create_schema_version`.
    pub fn schema_version(&self) -> Result<Option<SchemaVersion>, CoreError> {
        self.create_schema_version
            .as_deref()
            .map(|raw| {
                raw.parse::<SchemaVersion>()
                    .map_err(|e| CoreError::Config(e.to_string()))
            })
            .transpose()
    }
}
