use crate::types::{ManifestHash, PackageId};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest field '{0}' must not be empty")]
    EmptyField(&'static str),
    #[error("failed to serialize manifest: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A package dependency edge: the target package and an optional version floor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub package_id: PackageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<Version>,
}

impl Dependency {
    pub fn new(package_id: impl Into<PackageId>) -> Self {
        Self {
            package_id: package_id.into(),
            min_version: None,
        }
    }

    #[must_use]
    pub fn with_min_version(mut self, version: impl Into<Version>) -> Self {
        self.min_version = Some(version.into());
        self
    }

    /// Whether `version` satisfies this edge's floor.
    pub fn is_satisfied_by(&self, version: &Version) -> bool {
        self.min_version.as_ref().map_or(true, |min| version >= min)
    }
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.min_version {
            Some(min) => write!(f, "{} >= {min}", self.package_id),
            None => write!(f, "{}", self.package_id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

/// One installable version of a package, as handed over by the manifest parser.
///
/// The index never mutates a `Manifest`; it only derives rows from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: PackageId,
    pub version: Version,
    #[serde(default)]
    pub channel: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moniker: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub installers: Vec<Installer>,
}

impl Manifest {
    pub fn new(id: impl Into<PackageId>, version: impl Into<Version>, name: &str) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            channel: String::new(),
            name: name.to_owned(),
            publisher: None,
            moniker: None,
            tags: Vec::new(),
            commands: Vec::new(),
            installers: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.id.trim().is_empty() {
            return Err(ManifestError::EmptyField("id"));
        }
        if self.version.is_empty() {
            return Err(ManifestError::EmptyField("version"));
        }
        if self.name.trim().is_empty() {
            return Err(ManifestError::EmptyField("name"));
        }
        Ok(())
    }

    /// Tags in declaration order with duplicates removed.
    pub fn aggregated_tags(&self) -> Vec<String> {
        dedup_in_order(self.tags.iter())
    }

    /// Manifest-level commands followed by installer commands, deduplicated.
    pub fn aggregated_commands(&self) -> Vec<String> {
        dedup_in_order(
            self.commands
                .iter()
                .chain(self.installers.iter().flat_map(|i| i.commands.iter())),
        )
    }

    pub fn package_family_names(&self) -> Vec<String> {
        dedup_in_order(
            self.installers
                .iter()
                .filter_map(|i| i.package_family_name.as_ref()),
        )
    }

    pub fn product_codes(&self) -> Vec<String> {
        dedup_in_order(self.installers.iter().filter_map(|i| i.product_code.as_ref()))
    }

    /// All package dependency edges declared by any installer.
    pub fn dependencies(&self) -> BTreeSet<Dependency> {
        self.installers
            .iter()
            .flat_map(|i| i.dependencies.iter().cloned())
            .collect()
    }

    /// blake3 over the canonical JSON encoding. Byte-identical manifests hash equal.
    pub fn content_hash(&self) -> Result<ManifestHash, ManifestError> {
        let json = serde_json::to_vec(self)?;
        Ok(ManifestHash::new(blake3::hash(&json).to_hex().to_string()))
    }
}

fn dedup_in_order<'a>(values: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for v in values {
        if !v.is_empty() && seen.insert(v.as_str()) {
            out.push(v.clone());
        }
    }
    out
}
