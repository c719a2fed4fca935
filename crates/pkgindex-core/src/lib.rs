//! Orchestration layer of the package index.
//!
//! This crate ties the local SQLite index and the REST catalogs together:
//! the `DependencyValidator` checks dependency structure before a manifest is
//! admitted or removed, `IndexEngine` runs validated mutations against a
//! `PackageIndex`, and `CompositeCatalog` merges searches across every
//! attached local and remote catalog.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod validation;

pub use catalog::{Catalog, CatalogEntry, CompositeCatalog, TrustLevel};
pub use config::{EngineConfig, Strictness};
pub use engine::IndexEngine;
pub use validation::{DependencyCatalog, DependencyFailure, DependencyFlags, DependencyValidator};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] pkgindex_schema::ManifestError),
    #[error("store error: {0}")]
    Store(#[from] pkgindex_store::StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] pkgindex_remote::RemoteError),
    #[error("dependency validation failed ({flags}): {}", format_failures(.failures))]
    Dependency {
        flags: DependencyFlags,
        failures: Vec<DependencyFailure>,
    },
    #[error("manifest group is invalid: {0}")]
    InvalidGroup(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_failures(failures: &[DependencyFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl CoreError {
    /// Failure flags of a dependency error, empty for every other kind.
    pub fn dependency_flags(&self) -> DependencyFlags {
        match self {
            Self::Dependency { flags, .. } => *flags,
            _ => DependencyFlags::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgindex_schema::PackageId;

    #[test]
    fn dependency_error_lists_every_failure() {
        let failures = vec![
            DependencyFailure::MissingNode {
                dependency: PackageId::new("B"),
            },
            DependencyFailure::Loop {
                path: vec![PackageId::new("A"), PackageId::new("C")],
            },
        ];
        let flags = failures.iter().map(DependencyFailure::flag).collect();
        let err = CoreError::Dependency { flags, failures };
        let msg = err.to_string();
        assert!(msg.contains("MissingDependenciesNode"));
        assert!(msg.contains("FoundDependencyLoop"));
        assert!(msg.contains("A -> C -> A"));
        assert!(err.dependency_flags().contains(DependencyFlags::FOUND_DEPENDENCY_LOOP));
    }

    #[test]
    fn other_errors_have_no_dependency_flags() {
        let err = CoreError::Config("bad".to_owned());
        assert!(err.dependency_flags().is_empty());
    }
}
