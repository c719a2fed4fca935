//! Versioned SQLite package index for pkgindex.
//!
//! This crate provides the local storage layer: generic normalized tables
//! (`OneToOneTable`, `OneToManyTable`), the manifest table, a chain of schema
//! interfaces (`1.0` through `1.3`) where each version delegates unchanged
//! behavior to its predecessor, and `PackageIndex`, which owns the SQLite
//! connection and runs every mutation inside a single transaction.

pub mod index;
pub mod manifest_table;
pub mod metadata;
pub mod schema;
pub mod search;
pub mod tables;

pub use index::{PackageIndex, PackagingReport};
pub use metadata::IndexMetadata;
pub use schema::{
    interface_for, Dependent, PackageMultiProperty, PackageProperty, SchemaInterface,
    KNOWN_SCHEMA_VERSIONS, LATEST_SCHEMA_VERSION,
};
pub use tables::{OneToManyTable, OneToOneTable, ValueReference};

use pkgindex_schema::{ManifestError, SchemaVersion};
use thiserror::Error;

/// Row id of a manifest or normalized value.
pub type RowId = i64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("index I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid manifest: {0}")]
    Manifest(#[from] ManifestError),
    #[error("index schema version {found} is not supported (maximum {supported})")]
    UnsupportedSchemaVersion {
        found: SchemaVersion,
        supported: SchemaVersion,
    },
    #[error("manifest already present: {id} {version} channel '{channel}'")]
    DuplicateManifest {
        id: String,
        version: String,
        channel: String,
    },
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),
    #[error("property '{0}' is not supported by this index schema version")]
    UnsupportedProperty(String),
    #[error("relative path '{0}' is already used by another manifest")]
    PathInUse(String),
    #[error("index is not initialized: {0}")]
    NotInitialized(String),
    #[error("index is already initialized: {0}")]
    AlreadyInitialized(String),
    #[error("index metadata is corrupt: {0}")]
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_unsupported_version() {
        let e = StoreError::UnsupportedSchemaVersion {
            found: SchemaVersion::new(1, 9),
            supported: SchemaVersion::new(1, 3),
        };
        let msg = e.to_string();
        assert!(msg.contains("1.9"));
        assert!(msg.contains("1.3"));
    }

    #[test]
    fn store_error_display_duplicate_manifest() {
        let e = StoreError::DuplicateManifest {
            id: "Contoso.Editor".to_owned(),
            version: "1.0".to_owned(),
            channel: String::new(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Contoso.Editor"));
        assert!(msg.contains("1.0"));
    }

    #[test]
    fn store_error_display_unsupported_property() {
        let e = StoreError::UnsupportedProperty("Publisher".to_owned());
        assert!(e.to_string().contains("Publisher"));
    }

    #[test]
    fn store_error_from_manifest_error() {
        let e: StoreError = ManifestError::EmptyField("name").into();
        assert!(e.to_string().contains("name"));
    }
}
