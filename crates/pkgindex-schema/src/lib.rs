//! Shared data model for the package index.
//!
//! This crate defines the schema layer: string identifiers (`PackageId`),
//! schema and package version ordering (`SchemaVersion`, `Version`), the
//! parsed `Manifest` handed to the index, and the search request/result types
//! understood by both local and remote catalogs.

pub mod manifest;
pub mod search;
pub mod types;
pub mod version;

pub use manifest::{Dependency, Installer, Manifest, ManifestError};
pub use search::{
    MatchType, PackageMatchField, PackageMatchFilter, PackageSummary, RequestMatch, SearchMatch,
    SearchRequest, SearchResult, VersionKey,
};
pub use types::{ManifestHash, PackageId};
pub use version::{ParseSchemaVersionError, SchemaVersion, Version};
