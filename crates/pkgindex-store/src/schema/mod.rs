//! The chain of index schema interfaces.
//!
//! Every minor version is an additive step over its predecessor: a version
//! implements only what it adds and forwards the rest to the `prior` interface
//! it wraps. Opening an index picks the interface matching its persisted
//! version, so older files are never touched by columns introduced later.

mod v1_0;
mod v1_1;
mod v1_2;
mod v1_3;

pub use v1_0::V1_0;
pub use v1_1::V1_1;
pub use v1_2::V1_2;
pub use v1_3::V1_3;

pub(crate) use v1_0::{find_manifest, version_keys_by_package, IDS};

use crate::manifest_table::MANIFEST_TABLE;
use crate::tables::{OneToManyTable, OneToOneTable, ValueReference, MAP_MANIFEST_COLUMN};
use crate::{RowId, StoreError};
use pkgindex_schema::{
    Dependency, Manifest, PackageId, PackageMatchField, SchemaVersion, SearchRequest,
    SearchResult, Version,
};
use rusqlite::Connection;
use std::fmt;

pub const KNOWN_SCHEMA_VERSIONS: [SchemaVersion; 4] = [
    SchemaVersion::new(1, 0),
    SchemaVersion::new(1, 1),
    SchemaVersion::new(1, 2),
    SchemaVersion::new(1, 3),
];

pub const LATEST_SCHEMA_VERSION: SchemaVersion = SchemaVersion::new(1, 3);

/// Single-valued manifest properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageProperty {
    Id,
    Name,
    Moniker,
    Version,
    Channel,
    RelativePath,
    /// Since 1.1.
    ManifestHash,
    /// Since 1.2.
    Publisher,
}

impl fmt::Display for PackageProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackageProperty::Id => "Id",
            PackageProperty::Name => "Name",
            PackageProperty::Moniker => "Moniker",
            PackageProperty::Version => "Version",
            PackageProperty::Channel => "Channel",
            PackageProperty::RelativePath => "RelativePath",
            PackageProperty::ManifestHash => "ManifestHash",
            PackageProperty::Publisher => "Publisher",
        };
        f.write_str(s)
    }
}

/// Set-valued manifest properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageMultiProperty {
    Tag,
    Command,
    /// Since 1.1.
    PackageFamilyName,
    /// Since 1.1.
    ProductCode,
}

impl fmt::Display for PackageMultiProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackageMultiProperty::Tag => "Tag",
            PackageMultiProperty::Command => "Command",
            PackageMultiProperty::PackageFamilyName => "PackageFamilyName",
            PackageMultiProperty::ProductCode => "ProductCode",
        };
        f.write_str(s)
    }
}

/// A manifest that declares a dependency on some package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependent {
    pub manifest_id: RowId,
    pub package_id: PackageId,
    pub version: Version,
    pub channel: String,
    pub min_version: Option<Version>,
}

/// Where the values of a searchable field live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSource {
    /// A manifest column pointing into a value table.
    Column {
        column: &'static str,
        table: OneToOneTable,
    },
    /// A map table associating manifests with many values.
    Association(OneToManyTable),
}

impl FieldSource {
    /// SQL yielding `(manifest, value)` pairs for this field.
    pub(crate) fn select_sql(&self) -> String {
        match self {
            FieldSource::Column { column, table } => format!(
                "SELECT m.[rowid] AS [manifest], v.[{value}] AS [value] FROM [{MANIFEST_TABLE}] AS m \
                 JOIN [{name}] AS v ON m.[{column}] = v.[rowid]",
                value = table.value_name(),
                name = table.name(),
            ),
            FieldSource::Association(assoc) => format!(
                "SELECT a.[{MAP_MANIFEST_COLUMN}] AS [manifest], v.[{value}] AS [value] FROM [{map}] AS a \
                 JOIN [{name}] AS v ON a.[{value}] = v.[rowid]",
                value = assoc.values().value_name(),
                map = assoc.map_name(),
                name = assoc.values().name(),
            ),
        }
    }
}

/// Operations of one index schema version.
///
/// All methods run against a connection the caller has already placed inside
/// a transaction where mutation is involved.
pub trait SchemaInterface: Send + Sync {
    fn version(&self) -> SchemaVersion;

    /// Create every table of this version in an empty database.
    fn create_tables(&self, conn: &Connection) -> Result<(), StoreError>;

    /// Insert a manifest. Fails with `DuplicateManifest` if its
    /// `(id, version, channel)` is already present.
    fn add_manifest(
        &self,
        conn: &Connection,
        manifest: &Manifest,
        relative_path: Option<&str>,
    ) -> Result<RowId, StoreError>;

    /// Update the manifest with the same `(id, version, channel)`.
    ///
    /// Returns whether anything changed and the manifest row id, which is
    /// stable across updates.
    fn update_manifest(
        &self,
        conn: &Connection,
        manifest: &Manifest,
        relative_path: Option<&str>,
    ) -> Result<(bool, RowId), StoreError>;

    /// Delete a manifest and its associations. Normalized values remain.
    fn remove_manifest_by_id(&self, conn: &Connection, manifest_id: RowId)
        -> Result<(), StoreError>;

    fn get_property_by_manifest_id(
        &self,
        conn: &Connection,
        manifest_id: RowId,
        property: PackageProperty,
    ) -> Result<Option<String>, StoreError>;

    fn get_multi_property_by_primary_id(
        &self,
        conn: &Connection,
        manifest_id: RowId,
        property: PackageMultiProperty,
    ) -> Result<Vec<String>, StoreError>;

    /// Storage of a searchable field, or `None` if this version lacks it.
    fn field_source(&self, field: PackageMatchField) -> Option<FieldSource>;

    /// Every normalized value table.
    fn value_tables(&self) -> Vec<OneToOneTable>;

    /// References into normalized value tables.
    fn value_references(&self) -> Vec<ValueReference>;

    /// References from dependent rows to their owning manifest.
    fn owner_references(&self) -> Vec<ValueReference>;

    fn supports_dependencies(&self) -> bool {
        false
    }

    fn dependencies_by_manifest_id(
        &self,
        conn: &Connection,
        manifest_id: RowId,
    ) -> Result<Vec<Dependency>, StoreError> {
        crate::manifest_table::ensure_exists(conn, manifest_id)?;
        Ok(Vec::new())
    }

    fn dependents_of(
        &self,
        _conn: &Connection,
        _package_id: &PackageId,
    ) -> Result<Vec<Dependent>, StoreError> {
        Ok(Vec::new())
    }

    fn search(&self, conn: &Connection, request: &SearchRequest) -> Result<SearchResult, StoreError> {
        crate::search::execute(self, conn, request)
    }

    /// Drop normalized values no manifest references any more.
    ///
    /// Returns the number of value rows removed.
    fn prepare_for_packaging(&self, conn: &Connection) -> Result<usize, StoreError> {
        let references = self.value_references();
        let mut removed = 0;
        for table in self.value_tables() {
            removed += table.prepare_for_packaging(conn, &references)?;
        }
        Ok(removed)
    }

    /// Describe every dangling reference. Empty means consistent.
    fn check_consistency(&self, conn: &Connection) -> Result<Vec<String>, StoreError> {
        let mut problems = Vec::new();
        for reference in self
            .value_references()
            .into_iter()
            .chain(self.owner_references())
        {
            let dangling = reference.dangling_count(conn)?;
            if dangling > 0 {
                problems.push(format!(
                    "{dangling} row(s) in '{}'.'{}' reference missing rows of '{}'",
                    reference.referrer, reference.column, reference.table
                ));
            }
        }
        Ok(problems)
    }
}

/// Pick the interface for `requested`, the smallest known version at or above
/// it, without going past `limit`.
pub fn interface_for(
    requested: SchemaVersion,
    limit: SchemaVersion,
) -> Result<Box<dyn SchemaInterface>, StoreError> {
    let limit = limit.min(LATEST_SCHEMA_VERSION);
    let unsupported = || StoreError::UnsupportedSchemaVersion {
        found: requested,
        supported: limit,
    };
    if requested.major != LATEST_SCHEMA_VERSION.major || requested > limit {
        return Err(unsupported());
    }

    let chosen = KNOWN_SCHEMA_VERSIONS
        .iter()
        .copied()
        .find(|v| *v >= requested && *v <= limit)
        .ok_or_else(unsupported)?;

    let interface: Box<dyn SchemaInterface> = match chosen.minor {
        0 => Box::new(V1_0),
        1 => Box::new(V1_1::new()),
        2 => Box::new(V1_2::new()),
        _ => Box::new(V1_3::new()),
    };
    Ok(interface)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_for_exact_versions() {
        for v in KNOWN_SCHEMA_VERSIONS {
            let iface = interface_for(v, LATEST_SCHEMA_VERSION).unwrap();
            assert_eq!(iface.version(), v);
        }
    }

    #[test]
    fn interface_for_rejects_newer_versions() {
        assert!(matches!(
            interface_for(SchemaVersion::new(1, 4), LATEST_SCHEMA_VERSION),
            Err(StoreError::UnsupportedSchemaVersion { .. })
        ));
        assert!(interface_for(SchemaVersion::new(2, 0), LATEST_SCHEMA_VERSION).is_err());
    }

    #[test]
    fn interface_for_honors_limit() {
        assert!(interface_for(SchemaVersion::new(1, 2), SchemaVersion::new(1, 1)).is_err());
        let iface = interface_for(SchemaVersion::new(1, 1), SchemaVersion::new(1, 1)).unwrap();
        assert_eq!(iface.version(), SchemaVersion::new(1, 1));
    }

    #[test]
    fn later_versions_add_search_fields() {
        let v1_0 = interface_for(SchemaVersion::new(1, 0), LATEST_SCHEMA_VERSION).unwrap();
        let v1_2 = interface_for(SchemaVersion::new(1, 2), LATEST_SCHEMA_VERSION).unwrap();
        assert!(v1_0.field_source(PackageMatchField::Tag).is_some());
        assert!(v1_0.field_source(PackageMatchField::ProductCode).is_none());
        assert!(v1_0.field_source(PackageMatchField::Publisher).is_none());
        assert!(v1_2.field_source(PackageMatchField::ProductCode).is_some());
        assert!(v1_2.field_source(PackageMatchField::Publisher).is_some());
    }
}
