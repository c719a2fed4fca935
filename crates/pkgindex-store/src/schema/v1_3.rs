use super::v1_0::{CHANNELS, IDS, VERSIONS};
use super::v1_2::V1_2;
use super::{Dependent, FieldSource, PackageMultiProperty, PackageProperty, SchemaInterface};
use crate::manifest_table::{self, column, MANIFEST_TABLE};
use crate::tables::{OneToOneTable, ValueReference};
use crate::{RowId, StoreError};
use pkgindex_schema::{
    Dependency, Manifest, PackageId, PackageMatchField, SchemaVersion, Version,
};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use tracing::debug;

const DEPENDENCIES_TABLE: &str = "dependencies";
const DEP_MANIFEST: &str = "manifest";
const DEP_PACKAGE: &str = "package_id";
const DEP_MIN_VERSION: &str = "min_version";

/// Adds package dependency edges.
///
/// Each row links a manifest to the id row of the package it needs and,
/// optionally, to a version row acting as the floor.
#[derive(Debug, Clone, Copy, Default)]
pub struct V1_3 {
    prior: V1_2,
}

impl V1_3 {
    pub fn new() -> Self {
        Self { prior: V1_2::new() }
    }
}

fn insert_dependencies(
    conn: &Connection,
    manifest_id: RowId,
    dependencies: &BTreeSet<Dependency>,
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO [{DEPENDENCIES_TABLE}] ([{DEP_MANIFEST}], [{DEP_PACKAGE}], [{DEP_MIN_VERSION}]) VALUES (?1, ?2, ?3)"
    ))?;
    for dep in dependencies {
        let package = IDS.ensure_exists(conn, &dep.package_id)?;
        let min_version = match &dep.min_version {
            Some(v) => Some(VERSIONS.ensure_exists(conn, v.as_str())?),
            None => None,
        };
        stmt.execute(params![manifest_id, package, min_version])?;
    }
    Ok(())
}

fn delete_dependencies(conn: &Connection, manifest_id: RowId) -> Result<(), StoreError> {
    conn.execute(
        &format!("DELETE FROM [{DEPENDENCIES_TABLE}] WHERE [{DEP_MANIFEST}] = ?1"),
        params![manifest_id],
    )?;
    Ok(())
}

fn read_dependencies(conn: &Connection, manifest_id: RowId) -> Result<Vec<Dependency>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT i.[{id}], v.[{version}] FROM [{DEPENDENCIES_TABLE}] AS d \
         JOIN [{ids}] AS i ON d.[{DEP_PACKAGE}] = i.[rowid] \
         LEFT JOIN [{versions}] AS v ON d.[{DEP_MIN_VERSION}] = v.[rowid] \
         WHERE d.[{DEP_MANIFEST}] = ?1 ORDER BY d.[rowid]",
        id = IDS.value_name(),
        ids = IDS.name(),
        version = VERSIONS.value_name(),
        versions = VERSIONS.name(),
    ))?;
    let rows = stmt.query_map(params![manifest_id], |row| {
        let id: String = row.get(0)?;
        let min: Option<String> = row.get(1)?;
        Ok(Dependency {
            package_id: PackageId::new(id),
            min_version: min.map(Version::new),
        })
    })?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

impl SchemaInterface for V1_3 {
    fn version(&self) -> SchemaVersion {
        SchemaVersion::new(1, 3)
    }

    fn create_tables(&self, conn: &Connection) -> Result<(), StoreError> {
        self.prior.create_tables(conn)?;
        conn.execute_batch(&format!(
            "CREATE TABLE [{DEPENDENCIES_TABLE}] (
                [rowid] INTEGER PRIMARY KEY,
                [{DEP_MANIFEST}] INT64 NOT NULL,
                [{DEP_PACKAGE}] INT64 NOT NULL,
                [{DEP_MIN_VERSION}] INT64
            );
            CREATE INDEX [{DEPENDENCIES_TABLE}_manifest_index] ON [{DEPENDENCIES_TABLE}]([{DEP_MANIFEST}]);
            CREATE INDEX [{DEPENDENCIES_TABLE}_package_index] ON [{DEPENDENCIES_TABLE}]([{DEP_PACKAGE}]);"
        ))?;
        Ok(())
    }

    fn add_manifest(
        &self,
        conn: &Connection,
        manifest: &Manifest,
        relative_path: Option<&str>,
    ) -> Result<RowId, StoreError> {
        let manifest_id = self.prior.add_manifest(conn, manifest, relative_path)?;
        insert_dependencies(conn, manifest_id, &manifest.dependencies())?;
        Ok(manifest_id)
    }

    fn update_manifest(
        &self,
        conn: &Connection,
        manifest: &Manifest,
        relative_path: Option<&str>,
    ) -> Result<(bool, RowId), StoreError> {
        let (mut changed, manifest_id) = self.prior.update_manifest(conn, manifest, relative_path)?;

        let existing: BTreeSet<Dependency> =
            read_dependencies(conn, manifest_id)?.into_iter().collect();
        let wanted = manifest.dependencies();
        if existing != wanted {
            delete_dependencies(conn, manifest_id)?;
            insert_dependencies(conn, manifest_id, &wanted)?;
            debug!(manifest_id, count = wanted.len(), "dependency rows replaced");
            changed = true;
        }
        Ok((changed, manifest_id))
    }

    fn remove_manifest_by_id(&self, conn: &Connection, manifest_id: RowId) -> Result<(), StoreError> {
        manifest_table::ensure_exists(conn, manifest_id)?;
        delete_dependencies(conn, manifest_id)?;
        self.prior.remove_manifest_by_id(conn, manifest_id)
    }

    fn get_property_by_manifest_id(
        &self,
        conn: &Connection,
        manifest_id: RowId,
        property: PackageProperty,
    ) -> Result<Option<String>, StoreError> {
        self.prior
            .get_property_by_manifest_id(conn, manifest_id, property)
    }

    fn get_multi_property_by_primary_id(
        &self,
        conn: &Connection,
        manifest_id: RowId,
        property: PackageMultiProperty,
    ) -> Result<Vec<String>, StoreError> {
        self.prior
            .get_multi_property_by_primary_id(conn, manifest_id, property)
    }

    fn field_source(&self, field: PackageMatchField) -> Option<FieldSource> {
        self.prior.field_source(field)
    }

    fn value_tables(&self) -> Vec<OneToOneTable> {
        self.prior.value_tables()
    }

    fn value_references(&self) -> Vec<ValueReference> {
        let mut refs = self.prior.value_references();
        refs.push(ValueReference::new(IDS.name(), DEPENDENCIES_TABLE, DEP_PACKAGE));
        refs.push(ValueReference::new(
            VERSIONS.name(),
            DEPENDENCIES_TABLE,
            DEP_MIN_VERSION,
        ));
        refs
    }

    fn owner_references(&self) -> Vec<ValueReference> {
        let mut refs = self.prior.owner_references();
        refs.push(ValueReference::new(
            MANIFEST_TABLE,
            DEPENDENCIES_TABLE,
            DEP_MANIFEST,
        ));
        refs
    }

    fn supports_dependencies(&self) -> bool {
        true
    }

    fn dependencies_by_manifest_id(
        &self,
        conn: &Connection,
        manifest_id: RowId,
    ) -> Result<Vec<Dependency>, StoreError> {
        manifest_table::ensure_exists(conn, manifest_id)?;
        read_dependencies(conn, manifest_id)
    }

    fn dependents_of(
        &self,
        conn: &Connection,
        package_id: &PackageId,
    ) -> Result<Vec<Dependent>, StoreError> {
        let Some(package) = IDS.select_id_by_value(conn, package_id)? else {
            return Ok(Vec::new());
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT d.[{DEP_MANIFEST}], i.[{id}], v.[{version}], c.[{channel}], mv.[{version}] \
             FROM [{DEPENDENCIES_TABLE}] AS d \
             JOIN [{MANIFEST_TABLE}] AS m ON d.[{DEP_MANIFEST}] = m.[rowid] \
             JOIN [{ids}] AS i ON m.[{mid}] = i.[rowid] \
             JOIN [{versions}] AS v ON m.[{mversion}] = v.[rowid] \
             JOIN [{channels}] AS c ON m.[{mchannel}] = c.[rowid] \
             LEFT JOIN [{versions}] AS mv ON d.[{DEP_MIN_VERSION}] = mv.[rowid] \
             WHERE d.[{DEP_PACKAGE}] = ?1 ORDER BY d.[rowid]",
            id = IDS.value_name(),
            ids = IDS.name(),
            version = VERSIONS.value_name(),
            versions = VERSIONS.name(),
            channel = CHANNELS.value_name(),
            channels = CHANNELS.name(),
            mid = column::ID,
            mversion = column::VERSION,
            mchannel = column::CHANNEL,
        ))?;
        let rows = stmt.query_map(params![package], |row| {
            let version: String = row.get(2)?;
            let min: Option<String> = row.get(4)?;
            Ok(Dependent {
                manifest_id: row.get(0)?,
                package_id: PackageId::new(row.get::<_, String>(1)?),
                version: Version::new(version),
                channel: row.get(3)?,
                min_version: min.map(Version::new),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
