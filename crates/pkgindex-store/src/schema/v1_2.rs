use super::v1_1::V1_1;
use super::{FieldSource, PackageMultiProperty, PackageProperty, SchemaInterface};
use crate::manifest_table::{self, column, MANIFEST_TABLE};
use crate::tables::{OneToOneTable, ValueReference};
use crate::{RowId, StoreError};
use pkgindex_schema::{Manifest, PackageMatchField, SchemaVersion};
use rusqlite::Connection;

pub(crate) const PUBLISHERS: OneToOneTable = OneToOneTable::new("publishers", column::PUBLISHER);

/// Adds the publisher.
#[derive(Debug, Clone, Copy, Default)]
pub struct V1_2 {
    prior: V1_1,
}

impl V1_2 {
    pub fn new() -> Self {
        Self { prior: V1_1::new() }
    }
}

fn publisher(manifest: &Manifest) -> Option<&str> {
    manifest
        .publisher
        .as_deref()
        .filter(|p| !p.trim().is_empty())
}

impl SchemaInterface for V1_2 {
    fn version(&self) -> SchemaVersion {
        SchemaVersion::new(1, 2)
    }

    fn create_tables(&self, conn: &Connection) -> Result<(), StoreError> {
        self.prior.create_tables(conn)?;
        PUBLISHERS.create(conn)?;
        manifest_table::add_column(conn, column::PUBLISHER, "INT64")?;
        Ok(())
    }

    fn add_manifest(
        &self,
        conn: &Connection,
        manifest: &Manifest,
        relative_path: Option<&str>,
    ) -> Result<RowId, StoreError> {
        let manifest_id = self.prior.add_manifest(conn, manifest, relative_path)?;
        if let Some(p) = publisher(manifest) {
            let publisher_id = PUBLISHERS.ensure_exists(conn, p)?;
            manifest_table::set_id_column(conn, manifest_id, column::PUBLISHER, Some(publisher_id))?;
        }
        Ok(manifest_id)
    }

    fn update_manifest(
        &self,
        conn: &Connection,
        manifest: &Manifest,
        relative_path: Option<&str>,
    ) -> Result<(bool, RowId), StoreError> {
        let (mut changed, manifest_id) = self.prior.update_manifest(conn, manifest, relative_path)?;
        changed |= manifest_table::update_value(
            conn,
            manifest_id,
            column::PUBLISHER,
            PUBLISHERS,
            publisher(manifest),
        )?;
        Ok((changed, manifest_id))
    }

    fn remove_manifest_by_id(&self, conn: &Connection, manifest_id: RowId) -> Result<(), StoreError> {
        self.prior.remove_manifest_by_id(conn, manifest_id)
    }

    fn get_property_by_manifest_id(
        &self,
        conn: &Connection,
        manifest_id: RowId,
        property: PackageProperty,
    ) -> Result<Option<String>, StoreError> {
        match property {
            PackageProperty::Publisher => {
                manifest_table::get_value(conn, manifest_id, column::PUBLISHER, PUBLISHERS)
            }
            other => self
                .prior
                .get_property_by_manifest_id(conn, manifest_id, other),
        }
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
        match field {
            PackageMatchField::Publisher => Some(FieldSource::Column {
                column: column::PUBLISHER,
                table: PUBLISHERS,
            }),
            other => self.prior.field_source(other),
        }
    }

    fn value_tables(&self) -> Vec<OneToOneTable> {
        let mut tables = self.prior.value_tables();
        tables.push(PUBLISHERS);
        tables
    }

    fn value_references(&self) -> Vec<ValueReference> {
        let mut refs = self.prior.value_references();
        refs.push(ValueReference::new(
            PUBLISHERS.name(),
            MANIFEST_TABLE,
            column::PUBLISHER,
        ));
        refs
    }

    fn owner_references(&self) -> Vec<ValueReference> {
        self.prior.owner_references()
    }
}
