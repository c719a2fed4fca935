use super::v1_0::{self, V1_0};
use super::{FieldSource, PackageMultiProperty, PackageProperty, SchemaInterface};
use crate::manifest_table::{self, column, MANIFEST_TABLE};
use crate::tables::{OneToManyTable, OneToOneTable, ValueReference};
use crate::{RowId, StoreError};
use pkgindex_schema::{Manifest, PackageMatchField, SchemaVersion};
use rusqlite::Connection;
use tracing::trace;

pub(crate) const PACKAGE_FAMILY_NAMES: OneToManyTable =
    OneToManyTable::new("pfns", "pfn", "pfns_map");
pub(crate) const PRODUCT_CODES: OneToManyTable =
    OneToManyTable::new("productcodes", "productcode", "productcodes_map");

/// Adds the manifest content hash, package family names and product codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct V1_1 {
    prior: V1_0,
}

impl V1_1 {
    pub fn new() -> Self {
        Self { prior: V1_0 }
    }
}

impl SchemaInterface for V1_1 {
    fn version(&self) -> SchemaVersion {
        SchemaVersion::new(1, 1)
    }

    fn create_tables(&self, conn: &Connection) -> Result<(), StoreError> {
        self.prior.create_tables(conn)?;
        manifest_table::add_column(conn, column::HASH, "TEXT")?;
        PACKAGE_FAMILY_NAMES.create(conn)?;
        PRODUCT_CODES.create(conn)?;
        Ok(())
    }

    fn add_manifest(
        &self,
        conn: &Connection,
        manifest: &Manifest,
        relative_path: Option<&str>,
    ) -> Result<RowId, StoreError> {
        let hash = manifest.content_hash()?;
        let manifest_id = self.prior.add_manifest(conn, manifest, relative_path)?;
        manifest_table::set_text_column(conn, manifest_id, column::HASH, Some(hash.as_str()))?;
        PACKAGE_FAMILY_NAMES.ensure_exists_and_insert(
            conn,
            &manifest.package_family_names(),
            manifest_id,
        )?;
        PRODUCT_CODES.ensure_exists_and_insert(conn, &manifest.product_codes(), manifest_id)?;
        Ok(manifest_id)
    }

    fn update_manifest(
        &self,
        conn: &Connection,
        manifest: &Manifest,
        relative_path: Option<&str>,
    ) -> Result<(bool, RowId), StoreError> {
        manifest.validate()?;
        let hash = manifest.content_hash()?;
        let manifest_id = v1_0::find_manifest(
            conn,
            &manifest.id,
            manifest.version.as_str(),
            &manifest.channel,
        )?
        .ok_or_else(|| {
            StoreError::ManifestNotFound(format!("{} {}", manifest.id, manifest.version))
        })?;

        let stored = manifest_table::get_text_column(conn, manifest_id, column::HASH)?;
        let path = manifest_table::get_value(conn, manifest_id, column::PATH, v1_0::PATHS)?;
        let same_hash = stored.as_deref() == Some(hash.as_str());
        if same_hash && path.as_deref() == relative_path {
            trace!(manifest_id, "manifest content hash unchanged");
            return Ok((false, manifest_id));
        }

        let (mut changed, manifest_id) = self.prior.update_manifest(conn, manifest, relative_path)?;
        if !same_hash {
            manifest_table::set_text_column(conn, manifest_id, column::HASH, Some(hash.as_str()))?;
            changed = true;
        }
        changed |= PACKAGE_FAMILY_NAMES.update_if_needed(
            conn,
            &manifest.package_family_names(),
            manifest_id,
        )?;
        changed |= PRODUCT_CODES.update_if_needed(conn, &manifest.product_codes(), manifest_id)?;
        Ok((changed, manifest_id))
    }

    fn remove_manifest_by_id(&self, conn: &Connection, manifest_id: RowId) -> Result<(), StoreError> {
        manifest_table::ensure_exists(conn, manifest_id)?;
        PACKAGE_FAMILY_NAMES.delete_by_manifest_id(conn, manifest_id)?;
        PRODUCT_CODES.delete_by_manifest_id(conn, manifest_id)?;
        self.prior.remove_manifest_by_id(conn, manifest_id)
    }

    fn get_property_by_manifest_id(
        &self,
        conn: &Connection,
        manifest_id: RowId,
        property: PackageProperty,
    ) -> Result<Option<String>, StoreError> {
        match property {
            PackageProperty::ManifestHash => {
                manifest_table::get_text_column(conn, manifest_id, column::HASH)
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
        let table = match property {
            PackageMultiProperty::PackageFamilyName => PACKAGE_FAMILY_NAMES,
            PackageMultiProperty::ProductCode => PRODUCT_CODES,
            other => {
                return self
                    .prior
                    .get_multi_property_by_primary_id(conn, manifest_id, other)
            }
        };
        manifest_table::ensure_exists(conn, manifest_id)?;
        table.get_values_by_manifest_id(conn, manifest_id)
    }

    fn field_source(&self, field: PackageMatchField) -> Option<FieldSource> {
        match field {
            PackageMatchField::PackageFamilyName => {
                Some(FieldSource::Association(PACKAGE_FAMILY_NAMES))
            }
            PackageMatchField::ProductCode => Some(FieldSource::Association(PRODUCT_CODES)),
            other => self.prior.field_source(other),
        }
    }

    fn value_tables(&self) -> Vec<OneToOneTable> {
        let mut tables = self.prior.value_tables();
        tables.push(PACKAGE_FAMILY_NAMES.values());
        tables.push(PRODUCT_CODES.values());
        tables
    }

    fn value_references(&self) -> Vec<ValueReference> {
        let mut refs = self.prior.value_references();
        refs.push(PACKAGE_FAMILY_NAMES.value_reference());
        refs.push(PRODUCT_CODES.value_reference());
        refs
    }

    fn owner_references(&self) -> Vec<ValueReference> {
        let mut refs = self.prior.owner_references();
        refs.push(PACKAGE_FAMILY_NAMES.owner_reference(MANIFEST_TABLE));
        refs.push(PRODUCT_CODES.owner_reference(MANIFEST_TABLE));
        refs
    }
}
