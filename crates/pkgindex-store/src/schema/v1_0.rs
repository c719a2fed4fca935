use super::{FieldSource, PackageMultiProperty, PackageProperty, SchemaInterface};
use crate::manifest_table::{self, column, ManifestRow, MANIFEST_TABLE};
use crate::tables::{OneToManyTable, OneToOneTable, ValueReference};
use crate::{RowId, StoreError};
use pkgindex_schema::{Manifest, PackageMatchField, SchemaVersion, Version, VersionKey};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

pub(crate) const IDS: OneToOneTable = OneToOneTable::case_insensitive("ids", column::ID);
pub(crate) const NAMES: OneToOneTable = OneToOneTable::new("names", column::NAME);
pub(crate) const MONIKERS: OneToOneTable = OneToOneTable::new("monikers", column::MONIKER);
pub(crate) const VERSIONS: OneToOneTable = OneToOneTable::new("versions", column::VERSION);
pub(crate) const CHANNELS: OneToOneTable = OneToOneTable::new("channels", column::CHANNEL);
pub(crate) const PATHS: OneToOneTable = OneToOneTable::new("pathparts", column::PATH);
pub(crate) const TAGS: OneToManyTable = OneToManyTable::new("tags", "tag", "tags_map");
pub(crate) const COMMANDS: OneToManyTable = OneToManyTable::new("commands", "command", "commands_map");

/// Base schema: identity, name, moniker, relative path, tags and commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct V1_0;

/// Row id of the manifest `(id, version, channel)`, if present.
pub(crate) fn find_manifest(
    conn: &Connection,
    id: &str,
    version: &str,
    channel: &str,
) -> Result<Option<RowId>, StoreError> {
    let Some(id) = IDS.select_id_by_value(conn, id)? else {
        return Ok(None);
    };
    let Some(version) = VERSIONS.select_id_by_value(conn, version)? else {
        return Ok(None);
    };
    let Some(channel) = CHANNELS.select_id_by_value(conn, channel)? else {
        return Ok(None);
    };
    manifest_table::select_by_identity(conn, id, version, channel)
}

fn find(conn: &Connection, manifest: &Manifest) -> Result<Option<RowId>, StoreError> {
    find_manifest(conn, &manifest.id, manifest.version.as_str(), &manifest.channel)
}

fn not_found(manifest: &Manifest) -> StoreError {
    StoreError::ManifestNotFound(format!(
        "{} {} channel '{}'",
        manifest.id, manifest.version, manifest.channel
    ))
}

/// Every manifest of package row `package`, as version keys, highest first.
pub(crate) fn version_keys_by_package(
    conn: &Connection,
    package: RowId,
) -> Result<Vec<(VersionKey, RowId)>, StoreError> {
    let mut keys = Vec::new();
    for manifest_id in manifest_table::select_by_package(conn, package)? {
        let version = manifest_table::get_value(conn, manifest_id, column::VERSION, VERSIONS)?
            .unwrap_or_default();
        let channel = manifest_table::get_value(conn, manifest_id, column::CHANNEL, CHANNELS)?
            .unwrap_or_default();
        keys.push((
            VersionKey {
                version: Version::new(version),
                channel,
            },
            manifest_id,
        ));
    }
    keys.sort_by(|(a, _), (b, _)| {
        b.version
            .cmp(&a.version)
            .then_with(|| a.channel.cmp(&b.channel))
    });
    Ok(keys)
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

/// Fail if `path` is already used by a manifest other than `owner`.
fn ensure_path_free(conn: &Connection, path: &str, owner: Option<RowId>) -> Result<(), StoreError> {
    let Some(path_id) = PATHS.select_id_by_value(conn, path)? else {
        return Ok(());
    };
    let user: Option<RowId> = conn
        .query_row(
            &format!(
                "SELECT [rowid] FROM [{MANIFEST_TABLE}] WHERE [{}] = ?1 AND [rowid] != ?2",
                column::PATH
            ),
            params![path_id, owner.unwrap_or(-1)],
            |row| row.get(0),
        )
        .optional()?;
    match user {
        Some(_) => Err(StoreError::PathInUse(path.to_owned())),
        None => Ok(()),
    }
}

impl SchemaInterface for V1_0 {
    fn version(&self) -> SchemaVersion {
        SchemaVersion::new(1, 0)
    }

    fn create_tables(&self, conn: &Connection) -> Result<(), StoreError> {
        for table in [IDS, NAMES, MONIKERS, VERSIONS, CHANNELS, PATHS] {
            table.create(conn)?;
        }
        manifest_table::create(conn)?;
        TAGS.create(conn)?;
        COMMANDS.create(conn)?;
        Ok(())
    }

    fn add_manifest(
        &self,
        conn: &Connection,
        manifest: &Manifest,
        relative_path: Option<&str>,
    ) -> Result<RowId, StoreError> {
        manifest.validate()?;
        if find(conn, manifest)?.is_some() {
            return Err(StoreError::DuplicateManifest {
                id: manifest.id.to_string(),
                version: manifest.version.to_string(),
                channel: manifest.channel.clone(),
            });
        }

        let path = match relative_path {
            Some(p) => {
                ensure_path_free(conn, p, None)?;
                Some(PATHS.ensure_exists(conn, p)?)
            }
            None => None,
        };
        let moniker = match non_empty(manifest.moniker.as_ref()) {
            Some(m) => Some(MONIKERS.ensure_exists(conn, m)?),
            None => None,
        };

        let row = ManifestRow {
            id: IDS.ensure_exists(conn, &manifest.id)?,
            name: NAMES.ensure_exists(conn, &manifest.name)?,
            moniker,
            version: VERSIONS.ensure_exists(conn, manifest.version.as_str())?,
            channel: CHANNELS.ensure_exists(conn, &manifest.channel)?,
            path,
        };
        let manifest_id = manifest_table::insert(conn, &row)?;

        TAGS.ensure_exists_and_insert(conn, &manifest.aggregated_tags(), manifest_id)?;
        COMMANDS.ensure_exists_and_insert(conn, &manifest.aggregated_commands(), manifest_id)?;

        debug!(id = %manifest.id, version = %manifest.version, manifest_id, "manifest row added");
        Ok(manifest_id)
    }

    fn update_manifest(
        &self,
        conn: &Connection,
        manifest: &Manifest,
        relative_path: Option<&str>,
    ) -> Result<(bool, RowId), StoreError> {
        manifest.validate()?;
        let manifest_id = find(conn, manifest)?.ok_or_else(|| not_found(manifest))?;

        let mut changed = manifest_table::update_value(
            conn,
            manifest_id,
            column::NAME,
            NAMES,
            Some(manifest.name.as_str()),
        )?;
        changed |= manifest_table::update_value(
            conn,
            manifest_id,
            column::MONIKER,
            MONIKERS,
            non_empty(manifest.moniker.as_ref()),
        )?;

        let current_path = manifest_table::get_value(conn, manifest_id, column::PATH, PATHS)?;
        if current_path.as_deref() != relative_path {
            if let Some(p) = relative_path {
                ensure_path_free(conn, p, Some(manifest_id))?;
            }
            changed |=
                manifest_table::update_value(conn, manifest_id, column::PATH, PATHS, relative_path)?;
        }

        changed |= TAGS.update_if_needed(conn, &manifest.aggregated_tags(), manifest_id)?;
        changed |= COMMANDS.update_if_needed(conn, &manifest.aggregated_commands(), manifest_id)?;

        if changed {
            debug!(id = %manifest.id, version = %manifest.version, manifest_id, "manifest row updated");
        }
        Ok((changed, manifest_id))
    }

    fn remove_manifest_by_id(&self, conn: &Connection, manifest_id: RowId) -> Result<(), StoreError> {
        manifest_table::ensure_exists(conn, manifest_id)?;
        TAGS.delete_by_manifest_id(conn, manifest_id)?;
        COMMANDS.delete_by_manifest_id(conn, manifest_id)?;
        manifest_table::delete(conn, manifest_id)?;
        debug!(manifest_id, "manifest row removed");
        Ok(())
    }

    fn get_property_by_manifest_id(
        &self,
        conn: &Connection,
        manifest_id: RowId,
        property: PackageProperty,
    ) -> Result<Option<String>, StoreError> {
        let (name, table) = match property {
            PackageProperty::Id => (column::ID, IDS),
            PackageProperty::Name => (column::NAME, NAMES),
            PackageProperty::Moniker => (column::MONIKER, MONIKERS),
            PackageProperty::Version => (column::VERSION, VERSIONS),
            PackageProperty::Channel => (column::CHANNEL, CHANNELS),
            PackageProperty::RelativePath => (column::PATH, PATHS),
            other => return Err(StoreError::UnsupportedProperty(other.to_string())),
        };
        manifest_table::get_value(conn, manifest_id, name, table)
    }

    fn get_multi_property_by_primary_id(
        &self,
        conn: &Connection,
        manifest_id: RowId,
        property: PackageMultiProperty,
    ) -> Result<Vec<String>, StoreError> {
        let table = match property {
            PackageMultiProperty::Tag => TAGS,
            PackageMultiProperty::Command => COMMANDS,
            other => return Err(StoreError::UnsupportedProperty(other.to_string())),
        };
        manifest_table::ensure_exists(conn, manifest_id)?;
        table.get_values_by_manifest_id(conn, manifest_id)
    }

    fn field_source(&self, field: PackageMatchField) -> Option<FieldSource> {
        match field {
            PackageMatchField::Id => Some(FieldSource::Column {
                column: column::ID,
                table: IDS,
            }),
            PackageMatchField::Name => Some(FieldSource::Column {
                column: column::NAME,
                table: NAMES,
            }),
            PackageMatchField::Moniker => Some(FieldSource::Column {
                column: column::MONIKER,
                table: MONIKERS,
            }),
            PackageMatchField::Command => Some(FieldSource::Association(COMMANDS)),
            PackageMatchField::Tag => Some(FieldSource::Association(TAGS)),
            _ => None,
        }
    }

    fn value_tables(&self) -> Vec<OneToOneTable> {
        vec![
            IDS,
            NAMES,
            MONIKERS,
            VERSIONS,
            CHANNELS,
            PATHS,
            TAGS.values(),
            COMMANDS.values(),
        ]
    }

    fn value_references(&self) -> Vec<ValueReference> {
        let mut refs: Vec<ValueReference> = [IDS, NAMES, MONIKERS, VERSIONS, CHANNELS, PATHS]
            .iter()
            .map(|t| ValueReference::new(t.name(), MANIFEST_TABLE, t.value_name()))
            .collect();
        refs.push(TAGS.value_reference());
        refs.push(COMMANDS.value_reference());
        refs
    }

    fn owner_references(&self) -> Vec<ValueReference> {
        vec![
            TAGS.owner_reference(MANIFEST_TABLE),
            COMMANDS.owner_reference(MANIFEST_TABLE),
        ]
    }
}
