//! The manifest table: one row per `(id, version, channel)`, with columns
//! holding row ids into the normalized value tables.

use crate::tables::OneToOneTable;
use crate::{RowId, StoreError};
use rusqlite::{params, Connection, OptionalExtension};

pub const MANIFEST_TABLE: &str = "manifest";

pub mod column {
    pub const ID: &str = "id";
    pub const NAME: &str = "name";
    pub const MONIKER: &str = "moniker";
    pub const VERSION: &str = "version";
    pub const CHANNEL: &str = "channel";
    pub const PATH: &str = "pathpart";
    /// Added in 1.1.
    pub const HASH: &str = "hash";
    /// Added in 1.2.
    pub const PUBLISHER: &str = "publisher";
}

/// Row ids for the identity and base columns of a new manifest row.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ManifestRow {
    pub id: RowId,
    pub name: RowId,
    pub moniker: Option<RowId>,
    pub version: RowId,
    pub channel: RowId,
    pub path: Option<RowId>,
}

pub(crate) fn create(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(&format!(
        "CREATE TABLE [{t}] (
            [rowid] INTEGER PRIMARY KEY,
            [{id}] INT64 NOT NULL,
            [{name}] INT64 NOT NULL,
            [{moniker}] INT64,
            [{version}] INT64 NOT NULL,
            [{channel}] INT64 NOT NULL,
            [{path}] INT64
        );
        CREATE UNIQUE INDEX [{t}_identity_index] ON [{t}]([{id}], [{version}], [{channel}]);
        CREATE INDEX [{t}_{path}_index] ON [{t}]([{path}]);",
        t = MANIFEST_TABLE,
        id = column::ID,
        name = column::NAME,
        moniker = column::MONIKER,
        version = column::VERSION,
        channel = column::CHANNEL,
        path = column::PATH,
    ))?;
    Ok(())
}

/// Extend the manifest table with a nullable column.
pub(crate) fn add_column(conn: &Connection, name: &str, sql_type: &str) -> Result<(), StoreError> {
    conn.execute_batch(&format!(
        "ALTER TABLE [{MANIFEST_TABLE}] ADD COLUMN [{name}] {sql_type};"
    ))?;
    Ok(())
}

pub(crate) fn insert(conn: &Connection, row: &ManifestRow) -> Result<RowId, StoreError> {
    conn.execute(
        &format!(
            "INSERT INTO [{MANIFEST_TABLE}] ([{}], [{}], [{}], [{}], [{}], [{}]) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            column::ID,
            column::NAME,
            column::MONIKER,
            column::VERSION,
            column::CHANNEL,
            column::PATH,
        ),
        params![row.id, row.name, row.moniker, row.version, row.channel, row.path],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn exists_by_id(conn: &Connection, manifest_id: RowId) -> Result<bool, StoreError> {
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT [rowid] FROM [{MANIFEST_TABLE}] WHERE [rowid] = ?1"),
            params![manifest_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn ensure_exists(conn: &Connection, manifest_id: RowId) -> Result<(), StoreError> {
    if exists_by_id(conn, manifest_id)? {
        Ok(())
    } else {
        Err(StoreError::ManifestNotFound(format!("row {manifest_id}")))
    }
}

pub(crate) fn select_by_identity(
    conn: &Connection,
    id: RowId,
    version: RowId,
    channel: RowId,
) -> Result<Option<RowId>, StoreError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT [rowid] FROM [{MANIFEST_TABLE}] WHERE [{}] = ?1 AND [{}] = ?2 AND [{}] = ?3",
                column::ID,
                column::VERSION,
                column::CHANNEL
            ),
            params![id, version, channel],
            |row| row.get(0),
        )
        .optional()?)
}

/// Manifest row ids sharing the package id row `id`.
pub(crate) fn select_by_package(conn: &Connection, id: RowId) -> Result<Vec<RowId>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT [rowid] FROM [{MANIFEST_TABLE}] WHERE [{}] = ?1 ORDER BY [rowid]",
        column::ID
    ))?;
    let rows = stmt.query_map(params![id], |row| row.get(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub(crate) fn all_ids(conn: &Connection) -> Result<Vec<RowId>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT [rowid] FROM [{MANIFEST_TABLE}] ORDER BY [rowid]"
    ))?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub(crate) fn count(conn: &Connection) -> Result<u64, StoreError> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM [{MANIFEST_TABLE}]"),
        [],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Read a nullable row-id column. The manifest must exist.
pub(crate) fn get_id_column(
    conn: &Connection,
    manifest_id: RowId,
    name: &str,
) -> Result<Option<RowId>, StoreError> {
    let value: Option<Option<RowId>> = conn
        .query_row(
            &format!("SELECT [{name}] FROM [{MANIFEST_TABLE}] WHERE [rowid] = ?1"),
            params![manifest_id],
            |row| row.get(0),
        )
        .optional()?;
    value.ok_or_else(|| StoreError::ManifestNotFound(format!("row {manifest_id}")))
}

pub(crate) fn set_id_column(
    conn: &Connection,
    manifest_id: RowId,
    name: &str,
    value: Option<RowId>,
) -> Result<(), StoreError> {
    conn.execute(
        &format!("UPDATE [{MANIFEST_TABLE}] SET [{name}] = ?1 WHERE [rowid] = ?2"),
        params![value, manifest_id],
    )?;
    Ok(())
}

pub(crate) fn get_text_column(
    conn: &Connection,
    manifest_id: RowId,
    name: &str,
) -> Result<Option<String>, StoreError> {
    let value: Option<Option<String>> = conn
        .query_row(
            &format!("SELECT [{name}] FROM [{MANIFEST_TABLE}] WHERE [rowid] = ?1"),
            params![manifest_id],
            |row| row.get(0),
        )
        .optional()?;
    value.ok_or_else(|| StoreError::ManifestNotFound(format!("row {manifest_id}")))
}

pub(crate) fn set_text_column(
    conn: &Connection,
    manifest_id: RowId,
    name: &str,
    value: Option<&str>,
) -> Result<(), StoreError> {
    conn.execute(
        &format!("UPDATE [{MANIFEST_TABLE}] SET [{name}] = ?1 WHERE [rowid] = ?2"),
        params![value, manifest_id],
    )?;
    Ok(())
}

/// Resolve a row-id column through its value table.
pub(crate) fn get_value(
    conn: &Connection,
    manifest_id: RowId,
    name: &str,
    table: OneToOneTable,
) -> Result<Option<String>, StoreError> {
    match get_id_column(conn, manifest_id, name)? {
        Some(value_id) => table.get_value_by_id(conn, value_id),
        None => Ok(None),
    }
}

/// Point a row-id column at `value`, inserting it into `table` if needed.
///
/// Returns `true` if the column changed. An unchanged value touches nothing.
pub(crate) fn update_value(
    conn: &Connection,
    manifest_id: RowId,
    name: &str,
    table: OneToOneTable,
    value: Option<&str>,
) -> Result<bool, StoreError> {
    let current = get_value(conn, manifest_id, name, table)?;
    if current.as_deref() == value {
        return Ok(false);
    }
    let value_id = match value {
        Some(v) => Some(table.ensure_exists(conn, v)?),
        None => None,
    };
    set_id_column(conn, manifest_id, name, value_id)?;
    Ok(true)
}

pub(crate) fn delete(conn: &Connection, manifest_id: RowId) -> Result<(), StoreError> {
    conn.execute(
        &format!("DELETE FROM [{MANIFEST_TABLE}] WHERE [rowid] = ?1"),
        params![manifest_id],
    )?;
    Ok(())
}
