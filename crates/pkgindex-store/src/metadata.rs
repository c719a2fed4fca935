//! Index-level metadata: persisted schema version and creation time.

use crate::StoreError;
use chrono::{DateTime, Utc};
use pkgindex_schema::SchemaVersion;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

pub(crate) const METADATA_TABLE: &str = "metadata";

const KEY_MAJOR: &str = "majorVersion";
const KEY_MINOR: &str = "minorVersion";
const KEY_CREATED_AT: &str = "createdAt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub schema_version: SchemaVersion,
    pub created_at: DateTime<Utc>,
}

impl IndexMetadata {
    pub fn new(schema_version: SchemaVersion) -> Self {
        Self {
            schema_version,
            created_at: Utc::now(),
        }
    }
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn is_initialized(conn: &Connection) -> Result<bool, StoreError> {
    table_exists(conn, METADATA_TABLE)
}

pub(crate) fn create(conn: &Connection, meta: &IndexMetadata) -> Result<(), StoreError> {
    conn.execute_batch(&format!(
        "CREATE TABLE [{METADATA_TABLE}] ([name] TEXT PRIMARY KEY NOT NULL, [value] TEXT NOT NULL);"
    ))?;
    set(conn, KEY_MAJOR, &meta.schema_version.major.to_string())?;
    set(conn, KEY_MINOR, &meta.schema_version.minor.to_string())?;
    set(conn, KEY_CREATED_AT, &meta.created_at.to_rfc3339())?;
    Ok(())
}

pub(crate) fn read(conn: &Connection) -> Result<IndexMetadata, StoreError> {
    if !is_initialized(conn)? {
        return Err(StoreError::NotInitialized(
            "metadata table is missing".to_owned(),
        ));
    }

    let major = parse_u32(conn, KEY_MAJOR)?;
    let minor = parse_u32(conn, KEY_MINOR)?;
    let created_at = match get(conn, KEY_CREATED_AT)? {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| StoreError::Corrupt(format!("{KEY_CREATED_AT}: {e}")))?
            .with_timezone(&Utc),
        None => return Err(StoreError::Corrupt(format!("{KEY_CREATED_AT} is missing"))),
    };

    Ok(IndexMetadata {
        schema_version: SchemaVersion::new(major, minor),
        created_at,
    })
}

fn parse_u32(conn: &Connection, key: &str) -> Result<u32, StoreError> {
    let raw = get(conn, key)?.ok_or_else(|| StoreError::Corrupt(format!("{key} is missing")))?;
    raw.parse()
        .map_err(|_| StoreError::Corrupt(format!("{key} is not a number: '{raw}'")))
}

fn get(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT [value] FROM [{METADATA_TABLE}] WHERE [name] = ?1"),
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

fn set(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    conn.execute(
        &format!("INSERT OR REPLACE INTO [{METADATA_TABLE}] ([name], [value]) VALUES (?1, ?2)"),
        params![key, value],
    )?;
    Ok(())
}
