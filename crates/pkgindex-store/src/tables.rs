//! Generic normalized tables shared by every schema version.
//!
//! [`OneToOneTable`] stores each distinct string once and hands out a stable
//! row id for it. [`OneToManyTable`] pairs such a value table with a map table
//! linking manifests to any number of its values.

use crate::{RowId, StoreError};
use rusqlite::{params, Connection, OptionalExtension};

/// A column elsewhere in the schema that points at rows of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueReference {
    /// The referenced table.
    pub table: &'static str,
    /// The table holding the reference.
    pub referrer: &'static str,
    /// The referencing column in `referrer`.
    pub column: &'static str,
}

impl ValueReference {
    pub const fn new(table: &'static str, referrer: &'static str, column: &'static str) -> Self {
        Self {
            table,
            referrer,
            column,
        }
    }

    /// Count of referencing rows whose target is missing.
    pub fn dangling_count(&self, conn: &Connection) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) FROM [{referrer}] AS r LEFT JOIN [{table}] AS t ON r.[{column}] = t.[rowid] \
             WHERE r.[{column}] IS NOT NULL AND t.[rowid] IS NULL",
            referrer = self.referrer,
            table = self.table,
            column = self.column,
        );
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// A table mapping one string value per row to a stable row id.
///
/// Values are unique and compared by exact byte equality, or ignoring ASCII
/// case for tables built with [`OneToOneTable::case_insensitive`]. Rows are
/// append-only; only [`OneToOneTable::prepare_for_packaging`] deletes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneToOneTable {
    name: &'static str,
    value: &'static str,
    ignore_case: bool,
}

impl OneToOneTable {
    pub const fn new(name: &'static str, value: &'static str) -> Self {
        Self {
            name,
            value,
            ignore_case: false,
        }
    }

    /// A table where values differing only in ASCII case share one row,
    /// which keeps the spelling first inserted.
    pub const fn case_insensitive(name: &'static str, value: &'static str) -> Self {
        Self {
            name,
            value,
            ignore_case: true,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn value_name(&self) -> &'static str {
        self.value
    }

    pub fn create(&self, conn: &Connection) -> Result<(), StoreError> {
        // The unique index and `=` lookups both follow the column collation.
        conn.execute_batch(&format!(
            "CREATE TABLE [{name}] ([rowid] INTEGER PRIMARY KEY, [{value}] TEXT NOT NULL{collate});
             CREATE UNIQUE INDEX [{name}_pkindex] ON [{name}]([{value}]);",
            name = self.name,
            value = self.value,
            collate = if self.ignore_case { " COLLATE NOCASE" } else { "" },
        ))?;
        Ok(())
    }

    pub fn select_id_by_value(
        &self,
        conn: &Connection,
        value: &str,
    ) -> Result<Option<RowId>, StoreError> {
        let sql = format!(
            "SELECT [rowid] FROM [{}] WHERE [{}] = ?1",
            self.name, self.value
        );
        Ok(conn
            .query_row(&sql, params![value], |row| row.get(0))
            .optional()?)
    }

    pub fn get_value_by_id(&self, conn: &Connection, id: RowId) -> Result<Option<String>, StoreError> {
        let sql = format!(
            "SELECT [{}] FROM [{}] WHERE [rowid] = ?1",
            self.value, self.name
        );
        Ok(conn
            .query_row(&sql, params![id], |row| row.get(0))
            .optional()?)
    }

    /// Return the row id for `value`, inserting it if absent. Idempotent.
    pub fn ensure_exists(&self, conn: &Connection, value: &str) -> Result<RowId, StoreError> {
        if let Some(id) = self.select_id_by_value(conn, value)? {
            return Ok(id);
        }
        let sql = format!("INSERT INTO [{}] ([{}]) VALUES (?1)", self.name, self.value);
        conn.execute(&sql, params![value])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn count(&self, conn: &Connection) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM [{}]", self.name);
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Delete every row not referenced by any of `references`.
    ///
    /// Returns the number of rows removed. References targeting other tables
    /// are ignored.
    pub fn prepare_for_packaging(
        &self,
        conn: &Connection,
        references: &[ValueReference],
    ) -> Result<usize, StoreError> {
        let live: Vec<String> = references
            .iter()
            .filter(|r| r.table == self.name)
            .map(|r| {
                format!(
                    "SELECT [{col}] FROM [{referrer}] WHERE [{col}] IS NOT NULL",
                    col = r.column,
                    referrer = r.referrer
                )
            })
            .collect();

        let sql = if live.is_empty() {
            format!("DELETE FROM [{}]", self.name)
        } else {
            format!(
                "DELETE FROM [{}] WHERE [rowid] NOT IN ({})",
                self.name,
                live.join(" UNION ")
            )
        };
        Ok(conn.execute(&sql, [])?)
    }
}

/// A value table plus a map table associating manifests with sets of values.
///
/// Map rows are created and removed as a unit with the owning manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneToManyTable {
    values: OneToOneTable,
    map: &'static str,
}

pub(crate) const MAP_MANIFEST_COLUMN: &str = "manifest";

impl OneToManyTable {
    pub const fn new(name: &'static str, value: &'static str, map: &'static str) -> Self {
        Self {
            values: OneToOneTable::new(name, value),
            map,
        }
    }

    #[inline]
    pub fn values(&self) -> OneToOneTable {
        self.values
    }

    #[inline]
    pub fn map_name(&self) -> &'static str {
        self.map
    }

    pub fn create(&self, conn: &Connection) -> Result<(), StoreError> {
        self.values.create(conn)?;
        conn.execute_batch(&format!(
            "CREATE TABLE [{map}] ([rowid] INTEGER PRIMARY KEY, [{manifest}] INT64 NOT NULL, [{value}] INT64 NOT NULL);
             CREATE UNIQUE INDEX [{map}_pkindex] ON [{map}]([{manifest}], [{value}]);
             CREATE INDEX [{map}_value_index] ON [{map}]([{value}]);",
            map = self.map,
            manifest = MAP_MANIFEST_COLUMN,
            value = self.values.value_name(),
        ))?;
        Ok(())
    }

    /// References from the map table into the value table.
    pub fn value_reference(&self) -> ValueReference {
        ValueReference::new(self.values.name(), self.map, self.values.value_name())
    }

    /// References from the map table to the owning manifest.
    pub fn owner_reference(&self, manifest_table: &'static str) -> ValueReference {
        ValueReference::new(manifest_table, self.map, MAP_MANIFEST_COLUMN)
    }

    pub fn ensure_exists_and_insert(
        &self,
        conn: &Connection,
        values: &[String],
        manifest_id: RowId,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT OR IGNORE INTO [{}] ([{}], [{}]) VALUES (?1, ?2)",
            self.map,
            MAP_MANIFEST_COLUMN,
            self.values.value_name()
        );
        let mut stmt = conn.prepare(&sql)?;
        for value in values {
            let value_id = self.values.ensure_exists(conn, value)?;
            stmt.execute(params![manifest_id, value_id])?;
        }
        Ok(())
    }

    /// Values associated with `manifest_id`, in insertion order.
    pub fn get_values_by_manifest_id(
        &self,
        conn: &Connection,
        manifest_id: RowId,
    ) -> Result<Vec<String>, StoreError> {
        let sql = format!(
            "SELECT v.[{value}] FROM [{map}] AS m JOIN [{values}] AS v ON m.[{value}] = v.[rowid] \
             WHERE m.[{manifest}] = ?1 ORDER BY m.[rowid]",
            value = self.values.value_name(),
            map = self.map,
            values = self.values.name(),
            manifest = MAP_MANIFEST_COLUMN,
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![manifest_id], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Replace the association set if it differs from `values`.
    ///
    /// Returns `true` when rows were changed. An identical set touches nothing.
    pub fn update_if_needed(
        &self,
        conn: &Connection,
        values: &[String],
        manifest_id: RowId,
    ) -> Result<bool, StoreError> {
        let existing = self.get_values_by_manifest_id(conn, manifest_id)?;
        if existing == values {
            return Ok(false);
        }
        self.delete_by_manifest_id(conn, manifest_id)?;
        self.ensure_exists_and_insert(conn, values, manifest_id)?;
        Ok(true)
    }

    pub fn delete_by_manifest_id(&self, conn: &Connection, manifest_id: RowId) -> Result<(), StoreError> {
        let sql = format!(
            "DELETE FROM [{}] WHERE [{}] = ?1",
            self.map, MAP_MANIFEST_COLUMN
        );
        conn.execute(&sql, params![manifest_id])?;
        Ok(())
    }

    pub fn map_count(&self, conn: &Connection) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM [{}]", self.map);
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
