use crate::metadata::{self, IndexMetadata};
use crate::schema::{
    find_manifest, interface_for, version_keys_by_package, Dependent, PackageMultiProperty,
    PackageProperty, SchemaInterface, IDS, LATEST_SCHEMA_VERSION,
};
use crate::{manifest_table, RowId, StoreError};
use pkgindex_schema::{
    Dependency, Manifest, PackageId, SchemaVersion, SearchRequest, SearchResult, Version,
    VersionKey,
};
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of [`PackageIndex::prepare_for_packaging`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingReport {
    pub removed_values: usize,
    pub vacuumed: bool,
}

/// A package index file bound to the schema interface of its persisted version.
///
/// Mutations take `&mut self` and run in a single immediate transaction, so
/// there is at most one writer per index and readers never observe partial
/// changes.
pub struct PackageIndex {
    conn: Connection,
    path: Option<PathBuf>,
    interface: Box<dyn SchemaInterface>,
    metadata: IndexMetadata,
}

impl std::fmt::Debug for PackageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageIndex")
            .field("path", &self.path)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Writers wait for each other on the database lock instead of failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn open_connection(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

impl PackageIndex {
    /// Create a new index at `path`. `None` selects the latest schema version.
    pub fn create(path: &Path, version: Option<SchemaVersion>) -> Result<Self, StoreError> {
        let conn = open_connection(path)?;
        let mut index = Self::initialize(conn, version)?;
        index.path = Some(path.to_path_buf());
        info!(path = %path.display(), version = %index.version(), "created package index");
        Ok(index)
    }

    pub fn create_in_memory(version: Option<SchemaVersion>) -> Result<Self, StoreError> {
        Self::initialize(Connection::open_in_memory()?, version)
    }

    fn initialize(mut conn: Connection, version: Option<SchemaVersion>) -> Result<Self, StoreError> {
        if metadata::is_initialized(&conn)? {
            return Err(StoreError::AlreadyInitialized(
                "metadata table already exists".to_owned(),
            ));
        }

        let interface = interface_for(
            version.unwrap_or(LATEST_SCHEMA_VERSION),
            LATEST_SCHEMA_VERSION,
        )?;
        let meta = IndexMetadata::new(interface.version());

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        metadata::create(&tx, &meta)?;
        interface.create_tables(&tx)?;
        tx.commit()?;

        Ok(Self {
            conn,
            path: None,
            interface,
            metadata: meta,
        })
    }

    /// Open an existing index, accepting any known schema version.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_limit(path, LATEST_SCHEMA_VERSION)
    }

    /// Open an existing index, refusing files newer than `limit`.
    pub fn open_with_limit(path: &Path, limit: SchemaVersion) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotInitialized(format!(
                "{} does not exist",
                path.display()
            )));
        }
        let conn = open_connection(path)?;
        let meta = metadata::read(&conn)?;
        let interface = interface_for(meta.schema_version, limit)?;
        debug!(path = %path.display(), version = %meta.schema_version, "opened package index");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
            interface,
            metadata: meta,
        })
    }

    pub fn version(&self) -> SchemaVersion {
        self.interface.version()
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn supports_dependencies(&self) -> bool {
        self.interface.supports_dependencies()
    }

    pub fn add_manifest(
        &mut self,
        manifest: &Manifest,
        relative_path: Option<&str>,
    ) -> Result<RowId, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let manifest_id = self.interface.add_manifest(&tx, manifest, relative_path)?;
        tx.commit()?;
        Ok(manifest_id)
    }

    /// Add every manifest of `manifests` in one transaction. If any of them
    /// fails, none is written.
    pub fn add_manifests(&mut self, manifests: &[Manifest]) -> Result<Vec<RowId>, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut added = Vec::with_capacity(manifests.len());
        for manifest in manifests {
            added.push(self.interface.add_manifest(&tx, manifest, None)?);
        }
        tx.commit()?;
        Ok(added)
    }

    /// Returns `(changed, manifest_id)`; an unchanged manifest mutates nothing.
    pub fn update_manifest(
        &mut self,
        manifest: &Manifest,
        relative_path: Option<&str>,
    ) -> Result<(bool, RowId), StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = self.interface.update_manifest(&tx, manifest, relative_path)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn remove_manifest_by_id(&mut self, manifest_id: RowId) -> Result<(), StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        self.interface.remove_manifest_by_id(&tx, manifest_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Remove the manifest with the same `(id, version, channel)` as `manifest`.
    pub fn remove_manifest(&mut self, manifest: &Manifest) -> Result<RowId, StoreError> {
        let manifest_id = self
            .manifest_id_by_identity(&manifest.id, &manifest.version, &manifest.channel)?
            .ok_or_else(|| {
                StoreError::ManifestNotFound(format!("{} {}", manifest.id, manifest.version))
            })?;
        self.remove_manifest_by_id(manifest_id)?;
        Ok(manifest_id)
    }

    pub fn get_property_by_manifest_id(
        &self,
        manifest_id: RowId,
        property: PackageProperty,
    ) -> Result<Option<String>, StoreError> {
        self.interface
            .get_property_by_manifest_id(&self.conn, manifest_id, property)
    }

    pub fn get_multi_property_by_primary_id(
        &self,
        manifest_id: RowId,
        property: PackageMultiProperty,
    ) -> Result<Vec<String>, StoreError> {
        self.interface
            .get_multi_property_by_primary_id(&self.conn, manifest_id, property)
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResult, StoreError> {
        self.interface.search(&self.conn, request)
    }

    pub fn manifest_id_by_identity(
        &self,
        id: &PackageId,
        version: &Version,
        channel: &str,
    ) -> Result<Option<RowId>, StoreError> {
        find_manifest(&self.conn, id, version.as_str(), channel)
    }

    /// All manifests of `id`, highest version first.
    pub fn version_keys(&self, id: &PackageId) -> Result<Vec<(VersionKey, RowId)>, StoreError> {
        match IDS.select_id_by_value(&self.conn, id)? {
            Some(package) => version_keys_by_package(&self.conn, package),
            None => Ok(Vec::new()),
        }
    }

    /// The manifest for `id` in `channel` at `version`, or the highest
    /// version in that channel when `version` is `None`.
    pub fn manifest_id_by_key(
        &self,
        id: &PackageId,
        version: Option<&Version>,
        channel: &str,
    ) -> Result<Option<RowId>, StoreError> {
        Ok(self
            .version_keys(id)?
            .into_iter()
            .find(|(key, _)| key.channel == channel && version.map_or(true, |v| key.version == *v))
            .map(|(_, manifest_id)| manifest_id))
    }

    pub fn dependencies_by_manifest_id(&self, manifest_id: RowId) -> Result<Vec<Dependency>, StoreError> {
        self.interface
            .dependencies_by_manifest_id(&self.conn, manifest_id)
    }

    /// Manifests declaring a dependency on `package_id`.
    pub fn dependents_of(&self, package_id: &PackageId) -> Result<Vec<Dependent>, StoreError> {
        self.interface.dependents_of(&self.conn, package_id)
    }

    pub fn manifest_count(&self) -> Result<u64, StoreError> {
        manifest_table::count(&self.conn)
    }

    /// Compact normalized tables, then optionally reclaim free pages.
    ///
    /// `VACUUM` cannot run inside a transaction, so it follows the commit.
    pub fn prepare_for_packaging(&mut self, vacuum: bool) -> Result<PackagingReport, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed_values = self.interface.prepare_for_packaging(&tx)?;
        tx.commit()?;

        if vacuum {
            self.conn.execute_batch("VACUUM;")?;
        }
        info!(removed_values, vacuum, "index prepared for packaging");
        Ok(PackagingReport {
            removed_values,
            vacuumed: vacuum,
        })
    }

    /// Dangling references found in the index. Empty means consistent.
    pub fn check_consistency(&self) -> Result<Vec<String>, StoreError> {
        let problems = self.interface.check_consistency(&self.conn)?;
        for problem in &problems {
            warn!(%problem, "index inconsistency");
        }
        Ok(problems)
    }
}
