use crate::config::{EngineConfig, Strictness};
use crate::validation::{DependencyFailure, DependencyValidator};
use crate::CoreError;
use pkgindex_schema::{Manifest, SearchRequest, SearchResult};
use pkgindex_store::{PackageIndex, PackagingReport, RowId};
use std::path::Path;
use tracing::{info, info_span, warn, Span};

/// Validated mutations and queries over one local package index.
///
/// Every operation runs inside the span given at construction, so callers
/// decide where engine diagnostics land.
pub struct IndexEngine {
    index: PackageIndex,
    config: EngineConfig,
    span: Span,
}

impl IndexEngine {
    pub fn new(index: PackageIndex, config: EngineConfig, span: Span) -> Self {
        Self {
            index,
            config,
            span,
        }
    }

    /// Create a new index file at `path` with the configured schema version.
    pub fn create(path: &Path, config: EngineConfig, span: Span) -> Result<Self, CoreError> {
        let index = {
            let _guard = span.enter();
            PackageIndex::create(path, config.schema_version()?)?
        };
        Ok(Self::new(index, config, span))
    }

    pub fn create_in_memory(config: EngineConfig) -> Result<Self, CoreError> {
        let index = PackageIndex::create_in_memory(config.schema_version()?)?;
        Ok(Self::new(index, config, info_span!("index", path = "memory")))
    }

    pub fn open(path: &Path, config: EngineConfig, span: Span) -> Result<Self, CoreError> {
        let index = {
            let _guard = span.enter();
            PackageIndex::open(path)?
        };
        Ok(Self::new(index, config, span))
    }

    pub fn index(&self) -> &PackageIndex {
        &self.index
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn into_index(self) -> PackageIndex {
        self.index
    }

    pub fn validator(&self) -> DependencyValidator<'_> {
        DependencyValidator::new(&self.index, &self.config)
    }

    /// Turn validation findings into an error, honouring strictness for
    /// targets that do not resolve.
    fn enforce(&self, failures: Vec<DependencyFailure>) -> Result<(), CoreError> {
        let fatal = failures.iter().any(|f| {
            !(f.is_resolution_failure() && self.config.strictness == Strictness::Warn)
        });
        if !fatal {
            for failure in &failures {
                warn!("{failure}");
            }
            return Ok(());
        }
        let flags = failures.iter().map(DependencyFailure::flag).collect();
        Err(CoreError::Dependency { flags, failures })
    }

    pub fn add_manifest(
        &mut self,
        manifest: &Manifest,
        relative_path: Option<&str>,
    ) -> Result<RowId, CoreError> {
        let _guard = self.span.enter();
        manifest.validate()?;
        let failures = self.validator().validate_add(std::slice::from_ref(manifest))?;
        self.enforce(failures)?;

        let manifest_id = self.index.add_manifest(manifest, relative_path)?;
        info!("added {} {} as manifest {manifest_id}", manifest.id, manifest.version);
        Ok(manifest_id)
    }

    /// Add several versions of one package, validated as a group and written
    /// in one transaction: either every manifest is added or none is.
    pub fn add_manifests(&mut self, group: &[Manifest]) -> Result<Vec<RowId>, CoreError> {
        let _guard = self.span.enter();
        let Some(first) = group.first() else {
            return Err(CoreError::InvalidGroup("no manifests given".to_owned()));
        };
        let key = first.id.identity_key();
        if let Some(other) = group.iter().find(|m| m.id.identity_key() != key) {
            return Err(CoreError::InvalidGroup(format!(
                "{} does not belong to package {}",
                other.id, first.id
            )));
        }
        for manifest in group {
            manifest.validate()?;
        }
        let failures = self.validator().validate_add(group)?;
        self.enforce(failures)?;

        let added = self.index.add_manifests(group)?;
        info!("added {} versions of {}", added.len(), first.id);
        Ok(added)
    }

    /// Replace a stored manifest, re-validating its dependencies.
    pub fn update_manifest(
        &mut self,
        manifest: &Manifest,
        relative_path: Option<&str>,
    ) -> Result<(bool, RowId), CoreError> {
        let _guard = self.span.enter();
        manifest.validate()?;
        let failures = self.validator().validate_add(std::slice::from_ref(manifest))?;
        self.enforce(failures)?;

        let (changed, manifest_id) = self.index.update_manifest(manifest, relative_path)?;
        if changed {
            info!("updated {} {}", manifest.id, manifest.version);
        }
        Ok((changed, manifest_id))
    }

    /// Remove a manifest. Unless `force` is set, removal is refused while
    /// other packages rely on this exact manifest.
    pub fn remove_manifest(&mut self, manifest: &Manifest, force: bool) -> Result<RowId, CoreError> {
        let _guard = self.span.enter();
        let failures = self.validator().validate_remove(manifest)?;
        if !failures.is_empty() {
            if force {
                for failure in &failures {
                    warn!("forced removal: {failure}");
                }
            } else {
                let flags = failures.iter().map(DependencyFailure::flag).collect();
                return Err(CoreError::Dependency { flags, failures });
            }
        }
        let manifest_id = self.index.remove_manifest(manifest)?;
        info!("removed {} {}", manifest.id, manifest.version);
        Ok(manifest_id)
    }

    pub fn prepare_for_packaging(&mut self) -> Result<PackagingReport, CoreError> {
        let _guard = self.span.enter();
        Ok(self
            .index
            .prepare_for_packaging(self.config.vacuum_on_packaging)?)
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResult, CoreError> {
        let _guard = self.span.enter();
        Ok(self.index.search(request)?)
    }
}
