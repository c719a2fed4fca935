//! Structural dependency checks run before a manifest enters or leaves the index.
//!
//! Every problem found is collected rather than stopping at the first one.
//! Each [`DependencyFailure`] maps to one of the [`DependencyFlags`] bits so
//! callers can test for a class of failure without matching on details.

use crate::config::EngineConfig;
use crate::CoreError;
use pkgindex_schema::{Dependency, Manifest, PackageId, Version, VersionKey};
use pkgindex_store::{Dependent, PackageIndex};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use tracing::debug;

/// A combinable set of dependency failure kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DependencyFlags(u32);

impl DependencyFlags {
    pub const SINGLE_MANIFEST_HAS_DEPENDENCIES: Self = Self(0x1_0000);
    pub const MULTI_MANIFEST_HAS_DEPENDENCIES: Self = Self(0x2_0000);
    pub const MISSING_DEPENDENCIES_NODE: Self = Self(0x4_0000);
    pub const NO_SUITABLE_MIN_VERSION: Self = Self(0x8_0000);
    pub const FOUND_DEPENDENCY_LOOP: Self = Self(0x10_0000);

    const NAMES: [(Self, &'static str); 5] = [
        (Self::SINGLE_MANIFEST_HAS_DEPENDENCIES, "SingleManifestHasDependencies"),
        (Self::MULTI_MANIFEST_HAS_DEPENDENCIES, "MultiManifestHasDependencies"),
        (Self::MISSING_DEPENDENCIES_NODE, "MissingDependenciesNode"),
        (Self::NO_SUITABLE_MIN_VERSION, "NoSuitableMinVersion"),
        (Self::FOUND_DEPENDENCY_LOOP, "FoundDependencyLoop"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Keep only known bits.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & 0x1F_0000)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl BitOr for DependencyFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DependencyFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.insert(rhs);
    }
}

impl FromIterator<DependencyFlags> for DependencyFlags {
    fn from_iter<T: IntoIterator<Item = DependencyFlags>>(iter: T) -> Self {
        iter.into_iter().fold(Self::empty(), BitOr::bitor)
    }
}

impl fmt::Display for DependencyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join(" | "))
    }
}

/// One dependency problem, with what is needed to explain it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyFailure {
    /// A single-version manifest depends on its own package.
    SingleManifestSelfDependency { package: PackageId },
    /// A multi-version group depends on its own package.
    MultiManifestSelfDependency { package: PackageId },
    /// No manifest of the target package exists.
    MissingNode { dependency: PackageId },
    /// The target exists, but no version reaches the floor.
    NoSuitableMinVersion {
        dependency: PackageId,
        min_version: Version,
    },
    /// Following lowest satisfying versions returns to a package already on
    /// the path. The path starts at its lowest package id.
    Loop { path: Vec<PackageId> },
    /// Removing the manifest leaves dependents with nothing to resolve to.
    StrandedDependents {
        package: PackageId,
        version: Version,
        dependents: Vec<String>,
        last_version: bool,
    },
}

impl DependencyFailure {
    pub fn flag(&self) -> DependencyFlags {
        match self {
            Self::SingleManifestSelfDependency { .. } => {
                DependencyFlags::SINGLE_MANIFEST_HAS_DEPENDENCIES
            }
            Self::MultiManifestSelfDependency { .. } => {
                DependencyFlags::MULTI_MANIFEST_HAS_DEPENDENCIES
            }
            Self::MissingNode { .. } => DependencyFlags::MISSING_DEPENDENCIES_NODE,
            Self::NoSuitableMinVersion { .. } => DependencyFlags::NO_SUITABLE_MIN_VERSION,
            Self::Loop { .. } => DependencyFlags::FOUND_DEPENDENCY_LOOP,
            Self::StrandedDependents { last_version, .. } => {
                if *last_version {
                    DependencyFlags::SINGLE_MANIFEST_HAS_DEPENDENCIES
                } else {
                    DependencyFlags::MULTI_MANIFEST_HAS_DEPENDENCIES
                }
            }
        }
    }

    /// Whether the failure concerns a target that does not resolve.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(self, Self::MissingNode { .. } | Self::NoSuitableMinVersion { .. })
    }
}

impl fmt::Display for DependencyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = self.flag();
        match self {
            Self::SingleManifestSelfDependency { package } => {
                write!(f, "{flag}: {package} depends on another version of itself")
            }
            Self::MultiManifestSelfDependency { package } => {
                write!(f, "{flag}: versions of {package} depend on their own package")
            }
            Self::MissingNode { dependency } => {
                write!(f, "{flag}: no manifest for {dependency}")
            }
            Self::NoSuitableMinVersion {
                dependency,
                min_version,
            } => write!(f, "{flag}: no version of {dependency} >= {min_version}"),
            Self::Loop { path } => {
                let mut nodes: Vec<&str> = path.iter().map(PackageId::as_str).collect();
                if let Some(first) = nodes.first().copied() {
                    nodes.push(first);
                }
                write!(f, "{flag}: {}", nodes.join(" -> "))
            }
            Self::StrandedDependents {
                package,
                version,
                dependents,
                ..
            } => write!(
                f,
                "{flag}: removing {package} {version} strands {}",
                dependents.join(", ")
            ),
        }
    }
}

/// Read access to the dependency graph recorded in a catalog.
pub trait DependencyCatalog {
    /// Every `(version, channel)` of `package`; empty when it is unknown.
    fn versions(&self, package: &PackageId) -> Result<Vec<VersionKey>, CoreError>;

    /// Dependencies declared by `package` at `version`, across channels.
    fn dependencies(&self, package: &PackageId, version: &Version)
        -> Result<Vec<Dependency>, CoreError>;

    /// Manifests declaring a dependency on `package`.
    fn dependents(&self, package: &PackageId) -> Result<Vec<Dependent>, CoreError>;
}

impl DependencyCatalog for PackageIndex {
    fn versions(&self, package: &PackageId) -> Result<Vec<VersionKey>, CoreError> {
        Ok(self
            .version_keys(package)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    fn dependencies(
        &self,
        package: &PackageId,
        version: &Version,
    ) -> Result<Vec<Dependency>, CoreError> {
        let mut all = BTreeSet::new();
        for (key, manifest_id) in self.version_keys(package)? {
            if key.version == *version {
                all.extend(self.dependencies_by_manifest_id(manifest_id)?);
            }
        }
        Ok(all.into_iter().collect())
    }

    fn dependents(&self, package: &PackageId) -> Result<Vec<Dependent>, CoreError> {
        Ok(self.dependents_of(package)?)
    }
}

/// A catalog as it would be once `pending` manifests are written.
struct Overlay<'a> {
    catalog: &'a dyn DependencyCatalog,
    pending: &'a [Manifest],
}

impl Overlay<'_> {
    fn pending_for<'m>(&'m self, package: &'m PackageId) -> impl Iterator<Item = &'m Manifest> + 'm {
        let key = package.identity_key();
        self.pending
            .iter()
            .filter(move |m| m.id.identity_key() == key)
    }
}

impl DependencyCatalog for Overlay<'_> {
    fn versions(&self, package: &PackageId) -> Result<Vec<VersionKey>, CoreError> {
        let mut keys = self.catalog.versions(package)?;
        for m in self.pending_for(package) {
            let key = VersionKey::new(m.version.clone(), &m.channel);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn dependencies(
        &self,
        package: &PackageId,
        version: &Version,
    ) -> Result<Vec<Dependency>, CoreError> {
        let pending: Vec<&Manifest> = self
            .pending_for(package)
            .filter(|m| m.version == *version)
            .collect();
        if pending.is_empty() {
            return self.catalog.dependencies(package, version);
        }
        let all: BTreeSet<Dependency> = pending.iter().flat_map(|m| m.dependencies()).collect();
        Ok(all.into_iter().collect())
    }

    fn dependents(&self, package: &PackageId) -> Result<Vec<Dependent>, CoreError> {
        self.catalog.dependents(package)
    }
}

/// Lowest version of `keys` satisfying `dependency`.
fn lowest_satisfying(keys: &[VersionKey], dependency: &Dependency) -> Option<Version> {
    keys.iter()
        .map(|k| &k.version)
        .filter(|v| dependency.is_satisfied_by(v))
        .min()
        .cloned()
}

/// Rotate a cycle so it starts at its lowest identity.
fn canonical_cycle(mut cycle: Vec<PackageId>) -> Vec<PackageId> {
    if let Some(start) = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, id)| id.identity_key())
        .map(|(i, _)| i)
    {
        cycle.rotate_left(start);
    }
    cycle
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnPath,
    Done,
}

/// Depth-first walk collecting the cycles reachable from one root.
///
/// A package is entered at most once per walk. Every looping set of packages
/// is reported, through the first cycle the walk closes in it; further
/// cycles that only close through an already finished package are not.
struct LoopSearch<'a> {
    catalog: &'a dyn DependencyCatalog,
    marks: HashMap<String, Mark>,
    path: Vec<PackageId>,
    cycles: Vec<Vec<PackageId>>,
}

impl LoopSearch<'_> {
    fn visit(&mut self, node: &PackageId, edges: Vec<Dependency>) -> Result<(), CoreError> {
        self.marks.insert(node.identity_key(), Mark::OnPath);
        self.path.push(node.clone());

        for edge in edges {
            let key = edge.package_id.identity_key();
            match self.marks.get(&key).copied() {
                Some(Mark::OnPath) => {
                    let start = self
                        .path
                        .iter()
                        .position(|p| p.identity_key() == key)
                        .unwrap_or(0);
                    self.cycles.push(canonical_cycle(self.path[start..].to_vec()));
                }
                Some(Mark::Done) => {}
                None => {
                    let keys = self.catalog.versions(&edge.package_id)?;
                    let Some(version) = lowest_satisfying(&keys, &edge) else {
                        continue;
                    };
                    let next = self.catalog.dependencies(&edge.package_id, &version)?;
                    self.visit(&edge.package_id, next)?;
                }
            }
        }

        self.path.pop();
        self.marks.insert(node.identity_key(), Mark::Done);
        Ok(())
    }
}

/// Checks dependency structure against a catalog.
pub struct DependencyValidator<'a> {
    catalog: &'a dyn DependencyCatalog,
    allow_multi_version_self_dependency: bool,
}

impl<'a> DependencyValidator<'a> {
    pub fn new(catalog: &'a dyn DependencyCatalog, config: &EngineConfig) -> Self {
        Self {
            catalog,
            allow_multi_version_self_dependency: config.allow_multi_version_self_dependency,
        }
    }

    /// Failures of admitting `group`: one manifest, or several versions of
    /// one package written together. Manifests of `group` already present
    /// in the catalog are treated as replaced.
    pub fn validate_add(&self, group: &[Manifest]) -> Result<Vec<DependencyFailure>, CoreError> {
        let overlay = Overlay {
            catalog: self.catalog,
            pending: group,
        };
        let mut failures = Vec::new();
        let mut checked: HashSet<String> = HashSet::new();

        for manifest in group {
            let own = manifest.id.identity_key();
            for dependency in manifest.dependencies() {
                let target = dependency.package_id.identity_key();
                if target == own {
                    let failure = if group.len() > 1 {
                        DependencyFailure::MultiManifestSelfDependency {
                            package: manifest.id.clone(),
                        }
                    } else if self.allow_multi_version_self_dependency {
                        continue;
                    } else {
                        DependencyFailure::SingleManifestSelfDependency {
                            package: manifest.id.clone(),
                        }
                    };
                    if !failures.contains(&failure) {
                        failures.push(failure);
                    }
                    continue;
                }
                if !checked.insert(dependency.to_string()) {
                    continue;
                }

                let keys = overlay.versions(&dependency.package_id)?;
                if keys.is_empty() {
                    failures.push(DependencyFailure::MissingNode {
                        dependency: dependency.package_id.clone(),
                    });
                } else if let (None, Some(min)) =
                    (lowest_satisfying(&keys, &dependency), &dependency.min_version)
                {
                    failures.push(DependencyFailure::NoSuitableMinVersion {
                        dependency: dependency.package_id.clone(),
                        min_version: min.clone(),
                    });
                }
            }
        }

        let mut cycles: Vec<Vec<PackageId>> = Vec::new();
        for manifest in group {
            let own = manifest.id.identity_key();
            // Self edges are governed by the self-dependency rule alone.
            let edges: Vec<Dependency> = manifest
                .dependencies()
                .into_iter()
                .filter(|d| d.package_id.identity_key() != own)
                .collect();
            let mut search = LoopSearch {
                catalog: &overlay,
                marks: HashMap::new(),
                path: Vec::new(),
                cycles: Vec::new(),
            };
            search.visit(&manifest.id, edges)?;
            for cycle in search.cycles {
                if !cycles.contains(&cycle) {
                    cycles.push(cycle);
                }
            }
        }
        failures.extend(cycles.into_iter().map(|path| DependencyFailure::Loop { path }));

        debug!(
            package = %group.first().map_or("", |m| m.id.as_str()),
            failures = failures.len(),
            "validated dependencies"
        );
        Ok(failures)
    }

    /// Failures of removing `manifest`: dependents of its package that only
    /// this manifest satisfies.
    pub fn validate_remove(&self, manifest: &Manifest) -> Result<Vec<DependencyFailure>, CoreError> {
        let own = manifest.id.identity_key();
        let remaining: Vec<VersionKey> = self
            .catalog
            .versions(&manifest.id)?
            .into_iter()
            .filter(|k| !(k.version == manifest.version && k.channel == manifest.channel))
            .collect();

        let mut stranded: Vec<String> = Vec::new();
        for dependent in self.catalog.dependents(&manifest.id)? {
            if dependent.package_id.identity_key() == own {
                continue;
            }
            let edge = Dependency {
                package_id: manifest.id.clone(),
                min_version: dependent.min_version.clone(),
            };
            if !edge.is_satisfied_by(&manifest.version) {
                continue;
            }
            if lowest_satisfying(&remaining, &edge).is_none() {
                stranded.push(format!("{} {}", dependent.package_id, dependent.version));
            }
        }

        if stranded.is_empty() {
            return Ok(Vec::new());
        }
        stranded.sort();
        stranded.dedup();
        Ok(vec![DependencyFailure::StrandedDependents {
            package: manifest.id.clone(),
            version: manifest.version.clone(),
            dependents: stranded,
            last_version: remaining.is_empty(),
        }])
    }
}
