//! One search contract over local and remote catalogs.

use crate::engine::IndexEngine;
use crate::CoreError;
use pkgindex_remote::RestClient;
use pkgindex_schema::{SearchMatch, SearchRequest, SearchResult};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A searchable source of packages.
pub trait Catalog {
    /// Name used in diagnostics.
    fn identifier(&self) -> String;

    fn search(&self, request: &SearchRequest) -> Result<SearchResult, CoreError>;
}

impl Catalog for IndexEngine {
    fn identifier(&self) -> String {
        self.index()
            .path()
            .map_or_else(|| "memory".to_owned(), |p| p.display().to_string())
    }

    fn search(&self, request: &SearchRequest) -> Result<SearchResult, CoreError> {
        IndexEngine::search(self, request)
    }
}

impl Catalog for RestClient {
    fn identifier(&self) -> String {
        self.source_identifier().to_owned()
    }

    fn search(&self, request: &SearchRequest) -> Result<SearchResult, CoreError> {
        Ok(RestClient::search(self, request)?)
    }
}

/// How far a catalog's entries are trusted when sources disagree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrustLevel {
    Untrusted,
    #[default]
    Standard,
    Trusted,
}

pub struct CatalogEntry {
    pub catalog: Box<dyn Catalog>,
    pub trust: TrustLevel,
}

/// Catalogs searched together, in priority order.
#[derive(Default)]
pub struct CompositeCatalog {
    entries: Vec<CatalogEntry>,
}

impl CompositeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a catalog after every catalog already attached.
    pub fn add(&mut self, catalog: Box<dyn Catalog>, trust: TrustLevel) {
        self.entries.push(CatalogEntry { catalog, trust });
    }

    #[must_use]
    pub fn with(mut self, catalog: Box<dyn Catalog>, trust: TrustLevel) -> Self {
        self.add(catalog, trust);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Search every catalog and merge the results.
    ///
    /// A package found in several catalogs is reported once, from the most
    /// trusted one; equal trust keeps the higher priority catalog. Matches
    /// are ordered by catalog priority, then by each catalog's own order.
    /// The first failing catalog fails the whole search.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResult, CoreError> {
        let mut found: Vec<(usize, SearchMatch)> = Vec::new();
        let mut truncated = false;
        for (priority, entry) in self.entries.iter().enumerate() {
            let result = entry.catalog.search(request)?;
            debug!(
                catalog = %entry.catalog.identifier(),
                matches = result.matches.len(),
                truncated = result.truncated,
                "catalog searched"
            );
            truncated |= result.truncated;
            found.extend(result.matches.into_iter().map(|m| (priority, m)));
        }

        // Winning catalog per package identity.
        let mut winners: HashMap<String, usize> = HashMap::new();
        for (priority, m) in &found {
            let trust = self.entries[*priority].trust;
            winners
                .entry(m.package.id.identity_key())
                .and_modify(|best| {
                    if trust > self.entries[*best].trust {
                        *best = *priority;
                    }
                })
                .or_insert(*priority);
        }

        let mut emitted: HashSet<String> = HashSet::new();
        let mut matches = Vec::new();
        for (priority, m) in found {
            let key = m.package.id.identity_key();
            if winners.get(&key) == Some(&priority) && emitted.insert(key) {
                matches.push(m);
            }
        }

        let mut result = SearchResult { matches, truncated };
        result.apply_limit(request.maximum_results);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkgindex_schema::{
        Manifest, MatchType, PackageId, PackageMatchFilter, PackageMatchField, PackageSummary,
        VersionKey,
    };

    /// A catalog answering every search with a fixed result.
    struct FixedCatalog {
        name: &'static str,
        packages: Vec<(&'static str, &'static str)>,
        truncated: bool,
    }

    impl Catalog for FixedCatalog {
        fn identifier(&self) -> String {
            self.name.to_owned()
        }

        fn search(&self, _request: &SearchRequest) -> Result<SearchResult, CoreError> {
            let matches = self
                .packages
                .iter()
                .map(|(id, version)| SearchMatch {
                    package: PackageSummary {
                        id: PackageId::new(*id),
                        name: format!("{id} from {}", self.name),
                        publisher: None,
                        versions: vec![VersionKey::new(*version, "")],
                    },
                    criteria: PackageMatchFilter::new(PackageMatchField::Id, MatchType::Wildcard, ""),
                })
                .collect();
            Ok(SearchResult {
                matches,
                truncated: self.truncated,
            })
        }
    }

    struct FailingCatalog;

    impl Catalog for FailingCatalog {
        fn identifier(&self) -> String {
            "failing".to_owned()
        }

        fn search(&self, _request: &SearchRequest) -> Result<SearchResult, CoreError> {
            Err(CoreError::Remote(pkgindex_remote::RemoteError::Http(
                "HTTP 500".to_owned(),
            )))
        }
    }

    fn fixed(
        name: &'static str,
        packages: Vec<(&'static str, &'static str)>,
        truncated: bool,
    ) -> Box<dyn Catalog> {
        Box::new(FixedCatalog {
            name,
            packages,
            truncated,
        })
    }

    fn ids(result: &SearchResult) -> Vec<&str> {
        result.matches.iter().map(|m| m.package.id.as_str()).collect()
    }

    #[test]
    fn local_entry_wins_and_truncation_is_ored() {
        let mut engine = IndexEngine::create_in_memory(crate::EngineConfig::default()).unwrap();
        engine
            .add_manifest(&Manifest::new("Contoso.App", "1.0", "Local app"), None)
            .unwrap();

        let composite = CompositeCatalog::new()
            .with(Box::new(engine), TrustLevel::Trusted)
            .with(
                fixed("remote", vec![("contoso.app", "9.0"), ("Fabrikam.Tool", "1.0")], true),
                TrustLevel::Standard,
            );
        let result = composite.search(&SearchRequest::new()).unwrap();
        assert_eq!(ids(&result), vec!["Contoso.App", "Fabrikam.Tool"]);
        assert_eq!(result.matches[0].package.name, "Local app");
        assert!(result.truncated);
    }

    #[test]
    fn higher_trust_wins_over_priority() {
        let composite = CompositeCatalog::new()
            .with(fixed("first", vec![("A", "1.0"), ("B", "1.0")], false), TrustLevel::Untrusted)
            .with(fixed("second", vec![("C", "1.0"), ("B", "2.0")], false), TrustLevel::Trusted);
        let result = composite.search(&SearchRequest::new()).unwrap();
        assert_eq!(ids(&result), vec!["A", "C", "B"]);
        assert_eq!(result.matches[2].package.name, "B from second");
        assert!(!result.truncated);
    }

    #[test]
    fn equal_trust_keeps_priority_order() {
        let composite = CompositeCatalog::new()
            .with(fixed("first", vec![("B", "1.0")], false), TrustLevel::Standard)
            .with(fixed("second", vec![("A", "1.0"), ("B", "2.0")], false), TrustLevel::Standard);
        let result = composite.search(&SearchRequest::new()).unwrap();
        assert_eq!(ids(&result), vec!["B", "A"]);
        assert_eq!(result.matches[0].package.name, "B from first");
    }

    #[test]
    fn limit_applies_to_merged_result() {
        let composite = CompositeCatalog::new()
            .with(fixed("first", vec![("A", "1.0")], false), TrustLevel::Standard)
            .with(fixed("second", vec![("B", "1.0"), ("C", "1.0")], false), TrustLevel::Standard);
        let result = composite
            .search(&SearchRequest::new().with_limit(2))
            .unwrap();
        assert_eq!(ids(&result), vec!["A", "B"]);
        assert!(result.truncated);
    }

    #[test]
    fn failing_catalog_fails_search() {
        let composite = CompositeCatalog::new()
            .with(fixed("first", vec![("A", "1.0")], false), TrustLevel::Standard)
            .with(Box::new(FailingCatalog), TrustLevel::Standard);
        assert!(matches!(
            composite.search(&SearchRequest::new()),
            Err(CoreError::Remote(_))
        ));
        assert_eq!(composite.len(), 2);
        assert_eq!(composite.entries()[1].catalog.identifier(), "failing");
    }
}
