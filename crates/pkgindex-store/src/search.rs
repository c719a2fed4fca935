//! Local search over the normalized tables.
//!
//! Candidates are gathered from the query (run against each query field) and
//! the inclusions, then narrowed by every filter. Manifests are grouped by
//! package id and the result is truncated to `maximum_results`.

use crate::manifest_table::{self, column};
use crate::schema::{version_keys_by_package, FieldSource, PackageProperty, SchemaInterface, IDS};
use crate::{RowId, StoreError};
use pkgindex_schema::{
    MatchType, PackageId, PackageMatchField, PackageMatchFilter, PackageSummary, RequestMatch,
    SearchMatch, SearchRequest, SearchResult,
};
use rusqlite::{params, Connection};
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// Escape `%`, `_` and the escape character itself for a LIKE pattern.
fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Manifest row ids whose `source` values satisfy `request_match`.
fn matching_manifests(
    conn: &Connection,
    source: &FieldSource,
    request_match: &RequestMatch,
) -> Result<Vec<RowId>, StoreError> {
    let (condition, pattern) = match request_match.match_type {
        // Binary even on case-insensitive columns such as package ids.
        MatchType::Exact => (
            "WHERE src.[value] = ?1 COLLATE BINARY",
            Some(request_match.value.clone()),
        ),
        MatchType::CaseInsensitive => (
            "WHERE src.[value] = ?1 COLLATE NOCASE",
            Some(request_match.value.clone()),
        ),
        MatchType::StartsWith => (
            "WHERE src.[value] LIKE ?1 ESCAPE '\\'",
            Some(format!("{}%", escape_like(&request_match.value))),
        ),
        MatchType::Substring => (
            "WHERE src.[value] LIKE ?1 ESCAPE '\\'",
            Some(format!("%{}%", escape_like(&request_match.value))),
        ),
        MatchType::Wildcard => ("", None),
    };
    let sql = format!(
        "SELECT DISTINCT src.[manifest] FROM ({}) AS src {condition} ORDER BY src.[manifest]",
        source.select_sql()
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut out = Vec::new();
    match pattern {
        Some(p) => {
            for row in stmt.query_map(params![p], |row| row.get(0))? {
                out.push(row?);
            }
        }
        None => {
            for row in stmt.query_map([], |row| row.get(0))? {
                out.push(row?);
            }
        }
    }
    Ok(out)
}

fn field_matches<I: SchemaInterface + ?Sized>(
    iface: &I,
    conn: &Connection,
    field: PackageMatchField,
    request_match: &RequestMatch,
) -> Result<Vec<RowId>, StoreError> {
    match iface.field_source(field) {
        Some(source) => matching_manifests(conn, &source, request_match),
        // A field this schema version does not store matches nothing.
        None => Ok(Vec::new()),
    }
}

/// Candidate manifests in discovery order, each with the selector that found it.
#[derive(Default)]
struct Candidates {
    entries: Vec<(RowId, PackageMatchFilter)>,
    seen: HashSet<RowId>,
}

impl Candidates {
    fn extend(&mut self, manifests: Vec<RowId>, criteria: &PackageMatchFilter) {
        for id in manifests {
            if self.seen.insert(id) {
                self.entries.push((id, criteria.clone()));
            }
        }
    }

    fn retain(&mut self, allowed: &HashSet<RowId>) {
        self.entries.retain(|(id, _)| allowed.contains(id));
        self.seen.retain(|id| allowed.contains(id));
    }
}

pub(crate) fn execute<I: SchemaInterface + ?Sized>(
    iface: &I,
    conn: &Connection,
    request: &SearchRequest,
) -> Result<SearchResult, StoreError> {
    let mut candidates = Candidates::default();
    let mut filters = request.filters.as_slice();

    if request.is_for_everything() {
        let everything = PackageMatchFilter::new(PackageMatchField::Id, MatchType::Wildcard, "");
        candidates.extend(manifest_table::all_ids(conn)?, &everything);
    } else if request.query.is_none() && request.inclusions.is_empty() {
        // Only filters: the first one seeds the candidate set.
        if let Some((first, rest)) = filters.split_first() {
            let found = field_matches(iface, conn, first.field, &first.request_match())?;
            candidates.extend(found, first);
            filters = rest;
        }
    } else {
        if let Some(query) = &request.query {
            for field in PackageMatchField::QUERY_FIELDS {
                let found = field_matches(iface, conn, field, query)?;
                let criteria =
                    PackageMatchFilter::new(field, query.match_type, query.value.clone());
                candidates.extend(found, &criteria);
            }
        }
        for inclusion in &request.inclusions {
            let found = field_matches(iface, conn, inclusion.field, &inclusion.request_match())?;
            candidates.extend(found, inclusion);
        }
    }

    for filter in filters {
        let allowed: HashSet<RowId> =
            field_matches(iface, conn, filter.field, &filter.request_match())?
                .into_iter()
                .collect();
        candidates.retain(&allowed);
    }

    // Group manifests by package, keeping the first criteria seen for each.
    let mut packages: Vec<(RowId, PackageMatchFilter)> = Vec::new();
    let mut index: HashMap<RowId, usize> = HashMap::new();
    for (manifest_id, criteria) in candidates.entries {
        let package = manifest_table::get_id_column(conn, manifest_id, column::ID)?
            .ok_or_else(|| StoreError::Corrupt(format!("manifest {manifest_id} has no id")))?;
        if let std::collections::hash_map::Entry::Vacant(e) = index.entry(package) {
            e.insert(packages.len());
            packages.push((package, criteria));
        }
    }

    let mut truncated = false;
    if request.maximum_results > 0 && packages.len() > request.maximum_results {
        packages.truncate(request.maximum_results);
        truncated = true;
    }

    let mut matches = Vec::with_capacity(packages.len());
    for (package, criteria) in packages {
        matches.push(SearchMatch {
            package: summarize(iface, conn, package)?,
            criteria,
        });
    }

    trace!(matches = matches.len(), truncated, "local search complete");
    Ok(SearchResult { matches, truncated })
}

fn summarize<I: SchemaInterface + ?Sized>(
    iface: &I,
    conn: &Connection,
    package: RowId,
) -> Result<PackageSummary, StoreError> {
    let id = IDS
        .get_value_by_id(conn, package)?
        .ok_or_else(|| StoreError::Corrupt(format!("id row {package} is missing")))?;
    let keys = version_keys_by_package(conn, package)?;

    let (name, publisher) = match keys.first() {
        Some((_, latest)) => {
            let name = iface
                .get_property_by_manifest_id(conn, *latest, PackageProperty::Name)?
                .unwrap_or_default();
            let publisher =
                match iface.get_property_by_manifest_id(conn, *latest, PackageProperty::Publisher) {
                    Ok(p) => p,
                    Err(StoreError::UnsupportedProperty(_)) => None,
                    Err(e) => return Err(e),
                };
            (name, publisher)
        }
        None => (String::new(), None),
    };

    Ok(PackageSummary {
        id: PackageId::new(id),
        name,
        publisher,
        versions: keys.into_iter().map(|(key, _)| key).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_like_escapes_wildcards() {
        assert_eq!(escape_like("a%b_c\\d"), "a\\%b\\_c\\\\d");
        assert_eq!(escape_like("plain"), "plain");
    }
}
