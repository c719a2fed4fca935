//! Search requests and results shared by local and remote catalogs.

use crate::types::PackageId;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a value is compared against the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MatchType {
    Exact,
    CaseInsensitive,
    StartsWith,
    Substring,
    /// Matches everything; the value is ignored.
    Wildcard,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Exact => write!(f, "Exact"),
            MatchType::CaseInsensitive => write!(f, "CaseInsensitive"),
            MatchType::StartsWith => write!(f, "StartsWith"),
            MatchType::Substring => write!(f, "Substring"),
            MatchType::Wildcard => write!(f, "Wildcard"),
        }
    }
}

/// Searchable package fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PackageMatchField {
    Id,
    Name,
    Moniker,
    Command,
    Tag,
    PackageFamilyName,
    ProductCode,
    Publisher,
}

impl PackageMatchField {
    /// Fields a free-text query is run against.
    pub const QUERY_FIELDS: [PackageMatchField; 5] = [
        PackageMatchField::Id,
        PackageMatchField::Name,
        PackageMatchField::Moniker,
        PackageMatchField::Command,
        PackageMatchField::Tag,
    ];
}

impl fmt::Display for PackageMatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackageMatchField::Id => "Id",
            PackageMatchField::Name => "Name",
            PackageMatchField::Moniker => "Moniker",
            PackageMatchField::Command => "Command",
            PackageMatchField::Tag => "Tag",
            PackageMatchField::PackageFamilyName => "PackageFamilyName",
            PackageMatchField::ProductCode => "ProductCode",
            PackageMatchField::Publisher => "Publisher",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMatch {
    pub match_type: MatchType,
    pub value: String,
}

impl RequestMatch {
    pub fn new(match_type: MatchType, value: impl Into<String>) -> Self {
        Self {
            match_type,
            value: value.into(),
        }
    }

    /// In-memory evaluation of this match against a candidate value.
    pub fn matches(&self, candidate: &str) -> bool {
        match self.match_type {
            MatchType::Exact => candidate == self.value,
            MatchType::CaseInsensitive => candidate.to_lowercase() == self.value.to_lowercase(),
            MatchType::StartsWith => candidate
                .to_lowercase()
                .starts_with(&self.value.to_lowercase()),
            MatchType::Substring => candidate.to_lowercase().contains(&self.value.to_lowercase()),
            MatchType::Wildcard => true,
        }
    }
}

/// A `(field, match type, value)` selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMatchFilter {
    pub field: PackageMatchField,
    pub match_type: MatchType,
    pub value: String,
}

impl PackageMatchFilter {
    pub fn new(field: PackageMatchField, match_type: MatchType, value: impl Into<String>) -> Self {
        Self {
            field,
            match_type,
            value: value.into(),
        }
    }

    pub fn request_match(&self) -> RequestMatch {
        RequestMatch::new(self.match_type, self.value.clone())
    }
}

impl fmt::Display for PackageMatchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} '{}'", self.field, self.match_type, self.value)
    }
}

/// A catalog query.
///
/// - `query` is a free-text match across [`PackageMatchField::QUERY_FIELDS`].
/// - `inclusions` widen the candidate set (union).
/// - `filters` narrow it (intersection).
/// - `maximum_results == 0` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<RequestMatch>,
    #[serde(default)]
    pub inclusions: Vec<PackageMatchFilter>,
    #[serde(default)]
    pub filters: Vec<PackageMatchFilter>,
    #[serde(default)]
    pub maximum_results: usize,
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// A request with a single filter.
    pub fn by_filter(field: PackageMatchField, match_type: MatchType, value: &str) -> Self {
        Self {
            filters: vec![PackageMatchFilter::new(field, match_type, value)],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_query(mut self, match_type: MatchType, value: &str) -> Self {
        self.query = Some(RequestMatch::new(match_type, value));
        self
    }

    #[must_use]
    pub fn with_inclusion(mut self, filter: PackageMatchFilter) -> Self {
        self.inclusions.push(filter);
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: PackageMatchFilter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn with_limit(mut self, maximum_results: usize) -> Self {
        self.maximum_results = maximum_results;
        self
    }

    /// True when the request selects every package.
    pub fn is_for_everything(&self) -> bool {
        self.query.is_none() && self.inclusions.is_empty() && self.filters.is_empty()
    }
}

/// A `(version, channel)` pair identifying one manifest of a package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionKey {
    pub version: Version,
    #[serde(default)]
    pub channel: String,
}

impl VersionKey {
    pub fn new(version: impl Into<Version>, channel: &str) -> Self {
        Self {
            version: version.into(),
            channel: channel.to_owned(),
        }
    }
}

/// Summary of a matched package with all its known versions, highest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSummary {
    pub id: PackageId,
    pub name: String,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub versions: Vec<VersionKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub package: PackageSummary,
    /// The selector that produced this match.
    pub criteria: PackageMatchFilter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub matches: Vec<SearchMatch>,
    /// The result limit was reached and further matches were dropped.
    /// This is truncation, not failure.
    pub truncated: bool,
}

impl SearchResult {
    /// Cut the result down to `maximum_results` (0 = unlimited), flagging truncation.
    pub fn apply_limit(&mut self, maximum_results: usize) {
        if maximum_results > 0 && self.matches.len() > maximum_results {
            self.matches.truncate(maximum_results);
            self.truncated = true;
        }
    }
}
