use super::{parse, RestContext, RestInterface, CHANNEL_QUERY_PARAMETER, VERSION_QUERY_PARAMETER};
use crate::http::HttpRequest;
use crate::http::HttpTransport;
use crate::wire::{ManifestsResponseBody, SearchResponseBody};
use crate::{
    RemoteError, CONTINUATION_TOKEN_HEADER, MANIFEST_SEARCH_ENDPOINT, PACKAGE_MANIFESTS_ENDPOINT,
};
use pkgindex_schema::{
    Manifest, MatchType, PackageMatchField, PackageMatchFilter, PackageSummary, SchemaVersion,
    SearchMatch, SearchRequest, SearchResult, Version, VersionKey,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on follow-up pages when the request sets no limit.
const MAX_SEARCH_PAGES: usize = 100;

/// Contract 1.0: search, manifest retrieval, no validation, no authentication.
#[derive(Debug)]
pub struct V1_0 {
    context: RestContext,
}

impl V1_0 {
    pub const VERSION: SchemaVersion = SchemaVersion { major: 1, minor: 0 };

    pub fn new(base_url: &str, transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_context(RestContext::new(base_url, transport, Self::VERSION))
    }

    pub(crate) fn with_context(context: RestContext) -> Self {
        Self { context }
    }
}

impl RestInterface for V1_0 {
    fn version(&self) -> SchemaVersion {
        Self::VERSION
    }

    fn context(&self) -> &RestContext {
        &self.context
    }
}

/// The selector reported for every match of a remote search.
fn request_criteria(request: &SearchRequest) -> PackageMatchFilter {
    if let Some(f) = request.filters.first().or_else(|| request.inclusions.first()) {
        return f.clone();
    }
    match &request.query {
        Some(q) => PackageMatchFilter::new(PackageMatchField::Id, q.match_type, q.value.clone()),
        None => PackageMatchFilter::new(PackageMatchField::Id, MatchType::Wildcard, ""),
    }
}

pub(super) fn paged_search<I: RestInterface + ?Sized>(
    iface: &I,
    request: &SearchRequest,
) -> Result<SearchResult, RemoteError> {
    let body = serde_json::to_vec(&iface.search_body(request)?)?;
    let criteria = request_criteria(request);
    let limit = request.maximum_results;
    let ctx = iface.context();

    let mut matches = Vec::new();
    let mut truncated = false;
    let mut token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let mut headers = iface.authorization_headers()?;
        if let Some(t) = &token {
            headers.push((CONTINUATION_TOKEN_HEADER.to_owned(), t.clone()));
        }
        let request = HttpRequest::post(ctx.url(MANIFEST_SEARCH_ENDPOINT), body.clone());
        let Some(bytes) = ctx.send(request, headers)? else {
            break;
        };
        let page: SearchResponseBody = parse(&bytes, "search")?;
        iface.check_search_response(&page)?;
        pages += 1;

        for package in &page.data {
            if package.versions.is_empty() {
                return Err(RemoteError::Contract(format!(
                    "package {} has no versions",
                    package.package_identifier
                )));
            }
            if limit > 0 && matches.len() >= limit {
                truncated = true;
                break;
            }
            matches.push(SearchMatch {
                package: package.to_summary(),
                criteria: criteria.clone(),
            });
        }

        token = page.continuation_token.filter(|t| !t.is_empty());
        if truncated || token.is_none() {
            break;
        }
        if (limit > 0 && matches.len() >= limit) || pages >= MAX_SEARCH_PAGES {
            if pages >= MAX_SEARCH_PAGES {
                warn!("stopping remote search after {pages} pages");
            }
            truncated = true;
            break;
        }
    }

    debug!(matches = matches.len(), truncated, pages, "remote search complete");
    Ok(SearchResult { matches, truncated })
}

pub(super) fn optimized_search<I: RestInterface + ?Sized>(
    iface: &I,
    request: &SearchRequest,
) -> Result<SearchResult, RemoteError> {
    let filter = &request.filters[0];
    let manifests = iface.get_manifests(&filter.value, Vec::new())?;
    let Some(first) = manifests.first() else {
        return Ok(SearchResult::default());
    };

    let mut versions: Vec<VersionKey> = manifests
        .iter()
        .map(|m| VersionKey::new(m.version.clone(), &m.channel))
        .collect();
    versions.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| a.channel.cmp(&b.channel)));

    let package = PackageSummary {
        id: first.id.clone(),
        name: first.name.clone(),
        publisher: first.publisher.clone(),
        versions,
    };
    Ok(SearchResult {
        matches: vec![SearchMatch {
            package,
            criteria: filter.clone(),
        }],
        truncated: false,
    })
}

pub(super) fn get_manifests<I: RestInterface + ?Sized>(
    iface: &I,
    package_id: &str,
    params: Vec<(String, String)>,
) -> Result<Vec<Manifest>, RemoteError> {
    let ctx = iface.context();
    let mut request = HttpRequest::get(ctx.url(&format!("{PACKAGE_MANIFESTS_ENDPOINT}/{package_id}")));
    request.query = iface.query_parameters(params)?;

    let Some(bytes) = ctx.send(request, iface.authorization_headers()?)? else {
        return Ok(Vec::new());
    };
    let response: ManifestsResponseBody = parse(&bytes, "manifest")?;
    iface.check_manifests_response(&response)?;
    match response.data {
        Some(data) => data.to_manifests(),
        None => Ok(Vec::new()),
    }
}

pub(super) fn get_manifest_by_version<I: RestInterface + ?Sized>(
    iface: &I,
    package_id: &str,
    version: &str,
    channel: &str,
) -> Result<Option<Manifest>, RemoteError> {
    let mut params = Vec::new();
    if !version.is_empty() {
        params.push((VERSION_QUERY_PARAMETER.to_owned(), version.to_owned()));
    }
    if !channel.is_empty() {
        params.push((CHANNEL_QUERY_PARAMETER.to_owned(), channel.to_owned()));
    }

    let wanted = Version::new(version);
    let found = iface
        .get_manifests(package_id, params)?
        .into_iter()
        .filter(|m| m.channel.eq_ignore_ascii_case(channel))
        .filter(|m| wanted.is_empty() || m.version == wanted)
        .max_by(|a, b| a.version.cmp(&b.version));
    Ok(found)
}
