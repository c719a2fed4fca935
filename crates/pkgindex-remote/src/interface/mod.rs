//! REST contract interface chain.
//!
//! Each contract version is a struct implementing [`RestInterface`]. A newer
//! version wraps the previous one and overrides only the hooks it changes:
//! request body validation, query parameter validation, response checks and
//! authentication headers. The search and manifest algorithms themselves are
//! provided methods shared by every version.

mod v1_0;
mod v1_1;
mod v1_7;

pub use v1_0::V1_0;
pub use v1_1::V1_1;
pub use v1_7::V1_7;

use crate::http::{HttpRequest, HttpTransport};
use crate::information::SourceInformation;
use crate::wire::{self, ErrorBody, ManifestsResponseBody, SearchRequestBody, SearchResponseBody};
use crate::{RemoteError, CONTRACT_VERSION_HEADER};
use pkgindex_schema::{Manifest, MatchType, PackageMatchField, SchemaVersion, SearchRequest, SearchResult};
use std::sync::Arc;
use tracing::debug;

/// Query parameter naming the package version of a manifest request.
pub const VERSION_QUERY_PARAMETER: &str = "Version";
/// Query parameter naming the channel of a manifest request.
pub const CHANNEL_QUERY_PARAMETER: &str = "Channel";

/// Endpoint, transport and the headers every request of a connection carries.
#[derive(Clone)]
pub struct RestContext {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    headers: Vec<(String, String)>,
}

impl std::fmt::Debug for RestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestContext")
            .field("base_url", &self.base_url)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl RestContext {
    pub fn new(base_url: &str, transport: Arc<dyn HttpTransport>, version: SchemaVersion) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            transport,
            headers: vec![(
                CONTRACT_VERSION_HEADER.to_owned(),
                wire::contract_version_string(version),
            )],
        }
    }

    /// Add caller supplied headers. The contract version header cannot be
    /// overridden.
    #[must_use]
    pub fn with_headers<'a>(mut self, headers: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (k, v) in headers {
            if k.eq_ignore_ascii_case(CONTRACT_VERSION_HEADER) {
                continue;
            }
            self.headers.push((k.clone(), v.clone()));
        }
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// Execute a request and interpret its status.
    ///
    /// `Ok(None)` means the server answered "nothing here": 204, an empty
    /// body, or 404 with a JSON error document.
    pub fn send(&self, mut request: HttpRequest, extra_headers: Vec<(String, String)>) -> Result<Option<Vec<u8>>, RemoteError> {
        let mut headers = self.headers.clone();
        headers.extend(extra_headers);
        request.headers = headers;

        let response = self.transport.execute(&request)?;
        debug!("{:?} {} -> {}", request.method, request.url, response.status);
        match response.status {
            200..=299 => {
                if response.status == 204 || response.body.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(response.body))
                }
            }
            404 if response.body.iter().all(u8::is_ascii_whitespace) => Ok(None),
            404 => match serde_json::from_slice::<ErrorBody>(&response.body) {
                Ok(err) => {
                    debug!("no results: {} {}", err.code, err.message);
                    Ok(None)
                }
                Err(_) => Err(RemoteError::NotFound(request.url)),
            },
            401 | 403 => Err(RemoteError::Authentication(format!(
                "HTTP {} for {}",
                response.status, request.url
            ))),
            code => Err(RemoteError::Http(format!("HTTP {code} for {}", request.url))),
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T, RemoteError> {
    serde_json::from_slice(bytes)
        .map_err(|e| RemoteError::Contract(format!("malformed {what} response: {e}")))
}

/// One version of the REST contract.
pub trait RestInterface: Send + Sync {
    fn version(&self) -> SchemaVersion;

    fn context(&self) -> &RestContext;

    /// Source information the interface was built from, from 1.1 on.
    fn information(&self) -> Option<&SourceInformation> {
        None
    }

    /// Build the search body, rejecting requests the source cannot serve.
    fn search_body(&self, request: &SearchRequest) -> Result<SearchRequestBody, RemoteError> {
        Ok(SearchRequestBody::from(request))
    }

    fn check_search_response(&self, _response: &SearchResponseBody) -> Result<(), RemoteError> {
        Ok(())
    }

    /// Validate the query parameters of a manifest request.
    fn query_parameters(
        &self,
        params: Vec<(String, String)>,
    ) -> Result<Vec<(String, String)>, RemoteError> {
        Ok(params)
    }

    fn check_manifests_response(
        &self,
        _response: &ManifestsResponseBody,
    ) -> Result<(), RemoteError> {
        Ok(())
    }

    /// Headers proving the caller's identity. Empty before 1.7.
    fn authorization_headers(&self) -> Result<Vec<(String, String)>, RemoteError> {
        Ok(Vec::new())
    }

    /// True for a lone exact (or case-insensitive) package id filter, which
    /// is served by a single manifest fetch instead of a search.
    fn meets_optimized_search_criteria(&self, request: &SearchRequest) -> bool {
        request.query.is_none()
            && request.inclusions.is_empty()
            && request.filters.len() == 1
            && request.filters[0].field == PackageMatchField::Id
            && matches!(
                request.filters[0].match_type,
                MatchType::Exact | MatchType::CaseInsensitive
            )
    }

    fn search(&self, request: &SearchRequest) -> Result<SearchResult, RemoteError> {
        if self.meets_optimized_search_criteria(request) {
            v1_0::optimized_search(self, request)
        } else {
            v1_0::paged_search(self, request)
        }
    }

    /// Every manifest of a package, optionally narrowed by query parameters.
    fn get_manifests(
        &self,
        package_id: &str,
        params: Vec<(String, String)>,
    ) -> Result<Vec<Manifest>, RemoteError> {
        v1_0::get_manifests(self, package_id, params)
    }

    /// The manifest of one version and channel. An empty version selects the
    /// highest available.
    fn get_manifest_by_version(
        &self,
        package_id: &str,
        version: &str,
        channel: &str,
    ) -> Result<Option<Manifest>, RemoteError> {
        v1_0::get_manifest_by_version(self, package_id, version, channel)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport standing in for a REST endpoint.

    use crate::http::{HttpRequest, HttpResponse, HttpTransport};
    use crate::RemoteError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        responses: Mutex<VecDeque<HttpResponse>>,
        pub(crate) requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(responses: Vec<(u16, &str)>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|(status, body)| HttpResponse::new(status, body))
                        .collect(),
                ),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, RemoteError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| RemoteError::Http("no scripted response left".to_owned()))
        }
    }
}
