//! Reference HTTP server for the package index REST contract.
//!
//! Serves a set of manifests over `GET /information`, `POST /manifestSearch`
//! and `GET /packageManifests/{id}`. Search is answered by an in-memory
//! [`PackageIndex`], so the server and a local catalog agree on matching.
//! Manifests are loaded from a directory of JSON documents, each holding one
//! manifest or an array of them.
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

use pkgindex_remote::wire::{
    self, ErrorBody, InformationResponseBody, ManifestsResponseBody, SearchRequestBody,
    SearchResponseBody, WireInformation, WirePackage, WirePackageManifests, WireVersionSummary,
};
use pkgindex_remote::{
    AuthenticationInfo, SourceInformation, CONTINUATION_TOKEN_HEADER, CONTRACT_VERSION_HEADER,
    INFORMATION_ENDPOINT, MANIFEST_SEARCH_ENDPOINT, PACKAGE_MANIFESTS_ENDPOINT,
    SUPPORTED_CONTRACT_VERSIONS,
};
use pkgindex_schema::{Manifest, PackageId, SearchMatch, Version};
use pkgindex_store::{PackageIndex, StoreError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid manifest document {path}: {message}")]
    InvalidDocument { path: String, message: String },
    #[error("index error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to bind {addr}: {message}")]
    Bind { addr: String, message: String },
}

/// Behaviour knobs of a served source.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub source_identifier: String,
    /// Packages per search page; further pages are reached by continuation token.
    pub page_size: usize,
    /// When set, search and manifest routes require `Authorization: Bearer <token>`.
    pub bearer_token: Option<String>,
    /// Resource advertised to clients when a token is required.
    pub resource: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            source_identifier: "pkgindex.reference".to_owned(),
            page_size: 50,
            bearer_token: None,
            resource: "pkgindex".to_owned(),
        }
    }
}

impl ServerConfig {
    pub fn information(&self) -> SourceInformation {
        SourceInformation {
            source_identifier: self.source_identifier.clone(),
            server_supported_versions: SUPPORTED_CONTRACT_VERSIONS.to_vec(),
            authentication: if self.bearer_token.is_some() {
                AuthenticationInfo::entra_id(&self.resource)
            } else {
                AuthenticationInfo::default()
            },
            ..SourceInformation::default()
        }
    }
}

/// The manifests served, with an index answering searches.
pub struct Repository {
    index: Mutex<PackageIndex>,
    packages: BTreeMap<String, Vec<Manifest>>,
}

impl Repository {
    pub fn from_manifests(manifests: Vec<Manifest>) -> Result<Self, ServerError> {
        let mut index = PackageIndex::create_in_memory(None)?;
        let mut packages: BTreeMap<String, Vec<Manifest>> = BTreeMap::new();
        for manifest in manifests {
            index.add_manifest(&manifest, None)?;
            packages
                .entry(manifest.id.identity_key())
                .or_default()
                .push(manifest);
        }
        for versions in packages.values_mut() {
            versions.sort_by(|a, b| b.version.cmp(&a.version));
        }
        Ok(Self {
            index: Mutex::new(index),
            packages,
        })
    }

    /// Load every `*.json` file of `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self, ServerError> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        let mut manifests = Vec::new();
        for path in &files {
            let content = fs::read_to_string(path)?;
            let invalid = |message: String| ServerError::InvalidDocument {
                path: path.display().to_string(),
                message,
            };
            let value: serde_json::Value =
                serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
            let parsed: Vec<Manifest> = if value.is_array() {
                serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?
            } else {
                vec![serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?]
            };
            for manifest in &parsed {
                manifest.validate().map_err(|e| invalid(e.to_string()))?;
            }
            manifests.extend(parsed);
        }
        info!("loaded {} manifests from {}", manifests.len(), dir.display());
        Self::from_manifests(manifests)
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    pub fn manifests(&self, package_id: &str) -> &[Manifest] {
        self.packages
            .get(&PackageId::new(package_id).identity_key())
            .map_or(&[], Vec::as_slice)
    }
}

/// Shared state of a running server.
pub struct ServerState {
    pub repository: Repository,
    pub config: ServerConfig,
}

fn json_header() -> Option<Header> {
    Header::from_bytes("Content-Type", "application/json").ok()
}

fn respond_json(req: Request, code: u16, json: Vec<u8>) {
    let mut response = Response::from_data(json).with_status_code(StatusCode(code));
    if let Some(header) = json_header() {
        response.add_header(header);
    }
    let _ = req.respond(response);
}

fn respond_value<T: serde::Serialize>(req: Request, value: &T) {
    match serde_json::to_vec(value) {
        Ok(json) => respond_json(req, 200, json),
        Err(e) => respond_err(req, 500, &format!("serialization error: {e}")),
    }
}

fn respond_err(req: Request, code: u16, msg: &str) {
    let body = ErrorBody {
        code: code.to_string(),
        message: msg.to_owned(),
    };
    respond_json(req, code, serde_json::to_vec(&body).unwrap_or_default());
}

fn read_body(req: &mut Request) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    if req.as_reader().read_to_end(&mut body).is_ok() {
        Some(body)
    } else {
        None
    }
}

fn header_value(req: &Request, name: &'static str) -> Option<String> {
    req.headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str().to_owned())
}

/// Decode `%XX` escapes and `+` of a URL component.
pub fn decode_component(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let hex = |b: u8| (b as char).to_digit(16);
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => match (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                (Some(hi), Some(lo)) => {
                    out.push(u8::try_from(hi * 16 + lo).unwrap_or(b'?'));
                    i += 2;
                }
                _ => out.push(b'%'),
            },
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Split `/path?k=v&k2=v2` into the path and decoded query pairs.
pub fn split_url(url: &str) -> (&str, Vec<(String, String)>) {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let params = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let (k, v) = p.split_once('=').unwrap_or((p, ""));
            (decode_component(k), decode_component(v))
        })
        .collect();
    (path, params)
}

fn authorized(state: &ServerState, req: &Request) -> bool {
    match &state.config.bearer_token {
        None => true,
        Some(token) => header_value(req, "Authorization")
            .is_some_and(|v| v == format!("Bearer {token}")),
    }
}

fn to_wire_package(m: &SearchMatch) -> WirePackage {
    WirePackage {
        package_identifier: m.package.id.to_string(),
        package_name: m.package.name.clone(),
        publisher: m.package.publisher.clone(),
        versions: m
            .package
            .versions
            .iter()
            .map(|k| WireVersionSummary {
                package_version: k.version.to_string(),
                channel: (!k.channel.is_empty()).then(|| k.channel.clone()),
                package_family_names: Vec::new(),
                product_codes: Vec::new(),
            })
            .collect(),
    }
}

fn handle_information(state: &ServerState, req: Request) {
    let body = InformationResponseBody {
        data: WireInformation::from(&state.config.information()),
    };
    respond_value(req, &body);
}

fn handle_search(state: &ServerState, mut req: Request) {
    let Some(body) = read_body(&mut req) else {
        respond_err(req, 500, "read error");
        return;
    };
    let body: SearchRequestBody = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(e) => {
            respond_err(req, 400, &format!("invalid search request: {e}"));
            return;
        }
    };
    let offset = match header_value(&req, CONTINUATION_TOKEN_HEADER) {
        None => 0,
        Some(token) => match token.parse::<usize>() {
            Ok(o) => o,
            Err(_) => {
                respond_err(req, 400, "invalid continuation token");
                return;
            }
        },
    };

    // One match past the limit lets the client see that the limit cut the result.
    let mut request = body.to_request();
    if request.maximum_results > 0 {
        request.maximum_results += 1;
    }
    let result = match state.repository.index.lock() {
        Ok(index) => index.search(&request),
        Err(_) => {
            respond_err(req, 500, "index lock poisoned");
            return;
        }
    };
    let result = match result {
        Ok(r) => r,
        Err(e) => {
            warn!("search failed: {e}");
            respond_err(req, 500, &e.to_string());
            return;
        }
    };

    let page_size = state.config.page_size.max(1);
    let page: Vec<WirePackage> = result
        .matches
        .iter()
        .skip(offset)
        .take(page_size)
        .map(to_wire_package)
        .collect();
    if page.is_empty() {
        respond_err(req, 404, "no packages found");
        return;
    }
    let next = offset + page.len();
    let response = SearchResponseBody {
        data: page,
        continuation_token: (next < result.matches.len()).then(|| next.to_string()),
        ..SearchResponseBody::default()
    };
    debug!(
        "search page at {offset}: {} packages, more: {}",
        response.data.len(),
        response.continuation_token.is_some()
    );
    respond_value(req, &response);
}

fn handle_manifests(state: &ServerState, req: Request, package_id: &str, params: &[(String, String)]) {
    let param = |name: &str| {
        params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    };
    let version = param("Version").map(Version::new);
    let channel = param("Channel");

    let selected: Vec<Manifest> = state
        .repository
        .manifests(package_id)
        .iter()
        .filter(|m| version.as_ref().map_or(true, |v| m.version == *v))
        .filter(|m| channel.map_or(true, |c| m.channel.eq_ignore_ascii_case(c)))
        .cloned()
        .collect();
    let Some(first) = selected.first() else {
        respond_err(req, 404, &format!("no manifests for {package_id}"));
        return;
    };
    let response = ManifestsResponseBody {
        data: Some(WirePackageManifests::from_manifests(&first.id, &selected)),
        ..ManifestsResponseBody::default()
    };
    respond_value(req, &response);
}

/// Handle a single HTTP request, dispatching to the appropriate route handler.
pub fn handle_request(state: &ServerState, req: Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");

    let contract = header_value(&req, CONTRACT_VERSION_HEADER)
        .as_deref()
        .and_then(wire::parse_contract_version);
    match contract {
        Some(v) if v.major == 1 => {}
        Some(v) => {
            respond_err(req, 400, &format!("unsupported contract version {v}"));
            return;
        }
        None => {
            respond_err(req, 400, "missing or invalid Contract-Version header");
            return;
        }
    }

    let (path, params) = split_url(&url);
    let route = path.trim_start_matches('/');
    if route == INFORMATION_ENDPOINT && method == Method::Get {
        handle_information(state, req);
        return;
    }

    if !authorized(state, &req) {
        respond_err(req, 401, "unauthorized");
        return;
    }

    if route == MANIFEST_SEARCH_ENDPOINT {
        if method == Method::Post {
            handle_search(state, req);
        } else {
            respond_err(req, 405, "method not allowed");
        }
    } else if let Some(id) = route
        .strip_prefix(PACKAGE_MANIFESTS_ENDPOINT)
        .and_then(|r| r.strip_prefix('/'))
        .filter(|id| !id.is_empty())
    {
        if method == Method::Get {
            handle_manifests(state, req, &decode_component(id), &params);
        } else {
            respond_err(req, 405, "method not allowed");
        }
    } else {
        respond_err(req, 404, "not found");
    }
}

/// Start the server loop, blocking the current thread.
pub fn run_server(state: &Arc<ServerState>, addr: &str) -> Result<(), ServerError> {
    let server = Server::http(addr).map_err(|e| ServerError::Bind {
        addr: addr.to_owned(),
        message: e.to_string(),
    })?;
    for request in server.incoming_requests() {
        handle_request(state, request);
    }
    Ok(())
}

/// A test helper that starts a server on a random port in a background thread.
///
/// Drop the `TestServer` to stop the server (via `Server::unblock`).
pub struct TestServer {
    pub url: String,
    pub port: u16,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    /// Serve `manifests` on `127.0.0.1:0`.
    pub fn start(manifests: Vec<Manifest>, config: ServerConfig) -> Self {
        let repository = Repository::from_manifests(manifests).expect("invalid test manifests");
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let state = Arc::new(ServerState { repository, config });
        let srv = Arc::clone(&server);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                handle_request(&state, request);
            }
        });

        Self {
            url,
            port,
            server,
            _handle: handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str, version: &str) -> Manifest {
        let mut m = Manifest::new(id, version, &format!("{id} app"));
        m.publisher = Some("Contoso".to_owned());
        m
    }

    #[test]
    fn split_url_decodes_query() {
        let (path, params) = split_url("/packageManifests/Foo.Bar?Version=1.0%2Bbuild&Channel=beta");
        assert_eq!(path, "/packageManifests/Foo.Bar");
        assert_eq!(
            params,
            vec![
                ("Version".to_owned(), "1.0+build".to_owned()),
                ("Channel".to_owned(), "beta".to_owned())
            ]
        );
        assert_eq!(split_url("/information").1, Vec::new());
    }

    #[test]
    fn decode_component_keeps_bad_escapes() {
        assert_eq!(decode_component("a%20b"), "a b");
        assert_eq!(decode_component("100%"), "100%");
        assert_eq!(decode_component("%zz"), "%zz");
    }

    #[test]
    fn repository_groups_by_identity_key() {
        let repo = Repository::from_manifests(vec![
            manifest("Contoso.App", "1.0"),
            manifest("Contoso.App", "2.0"),
            manifest("Fabrikam.Tool", "0.1"),
        ])
        .unwrap();
        assert_eq!(repo.package_count(), 2);
        let versions = repo.manifests("contoso.app");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version.as_str(), "2.0");
        assert!(repo.manifests("missing").is_empty());
    }

    #[test]
    fn duplicate_manifests_are_rejected() {
        let result = Repository::from_manifests(vec![
            manifest("Contoso.App", "1.0"),
            manifest("Contoso.App", "1.0"),
        ]);
        assert!(matches!(result, Err(ServerError::Store(_))));

        let result = Repository::from_manifests(vec![
            manifest("Contoso.App", "1.0"),
            manifest("CONTOSO.APP", "1.0"),
        ]);
        assert!(matches!(result, Err(ServerError::Store(_))));
    }

    #[test]
    fn load_dir_reads_single_and_array_documents() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.json"),
            serde_json::to_string(&manifest("A", "1.0")).unwrap(),
        )
        .unwrap();
        fs::write(
            dir.path().join("b.json"),
            serde_json::to_string(&vec![manifest("B", "1.0"), manifest("B", "2.0")]).unwrap(),
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let repo = Repository::load_dir(dir.path()).unwrap();
        assert_eq!(repo.package_count(), 2);
        assert_eq!(repo.manifests("B").len(), 2);
    }

    #[test]
    fn load_dir_rejects_invalid_documents() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.json"), r#"{"id": "A"}"#).unwrap();
        assert!(matches!(
            Repository::load_dir(dir.path()),
            Err(ServerError::InvalidDocument { .. })
        ));
    }

    #[test]
    fn information_advertises_authentication_only_with_token() {
        let open = ServerConfig::default().information();
        assert_eq!(open.authentication, AuthenticationInfo::default());
        assert_eq!(open.server_supported_versions, SUPPORTED_CONTRACT_VERSIONS.to_vec());

        let locked = ServerConfig {
            bearer_token: Some("t".to_owned()),
            ..ServerConfig::default()
        }
        .information();
        assert_eq!(locked.authentication, AuthenticationInfo::entra_id("pkgindex"));
    }
}
