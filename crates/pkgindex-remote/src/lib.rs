//! REST catalog client for the package index contract.
//!
//! A remote source is reached through a chain of contract interfaces
//! (`V1_0` → `V1_1` → `V1_7`) mirroring the local schema chain: each version
//! wraps its predecessor, sends its own `Contract-Version` header and may add
//! request validation or authentication. [`RestClient::connect`] reads the
//! source information and instantiates the highest version both sides speak.

pub mod auth;
pub mod client;
pub mod config;
pub mod http;
pub mod information;
pub mod interface;
pub mod wire;

pub use auth::{AccessToken, Authenticator, StaticTokenProvider, TokenProvider};
pub use client::{RestClient, SUPPORTED_CONTRACT_VERSIONS};
pub use config::RemoteConfig;
pub use http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, UreqTransport};
pub use information::{AuthenticationInfo, AuthenticationType, EntraIdInfo, SourceInformation};
pub use interface::{RestContext, RestInterface, V1_0, V1_1, V1_7};

/// Header carrying the negotiated contract version on every request.
pub const CONTRACT_VERSION_HEADER: &str = "Contract-Version";

/// Header carrying the paging token of a follow-up search request.
pub const CONTINUATION_TOKEN_HEADER: &str = "ContinuationToken";

pub const AUTHORIZATION_HEADER: &str = "Authorization";

pub const INFORMATION_ENDPOINT: &str = "information";
pub const MANIFEST_SEARCH_ENDPOINT: &str = "manifestSearch";
pub const PACKAGE_MANIFESTS_ENDPOINT: &str = "packageManifests";

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote config error: {0}")]
    Config(String),
    #[error("remote contract error: {0}")]
    Contract(String),
    #[error("request not supported by source: {0}")]
    UnsupportedRequest(String),
    #[error("authentication type not supported: {0}")]
    AuthenticationTypeNotSupported(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("no common contract version (server supports: {0})")]
    UnsupportedContractVersion(String),
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
