use crate::auth::{StaticTokenProvider, TokenProvider};
use crate::config::RemoteConfig;
use crate::http::{HttpRequest, HttpTransport, UreqTransport};
use crate::information::SourceInformation;
use crate::interface::{RestContext, RestInterface, V1_0, V1_1, V1_7};
use crate::wire::{self, InformationResponseBody};
use crate::{RemoteError, INFORMATION_ENDPOINT};
use pkgindex_schema::{Manifest, SchemaVersion, SearchRequest, SearchResult};
use std::sync::Arc;
use tracing::info;

/// Contract versions this client implements, oldest first.
pub const SUPPORTED_CONTRACT_VERSIONS: [SchemaVersion; 3] =
    [V1_0::VERSION, V1_1::VERSION, V1_7::VERSION];

/// A connection to one REST source at the negotiated contract version.
pub struct RestClient {
    interface: Box<dyn RestInterface>,
    information: SourceInformation,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("version", &self.interface.version())
            .field("source", &self.information.source_identifier)
            .finish()
    }
}

impl RestClient {
    /// Connect over HTTP, authenticating with the config's static token if
    /// the source asks for it.
    pub fn connect_http(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let provider = config
            .auth_token
            .as_deref()
            .map(|t| Arc::new(StaticTokenProvider::new(t)) as Arc<dyn TokenProvider>);
        Self::connect(config, Arc::new(UreqTransport::new()), provider)
    }

    /// Read the source information and build the highest common interface.
    pub fn connect(
        config: &RemoteConfig,
        transport: Arc<dyn HttpTransport>,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) -> Result<Self, RemoteError> {
        let information = Self::fetch_information(config, Arc::clone(&transport))?;
        let version = Self::latest_common_version(&information.server_supported_versions)
            .ok_or_else(|| {
                RemoteError::UnsupportedContractVersion(
                    information
                        .server_supported_versions
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", "),
                )
            })?;
        let interface =
            Self::interface_for(version, config, transport, information.clone(), token_provider)?;
        info!(
            "connected to {} ({}) with contract {version}",
            information.source_identifier, config.url
        );
        Ok(Self {
            interface,
            information,
        })
    }

    /// Wrap an already constructed interface.
    pub fn from_interface(interface: Box<dyn RestInterface>) -> Self {
        let information = interface.information().cloned().unwrap_or_default();
        Self {
            interface,
            information,
        }
    }

    pub fn fetch_information(
        config: &RemoteConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<SourceInformation, RemoteError> {
        let context = RestContext::new(&config.url, transport, V1_0::VERSION)
            .with_headers(&config.additional_headers);
        let request = HttpRequest::get(context.url(INFORMATION_ENDPOINT));
        let bytes = context.send(request, Vec::new())?.ok_or_else(|| {
            RemoteError::Contract(format!("{} returned no source information", config.url))
        })?;
        let body: InformationResponseBody = serde_json::from_slice(&bytes)
            .map_err(|e| RemoteError::Contract(format!("malformed information response: {e}")))?;
        if body.data.source_identifier.is_empty() {
            return Err(RemoteError::Contract(
                "source information has no identifier".to_owned(),
            ));
        }
        if body.data.server_supported_versions.is_empty() {
            return Err(RemoteError::Contract(
                "source information lists no supported versions".to_owned(),
            ));
        }
        Ok(SourceInformation::from(body.data))
    }

    /// Highest client version whose major.minor the server also lists.
    pub fn latest_common_version(server: &[SchemaVersion]) -> Option<SchemaVersion> {
        SUPPORTED_CONTRACT_VERSIONS
            .iter()
            .rev()
            .find(|v| server.contains(v))
            .copied()
    }

    pub fn interface_for(
        version: SchemaVersion,
        config: &RemoteConfig,
        transport: Arc<dyn HttpTransport>,
        information: SourceInformation,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) -> Result<Box<dyn RestInterface>, RemoteError> {
        let headers = &config.additional_headers;
        let interface: Box<dyn RestInterface> = match version {
            V1_0::VERSION => Box::new(V1_0::new(&config.url, transport)),
            V1_1::VERSION => Box::new(V1_1::new(&config.url, transport, information, headers)),
            V1_7::VERSION => Box::new(V1_7::new(
                &config.url,
                transport,
                information,
                headers,
                token_provider,
            )?),
            other => {
                return Err(RemoteError::UnsupportedContractVersion(
                    wire::contract_version_string(other),
                ))
            }
        };
        Ok(interface)
    }

    pub fn version(&self) -> SchemaVersion {
        self.interface.version()
    }

    pub fn information(&self) -> &SourceInformation {
        &self.information
    }

    pub fn source_identifier(&self) -> &str {
        &self.information.source_identifier
    }

    pub fn interface(&self) -> &dyn RestInterface {
        self.interface.as_ref()
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResult, RemoteError> {
        self.interface.search(request)
    }

    pub fn get_manifests(&self, package_id: &str) -> Result<Vec<Manifest>, RemoteError> {
        self.interface.get_manifests(package_id, Vec::new())
    }

    pub fn get_manifest_by_version(
        &self,
        package_id: &str,
        version: &str,
        channel: &str,
    ) -> Result<Option<Manifest>, RemoteError> {
        self.interface
            .get_manifest_by_version(package_id, version, channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::testing::ScriptedTransport;

    fn information_body(versions: &[&str], auth: Option<&str>) -> String {
        let auth = auth.map_or(String::new(), |kind| {
            format!(
                r#", "Authentication": {{"AuthenticationType": "{kind}",
                    "MicrosoftEntraIdAuthenticationInfo": {{"Resource": "GUID"}}}}"#
            )
        });
        format!(
            r#"{{"Data": {{"SourceIdentifier": "Test.Source", "ServerSupportedVersions": {}{auth}}}}}"#,
            serde_json::to_string(versions).unwrap()
        )
    }

    fn connect(body: &str, provider: Option<Arc<dyn TokenProvider>>) -> Result<RestClient, RemoteError> {
        let transport = Arc::new(ScriptedTransport::new(vec![(200, body)]));
        RestClient::connect(
            &RemoteConfig::new("http://restsource.net"),
            transport,
            provider,
        )
    }

    #[test]
    fn latest_common_version_matches_major_minor() {
        let v = |m, n| SchemaVersion::new(m, n);
        assert_eq!(
            RestClient::latest_common_version(&[v(1, 0), v(2, 0), v(1, 1)]),
            Some(v(1, 1))
        );
        assert_eq!(
            RestClient::latest_common_version(&[v(1, 0), v(1, 7), v(1, 9)]),
            Some(v(1, 7))
        );
        assert_eq!(RestClient::latest_common_version(&[v(2, 0), v(3, 1)]), None);
    }

    #[test]
    fn connect_picks_highest_common_interface() {
        let client = connect(&information_body(&["1.0.0", "1.1.0", "1.4.0"], None), None).unwrap();
        assert_eq!(client.version(), SchemaVersion::new(1, 1));
        assert_eq!(client.source_identifier(), "Test.Source");

        let client = connect(&information_body(&["1.0.0"], None), None).unwrap();
        assert_eq!(client.version(), V1_0::VERSION);
    }

    #[test]
    fn connect_with_unsupported_versions_fails() {
        let err = connect(&information_body(&["2.0.0"], None), None).unwrap_err();
        assert!(matches!(err, RemoteError::UnsupportedContractVersion(v) if v == "2.0"));
    }

    #[test]
    fn connect_1_7_with_authentication() {
        let provider: Arc<dyn TokenProvider> = Arc::new(StaticTokenProvider::new("t"));
        let client = connect(
            &information_body(&["1.7.0"], Some("microsoftEntraId")),
            Some(provider),
        )
        .unwrap();
        assert_eq!(client.version(), V1_7::VERSION);
        assert_eq!(
            client.interface().authorization_headers().unwrap(),
            vec![("Authorization".to_owned(), "Bearer t".to_owned())]
        );
    }

    #[test]
    fn connect_with_unknown_authentication_fails() {
        let err = connect(&information_body(&["1.7.0"], Some("kerberos")), None).unwrap_err();
        assert!(matches!(err, RemoteError::AuthenticationTypeNotSupported(_)));
    }

    #[test]
    fn information_without_identifier_or_versions_is_rejected() {
        for body in [
            r#"{"Data": {"SourceIdentifier": "", "ServerSupportedVersions": ["1.0.0"]}}"#,
            r#"{"Data": {"SourceIdentifier": "x", "ServerSupportedVersions": []}}"#,
            "not json",
        ] {
            assert!(matches!(connect(body, None), Err(RemoteError::Contract(_))));
        }
    }

    #[test]
    fn information_request_carries_headers() {
        let transport = Arc::new(ScriptedTransport::new(vec![(
            200,
            r#"{"Data": {"SourceIdentifier": "x", "ServerSupportedVersions": ["1.0.0"]}}"#,
        )]));
        let config = RemoteConfig::new("http://restsource.net").with_header("Caller", "tests");
        RestClient::fetch_information(&config, transport.clone()).unwrap();
        let sent = transport.requests();
        assert_eq!(sent[0].url, "http://restsource.net/information");
        assert_eq!(sent[0].header("Contract-Version"), Some("1.0.0"));
        assert_eq!(sent[0].header("Caller"), Some("tests"));
    }
}
