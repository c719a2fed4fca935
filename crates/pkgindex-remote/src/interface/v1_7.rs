use super::{RestContext, RestInterface, V1_1};
use crate::auth::{Authenticator, TokenProvider};
use crate::http::HttpTransport;
use crate::information::{AuthenticationType, SourceInformation};
use crate::wire::{ManifestsResponseBody, SearchRequestBody, SearchResponseBody};
use crate::RemoteError;
use pkgindex_schema::{SchemaVersion, SearchRequest};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Contract 1.7: authenticated requests when the source asks for them.
#[derive(Debug)]
pub struct V1_7 {
    prior: V1_1,
    authenticator: Option<Authenticator>,
}

impl V1_7 {
    pub const VERSION: SchemaVersion = SchemaVersion { major: 1, minor: 7 };

    /// Fails if the source demands a scheme this client does not implement,
    /// or demands authentication and no provider is given.
    pub fn new(
        base_url: &str,
        transport: Arc<dyn HttpTransport>,
        information: SourceInformation,
        additional_headers: &BTreeMap<String, String>,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) -> Result<Self, RemoteError> {
        let authenticator = match (&information.authentication.kind, token_provider) {
            (AuthenticationType::None, _) => None,
            (AuthenticationType::Unknown(scheme), _) => {
                return Err(RemoteError::AuthenticationTypeNotSupported(scheme.clone()));
            }
            (AuthenticationType::MicrosoftEntraId, Some(provider)) => {
                Some(Authenticator::new(&information.authentication, provider)?)
            }
            (AuthenticationType::MicrosoftEntraId, None) => {
                return Err(RemoteError::Authentication(format!(
                    "source {} requires Microsoft Entra ID authentication and no token provider is configured",
                    information.source_identifier
                )));
            }
        };
        Ok(Self {
            prior: V1_1::with_version(
                Self::VERSION,
                base_url,
                transport,
                information,
                additional_headers,
            ),
            authenticator,
        })
    }

    pub fn requires_authentication(&self) -> bool {
        self.authenticator.is_some()
    }
}

impl RestInterface for V1_7 {
    fn version(&self) -> SchemaVersion {
        Self::VERSION
    }

    fn context(&self) -> &RestContext {
        self.prior.context()
    }

    fn information(&self) -> Option<&SourceInformation> {
        self.prior.information()
    }

    fn search_body(&self, request: &SearchRequest) -> Result<SearchRequestBody, RemoteError> {
        self.prior.search_body(request)
    }

    fn check_search_response(&self, response: &SearchResponseBody) -> Result<(), RemoteError> {
        self.prior.check_search_response(response)
    }

    fn query_parameters(
        &self,
        params: Vec<(String, String)>,
    ) -> Result<Vec<(String, String)>, RemoteError> {
        self.prior.query_parameters(params)
    }

    fn check_manifests_response(
        &self,
        response: &ManifestsResponseBody,
    ) -> Result<(), RemoteError> {
        self.prior.check_manifests_response(response)
    }

    fn authorization_headers(&self) -> Result<Vec<(String, String)>, RemoteError> {
        let mut headers = self.prior.authorization_headers()?;
        if let Some(auth) = &self.authenticator {
            headers.push(auth.authorization_header()?);
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessToken, StaticTokenProvider};
    use crate::http::{HttpRequest, HttpResponse};
    use crate::information::{AuthenticationInfo, EntraIdInfo};
    use pkgindex_schema::{MatchType, PackageMatchField};

    const SEARCH_RESPONSE: &str = r#"{
        "Data": [{"PackageIdentifier": "git.package", "PackageName": "package", "Publisher": "git",
                  "Versions": [{"PackageVersion": "1.0.0"}]}]
    }"#;

    const MANIFEST_RESPONSE: &str = r#"{
        "Data": {
            "PackageIdentifier": "Foo.Bar",
            "Versions": [{
                "PackageVersion": "5.0.0",
                "DefaultLocale": {"Publisher": "Foo", "PackageName": "Bar"},
                "Installers": [{"InstallerUrl": "https://installer.example.com/foobar.exe"}]
            }]
        }
    }"#;

    /// Answers with `body` only when the expected bearer token is presented.
    struct HeaderCheckingTransport {
        expected: String,
        body: &'static str,
    }

    impl HttpTransport for HeaderCheckingTransport {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, RemoteError> {
            if request.header("Authorization") == Some(self.expected.as_str()) {
                Ok(HttpResponse::new(200, self.body))
            } else {
                Ok(HttpResponse::new(401, ""))
            }
        }
    }

    struct FailingProvider;

    impl TokenProvider for FailingProvider {
        fn acquire_token(&self, _info: &EntraIdInfo) -> Result<AccessToken, RemoteError> {
            Err(RemoteError::Authentication("authentication failed".to_owned()))
        }
    }

    fn information() -> SourceInformation {
        SourceInformation {
            source_identifier: "Test.Source".to_owned(),
            server_supported_versions: vec![V1_7::VERSION],
            authentication: AuthenticationInfo::entra_id("GUID"),
            ..SourceInformation::default()
        }
    }

    fn v1_7(body: &'static str, provider: Arc<dyn TokenProvider>) -> V1_7 {
        let transport = Arc::new(HeaderCheckingTransport {
            expected: "Bearer TestToken".to_owned(),
            body,
        });
        V1_7::new(
            "http://restsource.com/api",
            transport,
            information(),
            &BTreeMap::new(),
            Some(provider),
        )
        .unwrap()
    }

    fn name_request() -> SearchRequest {
        SearchRequest::by_filter(PackageMatchField::Name, MatchType::Exact, "package")
    }

    #[test]
    fn good_token_authenticates_manifest_and_search_requests() {
        let iface = v1_7(MANIFEST_RESPONSE, Arc::new(StaticTokenProvider::new("TestToken")));
        assert!(iface.requires_authentication());
        let manifest = iface
            .get_manifest_by_version("Foo.Bar", "5.0.0", "")
            .unwrap()
            .unwrap();
        assert_eq!(manifest.id, "Foo.Bar");

        let iface = v1_7(SEARCH_RESPONSE, Arc::new(StaticTokenProvider::new("TestToken")));
        let result = iface.search(&name_request()).unwrap();
        assert_eq!(result.matches[0].package.id, "git.package");
    }

    #[test]
    fn failed_authentication_surfaces() {
        let iface = v1_7(MANIFEST_RESPONSE, Arc::new(FailingProvider));
        assert!(matches!(
            iface.get_manifest_by_version("Foo.Bar", "5.0.0", ""),
            Err(RemoteError::Authentication(_))
        ));
        assert!(matches!(
            iface.search(&name_request()),
            Err(RemoteError::Authentication(_))
        ));
    }

    #[test]
    fn wrong_token_is_denied_by_server() {
        let iface = v1_7(SEARCH_RESPONSE, Arc::new(StaticTokenProvider::new("OtherToken")));
        let err = iface.search(&name_request()).unwrap_err();
        assert!(matches!(err, RemoteError::Authentication(msg) if msg.contains("401")));
    }

    #[test]
    fn no_authentication_needs_no_provider() {
        let transport = Arc::new(HeaderCheckingTransport {
            expected: String::new(),
            body: MANIFEST_RESPONSE,
        });
        let iface = V1_7::new(
            "http://restsource.com/api",
            transport,
            SourceInformation::default(),
            &BTreeMap::new(),
            None,
        )
        .unwrap();
        assert!(!iface.requires_authentication());
        assert!(iface.authorization_headers().unwrap().is_empty());
        assert_eq!(iface.context().headers()[0].1, "1.7.0");
    }

    #[test]
    fn unknown_scheme_or_missing_provider_fails_construction() {
        let transport: Arc<dyn HttpTransport> = Arc::new(HeaderCheckingTransport {
            expected: String::new(),
            body: "",
        });
        let mut info = information();
        info.authentication.kind = AuthenticationType::Unknown("kerberos".to_owned());
        assert!(matches!(
            V1_7::new("http://x", transport.clone(), info, &BTreeMap::new(), None),
            Err(RemoteError::AuthenticationTypeNotSupported(_))
        ));
        assert!(matches!(
            V1_7::new("http://x", transport, information(), &BTreeMap::new(), None),
            Err(RemoteError::Authentication(_))
        ));
    }
}
