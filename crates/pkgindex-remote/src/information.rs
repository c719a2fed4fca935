//! Source information published by a REST endpoint.

use crate::wire::{self, WireInformation};
use pkgindex_schema::SchemaVersion;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const AUTH_TYPE_NONE: &str = "none";
pub const AUTH_TYPE_MICROSOFT_ENTRA_ID: &str = "microsoftEntraId";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthenticationType {
    #[default]
    None,
    MicrosoftEntraId,
    /// A scheme this client does not implement.
    Unknown(String),
}

impl AuthenticationType {
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() || raw.eq_ignore_ascii_case(AUTH_TYPE_NONE) {
            Self::None
        } else if raw.eq_ignore_ascii_case(AUTH_TYPE_MICROSOFT_ENTRA_ID) {
            Self::MicrosoftEntraId
        } else {
            Self::Unknown(raw.to_owned())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::None => AUTH_TYPE_NONE,
            Self::MicrosoftEntraId => AUTH_TYPE_MICROSOFT_ENTRA_ID,
            Self::Unknown(s) => s,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntraIdInfo {
    pub resource: String,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationInfo {
    pub kind: AuthenticationType,
    pub entra_id: Option<EntraIdInfo>,
}

impl AuthenticationInfo {
    pub fn entra_id(resource: &str) -> Self {
        Self {
            kind: AuthenticationType::MicrosoftEntraId,
            entra_id: Some(EntraIdInfo {
                resource: resource.to_owned(),
                scope: None,
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInformation {
    pub source_identifier: String,
    pub server_supported_versions: Vec<SchemaVersion>,
    pub required_package_match_fields: Vec<String>,
    pub unsupported_package_match_fields: Vec<String>,
    pub required_query_parameters: Vec<String>,
    pub unsupported_query_parameters: Vec<String>,
    pub authentication: AuthenticationInfo,
}

impl From<WireInformation> for SourceInformation {
    fn from(w: WireInformation) -> Self {
        let server_supported_versions = w
            .server_supported_versions
            .iter()
            .filter_map(|raw| {
                let parsed = wire::parse_contract_version(raw);
                if parsed.is_none() {
                    warn!("ignoring unparseable server version '{raw}'");
                }
                parsed
            })
            .collect();
        let authentication = w
            .authentication
            .map(|a| AuthenticationInfo {
                kind: AuthenticationType::parse(&a.authentication_type),
                entra_id: a.microsoft_entra_id_authentication_info.map(|e| EntraIdInfo {
                    resource: e.resource,
                    scope: e.scope,
                }),
            })
            .unwrap_or_default();
        Self {
            source_identifier: w.source_identifier,
            server_supported_versions,
            required_package_match_fields: w.required_package_match_fields,
            unsupported_package_match_fields: w.unsupported_package_match_fields,
            required_query_parameters: w.required_query_parameters,
            unsupported_query_parameters: w.unsupported_query_parameters,
            authentication,
        }
    }
}

impl From<&SourceInformation> for WireInformation {
    fn from(info: &SourceInformation) -> Self {
        Self {
            source_identifier: info.source_identifier.clone(),
            server_supported_versions: info
                .server_supported_versions
                .iter()
                .map(|v| wire::contract_version_string(*v))
                .collect(),
            required_package_match_fields: info.required_package_match_fields.clone(),
            unsupported_package_match_fields: info.unsupported_package_match_fields.clone(),
            required_query_parameters: info.required_query_parameters.clone(),
            unsupported_query_parameters: info.unsupported_query_parameters.clone(),
            authentication: (info.authentication.kind != AuthenticationType::None).then(|| {
                wire::WireAuthentication {
                    authentication_type: info.authentication.kind.as_str().to_owned(),
                    microsoft_entra_id_authentication_info: info
                        .authentication
                        .entra_id
                        .as_ref()
                        .map(|e| wire::WireEntraIdInfo {
                            resource: e.resource.clone(),
                            scope: e.scope.clone(),
                        }),
                }
            }),
        }
    }
}
