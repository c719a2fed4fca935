//! JSON bodies of the REST contract.
//!
//! Field names are PascalCase on the wire. Conversions to and from the
//! in-memory model live here so the client and the reference server agree.

use crate::RemoteError;
use pkgindex_schema::{
    Dependency, Installer, Manifest, MatchType, PackageId, PackageMatchField,
    PackageMatchFilter, PackageSummary, RequestMatch, SchemaVersion, SearchRequest, Version,
    VersionKey,
};
use serde::{Deserialize, Serialize};

/// Contract version as sent in the `Contract-Version` header (`1.1.0`).
pub fn contract_version_string(version: SchemaVersion) -> String {
    format!("{}.{}.0", version.major, version.minor)
}

/// Parse `1.1`, `1.1.0` or `1.1.0.0` into a schema version.
pub fn parse_contract_version(raw: &str) -> Option<SchemaVersion> {
    let mut parts = raw.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |m| m.parse().ok())?;
    Some(SchemaVersion::new(major, minor))
}

pub fn field_to_wire(field: PackageMatchField) -> &'static str {
    match field {
        PackageMatchField::Id => "PackageIdentifier",
        PackageMatchField::Name => "PackageName",
        PackageMatchField::Moniker => "Moniker",
        PackageMatchField::Command => "Command",
        PackageMatchField::Tag => "Tag",
        PackageMatchField::PackageFamilyName => "PackageFamilyName",
        PackageMatchField::ProductCode => "ProductCode",
        PackageMatchField::Publisher => "Publisher",
    }
}

pub fn field_from_wire(raw: &str) -> Option<PackageMatchField> {
    let field = match raw {
        "PackageIdentifier" => PackageMatchField::Id,
        "PackageName" => PackageMatchField::Name,
        "Moniker" => PackageMatchField::Moniker,
        "Command" => PackageMatchField::Command,
        "Tag" => PackageMatchField::Tag,
        "PackageFamilyName" => PackageMatchField::PackageFamilyName,
        "ProductCode" => PackageMatchField::ProductCode,
        "Publisher" => PackageMatchField::Publisher,
        _ => return None,
    };
    Some(field)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireRequestMatch {
    pub key_word: String,
    pub match_type: MatchType,
}

impl From<&RequestMatch> for WireRequestMatch {
    fn from(m: &RequestMatch) -> Self {
        Self {
            key_word: m.value.clone(),
            match_type: m.match_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireMatchFilter {
    pub package_match_field: String,
    pub request_match: WireRequestMatch,
}

impl From<&PackageMatchFilter> for WireMatchFilter {
    fn from(f: &PackageMatchFilter) -> Self {
        Self {
            package_match_field: field_to_wire(f.field).to_owned(),
            request_match: WireRequestMatch {
                key_word: f.value.clone(),
                match_type: f.match_type,
            },
        }
    }
}

impl WireMatchFilter {
    pub fn to_filter(&self) -> Option<PackageMatchFilter> {
        Some(PackageMatchFilter::new(
            field_from_wire(&self.package_match_field)?,
            self.request_match.match_type,
            self.request_match.key_word.clone(),
        ))
    }
}

/// Body of `POST manifestSearch`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchRequestBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_results: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<WireRequestMatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inclusions: Vec<WireMatchFilter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<WireMatchFilter>,
}

impl From<&SearchRequest> for SearchRequestBody {
    fn from(request: &SearchRequest) -> Self {
        Self {
            maximum_results: (request.maximum_results > 0).then_some(request.maximum_results),
            query: request.query.as_ref().map(WireRequestMatch::from),
            inclusions: request.inclusions.iter().map(WireMatchFilter::from).collect(),
            filters: request.filters.iter().map(WireMatchFilter::from).collect(),
        }
    }
}

impl SearchRequestBody {
    /// Back to an in-memory request. Unknown fields are dropped.
    pub fn to_request(&self) -> SearchRequest {
        SearchRequest {
            query: self
                .query
                .as_ref()
                .map(|q| RequestMatch::new(q.match_type, q.key_word.clone())),
            inclusions: self.inclusions.iter().filter_map(WireMatchFilter::to_filter).collect(),
            filters: self.filters.iter().filter_map(WireMatchFilter::to_filter).collect(),
            maximum_results: self.maximum_results.unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireVersionSummary {
    pub package_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_family_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub product_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WirePackage {
    pub package_identifier: String,
    pub package_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default)]
    pub versions: Vec<WireVersionSummary>,
}

impl WirePackage {
    /// Versions are ordered highest first regardless of server order.
    pub fn to_summary(&self) -> PackageSummary {
        let mut versions: Vec<VersionKey> = self
            .versions
            .iter()
            .map(|v| VersionKey::new(v.package_version.as_str(), v.channel.as_deref().unwrap_or("")))
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| a.channel.cmp(&b.channel)));
        PackageSummary {
            id: PackageId::new(self.package_identifier.clone()),
            name: self.package_name.clone(),
            publisher: self.publisher.clone(),
            versions,
        }
    }
}

/// Response of `POST manifestSearch`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SearchResponseBody {
    #[serde(default)]
    pub data: Vec<WirePackage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_package_match_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsupported_package_match_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireDependency {
    pub package_identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireDependencies {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub package_dependencies: Vec<WireDependency>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireInstaller {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_code: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<WireDependencies>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireLocale {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_locale: Option<String>,
    #[serde(default)]
    pub package_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moniker: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireManifestVersion {
    pub package_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub default_locale: WireLocale,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    #[serde(default)]
    pub installers: Vec<WireInstaller>,
}

/// `Data` of `GET packageManifests/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WirePackageManifests {
    pub package_identifier: String,
    #[serde(default)]
    pub versions: Vec<WireManifestVersion>,
}

impl WirePackageManifests {
    /// Group manifests of one package into a wire document.
    pub fn from_manifests(id: &PackageId, manifests: &[Manifest]) -> Self {
        Self {
            package_identifier: id.to_string(),
            versions: manifests.iter().map(WireManifestVersion::from).collect(),
        }
    }

    /// Convert every version to a validated manifest.
    pub fn to_manifests(&self) -> Result<Vec<Manifest>, RemoteError> {
        self.versions
            .iter()
            .map(|v| {
                let manifest = v.to_manifest(&self.package_identifier);
                manifest.validate().map_err(|e| {
                    RemoteError::Contract(format!(
                        "received invalid manifest for {}: {e}",
                        self.package_identifier
                    ))
                })?;
                Ok(manifest)
            })
            .collect()
    }
}

impl From<&Manifest> for WireManifestVersion {
    fn from(m: &Manifest) -> Self {
        Self {
            package_version: m.version.to_string(),
            channel: (!m.channel.is_empty()).then(|| m.channel.clone()),
            default_locale: WireLocale {
                package_locale: None,
                package_name: m.name.clone(),
                publisher: m.publisher.clone(),
                moniker: m.moniker.clone(),
                tags: m.tags.clone(),
            },
            commands: m.commands.clone(),
            installers: m
                .installers
                .iter()
                .map(|i| WireInstaller {
                    architecture: i.architecture.clone(),
                    installer_type: i.installer_type.clone(),
                    installer_url: i.url.clone(),
                    installer_sha256: i.sha256.clone(),
                    package_family_name: i.package_family_name.clone(),
                    product_code: i.product_code.clone(),
                    commands: i.commands.clone(),
                    dependencies: (!i.dependencies.is_empty()).then(|| WireDependencies {
                        package_dependencies: i
                            .dependencies
                            .iter()
                            .map(|d| WireDependency {
                                package_identifier: d.package_id.to_string(),
                                minimum_version: d.min_version.as_ref().map(Version::to_string),
                            })
                            .collect(),
                    }),
                })
                .collect(),
        }
    }
}

impl WireManifestVersion {
    pub fn to_manifest(&self, package_identifier: &str) -> Manifest {
        let locale = &self.default_locale;
        Manifest {
            id: PackageId::new(package_identifier),
            version: Version::new(self.package_version.clone()),
            channel: self.channel.clone().unwrap_or_default(),
            name: locale.package_name.clone(),
            publisher: locale.publisher.clone(),
            moniker: locale.moniker.clone(),
            tags: locale.tags.clone(),
            commands: self.commands.clone(),
            installers: self
                .installers
                .iter()
                .map(|i| Installer {
                    architecture: i.architecture.clone(),
                    installer_type: i.installer_type.clone(),
                    url: i.installer_url.clone(),
                    sha256: i.installer_sha256.clone(),
                    package_family_name: i.package_family_name.clone(),
                    product_code: i.product_code.clone(),
                    commands: i.commands.clone(),
                    dependencies: i
                        .dependencies
                        .iter()
                        .flat_map(|d| d.package_dependencies.iter())
                        .map(|d| Dependency {
                            package_id: PackageId::new(d.package_identifier.clone()),
                            min_version: d.minimum_version.clone().map(Version::new),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Response of `GET packageManifests/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestsResponseBody {
    #[serde(default)]
    pub data: Option<WirePackageManifests>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_query_parameters: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsupported_query_parameters: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireEntraIdInfo {
    #[serde(default)]
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireAuthentication {
    pub authentication_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microsoft_entra_id_authentication_info: Option<WireEntraIdInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireInformation {
    pub source_identifier: String,
    #[serde(default)]
    pub server_supported_versions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_package_match_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsupported_package_match_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_query_parameters: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unsupported_query_parameters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<WireAuthentication>,
}

/// Response of `GET information`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InformationResponseBody {
    pub data: WireInformation,
}

/// Error body a server returns alongside 404 to mean "no results".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
