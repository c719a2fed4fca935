use super::{RestContext, RestInterface, V1_0};
use crate::http::HttpTransport;
use crate::information::SourceInformation;
use crate::wire::{ManifestsResponseBody, SearchRequestBody, SearchResponseBody};
use crate::RemoteError;
use pkgindex_schema::{SchemaVersion, SearchRequest};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Required by many sources and always satisfied by the client.
pub const MARKET: &str = "Market";

fn contains(list: &[String], name: &str) -> bool {
    list.iter().any(|s| s.eq_ignore_ascii_case(name))
}

fn unmet_requirements<'a>(required: &'a [String], present: &[&str]) -> Vec<&'a str> {
    required
        .iter()
        .map(String::as_str)
        .filter(|r| !r.eq_ignore_ascii_case(MARKET))
        .filter(|r| !present.iter().any(|p| p.eq_ignore_ascii_case(r)))
        .collect()
}

/// Contract 1.1: validates requests against the source information and sends
/// caller supplied headers.
#[derive(Debug)]
pub struct V1_1 {
    prior: V1_0,
    version: SchemaVersion,
    information: SourceInformation,
}

impl V1_1 {
    pub const VERSION: SchemaVersion = SchemaVersion { major: 1, minor: 1 };

    pub fn new(
        base_url: &str,
        transport: Arc<dyn HttpTransport>,
        information: SourceInformation,
        additional_headers: &BTreeMap<String, String>,
    ) -> Self {
        Self::with_version(Self::VERSION, base_url, transport, information, additional_headers)
    }

    pub(crate) fn with_version(
        version: SchemaVersion,
        base_url: &str,
        transport: Arc<dyn HttpTransport>,
        information: SourceInformation,
        additional_headers: &BTreeMap<String, String>,
    ) -> Self {
        let context = RestContext::new(base_url, transport, version).with_headers(additional_headers);
        Self {
            prior: V1_0::with_context(context),
            version,
            information,
        }
    }
}

impl RestInterface for V1_1 {
    fn version(&self) -> SchemaVersion {
        self.version
    }

    fn context(&self) -> &RestContext {
        self.prior.context()
    }

    fn information(&self) -> Option<&SourceInformation> {
        Some(&self.information)
    }

    fn search_body(&self, request: &SearchRequest) -> Result<SearchRequestBody, RemoteError> {
        let info = &self.information;
        let mut body = self.prior.search_body(request)?;

        if let Some(filter) = body
            .filters
            .iter()
            .find(|f| contains(&info.unsupported_package_match_fields, &f.package_match_field))
        {
            return Err(RemoteError::UnsupportedRequest(format!(
                "match field {} cannot be used as a filter",
                filter.package_match_field
            )));
        }
        body.inclusions.retain(|f| {
            let keep = !contains(&info.unsupported_package_match_fields, &f.package_match_field);
            if !keep {
                debug!("dropping inclusion on unsupported field {}", f.package_match_field);
            }
            keep
        });

        let present: Vec<&str> = body
            .filters
            .iter()
            .chain(body.inclusions.iter())
            .map(|f| f.package_match_field.as_str())
            .collect();
        let missing = unmet_requirements(&info.required_package_match_fields, &present);
        if !missing.is_empty() {
            return Err(RemoteError::UnsupportedRequest(format!(
                "required match fields missing: {}",
                missing.join(", ")
            )));
        }
        Ok(body)
    }

    fn check_search_response(&self, response: &SearchResponseBody) -> Result<(), RemoteError> {
        if !response.unsupported_package_match_fields.is_empty()
            || !response.required_package_match_fields.is_empty()
        {
            return Err(RemoteError::UnsupportedRequest(format!(
                "source rejected search (unsupported: [{}], required: [{}])",
                response.unsupported_package_match_fields.join(", "),
                response.required_package_match_fields.join(", ")
            )));
        }
        self.prior.check_search_response(response)
    }

    fn query_parameters(
        &self,
        params: Vec<(String, String)>,
    ) -> Result<Vec<(String, String)>, RemoteError> {
        let info = &self.information;
        if let Some((name, _)) = params
            .iter()
            .find(|(k, _)| contains(&info.unsupported_query_parameters, k))
        {
            return Err(RemoteError::UnsupportedRequest(format!(
                "query parameter {name} is not supported"
            )));
        }
        let present: Vec<&str> = params.iter().map(|(k, _)| k.as_str()).collect();
        let missing = unmet_requirements(&info.required_query_parameters, &present);
        if !missing.is_empty() {
            return Err(RemoteError::UnsupportedRequest(format!(
                "required query parameters missing: {}",
                missing.join(", ")
            )));
        }
        self.prior.query_parameters(params)
    }

    fn check_manifests_response(
        &self,
        response: &ManifestsResponseBody,
    ) -> Result<(), RemoteError> {
        if !response.unsupported_query_parameters.is_empty()
            || !response.required_query_parameters.is_empty()
        {
            return Err(RemoteError::UnsupportedRequest(format!(
                "source rejected manifest request (unsupported: [{}], required: [{}])",
                response.unsupported_query_parameters.join(", "),
                response.required_query_parameters.join(", ")
            )));
        }
        self.prior.check_manifests_response(response)
    }
}
