//! Capability statement (server `metadata`) wire model and auth-endpoint discovery.

use crate::datatypes::{find_extension, Extension};
use crate::{FhirError, FhirResult};
use serde::{Deserialize, Serialize};

/// SMART on FHIR extension listing the server's OAuth endpoints.
pub const OAUTH_URIS_EXTENSION_URL: &str =
    "http://fhir-registry.smarthealthit.org/StructureDefinition/oauth-uris";

const TOKEN_EXTENSION_URL: &str = "token";

/// The subset of a CapabilityStatement needed to locate the token endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityStatement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fhir_version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rest: Vec<CapabilityRest>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<CapabilitySecurity>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySecurity {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
}

impl CapabilityStatement {
    /// Resolve the OAuth token endpoint advertised by the server.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidInput`] if the statement has no `rest` element, or if no
    /// `rest.security` carries an `oauth-uris` extension with a `token` value.
    pub fn token_endpoint(&self) -> FhirResult<String> {
        if self.rest.is_empty() {
            return Err(FhirError::InvalidInput(
                "capability statement is missing rest".into(),
            ));
        }

        self.rest
            .iter()
            .filter_map(|rest| rest.security.as_ref())
            .filter_map(|security| find_extension(&security.extension, OAUTH_URIS_EXTENSION_URL))
            .filter_map(|oauth| oauth.nested(TOKEN_EXTENSION_URL))
            .find_map(|token| token.primitive_value().map(str::to_string))
            .ok_or_else(|| {
                FhirError::InvalidInput("could not find token endpoint in capability statement".into())
            })
    }
}
