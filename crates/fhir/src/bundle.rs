//! FHIR `Bundle` wire model and translation helpers.
//!
//! Responsibilities:
//! - Parse bundles fetched from the remote record system, reporting the failing JSON path
//! - Render bundles for submission (`transaction`) or as response collections
//! - Offer typed views over the contained resources and lookup by reference
//!
//! Notes:
//! - Entries may legitimately lack a resource (for example transaction responses); such entries
//!   are kept on parse and ignored by the typed views.

use crate::goal::Goal;
use crate::observation::{Encounter, Observation};
use crate::reference::{relative_reference_for, to_relative_reference};
use crate::resource::Resource;
use crate::{FhirError, FhirResult};
use serde::{Deserialize, Serialize};

const BUNDLE_RESOURCE_TYPE: &str = "Bundle";
const NEXT_RELATION: &str = "next";

fn bundle_resource_type() -> String {
    BUNDLE_RESOURCE_TYPE.to_string()
}

/// Purpose of a bundle (FHIR `bundle-type`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleType {
    Document,
    Message,
    Transaction,
    TransactionResponse,
    Batch,
    BatchResponse,
    History,
    #[default]
    Searchset,
    Collection,
}

/// An ordered collection of resources.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default = "bundle_resource_type")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type", default)]
    pub bundle_type: BundleType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link: Vec<BundleLink>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<BundleEntry>,
}

/// A paging or self link on a bundle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

/// One entry of a bundle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<BundleEntryRequest>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<BundleEntryResponse>,
}

/// How a transaction entry should be applied.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntryRequest {
    pub method: String,
    pub url: String,
}

/// Outcome of a transaction entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntryResponse {
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl BundleEntry {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource: Some(resource),
            ..Default::default()
        }
    }

    /// Entry that asks the server to create `resource` (`POST <Type>`).
    pub fn create(resource: Resource) -> Self {
        let request = BundleEntryRequest {
            method: "POST".to_string(),
            url: resource.resource_type().to_string(),
        };
        Self {
            resource: Some(resource),
            request: Some(request),
            ..Default::default()
        }
    }

    /// The relative reference of this entry's resource.
    ///
    /// Prefers the resource's own `Type/id`; falls back to a normalised `fullUrl`.
    pub fn relative_reference(&self) -> Option<String> {
        let resource = self.resource.as_ref()?;
        if let Some(id) = resource.id() {
            return Some(relative_reference_for(resource.resource_type(), id));
        }
        self.full_url.as_deref().map(to_relative_reference)
    }
}

impl Bundle {
    pub fn new(bundle_type: BundleType) -> Self {
        Self {
            resource_type: bundle_resource_type(),
            bundle_type,
            ..Default::default()
        }
    }

    /// A `collection` bundle holding `resources` in order.
    pub fn collection(resources: impl IntoIterator<Item = Resource>) -> Self {
        let mut bundle = Self::new(BundleType::Collection);
        bundle.entry = resources.into_iter().map(BundleEntry::new).collect();
        bundle
    }

    /// A `transaction` bundle that creates each of `resources`.
    pub fn transaction(resources: impl IntoIterator<Item = Resource>) -> Self {
        let mut bundle = Self::new(BundleType::Transaction);
        bundle.entry = resources.into_iter().map(BundleEntry::create).collect();
        bundle
    }

    /// Parse a bundle from JSON text.
    ///
    /// Uses `serde_path_to_error` so a schema mismatch names the failing element
    /// (e.g. `entry[3].resource`).
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Translation`] if the JSON does not match the bundle wire schema, or
    /// [`FhirError::InvalidInput`] if the top-level `resourceType` is not `Bundle`.
    pub fn parse(json_text: &str) -> FhirResult<Self> {
        let mut deserializer = serde_json::Deserializer::from_str(json_text);

        let bundle: Bundle = match serde_path_to_error::deserialize(&mut deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let path = err.path().to_string();
                let source = err.into_inner();
                let path = if path.is_empty() || path == "." {
                    "<root>"
                } else {
                    path.as_str()
                };
                return Err(FhirError::Translation(format!(
                    "Bundle schema mismatch at {path}: {source}"
                )));
            }
        };

        if bundle.resource_type != BUNDLE_RESOURCE_TYPE {
            return Err(FhirError::InvalidInput(format!(
                "expected resourceType Bundle, found {}",
                bundle.resource_type
            )));
        }

        Ok(bundle)
    }

    /// Render the bundle as JSON text.
    pub fn render(&self) -> FhirResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_empty()
    }

    /// All resources, in entry order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.entry.iter().filter_map(|e| e.resource.as_ref())
    }

    pub fn observations(&self) -> impl Iterator<Item = &Observation> {
        self.resources().filter_map(Resource::as_observation)
    }

    pub fn goals(&self) -> impl Iterator<Item = &Goal> {
        self.resources().filter_map(Resource::as_goal)
    }

    /// Find the resource a reference points at, comparing normalised relative references.
    pub fn find_by_reference(&self, reference: &str) -> Option<&Resource> {
        let wanted = to_relative_reference(reference);
        self.entry
            .iter()
            .find(|e| e.relative_reference().as_deref() == Some(wanted.as_str()))
            .and_then(|e| e.resource.as_ref())
    }

    /// Resolve an Encounter reference within this bundle.
    pub fn find_encounter(&self, reference: &str) -> Option<&Encounter> {
        self.find_by_reference(reference)
            .and_then(Resource::as_encounter)
    }

    /// URL of the next page, if the server paginated the result.
    pub fn next_link(&self) -> Option<&str> {
        self.link
            .iter()
            .find(|l| l.relation == NEXT_RELATION)
            .map(|l| l.url.as_str())
    }

    /// Append every entry of `other` (no deduplication; see `BundleMerger` for that).
    pub fn extend(&mut self, other: Bundle) {
        self.entry.extend(other.entry);
    }
}
