//! The polymorphic FHIR resource carried by bundle entries.
//!
//! Dispatch is on the JSON `resourceType` element. Every variant answers [`Resource::id`] and
//! [`Resource::identifiers`] explicitly so callers never need to probe resources by field name.

use crate::capability::CapabilityStatement;
use crate::datatypes::Identifier;
use crate::goal::Goal;
use crate::observation::{Encounter, Observation};
use crate::reference::relative_reference_for;
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A FHIR resource of a known or unknown type.
#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    Observation(Observation),
    Goal(Goal),
    Encounter(Encounter),
    CapabilityStatement(CapabilityStatement),
    /// Any other resource type, kept verbatim.
    Other(OtherResource),
}

/// A resource whose type the engine does not interpret.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OtherResource {
    #[serde(rename = "resourceType")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,

    /// All remaining elements, untouched.
    #[serde(flatten)]
    pub elements: Map<String, Value>,
}

impl Resource {
    pub fn resource_type(&self) -> &str {
        match self {
            Resource::Observation(_) => "Observation",
            Resource::Goal(_) => "Goal",
            Resource::Encounter(_) => "Encounter",
            Resource::CapabilityStatement(_) => "CapabilityStatement",
            Resource::Other(other) => &other.resource_type,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Resource::Observation(r) => r.id.as_deref(),
            Resource::Goal(r) => r.id.as_deref(),
            Resource::Encounter(r) => r.id.as_deref(),
            Resource::CapabilityStatement(r) => r.id.as_deref(),
            Resource::Other(r) => r.id.as_deref(),
        }
    }

    pub fn identifiers(&self) -> &[Identifier] {
        match self {
            Resource::Observation(r) => &r.identifier,
            Resource::Goal(r) => &r.identifier,
            Resource::Encounter(r) => &r.identifier,
            Resource::CapabilityStatement(_) => &[],
            Resource::Other(r) => &r.identifier,
        }
    }

    /// `Type/id` (or `urn:uuid:<id>`) when the resource has a logical id.
    pub fn relative_reference(&self) -> Option<String> {
        self.id()
            .map(|id| relative_reference_for(self.resource_type(), id))
    }

    pub fn as_observation(&self) -> Option<&Observation> {
        match self {
            Resource::Observation(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_goal(&self) -> Option<&Goal> {
        match self {
            Resource::Goal(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_encounter(&self) -> Option<&Encounter> {
        match self {
            Resource::Encounter(e) => Some(e),
            _ => None,
        }
    }
}

impl Serialize for Resource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let body = match self {
            Resource::Observation(r) => serde_json::to_value(r),
            Resource::Goal(r) => serde_json::to_value(r),
            Resource::Encounter(r) => serde_json::to_value(r),
            Resource::CapabilityStatement(r) => serde_json::to_value(r),
            Resource::Other(r) => return r.serialize(serializer),
        }
        .map_err(S::Error::custom)?;

        let mut object = match body {
            Value::Object(map) => map,
            other => {
                return Err(S::Error::custom(format!(
                    "resource rendered as non-object: {other}"
                )))
            }
        };
        object.insert(
            "resourceType".to_string(),
            Value::String(self.resource_type().to_string()),
        );
        object.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let resource_type = value
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::custom("missing resourceType"))?
            .to_string();

        let resource = match resource_type.as_str() {
            "Observation" => serde_json::from_value(value).map(Resource::Observation),
            "Goal" => serde_json::from_value(value).map(Resource::Goal),
            "Encounter" => serde_json::from_value(value).map(Resource::Encounter),
            "CapabilityStatement" => {
                serde_json::from_value(value).map(Resource::CapabilityStatement)
            }
            _ => serde_json::from_value(value).map(Resource::Other),
        };

        resource.map_err(|e| D::Error::custom(format!("invalid {resource_type}: {e}")))
    }
}
