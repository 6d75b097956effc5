//! FHIR-aligned Goal wire model.

use crate::datatypes::{CodeableConcept, Extension, Identifier, Quantity, Reference};
use serde::{Deserialize, Serialize};

/// A desired health state for a patient (for example a target blood pressure).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    /// FHIR goal-status code (`proposed`, `active`, `completed`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle_status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub achievement_status: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<CodeableConcept>,

    #[serde(default)]
    pub description: CodeableConcept,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target: Vec<GoalTarget>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_date: Option<String>,
}

/// One measurable target of a goal.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure: Option<CodeableConcept>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail_quantity: Option<Quantity>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
}
