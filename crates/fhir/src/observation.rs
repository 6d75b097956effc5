//! FHIR-aligned Observation and Encounter wire models.
//!
//! Responsibilities:
//! - Model the Observation elements used for vital-sign readings (single-concept values,
//!   component panels, protocol answers)
//! - Model the Encounter elements used to infer where a measurement was taken
//! - Detect and attach the vitals "measurement setting" extension that marks home readings

use crate::datatypes::{find_extension, CodeableConcept, Coding, Extension, Identifier, Period, Quantity, Reference};
use crate::datetime::parse_fhir_datetime;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Extension URL recording the setting a measurement was taken in.
pub const HOME_SETTING_EXTENSION_URL: &str =
    "http://hl7.org/fhir/us/vitals/StructureDefinition/MeasurementSettingExt";

/// SNOMED CT system used by the home-setting extension value.
pub const HOME_SETTING_SYSTEM: &str = "http://snomed.info/sct";

/// SNOMED CT "Home (environment)".
pub const HOME_SETTING_CODE: &str = "264362003";

const HOME_SETTING_DISPLAY: &str = "Home (environment)";

// ============================================================================
// Observation
// ============================================================================

/// A measurement or simple assertion about a patient.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<CodeableConcept>,

    #[serde(default)]
    pub code: CodeableConcept,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub encounter: Option<Reference>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date_time: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_period: Option<Period>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_quantity: Option<Quantity>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_codeable_concept: Option<CodeableConcept>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_boolean: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub component: Vec<ObservationComponent>,
}

/// One component of a panel Observation (for example the systolic part of a BP panel).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationComponent {
    #[serde(default)]
    pub code: CodeableConcept,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_quantity: Option<Quantity>,
}

impl Observation {
    /// When the observation was measured.
    ///
    /// Uses `effectiveDateTime`, then `effectivePeriod.start`, then `issued` (when it was
    /// recorded) as a last resort. Returns `None` when no field parses.
    pub fn effective_instant(&self) -> Option<DateTime<Utc>> {
        self.effective_date_time
            .as_deref()
            .and_then(parse_fhir_datetime)
            .or_else(|| {
                self.effective_period
                    .as_ref()
                    .and_then(|p| p.start.as_deref())
                    .and_then(parse_fhir_datetime)
            })
            .or_else(|| self.issued.as_deref().and_then(parse_fhir_datetime))
    }

    /// Whether the observation carries the home measurement-setting extension.
    pub fn has_home_setting_extension(&self) -> bool {
        find_extension(&self.extension, HOME_SETTING_EXTENSION_URL)
            .and_then(|e| e.value_coding.as_ref())
            .is_some_and(|c| {
                c.system.as_deref() == Some(HOME_SETTING_SYSTEM)
                    && c.code.as_deref() == Some(HOME_SETTING_CODE)
            })
    }

    /// Tag the observation as taken in a home setting. Idempotent.
    pub fn add_home_setting_extension(&mut self) {
        if self.has_home_setting_extension() {
            return;
        }
        self.extension.push(Extension {
            url: HOME_SETTING_EXTENSION_URL.to_string(),
            value_coding: Some(
                Coding::new(HOME_SETTING_SYSTEM, HOME_SETTING_CODE).with_display(HOME_SETTING_DISPLAY),
            ),
            ..Default::default()
        });
    }

    /// Literal encounter reference, if any.
    pub fn encounter_reference(&self) -> Option<&str> {
        self.encounter.as_ref().and_then(|r| r.reference.as_deref())
    }
}

// ============================================================================
// Encounter
// ============================================================================

/// An interaction between a patient and a provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Encounter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<Coding>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
}

impl Encounter {
    /// The encounter class code (`AMB`, `HH`, `VR`, ...).
    pub fn class_code(&self) -> Option<&str> {
        self.class.as_ref().and_then(|c| c.code.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn effective_instant_prefers_effective_date_time() {
        let obs = Observation {
            effective_date_time: Some("2024-05-01T10:00:00Z".into()),
            effective_period: Some(Period {
                start: Some("2024-04-01T10:00:00Z".into()),
                end: None,
            }),
            issued: Some("2024-06-01T10:00:00Z".into()),
            ..Default::default()
        };
        assert_eq!(
            obs.effective_instant().unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn effective_instant_falls_back_to_period_then_issued() {
        let period_only = Observation {
            effective_period: Some(Period {
                start: Some("2024-04-01T10:00:00Z".into()),
                end: None,
            }),
            ..Default::default()
        };
        assert_eq!(
            period_only.effective_instant().unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).unwrap()
        );

        let issued_only = Observation {
            issued: Some("2024-06-01T10:00:00Z".into()),
            ..Default::default()
        };
        assert!(issued_only.effective_instant().is_some());

        assert!(Observation::default().effective_instant().is_none());
    }

    #[test]
    fn home_setting_extension_round_trip() {
        let mut obs = Observation::default();
        assert!(!obs.has_home_setting_extension());

        obs.add_home_setting_extension();
        obs.add_home_setting_extension();
        assert!(obs.has_home_setting_extension());
        assert_eq!(obs.extension.len(), 1);
    }

    #[test]
    fn home_setting_extension_requires_matching_coding() {
        let obs = Observation {
            extension: vec![Extension {
                url: HOME_SETTING_EXTENSION_URL.into(),
                value_coding: Some(Coding::new(HOME_SETTING_SYSTEM, "not-home")),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(!obs.has_home_setting_extension());
    }
}
