//! FHIR general-purpose data types.
//!
//! Only the elements the reconciliation engine reads or writes are modelled. Absent elements are
//! omitted on output so rendered resources stay minimal.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifier
// ============================================================================

/// Purpose of an identifier (FHIR `IdentifierUse`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierUse {
    Usual,
    Official,
    Temp,
    Secondary,
    Old,
}

impl IdentifierUse {
    /// Whether two use classifications may describe the same identifier.
    ///
    /// `usual` and `official` are interchangeable; any other use only matches itself.
    pub fn compatible_with(self, other: IdentifierUse) -> bool {
        use IdentifierUse::*;
        self == other || matches!((self, other), (Usual, Official) | (Official, Usual))
    }
}

/// A business identifier attached to a resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_type: Option<IdentifierUse>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Identifier {
    pub fn new(system: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            use_type: None,
            system: Some(system.into()),
            value: Some(value.into()),
        }
    }

    pub fn with_use(mut self, use_type: IdentifierUse) -> Self {
        self.use_type = Some(use_type);
        self
    }

    /// Whether `self` and `other` identify the same logical resource.
    ///
    /// Both uses must be absent, or both present and compatible. System and value must each be
    /// equal, where "both absent" counts as equal.
    pub fn matches(&self, other: &Identifier) -> bool {
        let use_match = match (self.use_type, other.use_type) {
            (None, None) => true,
            (Some(a), Some(b)) => a.compatible_with(b),
            _ => false,
        };

        use_match && self.system == other.system && self.value == other.value
    }
}

// ============================================================================
// Coding / CodeableConcept
// ============================================================================

/// A code drawn from a code system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coding {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            code: Some(code.into()),
            display: None,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// Whether both codings carry the same system and code. Display text is ignored.
    pub fn same_code(&self, other: &Coding) -> bool {
        self.system == other.system && self.code == other.code
    }

    /// Renders the coding as a FHIR search token (`system|code`).
    pub fn to_token(&self) -> String {
        let parts: Vec<&str> = [self.system.as_deref(), self.code.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        parts.join("|")
    }
}

impl fmt::Display for Coding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_token())
    }
}

/// A concept expressed by zero or more codings and/or text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConcept {
    pub fn from_coding(coding: Coding) -> Self {
        Self {
            coding: vec![coding],
            text: None,
        }
    }

    pub fn has_coding(&self, coding: &Coding) -> bool {
        self.coding.iter().any(|c| c.same_code(coding))
    }

    pub fn has_any_coding(&self, codings: &[Coding]) -> bool {
        codings.iter().any(|c| self.has_coding(c))
    }

    /// Text if present, else the display of the first coding that has one.
    pub fn label(&self) -> Option<&str> {
        self.text
            .as_deref()
            .or_else(|| self.coding.iter().find_map(|c| c.display.as_deref()))
    }
}

// ============================================================================
// Quantity / Period / Reference
// ============================================================================

/// A measured amount.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Quantity {
    /// A UCUM quantity whose unit doubles as its code.
    pub fn ucum(value: f64, unit: impl Into<String>) -> Self {
        let unit = unit.into();
        Self {
            value: Some(value),
            unit: Some(unit.clone()),
            system: Some("http://unitsofmeasure.org".into()),
            code: Some(unit),
        }
    }
}

/// A time range; either bound may be open.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

/// A reference from one resource to another, literal and/or logical.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Reference {
    pub fn to(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            identifier: None,
            display: None,
        }
    }
}

// ============================================================================
// Extension
// ============================================================================

/// A FHIR extension. Only the value types used by the engine are modelled.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_coding: Option<Coding>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_uri: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_boolean: Option<bool>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
}

impl Extension {
    /// The value rendered as a string, for primitive-typed values.
    pub fn primitive_value(&self) -> Option<&str> {
        self.value_uri.as_deref().or(self.value_string.as_deref())
    }

    /// First nested extension with the given URL.
    pub fn nested(&self, url: &str) -> Option<&Extension> {
        find_extension(&self.extension, url)
    }
}

/// First extension in `extensions` with the given URL.
pub fn find_extension<'a>(extensions: &'a [Extension], url: &str) -> Option<&'a Extension> {
    extensions.iter().find(|e| e.url == url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_without_use_match_on_system_and_value() {
        let a = Identifier::new("urn:sys", "123");
        let b = Identifier::new("urn:sys", "123");
        assert!(a.matches(&b));

        let c = Identifier::new("urn:sys", "456");
        assert!(!a.matches(&c));

        let d = Identifier::new("urn:other", "123");
        assert!(!a.matches(&d));
    }

    #[test]
    fn usual_and_official_uses_are_compatible() {
        let usual = Identifier::new("urn:sys", "1").with_use(IdentifierUse::Usual);
        let official = Identifier::new("urn:sys", "1").with_use(IdentifierUse::Official);
        assert!(usual.matches(&official));
        assert!(official.matches(&usual));
    }

    #[test]
    fn differing_or_one_sided_uses_do_not_match() {
        let temp = Identifier::new("urn:sys", "1").with_use(IdentifierUse::Temp);
        let usual = Identifier::new("urn:sys", "1").with_use(IdentifierUse::Usual);
        let none = Identifier::new("urn:sys", "1");

        assert!(!temp.matches(&usual));
        assert!(!none.matches(&usual));
        assert!(temp.matches(&temp.clone()));
    }

    #[test]
    fn absent_system_matches_only_absent_system() {
        let a = Identifier {
            use_type: None,
            system: None,
            value: Some("1".into()),
        };
        let b = Identifier::new("urn:sys", "1");
        assert!(!a.matches(&b));
        assert!(a.matches(&a.clone()));
    }

    #[test]
    fn codeable_concept_matches_system_and_code_ignoring_display() {
        let cc = CodeableConcept::from_coding(
            Coding::new("http://loinc.org", "8480-6").with_display("Systolic blood pressure"),
        );
        assert!(cc.has_coding(&Coding::new("http://loinc.org", "8480-6")));
        assert!(!cc.has_coding(&Coding::new("http://loinc.org", "8462-4")));
        assert!(cc.has_any_coding(&[
            Coding::new("http://loinc.org", "8462-4"),
            Coding::new("http://loinc.org", "8480-6"),
        ]));
        assert_eq!(cc.label(), Some("Systolic blood pressure"));
    }

    #[test]
    fn coding_token_joins_present_parts() {
        assert_eq!(
            Coding::new("http://loinc.org", "8867-4").to_token(),
            "http://loinc.org|8867-4"
        );
        let code_only = Coding {
            code: Some("abc".into()),
            ..Default::default()
        };
        assert_eq!(code_only.to_token(), "abc");
    }
}
