use crate::{CoachError, CoachResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the subject (patient) whose data is being reconciled.
///
/// Doubles as the remote `Patient` logical id and as a directory name in the local store, so it
/// is restricted to ASCII letters, digits, `-`, `_` and `.` (and may not be `.` or `..`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(value: impl Into<String>) -> CoachResult<Self> {
        let value = value.into();
        let trimmed = value.trim();

        if trimmed.is_empty() {
            return Err(CoachError::InvalidInput("subject id cannot be empty".into()));
        }
        if trimmed == "." || trimmed == ".." {
            return Err(CoachError::InvalidInput(format!(
                "subject id '{trimmed}' is not allowed"
            )));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(CoachError::InvalidInput(format!(
                "subject id '{trimmed}' contains unsupported characters"
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative FHIR reference to the subject's `Patient` resource.
    pub fn patient_reference(&self) -> String {
        format!("Patient/{}", self.0)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SubjectId {
    type Error = CoachError;

    fn try_from(value: String) -> CoachResult<Self> {
        Self::new(value)
    }
}

impl From<SubjectId> for String {
    fn from(value: SubjectId) -> Self {
        value.0
    }
}
