//! Canonical vital-sign readings.
//!
//! A [`Reading`] is immutable once constructed. The constructors enforce that at least one value
//! is present, so every reading in the system is displayable and comparable.

use crate::{CoachError, CoachResult};
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a reading was captured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadingSource {
    /// Measured in a clinic and entered manually.
    Office,
    /// Measured at home and entered manually, or annotated as home by the remote record.
    Home,
    /// Synchronised from a connected home-monitoring device.
    HomeDevice,
    /// Recorded in the remote clinical record with no setting information.
    Ehr,
}

/// Coarse setting used for logical equality: a home device reading and a manual home entry of
/// the same event are the same event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceCategory {
    Home,
    Clinic,
}

impl ReadingSource {
    pub fn category(self) -> SourceCategory {
        match self {
            ReadingSource::Home | ReadingSource::HomeDevice => SourceCategory::Home,
            ReadingSource::Office | ReadingSource::Ehr => SourceCategory::Clinic,
        }
    }

    pub fn is_home(self) -> bool {
        self.category() == SourceCategory::Home
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReadingSource::Office => "OFFICE",
            ReadingSource::Home => "HOME",
            ReadingSource::HomeDevice => "HOME_DEVICE",
            ReadingSource::Ehr => "EHR",
        }
    }
}

impl fmt::Display for SourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceCategory::Home => f.write_str("HOME"),
            SourceCategory::Clinic => f.write_str("CLINIC"),
        }
    }
}

/// The measurement concept a reading carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    BloodPressure,
    Pulse,
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingKind::BloodPressure => f.write_str("BP"),
            ReadingKind::Pulse => f.write_str("PULSE"),
        }
    }
}

impl FromStr for ReadingKind {
    type Err = CoachError;

    fn from_str(s: &str) -> CoachResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bp" | "blood-pressure" | "blood_pressure" => Ok(ReadingKind::BloodPressure),
            "pulse" | "heart-rate" => Ok(ReadingKind::Pulse),
            other => Err(CoachError::InvalidInput(format!(
                "unknown reading kind '{other}'"
            ))),
        }
    }
}

/// Measured values.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ReadingValue {
    /// At least one of the two is present.
    BloodPressure {
        systolic: Option<f64>,
        diastolic: Option<f64>,
    },
    Pulse { bpm: f64 },
}

/// Identifies one real-world measurement event independent of the channel that captured it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LogicalEqualityKey {
    pub kind: ReadingKind,
    /// Effective time truncated to the minute.
    pub minute: DateTime<Utc>,
    pub category: SourceCategory,
}

impl fmt::Display for LogicalEqualityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.kind,
            self.minute.format("%Y-%m-%dT%H:%MZ"),
            self.category
        )
    }
}

/// Truncate an instant to the start of its minute.
pub fn truncate_to_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(instant)
}

/// A single vital-sign reading.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reading {
    id: Option<String>,
    source: ReadingSource,
    effective: DateTime<Utc>,
    value: ReadingValue,
    protocol_followed: Option<bool>,
}

impl Reading {
    /// A blood pressure reading.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Data`] if both values are absent, or a present value is not a
    /// positive finite number.
    pub fn blood_pressure(
        source: ReadingSource,
        effective: DateTime<Utc>,
        systolic: Option<f64>,
        diastolic: Option<f64>,
    ) -> CoachResult<Self> {
        if systolic.is_none() && diastolic.is_none() {
            return Err(CoachError::Data(
                "systolic and diastolic are both absent (at least one must be provided)".into(),
            ));
        }
        for value in [systolic, diastolic].into_iter().flatten() {
            check_measure(value)?;
        }

        Ok(Self {
            id: None,
            source,
            effective,
            value: ReadingValue::BloodPressure {
                systolic,
                diastolic,
            },
            protocol_followed: None,
        })
    }

    /// A pulse (heart rate) reading.
    pub fn pulse(source: ReadingSource, effective: DateTime<Utc>, bpm: f64) -> CoachResult<Self> {
        check_measure(bpm)?;
        Ok(Self {
            id: None,
            source,
            effective,
            value: ReadingValue::Pulse { bpm },
            protocol_followed: None,
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the protocol-followed answer. Ignored for pulse readings.
    pub fn with_protocol_followed(mut self, followed: Option<bool>) -> Self {
        if self.kind() == ReadingKind::BloodPressure {
            self.protocol_followed = followed;
        }
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn source(&self) -> ReadingSource {
        self.source
    }

    /// When the measurement was taken (not when it was recorded).
    pub fn effective(&self) -> DateTime<Utc> {
        self.effective
    }

    pub fn value(&self) -> ReadingValue {
        self.value
    }

    pub fn protocol_followed(&self) -> Option<bool> {
        self.protocol_followed
    }

    pub fn kind(&self) -> ReadingKind {
        match self.value {
            ReadingValue::BloodPressure { .. } => ReadingKind::BloodPressure,
            ReadingValue::Pulse { .. } => ReadingKind::Pulse,
        }
    }

    pub fn systolic(&self) -> Option<f64> {
        match self.value {
            ReadingValue::BloodPressure { systolic, .. } => systolic,
            ReadingValue::Pulse { .. } => None,
        }
    }

    pub fn diastolic(&self) -> Option<f64> {
        match self.value {
            ReadingValue::BloodPressure { diastolic, .. } => diastolic,
            ReadingValue::Pulse { .. } => None,
        }
    }

    pub fn pulse_bpm(&self) -> Option<f64> {
        match self.value {
            ReadingValue::Pulse { bpm } => Some(bpm),
            ReadingValue::BloodPressure { .. } => None,
        }
    }

    pub fn is_home_reading(&self) -> bool {
        self.source.is_home()
    }

    pub fn logical_equality_key(&self) -> LogicalEqualityKey {
        LogicalEqualityKey {
            kind: self.kind(),
            minute: truncate_to_minute(self.effective),
            category: self.source.category(),
        }
    }

    /// Short label for the kind of value carried.
    pub fn reading_type(&self) -> &'static str {
        match self.value {
            ReadingValue::BloodPressure {
                systolic: Some(_),
                diastolic: None,
            } => "Systolic",
            ReadingValue::BloodPressure {
                systolic: None,
                diastolic: Some(_),
            } => "Diastolic",
            ReadingValue::BloodPressure { .. } => "BP Panel",
            ReadingValue::Pulse { .. } => "Pulse",
        }
    }

    /// The value rendered with `unit`, for example `120/80 mm[Hg]` or `72 /min`.
    pub fn display_value(&self, unit: &str) -> String {
        let value = match self.value {
            ReadingValue::BloodPressure {
                systolic: Some(s),
                diastolic: Some(d),
            } => format!("{s}/{d}"),
            ReadingValue::BloodPressure {
                systolic: Some(v), ..
            }
            | ReadingValue::BloodPressure {
                diastolic: Some(v), ..
            } => v.to_string(),
            ReadingValue::BloodPressure { .. } => String::new(),
            ReadingValue::Pulse { bpm } => bpm.to_string(),
        };
        format!("{value} {unit}")
    }
}

fn check_measure(value: f64) -> CoachResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(CoachError::Data(format!("invalid measurement value {value}")))
    }
}
