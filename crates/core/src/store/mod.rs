//! The durable per-subject local store.
//!
//! The store owns locally created readings and goals, plus the cache of readings synchronised
//! from the subject's home device. [`FileStore`] is the production implementation.

pub mod file;

pub use file::FileStore;

use crate::models::{Goal, Reading, ReadingKind, ReadingSource, SubjectId};
use crate::CoachResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Local persistence for one deployment. Every operation is scoped to a subject.
///
/// Implementations must hold at most one blood pressure goal per subject and reject a second
/// one with [`CoachError::GoalConflict`](crate::CoachError::GoalConflict).
pub trait LocalStore: Send + Sync {
    /// Manually entered readings of `kind`, in the order they were saved.
    fn find_readings(&self, subject: &SubjectId, kind: ReadingKind) -> CoachResult<Vec<Reading>>;

    /// Persist a manually entered reading, assigning an id when it has none.
    fn save_reading(&self, subject: &SubjectId, reading: Reading) -> CoachResult<Reading>;

    fn delete_reading(&self, subject: &SubjectId, kind: ReadingKind, id: &str) -> CoachResult<bool>;

    fn delete_all_readings(&self, subject: &SubjectId, kind: ReadingKind) -> CoachResult<usize>;

    fn find_device_vitals(&self, subject: &SubjectId) -> CoachResult<Vec<DeviceVitals>>;

    /// Replace the device cache with `vitals`.
    fn save_device_vitals(&self, subject: &SubjectId, vitals: &[DeviceVitals]) -> CoachResult<()>;

    /// Local goals, in the order they were first saved.
    fn find_goals(&self, subject: &SubjectId) -> CoachResult<Vec<Goal>>;

    fn find_current_bp_goal(&self, subject: &SubjectId) -> CoachResult<Option<Goal>>;

    fn find_goal(&self, subject: &SubjectId, ext_goal_id: &str) -> CoachResult<Option<Goal>>;

    /// Insert a goal, or replace the stored goal with the same id.
    fn save_goal(&self, subject: &SubjectId, goal: Goal) -> CoachResult<Goal>;

    fn delete_goal(&self, subject: &SubjectId, ext_goal_id: &str) -> CoachResult<bool>;

    fn delete_bp_goal(&self, subject: &SubjectId) -> CoachResult<bool>;

    fn delete_all_goals(&self, subject: &SubjectId) -> CoachResult<usize>;
}

/// One measurement synchronised from a home device. A single measurement may carry blood
/// pressure, pulse, or both.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceVitals {
    pub id: String,
    pub measured_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub systolic: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diastolic: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pulse: Option<f64>,
}

impl DeviceVitals {
    /// The reading of `kind` this measurement carries, if any.
    pub fn reading(&self, kind: ReadingKind) -> CoachResult<Option<Reading>> {
        let reading = match kind {
            ReadingKind::BloodPressure if self.systolic.is_some() || self.diastolic.is_some() => {
                Reading::blood_pressure(
                    ReadingSource::HomeDevice,
                    self.measured_at,
                    self.systolic,
                    self.diastolic,
                )?
            }
            ReadingKind::Pulse => match self.pulse {
                Some(bpm) => Reading::pulse(ReadingSource::HomeDevice, self.measured_at, bpm)?,
                None => return Ok(None),
            },
            ReadingKind::BloodPressure => return Ok(None),
        };
        Ok(Some(reading.with_id(self.id.clone())))
    }
}
