//! File-backed [`LocalStore`].
//!
//! Layout: one YAML document per subject and collection.
//!
//! ```text
//! <data_dir>/
//!   <subject>/
//!     bp_readings.yaml
//!     pulse_readings.yaml
//!     device_vitals.yaml
//!     goals.yaml
//! ```
//!
//! Each document is a YAML sequence of strict records. A record that no longer parses is logged
//! and skipped so one bad entry does not hide the rest; writes carry it through unchanged. Writes go to a temporary sibling file
//! that is then renamed over the original, and are serialised by a store-wide lock.

use super::{DeviceVitals, LocalStore};
use crate::constants::{
    BP_READINGS_FILENAME, DEVICE_VITALS_FILENAME, GOALS_FILENAME, PULSE_READINGS_FILENAME,
};
use crate::models::{
    Goal, GoalAuthorship, GoalHistoryEntry, GoalTarget, LifecycleStatus, Reading, ReadingKind,
    ReadingSource, ReadingValue, SubjectId,
};
use crate::{CoachError, CoachResult};
use chrono::{DateTime, NaiveDate, Utc};
use fhir::Coding;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub struct FileStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadingRecord {
    id: String,
    source: ReadingSource,
    effective: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    systolic: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    diastolic: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pulse: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    protocol_followed: Option<bool>,
}

impl ReadingRecord {
    fn from_reading(id: String, reading: &Reading) -> Self {
        let (systolic, diastolic, pulse) = match reading.value() {
            ReadingValue::BloodPressure {
                systolic,
                diastolic,
            } => (systolic, diastolic, None),
            ReadingValue::Pulse { bpm } => (None, None, Some(bpm)),
        };
        Self {
            id,
            source: reading.source(),
            effective: reading.effective(),
            systolic,
            diastolic,
            pulse,
            protocol_followed: reading.protocol_followed(),
        }
    }

    fn into_reading(self, kind: ReadingKind) -> CoachResult<Reading> {
        let reading = match kind {
            ReadingKind::BloodPressure => {
                Reading::blood_pressure(self.source, self.effective, self.systolic, self.diastolic)?
            }
            ReadingKind::Pulse => {
                let bpm = self.pulse.ok_or_else(|| {
                    CoachError::Data(format!("pulse record {} has no value", self.id))
                })?;
                Reading::pulse(self.source, self.effective, bpm)?
            }
        };
        Ok(reading
            .with_id(self.id)
            .with_protocol_followed(self.protocol_followed))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct GoalRecord {
    id: String,
    referent: Coding,
    description: String,
    target: GoalTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_date: Option<NaiveDate>,
    created: DateTime<Utc>,
    lifecycle_status: LifecycleStatus,
    #[serde(default)]
    history: Vec<GoalHistoryEntry>,
}

impl GoalRecord {
    fn from_goal(goal: &Goal) -> Self {
        Self {
            id: goal.ext_goal_id().to_string(),
            referent: goal.referent().clone(),
            description: goal.description().to_string(),
            target: goal.target(),
            target_date: goal.target_date(),
            created: goal.created(),
            lifecycle_status: goal.lifecycle_status(),
            history: goal.history().to_vec(),
        }
    }

    fn into_goal(self) -> CoachResult<Goal> {
        Goal::from_parts(
            self.id,
            GoalAuthorship::Local,
            self.referent,
            self.description,
            self.target,
            self.target_date,
            self.created,
            self.lifecycle_status,
            self.history,
        )
    }
}

impl FileStore {
    /// Open a store rooted at `data_dir`, creating the directory if needed.
    pub fn new(data_dir: impl Into<PathBuf>) -> CoachResult<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(CoachError::StorageDirCreation)?;
        Ok(Self {
            data_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn subject_file(&self, subject: &SubjectId, name: &str) -> PathBuf {
        self.data_dir.join(subject.as_str()).join(name)
    }

    fn readings_file(&self, subject: &SubjectId, kind: ReadingKind) -> PathBuf {
        let name = match kind {
            ReadingKind::BloodPressure => BP_READINGS_FILENAME,
            ReadingKind::Pulse => PULSE_READINGS_FILENAME,
        };
        self.subject_file(subject, name)
    }

    fn read_records<T: DeserializeOwned>(&self, path: &Path) -> CoachResult<Vec<T>> {
        Ok(self.load_records(path)?.0)
    }

    /// Parsed records, plus the raw entries that no longer parse.
    fn load_records<T: DeserializeOwned>(
        &self,
        path: &Path,
    ) -> CoachResult<(Vec<T>, Vec<serde_yaml::Value>)> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), Vec::new())),
            Err(e) => return Err(CoachError::FileRead(e)),
        };
        if text.trim().is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let values: Vec<serde_yaml::Value> =
            serde_yaml::from_str(&text).map_err(CoachError::YamlDeserialization)?;

        let mut records = Vec::with_capacity(values.len());
        let mut unreadable = Vec::new();
        for (index, value) in values.into_iter().enumerate() {
            match serde_yaml::from_value(value.clone()) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(file = %path.display(), index, error = %err, "skipping unreadable record");
                    unreadable.push(value);
                }
            }
        }
        Ok((records, unreadable))
    }

    fn write_records<T: Serialize>(&self, path: &Path, records: &[T]) -> CoachResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(CoachError::StorageDirCreation)?;
        }
        let yaml = serde_yaml::to_string(records).map_err(CoachError::YamlSerialization)?;

        let tmp = path.with_extension("yaml.tmp");
        fs::write(&tmp, yaml).map_err(CoachError::FileWrite)?;
        fs::rename(&tmp, path).map_err(CoachError::FileWrite)?;
        Ok(())
    }

    /// Read-modify-write under the store lock. Unreadable entries survive the rewrite.
    fn update<T, R>(
        &self,
        path: &Path,
        change: impl FnOnce(&mut Vec<T>) -> CoachResult<R>,
    ) -> CoachResult<R>
    where
        T: Serialize + DeserializeOwned,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut records, unreadable) = self.load_records(path)?;
        let result = change(&mut records)?;

        // Entries that do not parse are written back untouched after the known records.
        let mut values = records
            .iter()
            .map(serde_yaml::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(CoachError::YamlSerialization)?;
        if !unreadable.is_empty() {
            tracing::warn!(file = %path.display(), count = unreadable.len(), "preserving unreadable records");
            values.extend(unreadable);
        }
        self.write_records(path, &values)?;
        Ok(result)
    }

    fn load_goals(&self, subject: &SubjectId) -> CoachResult<Vec<Goal>> {
        let records: Vec<GoalRecord> = self.read_records(&self.subject_file(subject, GOALS_FILENAME))?;
        Ok(records
            .into_iter()
            .filter_map(|record| {
                let id = record.id.clone();
                match record.into_goal() {
                    Ok(goal) => Some(goal),
                    Err(err) => {
                        tracing::warn!(subject = %subject, goal = %id, error = %err, "skipping unreadable goal");
                        None
                    }
                }
            })
            .collect())
    }
}

impl LocalStore for FileStore {
    fn find_readings(&self, subject: &SubjectId, kind: ReadingKind) -> CoachResult<Vec<Reading>> {
        let records: Vec<ReadingRecord> = self.read_records(&self.readings_file(subject, kind))?;
        Ok(records
            .into_iter()
            .filter_map(|record| {
                let id = record.id.clone();
                match record.into_reading(kind) {
                    Ok(reading) => Some(reading),
                    Err(err) => {
                        tracing::warn!(subject = %subject, reading = %id, error = %err, "skipping unreadable reading");
                        None
                    }
                }
            })
            .collect())
    }

    fn save_reading(&self, subject: &SubjectId, reading: Reading) -> CoachResult<Reading> {
        let id = reading
            .id()
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let record = ReadingRecord::from_reading(id.clone(), &reading);

        self.update(&self.readings_file(subject, reading.kind()), |records: &mut Vec<ReadingRecord>| {
            match records.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => records.push(record),
            }
            Ok(())
        })?;

        tracing::debug!(subject = %subject, reading = %id, kind = %reading.kind(), "saved reading");
        Ok(reading.with_id(id))
    }

    fn delete_reading(&self, subject: &SubjectId, kind: ReadingKind, id: &str) -> CoachResult<bool> {
        self.update(&self.readings_file(subject, kind), |records: &mut Vec<ReadingRecord>| {
            let before = records.len();
            records.retain(|r| r.id != id);
            Ok(records.len() != before)
        })
    }

    fn delete_all_readings(&self, subject: &SubjectId, kind: ReadingKind) -> CoachResult<usize> {
        self.update(&self.readings_file(subject, kind), |records: &mut Vec<ReadingRecord>| {
            let count = records.len();
            records.clear();
            Ok(count)
        })
    }

    fn find_device_vitals(&self, subject: &SubjectId) -> CoachResult<Vec<DeviceVitals>> {
        self.read_records(&self.subject_file(subject, DEVICE_VITALS_FILENAME))
    }

    fn save_device_vitals(&self, subject: &SubjectId, vitals: &[DeviceVitals]) -> CoachResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_records(&self.subject_file(subject, DEVICE_VITALS_FILENAME), vitals)
    }

    fn find_goals(&self, subject: &SubjectId) -> CoachResult<Vec<Goal>> {
        self.load_goals(subject)
    }

    fn find_current_bp_goal(&self, subject: &SubjectId) -> CoachResult<Option<Goal>> {
        Ok(self.load_goals(subject)?.into_iter().find(Goal::is_bp_goal))
    }

    fn find_goal(&self, subject: &SubjectId, ext_goal_id: &str) -> CoachResult<Option<Goal>> {
        Ok(self
            .load_goals(subject)?
            .into_iter()
            .find(|g| g.ext_goal_id() == ext_goal_id))
    }

    fn save_goal(&self, subject: &SubjectId, goal: Goal) -> CoachResult<Goal> {
        if goal.is_remote() {
            return Err(CoachError::InvalidInput(format!(
                "goal {} is owned by the remote record system",
                goal.ext_goal_id()
            )));
        }
        let record = GoalRecord::from_goal(&goal);
        let is_bp_goal = goal.is_bp_goal();

        self.update(&self.subject_file(subject, GOALS_FILENAME), |records: &mut Vec<GoalRecord>| {
            let other_bp_goal = records.iter().any(|r| {
                r.id != record.id && matches!(r.target, GoalTarget::BloodPressure { .. })
            });
            if is_bp_goal && other_bp_goal {
                return Err(CoachError::GoalConflict {
                    subject: subject.to_string(),
                });
            }
            match records.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => records.push(record),
            }
            Ok(())
        })?;

        tracing::debug!(subject = %subject, goal = %goal.ext_goal_id(), "saved goal");
        Ok(goal)
    }

    fn delete_goal(&self, subject: &SubjectId, ext_goal_id: &str) -> CoachResult<bool> {
        self.update(&self.subject_file(subject, GOALS_FILENAME), |records: &mut Vec<GoalRecord>| {
            let before = records.len();
            records.retain(|r| r.id != ext_goal_id);
            Ok(records.len() != before)
        })
    }

    fn delete_bp_goal(&self, subject: &SubjectId) -> CoachResult<bool> {
        self.update(&self.subject_file(subject, GOALS_FILENAME), |records: &mut Vec<GoalRecord>| {
            let before = records.len();
            records.retain(|r| !matches!(r.target, GoalTarget::BloodPressure { .. }));
            Ok(records.len() != before)
        })
    }

    fn delete_all_goals(&self, subject: &SubjectId) -> CoachResult<usize> {
        self.update(&self.subject_file(subject, GOALS_FILENAME), |records: &mut Vec<GoalRecord>| {
            let count = records.len();
            records.clear();
            Ok(count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AchievementStatus, GoalDraft};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("data")).unwrap();
        (dir, store)
    }

    fn subject() -> SubjectId {
        SubjectId::new("patient-1").unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn bp(hour: u32) -> Reading {
        Reading::blood_pressure(ReadingSource::Home, at(hour), Some(120.0), Some(80.0)).unwrap()
    }

    fn bp_goal(id: &str) -> Goal {
        Goal::new_local(
            GoalDraft {
                referent: Coding::new("http://loinc.org", "55284-4"),
                description: "Blood pressure".into(),
                target: GoalTarget::BloodPressure {
                    systolic: 130,
                    diastolic: 80,
                },
                target_date: None,
            },
            id,
            at(8),
        )
    }

    fn other_goal(id: &str) -> Goal {
        Goal::new_local(
            GoalDraft {
                referent: Coding::new("urn:coach:goal", "walk"),
                description: "Walk 30 minutes".into(),
                target: GoalTarget::Other,
                target_date: NaiveDate::from_ymd_opt(2024, 12, 1),
            },
            id,
            at(9),
        )
    }

    #[test]
    fn readings_round_trip_in_save_order() {
        let (_dir, store) = store();
        let first = store.save_reading(&subject(), bp(9).with_protocol_followed(Some(true))).unwrap();
        store.save_reading(&subject(), bp(7)).unwrap();

        assert!(first.id().is_some());
        let readings = store.find_readings(&subject(), ReadingKind::BloodPressure).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0], first);
        assert_eq!(readings[0].protocol_followed(), Some(true));
        assert_eq!(readings[1].effective(), at(7));

        assert!(store.find_readings(&subject(), ReadingKind::Pulse).unwrap().is_empty());
    }

    #[test]
    fn missing_subject_has_no_data() {
        let (_dir, store) = store();
        let nobody = SubjectId::new("nobody").unwrap();
        assert!(store.find_readings(&nobody, ReadingKind::BloodPressure).unwrap().is_empty());
        assert!(store.find_goals(&nobody).unwrap().is_empty());
        assert!(store.find_current_bp_goal(&nobody).unwrap().is_none());
    }

    #[test]
    fn deletes_readings_by_id_and_in_bulk() {
        let (_dir, store) = store();
        let saved = store.save_reading(&subject(), bp(9)).unwrap();
        store.save_reading(&subject(), bp(10)).unwrap();
        store.save_reading(&subject(), bp(11)).unwrap();

        assert!(store
            .delete_reading(&subject(), ReadingKind::BloodPressure, saved.id().unwrap())
            .unwrap());
        assert!(!store
            .delete_reading(&subject(), ReadingKind::BloodPressure, "missing")
            .unwrap());
        assert_eq!(
            store.delete_all_readings(&subject(), ReadingKind::BloodPressure).unwrap(),
            2
        );
    }

    #[test]
    fn corrupt_records_are_skipped() {
        let (_dir, store) = store();
        store.save_reading(&subject(), bp(9)).unwrap();

        let path = store.readings_file(&subject(), ReadingKind::BloodPressure);
        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str("- id: broken\n  source: HOME\n  effective: 2024-05-01T10:00:00Z\n  colour: red\n");
        fs::write(&path, text).unwrap();

        let readings = store.find_readings(&subject(), ReadingKind::BloodPressure).unwrap();
        assert_eq!(readings.len(), 1);
    }

    #[test]
    fn unreadable_records_survive_unrelated_writes() {
        let (_dir, store) = store();
        let first = store.save_reading(&subject(), bp(9)).unwrap();

        let path = store.readings_file(&subject(), ReadingKind::BloodPressure);
        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str("- id: kept-by-user\n  source: HOME\n  effective: 2024-05-01T10:00:00Z\n  note: cuff slipped\n");
        fs::write(&path, text).unwrap();

        store.save_reading(&subject(), bp(11)).unwrap();
        assert!(store
            .delete_reading(&subject(), ReadingKind::BloodPressure, first.id().unwrap())
            .unwrap());

        let after = fs::read_to_string(&path).unwrap();
        assert!(after.contains("kept-by-user"));
        assert!(after.contains("cuff slipped"));
        let readings = store.find_readings(&subject(), ReadingKind::BloodPressure).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].effective(), at(11));
    }

    #[test]
    fn a_second_bp_goal_is_a_conflict() {
        let (_dir, store) = store();
        store.save_goal(&subject(), bp_goal("g1")).unwrap();
        store.save_goal(&subject(), other_goal("g2")).unwrap();

        let err = store.save_goal(&subject(), bp_goal("g3")).unwrap_err();
        assert!(matches!(err, CoachError::GoalConflict { .. }));

        let mut updated = bp_goal("g1");
        updated.record_achievement(AchievementStatus::Achieved, at(12));
        store.save_goal(&subject(), updated).unwrap();

        let current = store.find_current_bp_goal(&subject()).unwrap().unwrap();
        assert_eq!(current.ext_goal_id(), "g1");
        assert_eq!(current.current_achievement(), Some(AchievementStatus::Achieved));
        assert_eq!(store.find_goals(&subject()).unwrap().len(), 2);
    }

    #[test]
    fn goals_round_trip_and_delete() {
        let (_dir, store) = store();
        let goal = other_goal("g2");
        store.save_goal(&subject(), goal.clone()).unwrap();
        store.save_goal(&subject(), bp_goal("g1")).unwrap();

        assert_eq!(store.find_goal(&subject(), "g2").unwrap(), Some(goal));
        assert!(store.delete_bp_goal(&subject()).unwrap());
        assert!(!store.delete_bp_goal(&subject()).unwrap());
        assert!(store.delete_goal(&subject(), "g2").unwrap());
        assert_eq!(store.delete_all_goals(&subject()).unwrap(), 0);
    }

    #[test]
    fn device_cache_is_replaced_wholesale() {
        let (_dir, store) = store();
        let vitals = |id: &str| DeviceVitals {
            id: id.into(),
            measured_at: at(6),
            systolic: None,
            diastolic: None,
            pulse: Some(60.0),
        };
        store.save_device_vitals(&subject(), &[vitals("a"), vitals("b")]).unwrap();
        store.save_device_vitals(&subject(), &[vitals("c")]).unwrap();

        let cached = store.find_device_vitals(&subject()).unwrap();
        assert_eq!(cached, vec![vitals("c")]);
    }
}
