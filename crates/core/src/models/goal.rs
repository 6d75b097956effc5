//! Canonical care goals.

use crate::{CoachError, CoachResult};
use chrono::{DateTime, NaiveDate, Utc};
use fhir::Coding;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Who owns the goal record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoalAuthorship {
    /// Created in this application and held in the local store.
    Local,
    /// Read from the remote clinical record.
    Remote,
}

/// FHIR `goal-status` lifecycle codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleStatus {
    Proposed,
    Planned,
    Accepted,
    Active,
    OnHold,
    Completed,
    Cancelled,
    EnteredInError,
    Rejected,
}

impl LifecycleStatus {
    pub fn fhir_code(self) -> &'static str {
        match self {
            LifecycleStatus::Proposed => "proposed",
            LifecycleStatus::Planned => "planned",
            LifecycleStatus::Accepted => "accepted",
            LifecycleStatus::Active => "active",
            LifecycleStatus::OnHold => "on-hold",
            LifecycleStatus::Completed => "completed",
            LifecycleStatus::Cancelled => "cancelled",
            LifecycleStatus::EnteredInError => "entered-in-error",
            LifecycleStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for LifecycleStatus {
    type Err = CoachError;

    fn from_str(s: &str) -> CoachResult<Self> {
        let status = match s.trim().to_ascii_lowercase().as_str() {
            "proposed" => LifecycleStatus::Proposed,
            "planned" => LifecycleStatus::Planned,
            "accepted" => LifecycleStatus::Accepted,
            "active" => LifecycleStatus::Active,
            "on-hold" => LifecycleStatus::OnHold,
            "completed" => LifecycleStatus::Completed,
            "cancelled" => LifecycleStatus::Cancelled,
            "entered-in-error" => LifecycleStatus::EnteredInError,
            "rejected" => LifecycleStatus::Rejected,
            other => {
                return Err(CoachError::Data(format!(
                    "unknown goal lifecycle status '{other}'"
                )))
            }
        };
        Ok(status)
    }
}

/// FHIR `goal-achievement` codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AchievementStatus {
    InProgress,
    Improving,
    Worsening,
    NoChange,
    Achieved,
    Sustaining,
    NotAchieved,
    NoProgress,
    NotAttainable,
}

impl AchievementStatus {
    pub fn fhir_code(self) -> &'static str {
        match self {
            AchievementStatus::InProgress => "in-progress",
            AchievementStatus::Improving => "improving",
            AchievementStatus::Worsening => "worsening",
            AchievementStatus::NoChange => "no-change",
            AchievementStatus::Achieved => "achieved",
            AchievementStatus::Sustaining => "sustaining",
            AchievementStatus::NotAchieved => "not-achieved",
            AchievementStatus::NoProgress => "no-progress",
            AchievementStatus::NotAttainable => "not-attainable",
        }
    }
}

impl FromStr for AchievementStatus {
    type Err = CoachError;

    fn from_str(s: &str) -> CoachResult<Self> {
        let status = match s.trim().to_ascii_lowercase().as_str() {
            "in-progress" => AchievementStatus::InProgress,
            "improving" => AchievementStatus::Improving,
            "worsening" => AchievementStatus::Worsening,
            "no-change" => AchievementStatus::NoChange,
            "achieved" => AchievementStatus::Achieved,
            "sustaining" => AchievementStatus::Sustaining,
            "not-achieved" => AchievementStatus::NotAchieved,
            "no-progress" => AchievementStatus::NoProgress,
            "not-attainable" => AchievementStatus::NotAttainable,
            other => {
                return Err(CoachError::Data(format!(
                    "unknown goal achievement status '{other}'"
                )))
            }
        };
        Ok(status)
    }
}

/// One recorded achievement status, in the order it was recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalHistoryEntry {
    pub achievement_status: AchievementStatus,
    pub recorded_at: DateTime<Utc>,
}

/// What the goal is aiming for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum GoalTarget {
    /// Keep blood pressure at or below these values.
    BloodPressure { systolic: u32, diastolic: u32 },
    /// A free-text goal described by its coding and description.
    Other,
}

/// Fields supplied when creating a new local goal.
#[derive(Clone, Debug, PartialEq)]
pub struct GoalDraft {
    pub referent: Coding,
    pub description: String,
    pub target: GoalTarget,
    pub target_date: Option<NaiveDate>,
}

/// A care goal.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Goal {
    ext_goal_id: String,
    authorship: GoalAuthorship,
    referent: Coding,
    description: String,
    target: GoalTarget,
    target_date: Option<NaiveDate>,
    created: DateTime<Utc>,
    lifecycle_status: LifecycleStatus,
    history: Vec<GoalHistoryEntry>,
}

impl Goal {
    /// A new local goal: active, with a single "in progress" history entry at `created`.
    pub fn new_local(draft: GoalDraft, ext_goal_id: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            ext_goal_id: ext_goal_id.into(),
            authorship: GoalAuthorship::Local,
            referent: draft.referent,
            description: draft.description,
            target: draft.target,
            target_date: draft.target_date,
            created,
            lifecycle_status: LifecycleStatus::Active,
            history: vec![GoalHistoryEntry {
                achievement_status: AchievementStatus::InProgress,
                recorded_at: created,
            }],
        }
    }

    /// Rebuild a goal from stored or remote parts.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        ext_goal_id: impl Into<String>,
        authorship: GoalAuthorship,
        referent: Coding,
        description: String,
        target: GoalTarget,
        target_date: Option<NaiveDate>,
        created: DateTime<Utc>,
        lifecycle_status: LifecycleStatus,
        history: Vec<GoalHistoryEntry>,
    ) -> CoachResult<Self> {
        let ext_goal_id = ext_goal_id.into();
        if ext_goal_id.trim().is_empty() {
            return Err(CoachError::Data("goal id cannot be empty".into()));
        }
        if let GoalTarget::BloodPressure {
            systolic,
            diastolic,
        } = target
        {
            if systolic == 0 || diastolic == 0 {
                return Err(CoachError::Data(format!(
                    "goal {ext_goal_id} has a zero blood pressure target"
                )));
            }
        }

        Ok(Self {
            ext_goal_id,
            authorship,
            referent,
            description,
            target,
            target_date,
            created,
            lifecycle_status,
            history,
        })
    }

    /// Stable identity of the goal.
    pub fn ext_goal_id(&self) -> &str {
        &self.ext_goal_id
    }

    pub fn authorship(&self) -> GoalAuthorship {
        self.authorship
    }

    pub fn is_remote(&self) -> bool {
        self.authorship == GoalAuthorship::Remote
    }

    pub fn referent(&self) -> &Coding {
        &self.referent
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn target(&self) -> GoalTarget {
        self.target
    }

    pub fn target_date(&self) -> Option<NaiveDate> {
        self.target_date
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn lifecycle_status(&self) -> LifecycleStatus {
        self.lifecycle_status
    }

    pub fn history(&self) -> &[GoalHistoryEntry] {
        &self.history
    }

    /// A goal is a blood pressure goal when it sets both a systolic and a diastolic target.
    pub fn is_bp_goal(&self) -> bool {
        matches!(self.target, GoalTarget::BloodPressure { .. })
    }

    /// The most recently recorded achievement status.
    pub fn current_achievement(&self) -> Option<AchievementStatus> {
        self.history.last().map(|h| h.achievement_status)
    }

    pub fn record_achievement(&mut self, status: AchievementStatus, at: DateTime<Utc>) {
        self.history.push(GoalHistoryEntry {
            achievement_status: status,
            recorded_at: at,
        });
    }

    pub fn set_lifecycle_status(&mut self, status: LifecycleStatus) {
        self.lifecycle_status = status;
    }

    pub fn set_target(&mut self, target: GoalTarget) {
        self.target = target;
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn set_target_date(&mut self, target_date: Option<NaiveDate>) {
        self.target_date = target_date;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn draft(target: GoalTarget) -> GoalDraft {
        GoalDraft {
            referent: Coding::new("http://loinc.org", "55284-4"),
            description: "Blood pressure".into(),
            target,
            target_date: None,
        }
    }

    #[test]
    fn new_local_goal_starts_in_progress() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let goal = Goal::new_local(
            draft(GoalTarget::BloodPressure {
                systolic: 140,
                diastolic: 90,
            }),
            "g-1",
            created,
        );

        assert!(goal.is_bp_goal());
        assert_eq!(goal.authorship(), GoalAuthorship::Local);
        assert_eq!(goal.lifecycle_status(), LifecycleStatus::Active);
        assert_eq!(goal.current_achievement(), Some(AchievementStatus::InProgress));
        assert_eq!(goal.history()[0].recorded_at, created);
    }

    #[test]
    fn history_is_append_only_and_ordered() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut goal = Goal::new_local(draft(GoalTarget::Other), "g-2", created);
        assert!(!goal.is_bp_goal());

        goal.record_achievement(AchievementStatus::Improving, created + chrono::Duration::days(7));
        goal.record_achievement(AchievementStatus::Achieved, created + chrono::Duration::days(30));

        let codes: Vec<_> = goal.history().iter().map(|h| h.achievement_status.fhir_code()).collect();
        assert_eq!(codes, vec!["in-progress", "improving", "achieved"]);
        assert_eq!(goal.current_achievement(), Some(AchievementStatus::Achieved));
    }

    #[test]
    fn status_codes_round_trip() {
        for status in [
            LifecycleStatus::OnHold,
            LifecycleStatus::EnteredInError,
            LifecycleStatus::Active,
        ] {
            assert_eq!(status.fhir_code().parse::<LifecycleStatus>().unwrap(), status);
        }
        for status in [AchievementStatus::NotAttainable, AchievementStatus::InProgress] {
            assert_eq!(status.fhir_code().parse::<AchievementStatus>().unwrap(), status);
        }
        assert!("paused".parse::<LifecycleStatus>().unwrap_err().is_data_error());
    }

    #[test]
    fn from_parts_rejects_empty_ids() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let err = Goal::from_parts(
            " ",
            GoalAuthorship::Remote,
            Coding::default(),
            String::new(),
            GoalTarget::Other,
            None,
            created,
            LifecycleStatus::Active,
            vec![],
        )
        .unwrap_err();
        assert!(err.is_data_error());
    }
}
