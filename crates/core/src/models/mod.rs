//! Canonical reading and goal models shared by every source.

pub mod goal;
pub mod reading;
pub mod subject;

pub use goal::{
    AchievementStatus, Goal, GoalAuthorship, GoalDraft, GoalHistoryEntry, GoalTarget,
    LifecycleStatus,
};
pub use reading::{
    truncate_to_minute, LogicalEqualityKey, Reading, ReadingKind, ReadingSource, ReadingValue,
    SourceCategory,
};
pub use subject::SubjectId;
