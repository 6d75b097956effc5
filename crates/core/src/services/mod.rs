//! Reconciliation services. Each call runs within one [`RequestContext`](crate::context::RequestContext).

pub mod goals;
pub mod readings;

pub use goals::GoalService;
pub use readings::{merge_readings, MergedReadings, ReadingService};
