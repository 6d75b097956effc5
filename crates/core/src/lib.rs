//! # COACH Core
//!
//! Reconciliation engine for home and clinic vital signs and care goals.
//!
//! This crate merges what the remote clinical record system holds with what the subject entered
//! locally or synchronised from a home device:
//! - readings (blood pressure and pulse) deduplicated by logical measurement event, remote first
//! - the current blood pressure goal, chosen between remote and local candidates
//! - best-effort write-back of local readings to the remote
//!
//! The remote is reached through [`remote::RemoteRecordSystem`] and local data through
//! [`store::LocalStore`]; wire translation lives in [`transform`] on top of the `fhir` crate.
//!
//! **No presentation concerns**: command-line handling and output formatting belong in the
//! `coach` binary.

pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod store;
pub mod transform;

pub use config::{ReconcileConfig, ReconcileSettings, RemoteConfig};
pub use context::RequestContext;
pub use error::{CoachError, CoachResult};
pub use services::{GoalService, ReadingService};
