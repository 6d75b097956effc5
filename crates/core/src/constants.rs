//! Constants used throughout the COACH core crate.
//!
//! Default code sets, units and thresholds, plus store file names, kept together so the
//! configuration layer and the file store agree on them.

/// LOINC code system.
pub const LOINC_SYSTEM: &str = "http://loinc.org";

/// Default systolic blood pressure codes.
pub const DEFAULT_SYSTOLIC_CODES: &str = "http://loinc.org|8480-6";

/// Default diastolic blood pressure codes.
pub const DEFAULT_DIASTOLIC_CODES: &str = "http://loinc.org|8462-4";

/// Default blood pressure panel codes.
pub const DEFAULT_BP_PANEL_CODES: &str = "http://loinc.org|85354-9,http://loinc.org|55284-4";

/// Default heart rate codes.
pub const DEFAULT_PULSE_CODES: &str = "http://loinc.org|8867-4";

/// Default code for the "followed the measurement protocol" question.
pub const DEFAULT_PROTOCOL_CODES: &str = "urn:coach:observation|bp-protocol-followed";

/// LOINC answer "Yes".
pub const DEFAULT_PROTOCOL_YES_CODE: &str = "http://loinc.org|LA33-6";

/// LOINC answer "No".
pub const DEFAULT_PROTOCOL_NO_CODE: &str = "http://loinc.org|LA32-8";

/// UCUM unit for blood pressure.
pub const DEFAULT_BP_UNIT: &str = "mm[Hg]";

/// UCUM unit for heart rate.
pub const DEFAULT_PULSE_UNIT: &str = "/min";

/// Default lookback for remote vital-sign queries.
pub const DEFAULT_LOOKBACK: &str = "2y";

/// Coding used to mark a goal as a blood pressure goal.
pub const DEFAULT_BP_GOAL_CODING: &str = "http://loinc.org|55284-4";

pub const DEFAULT_BP_GOAL_SYSTOLIC: u32 = 140;
pub const DEFAULT_BP_GOAL_DIASTOLIC: u32 = 90;

/// Default request timeout for the remote record system.
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;

/// Default directory for local subject data when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "coach_data";

/// Upper bound on `next` links followed for one search.
pub const MAX_SEARCH_PAGES: usize = 20;

/// Per-subject store file for manually entered blood pressure readings.
pub const BP_READINGS_FILENAME: &str = "bp_readings.yaml";

/// Per-subject store file for manually entered pulse readings.
pub const PULSE_READINGS_FILENAME: &str = "pulse_readings.yaml";

/// Per-subject store file for the home-device cache.
pub const DEVICE_VITALS_FILENAME: &str = "device_vitals.yaml";

/// Per-subject store file for local goals.
pub const GOALS_FILENAME: &str = "goals.yaml";
