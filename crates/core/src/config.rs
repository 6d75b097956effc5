//! Reconciliation runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the services. Nothing
//! in this crate reads process-wide environment variables during request handling; the binary
//! gathers raw values into [`ReconcileSettings`] and validates them with
//! [`ReconcileConfig::resolve`].

use crate::constants::{
    DEFAULT_BP_GOAL_CODING, DEFAULT_BP_GOAL_DIASTOLIC, DEFAULT_BP_GOAL_SYSTOLIC,
    DEFAULT_BP_PANEL_CODES, DEFAULT_BP_UNIT, DEFAULT_DATA_DIR, DEFAULT_DIASTOLIC_CODES,
    DEFAULT_LOOKBACK, DEFAULT_PROTOCOL_CODES, DEFAULT_PROTOCOL_NO_CODE,
    DEFAULT_PROTOCOL_YES_CODE, DEFAULT_PULSE_CODES, DEFAULT_PULSE_UNIT,
    DEFAULT_REMOTE_TIMEOUT_SECS, DEFAULT_SYSTOLIC_CODES,
};
use crate::{CoachError, CoachResult};
use chrono::{DateTime, Days, Months, Utc};
use fhir::{CodeableConcept, Coding};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Code sets
// ============================================================================

/// An ordered, non-empty set of codings that all denote one measurement concept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeSet(Vec<Coding>);

impl CodeSet {
    pub fn new(codings: Vec<Coding>) -> CoachResult<Self> {
        if codings.is_empty() {
            return Err(CoachError::Config("code set cannot be empty".into()));
        }
        Ok(Self(codings))
    }

    pub fn codings(&self) -> &[Coding] {
        &self.0
    }

    /// The coding used when writing a resource for this concept.
    pub fn primary(&self) -> &Coding {
        // Non-empty by construction.
        &self.0[0]
    }

    pub fn matches(&self, concept: &CodeableConcept) -> bool {
        concept.has_any_coding(&self.0)
    }

    /// This set followed by any codings of `other` not already present.
    pub fn union(&self, other: &CodeSet) -> CodeSet {
        let mut codings = self.0.clone();
        for coding in &other.0 {
            if !codings.iter().any(|c| c.same_code(coding)) {
                codings.push(coding.clone());
            }
        }
        CodeSet(codings)
    }

    /// FHIR search token list (`system|code,system|code`).
    pub fn to_search_param(&self) -> String {
        self.0
            .iter()
            .map(Coding::to_token)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl FromStr for CodeSet {
    type Err = CoachError;

    /// Parse a comma-separated list of `system|code` tokens.
    fn from_str(s: &str) -> CoachResult<Self> {
        let codings = s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(parse_coding)
            .collect::<CoachResult<Vec<_>>>()?;
        Self::new(codings)
    }
}

/// Parse one `system|code` token.
pub fn parse_coding(token: &str) -> CoachResult<Coding> {
    match token.trim().split_once('|') {
        Some((system, code)) if !system.trim().is_empty() && !code.trim().is_empty() => {
            Ok(Coding::new(system.trim(), code.trim()))
        }
        _ => Err(CoachError::Config(format!(
            "invalid coding '{token}' (expected system|code)"
        ))),
    }
}

// ============================================================================
// Lookback period
// ============================================================================

/// A relative period reaching back from "now", written like `2y`, `6m`, `30d` or `1y6m`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LookbackPeriod {
    years: u32,
    months: u32,
    days: u32,
}

impl LookbackPeriod {
    pub fn new(years: u32, months: u32, days: u32) -> Self {
        Self {
            years,
            months,
            days,
        }
    }

    /// The earliest instant covered by the period when measured back from `now`.
    pub fn start_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let months = self.years.saturating_mul(12).saturating_add(self.months);
        now.checked_sub_months(Months::new(months))
            .and_then(|dt| dt.checked_sub_days(Days::new(u64::from(self.days))))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether `at` falls on or after the first day covered by the period. Remote searches
    /// filter by date, so the comparison is by day too.
    pub fn covers(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        at.date_naive() >= self.start_from(now).date_naive()
    }
}

impl FromStr for LookbackPeriod {
    type Err = CoachError;

    fn from_str(s: &str) -> CoachResult<Self> {
        let text = s.trim();
        if text.is_empty() {
            return Err(CoachError::Config("lookback period cannot be empty".into()));
        }

        let mut period = LookbackPeriod::default();
        let mut digits = String::new();
        for ch in text.chars() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                continue;
            }
            let amount: u32 = digits.parse().map_err(|_| {
                CoachError::Config(format!("invalid lookback period '{text}'"))
            })?;
            match ch.to_ascii_lowercase() {
                'y' => period.years += amount,
                'm' => period.months += amount,
                'd' => period.days += amount,
                _ => {
                    return Err(CoachError::Config(format!(
                        "invalid lookback unit '{ch}' in '{text}' (expected y, m or d)"
                    )))
                }
            }
            digits.clear();
        }

        if !digits.is_empty() {
            return Err(CoachError::Config(format!(
                "lookback period '{text}' is missing a unit"
            )));
        }
        Ok(period)
    }
}

impl fmt::Display for LookbackPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.years > 0 {
            write!(f, "{}y", self.years)?;
        }
        if self.months > 0 {
            write!(f, "{}m", self.months)?;
        }
        if self.days > 0 || (self.years == 0 && self.months == 0) {
            write!(f, "{}d", self.days)?;
        }
        Ok(())
    }
}

// ============================================================================
// Policies and profiles
// ============================================================================

/// What to do when the remote record system cannot be read during reconciliation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RemoteFailurePolicy {
    /// Fail the request.
    #[default]
    Propagate,
    /// Return local-only results and skip write-back.
    DegradeToLocal,
}

impl FromStr for RemoteFailurePolicy {
    type Err = CoachError;

    fn from_str(s: &str) -> CoachResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "propagate" => Ok(Self::Propagate),
            "degrade" | "degrade-to-local" => Ok(Self::DegradeToLocal),
            other => Err(CoachError::Config(format!(
                "invalid remote failure policy '{other}' (expected propagate or degrade)"
            ))),
        }
    }
}

/// The clinical-record vendor the remote connection talks to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VendorProfile {
    #[default]
    Default,
    Epic,
}

impl FromStr for VendorProfile {
    type Err = CoachError;

    fn from_str(s: &str) -> CoachResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "epic" => Ok(Self::Epic),
            other => Err(CoachError::Config(format!("unsupported vendor '{other}'"))),
        }
    }
}

// ============================================================================
// Raw settings
// ============================================================================

/// Raw, unvalidated configuration values, one per recognised environment variable.
#[derive(Clone, Debug, Default)]
pub struct ReconcileSettings {
    pub systolic_codes: Option<String>,
    pub diastolic_codes: Option<String>,
    pub bp_panel_codes: Option<String>,
    pub pulse_codes: Option<String>,
    pub protocol_codes: Option<String>,
    pub protocol_yes_code: Option<String>,
    pub protocol_no_code: Option<String>,
    pub bp_unit: Option<String>,
    pub pulse_unit: Option<String>,
    pub bp_lookback: Option<String>,
    pub pulse_lookback: Option<String>,
    pub bp_goal_coding: Option<String>,
    pub bp_goal_default_systolic: Option<String>,
    pub bp_goal_default_diastolic: Option<String>,
    pub reading_limit: Option<String>,
    pub write_back: Option<String>,
    pub remote_failure_policy: Option<String>,
    pub vendor: Option<String>,
    pub data_dir: Option<String>,
    pub fhir_base_url: Option<String>,
    pub fhir_bearer_token: Option<String>,
    pub remote_timeout_secs: Option<String>,
}

impl ReconcileSettings {
    /// Collect settings through `lookup`, which maps an environment variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            systolic_codes: get("COACH_SYSTOLIC_CODES"),
            diastolic_codes: get("COACH_DIASTOLIC_CODES"),
            bp_panel_codes: get("COACH_BP_PANEL_CODES"),
            pulse_codes: get("COACH_PULSE_CODES"),
            protocol_codes: get("COACH_PROTOCOL_CODES"),
            protocol_yes_code: get("COACH_PROTOCOL_YES_CODE"),
            protocol_no_code: get("COACH_PROTOCOL_NO_CODE"),
            bp_unit: get("COACH_BP_UNIT"),
            pulse_unit: get("COACH_PULSE_UNIT"),
            bp_lookback: get("COACH_BP_LOOKBACK"),
            pulse_lookback: get("COACH_PULSE_LOOKBACK"),
            bp_goal_coding: get("COACH_BP_GOAL_CODING"),
            bp_goal_default_systolic: get("COACH_BP_GOAL_DEFAULT_SYSTOLIC"),
            bp_goal_default_diastolic: get("COACH_BP_GOAL_DEFAULT_DIASTOLIC"),
            reading_limit: get("COACH_READING_LIMIT"),
            write_back: get("COACH_WRITE_BACK"),
            remote_failure_policy: get("COACH_REMOTE_FAILURE_POLICY"),
            vendor: get("COACH_VENDOR"),
            data_dir: get("COACH_DATA_DIR"),
            fhir_base_url: get("COACH_FHIR_BASE_URL"),
            fhir_bearer_token: get("COACH_FHIR_BEARER_TOKEN"),
            remote_timeout_secs: get("COACH_REMOTE_TIMEOUT_SECS"),
        }
    }

    /// Collect settings from the process environment. Call once at startup.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

// ============================================================================
// Validated configuration
// ============================================================================

/// Reconciliation configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct ReconcileConfig {
    pub systolic_codes: CodeSet,
    pub diastolic_codes: CodeSet,
    pub bp_panel_codes: CodeSet,
    pub pulse_codes: CodeSet,
    pub protocol_codes: CodeSet,
    pub protocol_yes: Coding,
    pub protocol_no: Coding,
    pub bp_unit: String,
    pub pulse_unit: String,
    pub bp_lookback: LookbackPeriod,
    pub pulse_lookback: LookbackPeriod,
    pub bp_goal_coding: Coding,
    pub bp_goal_default_systolic: u32,
    pub bp_goal_default_diastolic: u32,
    /// Maximum number of readings returned by a merge; `None` means unbounded.
    pub reading_limit: Option<usize>,
    pub write_back: bool,
    pub remote_failure_policy: RemoteFailurePolicy,
    pub vendor: VendorProfile,
    data_dir: PathBuf,
}

impl ReconcileConfig {
    /// Validate raw settings, filling defaults for anything not provided.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Config`] if any provided value is malformed.
    pub fn resolve(settings: &ReconcileSettings) -> CoachResult<Self> {
        fn or_default<'a>(value: &'a Option<String>, default: &'a str) -> &'a str {
            value.as_deref().unwrap_or(default)
        }

        let bp_goal_default_systolic = parse_number(
            "COACH_BP_GOAL_DEFAULT_SYSTOLIC",
            settings.bp_goal_default_systolic.as_deref(),
        )?
        .unwrap_or(DEFAULT_BP_GOAL_SYSTOLIC);
        let bp_goal_default_diastolic = parse_number(
            "COACH_BP_GOAL_DEFAULT_DIASTOLIC",
            settings.bp_goal_default_diastolic.as_deref(),
        )?
        .unwrap_or(DEFAULT_BP_GOAL_DIASTOLIC);

        if bp_goal_default_systolic <= bp_goal_default_diastolic {
            return Err(CoachError::Config(
                "default systolic goal must be greater than default diastolic goal".into(),
            ));
        }

        let reading_limit =
            parse_number::<usize>("COACH_READING_LIMIT", settings.reading_limit.as_deref())?;
        if reading_limit == Some(0) {
            return Err(CoachError::Config(
                "COACH_READING_LIMIT must be positive when set".into(),
            ));
        }

        let write_back = match settings.write_back.as_deref().map(str::trim) {
            None => true,
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => false,
            Some(v) => {
                return Err(CoachError::Config(format!(
                    "invalid COACH_WRITE_BACK '{v}' (expected true or false)"
                )))
            }
        };

        Ok(Self {
            systolic_codes: or_default(&settings.systolic_codes, DEFAULT_SYSTOLIC_CODES).parse()?,
            diastolic_codes: or_default(&settings.diastolic_codes, DEFAULT_DIASTOLIC_CODES)
                .parse()?,
            bp_panel_codes: or_default(&settings.bp_panel_codes, DEFAULT_BP_PANEL_CODES).parse()?,
            pulse_codes: or_default(&settings.pulse_codes, DEFAULT_PULSE_CODES).parse()?,
            protocol_codes: or_default(&settings.protocol_codes, DEFAULT_PROTOCOL_CODES)
                .parse()?,
            protocol_yes: parse_coding(or_default(
                &settings.protocol_yes_code,
                DEFAULT_PROTOCOL_YES_CODE,
            ))?,
            protocol_no: parse_coding(or_default(
                &settings.protocol_no_code,
                DEFAULT_PROTOCOL_NO_CODE,
            ))?,
            bp_unit: or_default(&settings.bp_unit, DEFAULT_BP_UNIT).trim().to_string(),
            pulse_unit: or_default(&settings.pulse_unit, DEFAULT_PULSE_UNIT)
                .trim()
                .to_string(),
            bp_lookback: or_default(&settings.bp_lookback, DEFAULT_LOOKBACK).parse()?,
            pulse_lookback: or_default(&settings.pulse_lookback, DEFAULT_LOOKBACK).parse()?,
            bp_goal_coding: parse_coding(or_default(
                &settings.bp_goal_coding,
                DEFAULT_BP_GOAL_CODING,
            ))?,
            bp_goal_default_systolic,
            bp_goal_default_diastolic,
            reading_limit,
            write_back,
            remote_failure_policy: settings
                .remote_failure_policy
                .as_deref()
                .map(str::parse::<RemoteFailurePolicy>)
                .transpose()?
                .unwrap_or_default(),
            vendor: settings
                .vendor
                .as_deref()
                .map(str::parse::<VendorProfile>)
                .transpose()?
                .unwrap_or_default(),
            data_dir: PathBuf::from(or_default(&settings.data_dir, DEFAULT_DATA_DIR)),
        })
    }

    /// Configuration with every option at its default.
    pub fn defaults() -> CoachResult<Self> {
        Self::resolve(&ReconcileSettings::default())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        self.data_dir = data_dir;
        self
    }
}

/// Connection settings for the remote record system.
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    base_url: String,
    bearer_token: Option<String>,
    timeout: Duration,
}

impl RemoteConfig {
    pub fn new(
        base_url: impl Into<String>,
        bearer_token: Option<String>,
        timeout: Duration,
    ) -> CoachResult<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(CoachError::Config(format!(
                "remote base URL must be http(s): '{base_url}'"
            )));
        }
        if timeout.is_zero() {
            return Err(CoachError::Config("remote timeout must be positive".into()));
        }
        Ok(Self {
            base_url,
            bearer_token,
            timeout,
        })
    }

    /// Build from raw settings. Returns `Ok(None)` when no base URL is configured.
    pub fn resolve(settings: &ReconcileSettings) -> CoachResult<Option<Self>> {
        let Some(base_url) = settings.fhir_base_url.as_deref() else {
            return Ok(None);
        };
        let seconds = parse_number::<u64>(
            "COACH_REMOTE_TIMEOUT_SECS",
            settings.remote_timeout_secs.as_deref(),
        )?
        .unwrap_or(DEFAULT_REMOTE_TIMEOUT_SECS);

        Self::new(
            base_url,
            settings.fhir_bearer_token.clone(),
            Duration::from_secs(seconds),
        )
        .map(Some)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn parse_number<T: FromStr>(name: &str, value: Option<&str>) -> CoachResult<Option<T>> {
    value
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|_| CoachError::Config(format!("invalid {name} '{v}'")))
        })
        .transpose()
}
