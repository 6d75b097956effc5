//! FHIR `date`, `dateTime` and `instant` parsing.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Parse any FHIR date-like primitive into a UTC instant.
///
/// Accepted forms, in order:
/// - `instant` / `dateTime` with offset (`2024-03-01T09:30:00-05:00`, `...Z`)
/// - `dateTime` without offset, read as UTC (`2024-03-01T09:30:00`)
/// - `date` (`2024-03-01`), partial `date` (`2024-03`, `2024`), all at midnight UTC
///
/// Returns `None` when the text matches none of these.
pub fn parse_fhir_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }

    let full_date = match text.len() {
        4 => format!("{text}-01-01"),
        7 => format!("{text}-01"),
        _ => text.to_string(),
    };

    NaiveDate::parse_from_str(&full_date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Render an instant as a FHIR `dateTime` (`2024-03-01T14:30:00Z`).
pub fn format_fhir_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}
