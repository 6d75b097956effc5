//! Reference normalisation helpers.
//!
//! Servers hand back the same resource under many spellings: absolute URLs with or without a
//! `_history` version suffix, relative `Type/id` references, bare UUIDs and `urn:uuid:` URNs.
//! These helpers reduce all of them to one comparable relative form.

use uuid::Uuid;

/// URN prefix for bundle-local UUID references.
pub const URN_UUID: &str = "urn:uuid:";

const HISTORY_SEGMENT: &str = "/_history/";

/// Whether `text` is a UUID in any standard textual form.
pub fn is_uuid(text: &str) -> bool {
    Uuid::parse_str(text).is_ok()
}

/// Reduce a reference to its relative form.
///
/// - `urn:uuid:...` is returned unchanged
/// - a bare UUID becomes `urn:uuid:<uuid>`
/// - any `/_history/<version>` suffix is removed
/// - an absolute `http(s)://` URL is reduced to its last two path segments (`Type/id`)
///
/// Examples:
/// - `https://fhir.example.org/r4/Patient/abc/_history/4` → `Patient/abc`
/// - `Encounter/1146/_history/1` → `Encounter/1146`
pub fn to_relative_reference(reference: &str) -> String {
    if reference.starts_with(URN_UUID) {
        return reference.to_string();
    }

    if is_uuid(reference) {
        return format!("{URN_UUID}{reference}");
    }

    let trimmed = match reference.find(HISTORY_SEGMENT) {
        Some(pos) if pos > 0 => &reference[..pos],
        _ => reference,
    };

    if reference.starts_with("http://") || reference.starts_with("https://") {
        let segments: Vec<&str> = trimmed
            .trim_end_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        if segments.len() >= 2 {
            return format!(
                "{}/{}",
                segments[segments.len() - 2],
                segments[segments.len() - 1]
            );
        }
    }

    trimmed.to_string()
}

/// Relative reference for a resource of `resource_type` with logical id `id`.
pub fn relative_reference_for(resource_type: &str, id: &str) -> String {
    if is_uuid(id) {
        format!("{URN_UUID}{id}")
    } else {
        format!("{resource_type}/{id}")
    }
}

/// Extract the logical id from a reference (`Patient/12345` → `12345`).
pub fn extract_id_from_reference(reference: &str) -> &str {
    if let Some(rest) = reference.strip_prefix(URN_UUID) {
        return rest;
    }

    let relative_end = reference.find(HISTORY_SEGMENT).unwrap_or(reference.len());
    let without_history = &reference[..relative_end];
    match without_history.rfind('/') {
        Some(index) => &without_history[index + 1..],
        None => without_history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_base_url_and_history() {
        assert_eq!(
            to_relative_reference(
                "https://api.example.org/fhir/r4/Patient/MedicationTest/_history/4"
            ),
            "Patient/MedicationTest"
        );
        assert_eq!(
            to_relative_reference("http://example.org/Observation/bp-1"),
            "Observation/bp-1"
        );
    }

    #[test]
    fn strips_history_from_relative_references() {
        assert_eq!(to_relative_reference("Encounter/1146/_history/1"), "Encounter/1146");
        assert_eq!(to_relative_reference("Encounter/1146"), "Encounter/1146");
    }

    #[test]
    fn uuids_become_urns() {
        let id = "550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(to_relative_reference(id), format!("urn:uuid:{id}"));
        assert_eq!(
            to_relative_reference(&format!("urn:uuid:{id}")),
            format!("urn:uuid:{id}")
        );
        assert_eq!(relative_reference_for("Observation", id), format!("urn:uuid:{id}"));
        assert_eq!(relative_reference_for("Observation", "abc"), "Observation/abc");
    }

    #[test]
    fn extracts_ids() {
        assert_eq!(extract_id_from_reference("Patient/12345"), "12345");
        assert_eq!(extract_id_from_reference("12345"), "12345");
        assert_eq!(
            extract_id_from_reference("http://x.org/fhir/Encounter/e1/_history/2"),
            "e1"
        );
        assert_eq!(extract_id_from_reference("urn:uuid:abc"), "abc");
    }
}
