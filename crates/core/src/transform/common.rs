//! Extraction and construction logic shared by every vendor transformer.
//!
//! Incoming readings arrive in three wire encodings:
//! - a single-concept Observation (systolic-only, diastolic-only, or pulse)
//! - a panel Observation whose components carry systolic and/or diastolic values
//! - two sibling single-concept Observations (systolic + diastolic) sharing a timestamp and, when
//!   present, an encounter; these are paired into one reading
//!
//! A resource that cannot be turned into a reading is rejected with a data error, logged, and
//! skipped. Its siblings are still processed.

use crate::config::ReconcileConfig;
use crate::models::{
    truncate_to_minute, AchievementStatus, Goal, GoalAuthorship, GoalHistoryEntry, GoalTarget,
    LifecycleStatus, Reading, ReadingKind, ReadingSource, SubjectId,
};
use crate::{CoachError, CoachResult};
use chrono::{DateTime, NaiveDate, Utc};
use fhir::{
    format_fhir_datetime, parse_fhir_datetime, to_relative_reference, Bundle, CodeableConcept, Coding, Observation,
    ObservationComponent, Quantity, Reference,
};
use std::collections::HashSet;

const OBSERVATION_CATEGORY_SYSTEM: &str =
    "http://terminology.hl7.org/CodeSystem/observation-category";
const VITAL_SIGNS: &str = "vital-signs";
const SURVEY: &str = "survey";

/// Encounter classes measured outside a clinic (home health, virtual).
const HOME_ENCOUNTER_CLASSES: &[&str] = &["HH", "VR"];
/// Encounter classes measured in a clinical setting.
const OFFICE_ENCOUNTER_CLASSES: &[&str] = &["AMB", "IMP", "EMER", "ACUTE", "OBSENC"];

// ============================================================================
// Incoming readings
// ============================================================================

/// Every reading of `kind` found in `bundle`, in bundle order.
pub fn readings_from_bundle(
    bundle: &Bundle,
    kind: ReadingKind,
    config: &ReconcileConfig,
) -> Vec<Reading> {
    match kind {
        ReadingKind::BloodPressure => bp_readings(bundle, config),
        ReadingKind::Pulse => bundle
            .observations()
            .filter(|obs| config.pulse_codes.matches(&obs.code))
            .filter_map(|obs| keep(obs, reading_from_observation(obs, bundle, config)))
            .collect(),
    }
}

fn bp_readings(bundle: &Bundle, config: &ReconcileConfig) -> Vec<Reading> {
    let observations: Vec<&Observation> = bundle.observations().collect();
    let protocols: Vec<&Observation> = observations
        .iter()
        .copied()
        .filter(|obs| config.protocol_codes.matches(&obs.code))
        .collect();

    let mut consumed: HashSet<usize> = HashSet::new();
    let mut readings = Vec::new();

    for (index, obs) in observations.iter().copied().enumerate() {
        if consumed.contains(&index) {
            continue;
        }

        let is_systolic = config.systolic_codes.matches(&obs.code);
        let is_diastolic = config.diastolic_codes.matches(&obs.code);
        let is_panel = config.bp_panel_codes.matches(&obs.code);

        let result = if is_systolic || is_diastolic {
            let partner = observations
                .iter()
                .enumerate()
                .skip(index + 1)
                .find(|(j, candidate)| {
                    !consumed.contains(j)
                        && if is_systolic {
                            config.diastolic_codes.matches(&candidate.code)
                        } else {
                            config.systolic_codes.matches(&candidate.code)
                        }
                        && same_context(obs, candidate)
                })
                .map(|(j, candidate)| (j, *candidate));

            match partner {
                Some((j, partner)) => {
                    consumed.insert(j);
                    if is_systolic {
                        reading_from_split(obs, partner, bundle, config)
                    } else {
                        reading_from_split(partner, obs, bundle, config)
                    }
                }
                None => reading_from_observation(obs, bundle, config),
            }
        } else if is_panel {
            reading_from_observation(obs, bundle, config)
        } else {
            continue;
        };

        if let Some(reading) = keep(obs, result) {
            let followed = protocol_for(obs, &reading, &protocols, bundle, config);
            readings.push(reading.with_protocol_followed(followed));
        }
    }

    readings
}

fn keep(obs: &Observation, result: CoachResult<Reading>) -> Option<Reading> {
    match result {
        Ok(reading) => Some(reading),
        Err(err) => {
            tracing::warn!(
                observation = obs.id.as_deref().unwrap_or("<no id>"),
                error = %err,
                "rejected observation"
            );
            None
        }
    }
}

/// Two single-concept observations describe the same measurement when they share the minute
/// and do not name different encounters.
fn same_context(a: &Observation, b: &Observation) -> bool {
    let same_minute = match (a.effective_instant(), b.effective_instant()) {
        (Some(x), Some(y)) => truncate_to_minute(x) == truncate_to_minute(y),
        _ => false,
    };
    let same_encounter = match (a.encounter_reference(), b.encounter_reference()) {
        (Some(x), Some(y)) => to_relative_reference(x) == to_relative_reference(y),
        _ => true,
    };
    same_minute && same_encounter
}

/// Build a reading from one panel or single-concept observation.
///
/// # Errors
///
/// Returns [`CoachError::Data`] when the observation has no usable timestamp, is not a
/// recognised vital sign, or carries no value.
pub fn reading_from_observation(
    obs: &Observation,
    bundle: &Bundle,
    config: &ReconcileConfig,
) -> CoachResult<Reading> {
    let effective = effective_of(obs)?;
    let source = source_of(obs, bundle);
    let code = &obs.code;

    let reading = if config.pulse_codes.matches(code) {
        let bpm = quantity_value(obs.value_quantity.as_ref()).ok_or_else(|| {
            CoachError::Data(format!("pulse observation {} has no value", label(obs)))
        })?;
        Reading::pulse(source, effective, bpm)?
    } else if config.systolic_codes.matches(code) {
        Reading::blood_pressure(source, effective, quantity_value(obs.value_quantity.as_ref()), None)?
    } else if config.diastolic_codes.matches(code) {
        Reading::blood_pressure(source, effective, None, quantity_value(obs.value_quantity.as_ref()))?
    } else if config.bp_panel_codes.matches(code) {
        let (systolic, diastolic) = panel_values(&obs.component, config);
        Reading::blood_pressure(source, effective, systolic, diastolic)?
    } else {
        return Err(CoachError::Data(format!(
            "observation {} is not a recognised vital sign",
            label(obs)
        )));
    };

    Ok(match &obs.id {
        Some(id) => reading.with_id(id.clone()),
        None => reading,
    })
}

/// Build one reading from a systolic and a diastolic observation recorded separately.
///
/// # Errors
///
/// Returns [`CoachError::Data`] if either observation's coding does not match its configured
/// code set, if no timestamp is usable, or if neither carries a value.
pub fn reading_from_split(
    systolic: &Observation,
    diastolic: &Observation,
    bundle: &Bundle,
    config: &ReconcileConfig,
) -> CoachResult<Reading> {
    if !config.systolic_codes.matches(&systolic.code) {
        return Err(CoachError::Data(format!(
            "systolic observation {}: invalid coding",
            label(systolic)
        )));
    }
    if !config.diastolic_codes.matches(&diastolic.code) {
        return Err(CoachError::Data(format!(
            "diastolic observation {}: invalid coding",
            label(diastolic)
        )));
    }

    let effective = effective_of(systolic).or_else(|_| effective_of(diastolic))?;
    let reading = Reading::blood_pressure(
        source_of(systolic, bundle),
        effective,
        quantity_value(systolic.value_quantity.as_ref()),
        quantity_value(diastolic.value_quantity.as_ref()),
    )?;

    Ok(match systolic.id.as_ref().or(diastolic.id.as_ref()) {
        Some(id) => reading.with_id(id.clone()),
        None => reading,
    })
}

/// Where a remote observation was measured.
///
/// The home-setting extension wins; otherwise the class of the linked encounter (when the
/// encounter is present in `bundle`) decides; otherwise the reading is plain `EHR`.
pub fn source_of(obs: &Observation, bundle: &Bundle) -> ReadingSource {
    if obs.has_home_setting_extension() {
        return ReadingSource::Home;
    }

    let class = obs
        .encounter_reference()
        .and_then(|r| bundle.find_encounter(r))
        .and_then(|e| e.class_code());

    match class {
        Some(c) if HOME_ENCOUNTER_CLASSES.contains(&c) => ReadingSource::Home,
        Some(c) if OFFICE_ENCOUNTER_CLASSES.contains(&c) => ReadingSource::Office,
        _ => ReadingSource::Ehr,
    }
}

/// Yes/no answer carried by a protocol observation.
pub fn protocol_answer(obs: &Observation, config: &ReconcileConfig) -> Option<bool> {
    if let Some(concept) = &obs.value_codeable_concept {
        if concept.has_coding(&config.protocol_yes) {
            return Some(true);
        }
        if concept.has_coding(&config.protocol_no) {
            return Some(false);
        }
    }
    obs.value_boolean
}

/// Find the protocol answer recorded with a blood pressure observation: same encounter first,
/// else same minute and source category.
fn protocol_for(
    obs: &Observation,
    reading: &Reading,
    protocols: &[&Observation],
    bundle: &Bundle,
    config: &ReconcileConfig,
) -> Option<bool> {
    if let Some(encounter) = obs.encounter_reference().map(to_relative_reference) {
        let by_encounter = protocols.iter().find(|p| {
            p.encounter_reference().map(to_relative_reference).as_deref() == Some(encounter.as_str())
        });
        if let Some(p) = by_encounter {
            return protocol_answer(p, config);
        }
    }

    let minute = truncate_to_minute(reading.effective());
    let category = reading.source().category();
    protocols
        .iter()
        .find(|p| {
            p.effective_instant().map(truncate_to_minute) == Some(minute)
                && source_of(p, bundle).category() == category
        })
        .and_then(|p| protocol_answer(p, config))
}

fn panel_values(
    components: &[ObservationComponent],
    config: &ReconcileConfig,
) -> (Option<f64>, Option<f64>) {
    let mut systolic = None;
    let mut diastolic = None;
    for component in components {
        if config.systolic_codes.matches(&component.code) {
            systolic = quantity_value(component.value_quantity.as_ref());
        } else if config.diastolic_codes.matches(&component.code) {
            diastolic = quantity_value(component.value_quantity.as_ref());
        }
    }
    (systolic, diastolic)
}

fn effective_of(obs: &Observation) -> CoachResult<DateTime<Utc>> {
    obs.effective_instant().ok_or_else(|| {
        CoachError::Data(format!("observation {} has no usable timestamp", label(obs)))
    })
}

fn quantity_value(quantity: Option<&Quantity>) -> Option<f64> {
    quantity.and_then(|q| q.value)
}

fn label(obs: &Observation) -> &str {
    obs.id.as_deref().unwrap_or("<no id>")
}

// ============================================================================
// Incoming goals
// ============================================================================

/// Every goal in `bundle` that can be read, in bundle order.
pub fn goals_from_bundle(bundle: &Bundle, config: &ReconcileConfig) -> Vec<Goal> {
    bundle
        .goals()
        .filter_map(|goal| match goal_from_resource(goal, config) {
            Ok(goal) => Some(goal),
            Err(err) => {
                tracing::warn!(
                    goal = goal.id.as_deref().unwrap_or("<no id>"),
                    error = %err,
                    "rejected goal"
                );
                None
            }
        })
        .collect()
}

/// Read a remote goal.
///
/// # Errors
///
/// Returns [`CoachError::Data`] when the goal has no id or identifier, no (or an unknown)
/// lifecycle status, or neither a start date nor a status date.
pub fn goal_from_resource(goal: &fhir::Goal, config: &ReconcileConfig) -> CoachResult<Goal> {
    let ext_goal_id = goal
        .id
        .clone()
        .or_else(|| goal.identifier.iter().find_map(|i| i.value.clone()))
        .ok_or_else(|| CoachError::Data("goal has neither id nor identifier".into()))?;

    let lifecycle_status: LifecycleStatus = goal
        .lifecycle_status
        .as_deref()
        .ok_or_else(|| CoachError::Data(format!("goal {ext_goal_id} has no lifecycle status")))?
        .parse()?;

    let status_date = goal.status_date.as_deref().and_then(parse_fhir_datetime);
    let created = goal
        .start_date
        .as_deref()
        .and_then(parse_fhir_datetime)
        .or(status_date)
        .ok_or_else(|| CoachError::Data(format!("goal {ext_goal_id} has no usable date")))?;

    let target_value = |codes: &crate::config::CodeSet| {
        goal.target
            .iter()
            .filter(|t| t.measure.as_ref().is_some_and(|m| codes.matches(m)))
            .find_map(|t| t.detail_quantity.as_ref().and_then(|q| q.value))
    };
    let target = match (
        target_value(&config.systolic_codes),
        target_value(&config.diastolic_codes),
    ) {
        (Some(systolic), Some(diastolic)) => GoalTarget::BloodPressure {
            systolic: systolic.round() as u32,
            diastolic: diastolic.round() as u32,
        },
        _ => GoalTarget::Other,
    };

    let referent = match target {
        GoalTarget::BloodPressure { .. } => config.bp_goal_coding.clone(),
        GoalTarget::Other => goal.description.coding.first().cloned().unwrap_or_default(),
    };

    let target_date = goal
        .target
        .iter()
        .find_map(|t| t.due_date.as_deref())
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());

    let history = goal
        .achievement_status
        .as_ref()
        .and_then(|concept| concept.coding.iter().find_map(|c| c.code.as_deref()))
        .and_then(|code| code.parse::<AchievementStatus>().ok())
        .map(|achievement_status| GoalHistoryEntry {
            achievement_status,
            recorded_at: status_date.unwrap_or(created),
        })
        .into_iter()
        .collect();

    Goal::from_parts(
        ext_goal_id,
        GoalAuthorship::Remote,
        referent,
        goal.description.label().unwrap_or_default().to_string(),
        target,
        target_date,
        created,
        lifecycle_status,
        history,
    )
}

// ============================================================================
// Outgoing observations
// ============================================================================

fn vital_signs_category() -> CodeableConcept {
    CodeableConcept::from_coding(Coding::new(OBSERVATION_CATEGORY_SYSTEM, VITAL_SIGNS))
}

fn base_observation(subject: &SubjectId, reading: &Reading, code: &Coding) -> Observation {
    let mut obs = Observation {
        status: Some("final".into()),
        category: vec![vital_signs_category()],
        code: CodeableConcept::from_coding(code.clone()),
        subject: Some(Reference::to(subject.patient_reference())),
        effective_date_time: Some(format_fhir_datetime(&reading.effective())),
        ..Default::default()
    };
    if reading.is_home_reading() {
        obs.add_home_setting_extension();
    }
    obs
}

/// One panel observation carrying whichever of systolic/diastolic the reading has.
pub(crate) fn bp_panel_observation(
    subject: &SubjectId,
    reading: &Reading,
    config: &ReconcileConfig,
) -> Observation {
    let mut obs = base_observation(subject, reading, config.bp_panel_codes.primary());
    let parts = [
        (config.systolic_codes.primary(), reading.systolic()),
        (config.diastolic_codes.primary(), reading.diastolic()),
    ];
    obs.component = parts
        .into_iter()
        .filter_map(|(code, value)| {
            value.map(|v| ObservationComponent {
                code: CodeableConcept::from_coding(code.clone()),
                value_quantity: Some(Quantity::ucum(v, config.bp_unit.as_str())),
            })
        })
        .collect();
    obs
}

/// Separate systolic and diastolic observations, one per value present.
pub(crate) fn bp_split_observations(
    subject: &SubjectId,
    reading: &Reading,
    config: &ReconcileConfig,
) -> Vec<Observation> {
    [
        (config.systolic_codes.primary(), reading.systolic()),
        (config.diastolic_codes.primary(), reading.diastolic()),
    ]
    .into_iter()
    .filter_map(|(code, value)| {
        value.map(|v| {
            let mut obs = base_observation(subject, reading, code);
            obs.value_quantity = Some(Quantity::ucum(v, config.bp_unit.as_str()));
            obs
        })
    })
    .collect()
}

pub(crate) fn pulse_observation(
    subject: &SubjectId,
    reading: &Reading,
    config: &ReconcileConfig,
) -> CoachResult<Observation> {
    let bpm = reading
        .pulse_bpm()
        .ok_or_else(|| CoachError::InvalidInput("reading is not a pulse reading".into()))?;
    let mut obs = base_observation(subject, reading, config.pulse_codes.primary());
    obs.value_quantity = Some(Quantity::ucum(bpm, config.pulse_unit.as_str()));
    Ok(obs)
}

/// The protocol-followed answer as its own observation, when the reading has one.
pub(crate) fn protocol_observation(
    subject: &SubjectId,
    reading: &Reading,
    config: &ReconcileConfig,
) -> Option<Observation> {
    let followed = reading.protocol_followed()?;
    let answer = if followed {
        config.protocol_yes.clone()
    } else {
        config.protocol_no.clone()
    };

    let mut obs = base_observation(subject, reading, config.protocol_codes.primary());
    obs.category = vec![CodeableConcept::from_coding(Coding::new(
        OBSERVATION_CATEGORY_SYSTEM,
        SURVEY,
    ))];
    obs.value_codeable_concept = Some(CodeableConcept::from_coding(answer));
    Some(obs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fhir::{BundleEntry, Encounter, Extension, Resource};

    fn config() -> ReconcileConfig {
        ReconcileConfig::defaults().unwrap()
    }

    fn loinc(code: &str) -> CodeableConcept {
        CodeableConcept::from_coding(Coding::new("http://loinc.org", code))
    }

    fn single(id: &str, code: &str, value: f64, at: &str) -> Observation {
        Observation {
            id: Some(id.into()),
            code: loinc(code),
            effective_date_time: Some(at.into()),
            value_quantity: Some(Quantity::ucum(value, "mm[Hg]")),
            ..Default::default()
        }
    }

    fn panel(id: &str, at: &str, systolic: Option<f64>, diastolic: Option<f64>) -> Observation {
        let mut component = vec![ObservationComponent {
            code: loinc("9999-9"),
            value_quantity: Some(Quantity::ucum(1.0, "x")),
        }];
        if let Some(v) = systolic {
            component.push(ObservationComponent {
                code: loinc("8480-6"),
                value_quantity: Some(Quantity::ucum(v, "mm[Hg]")),
            });
        }
        if let Some(v) = diastolic {
            component.push(ObservationComponent {
                code: loinc("8462-4"),
                value_quantity: Some(Quantity::ucum(v, "mm[Hg]")),
            });
        }
        Observation {
            id: Some(id.into()),
            code: loinc("85354-9"),
            effective_date_time: Some(at.into()),
            component,
            ..Default::default()
        }
    }

    fn bundle(resources: Vec<Resource>) -> Bundle {
        Bundle::collection(resources)
    }

    #[test]
    fn panel_components_are_read_and_unknown_components_ignored() {
        let b = bundle(vec![Resource::Observation(panel(
            "p1",
            "2024-05-01T10:00:00Z",
            Some(120.0),
            Some(80.0),
        ))]);
        let readings = readings_from_bundle(&b, ReadingKind::BloodPressure, &config());
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].systolic(), Some(120.0));
        assert_eq!(readings[0].diastolic(), Some(80.0));
        assert_eq!(readings[0].source(), ReadingSource::Ehr);
        assert_eq!(readings[0].id(), Some("p1"));
    }

    #[test]
    fn single_concept_observations_stand_alone() {
        let b = bundle(vec![Resource::Observation(single(
            "s1",
            "8480-6",
            131.0,
            "2024-05-01T10:00:00Z",
        ))]);
        let readings = readings_from_bundle(&b, ReadingKind::BloodPressure, &config());
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].reading_type(), "Systolic");
    }

    #[test]
    fn split_siblings_are_paired_in_either_order() {
        let b = bundle(vec![
            Resource::Observation(single("d1", "8462-4", 82.0, "2024-05-01T10:00:10Z")),
            Resource::Observation(single("s1", "8480-6", 128.0, "2024-05-01T10:00:40Z")),
            Resource::Observation(single("s2", "8480-6", 140.0, "2024-05-02T10:00:00Z")),
        ]);
        let readings = readings_from_bundle(&b, ReadingKind::BloodPressure, &config());
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].systolic(), Some(128.0));
        assert_eq!(readings[0].diastolic(), Some(82.0));
        assert_eq!(readings[0].id(), Some("s1"));
        assert_eq!(readings[1].reading_type(), "Systolic");
    }

    #[test]
    fn siblings_from_different_encounters_are_not_paired() {
        let mut s = single("s1", "8480-6", 128.0, "2024-05-01T10:00:00Z");
        s.encounter = Some(Reference::to("Encounter/a"));
        let mut d = single("d1", "8462-4", 82.0, "2024-05-01T10:00:00Z");
        d.encounter = Some(Reference::to("Encounter/b"));

        let b = bundle(vec![Resource::Observation(s), Resource::Observation(d)]);
        let readings = readings_from_bundle(&b, ReadingKind::BloodPressure, &config());
        assert_eq!(readings.len(), 2);
    }

    #[test]
    fn bad_resources_are_rejected_without_aborting_siblings() {
        let mut no_time = single("bad-1", "8480-6", 120.0, "");
        no_time.effective_date_time = None;
        let no_values = panel("bad-2", "2024-05-01T10:00:00Z", None, None);
        let good = panel("good", "2024-05-01T11:00:00Z", Some(118.0), Some(76.0));

        let b = bundle(vec![
            Resource::Observation(no_time),
            Resource::Observation(no_values),
            Resource::Observation(good),
        ]);
        let readings = readings_from_bundle(&b, ReadingKind::BloodPressure, &config());
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].id(), Some("good"));
    }

    #[test]
    fn split_with_mismatched_coding_is_a_data_error() {
        let config = config();
        let wrong = single("x", "8867-4", 70.0, "2024-05-01T10:00:00Z");
        let diastolic = single("d", "8462-4", 80.0, "2024-05-01T10:00:00Z");
        let err = reading_from_split(&wrong, &diastolic, &Bundle::default(), &config).unwrap_err();
        assert!(err.is_data_error());
        assert!(err.to_string().contains("systolic observation x: invalid coding"));

        let systolic = single("s", "8480-6", 120.0, "2024-05-01T10:00:00Z");
        let err = reading_from_split(&systolic, &wrong, &Bundle::default(), &config).unwrap_err();
        assert!(err.to_string().contains("diastolic observation"));
    }

    #[test]
    fn source_follows_extension_then_encounter_class() {
        let mut home = panel("h", "2024-05-01T10:00:00Z", Some(120.0), Some(80.0));
        home.add_home_setting_extension();

        let mut office = panel("o", "2024-05-01T11:00:00Z", Some(120.0), Some(80.0));
        office.encounter = Some(Reference::to("https://ehr.example.org/Encounter/e1/_history/2"));
        let encounter = Encounter {
            id: Some("e1".into()),
            class: Some(Coding::new(
                "http://terminology.hl7.org/CodeSystem/v3-ActCode",
                "AMB",
            )),
            ..Default::default()
        };

        let mut virtual_visit = panel("v", "2024-05-01T12:00:00Z", Some(120.0), Some(80.0));
        virtual_visit.encounter = Some(Reference::to("Encounter/e2"));
        let virtual_encounter = Encounter {
            id: Some("e2".into()),
            class: Some(Coding::new("http://terminology.hl7.org/CodeSystem/v3-ActCode", "VR")),
            ..Default::default()
        };

        let b = bundle(vec![
            Resource::Observation(home.clone()),
            Resource::Observation(office.clone()),
            Resource::Encounter(encounter),
            Resource::Observation(virtual_visit.clone()),
            Resource::Encounter(virtual_encounter),
        ]);

        assert_eq!(source_of(&home, &b), ReadingSource::Home);
        assert_eq!(source_of(&office, &b), ReadingSource::Office);
        assert_eq!(source_of(&virtual_visit, &b), ReadingSource::Home);
        assert_eq!(source_of(&office, &Bundle::default()), ReadingSource::Ehr);
    }

    #[test]
    fn protocol_answer_matches_by_encounter_then_minute() {
        let config = config();
        let mut bp = panel("bp", "2024-05-01T10:00:00Z", Some(120.0), Some(80.0));
        bp.encounter = Some(Reference::to("Encounter/e1"));
        let mut yes = Observation {
            code: CodeableConcept::from_coding(config.protocol_codes.primary().clone()),
            value_codeable_concept: Some(CodeableConcept::from_coding(config.protocol_yes.clone())),
            effective_date_time: Some("2024-05-01T09:00:00Z".into()),
            ..Default::default()
        };
        yes.encounter = Some(Reference::to("Encounter/e1"));

        let bp2 = panel("bp2", "2024-05-02T10:00:30Z", Some(130.0), Some(85.0));
        let no = Observation {
            code: CodeableConcept::from_coding(config.protocol_codes.primary().clone()),
            value_codeable_concept: Some(CodeableConcept::from_coding(config.protocol_no.clone())),
            effective_date_time: Some("2024-05-02T10:00:00Z".into()),
            ..Default::default()
        };

        let bp3 = panel("bp3", "2024-05-03T10:00:00Z", Some(125.0), Some(82.0));

        let b = bundle(vec![
            Resource::Observation(bp),
            Resource::Observation(yes),
            Resource::Observation(bp2),
            Resource::Observation(no),
            Resource::Observation(bp3),
        ]);
        let readings = readings_from_bundle(&b, ReadingKind::BloodPressure, &config);
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[0].protocol_followed(), Some(true));
        assert_eq!(readings[1].protocol_followed(), Some(false));
        assert_eq!(readings[2].protocol_followed(), None);
    }

    #[test]
    fn minute_matched_protocol_answer_stays_with_its_setting() {
        let config = config();
        let mut home = panel("home", "2024-05-01T10:00:10Z", Some(120.0), Some(80.0));
        home.add_home_setting_extension();
        let clinic = panel("clinic", "2024-05-01T10:00:40Z", Some(135.0), Some(88.0));
        let mut answer = Observation {
            code: CodeableConcept::from_coding(config.protocol_codes.primary().clone()),
            value_codeable_concept: Some(CodeableConcept::from_coding(config.protocol_yes.clone())),
            effective_date_time: Some("2024-05-01T10:00:00Z".into()),
            ..Default::default()
        };
        answer.add_home_setting_extension();

        let b = bundle(vec![
            Resource::Observation(clinic),
            Resource::Observation(answer),
            Resource::Observation(home),
        ]);
        let readings = readings_from_bundle(&b, ReadingKind::BloodPressure, &config);
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].id(), Some("clinic"));
        assert_eq!(readings[0].protocol_followed(), None);
        assert_eq!(readings[1].id(), Some("home"));
        assert_eq!(readings[1].protocol_followed(), Some(true));
    }

    #[test]
    fn pulse_readings_require_a_value() {
        let good = single("hr1", "8867-4", 64.0, "2024-05-01T10:00:00Z");
        let mut empty = single("hr2", "8867-4", 64.0, "2024-05-01T11:00:00Z");
        empty.value_quantity = None;

        let b = bundle(vec![Resource::Observation(good), Resource::Observation(empty)]);
        let readings = readings_from_bundle(&b, ReadingKind::Pulse, &config());
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].pulse_bpm(), Some(64.0));
    }

    fn remote_goal(json: &str) -> fhir::Goal {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn reads_bp_goals_from_targets() {
        let goal = remote_goal(
            r#"{ "id": "g1", "lifecycleStatus": "active",
                 "achievementStatus": { "coding": [{ "code": "improving" }] },
                 "description": { "text": "Lower blood pressure" },
                 "startDate": "2024-02-01",
                 "target": [
                   { "measure": { "coding": [{ "system": "http://loinc.org", "code": "8480-6" }] },
                     "detailQuantity": { "value": 130 }, "dueDate": "2024-12-31" },
                   { "measure": { "coding": [{ "system": "http://loinc.org", "code": "8462-4" }] },
                     "detailQuantity": { "value": 80 } }
                 ] }"#,
        );
        let goal = goal_from_resource(&goal, &config()).unwrap();
        assert!(goal.is_remote());
        assert_eq!(
            goal.target(),
            GoalTarget::BloodPressure {
                systolic: 130,
                diastolic: 80
            }
        );
        assert_eq!(goal.created(), Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
        assert_eq!(goal.current_achievement(), Some(AchievementStatus::Improving));
        assert_eq!(goal.target_date(), NaiveDate::from_ymd_opt(2024, 12, 31));
        assert_eq!(goal.description(), "Lower blood pressure");
    }

    #[test]
    fn goal_dates_fall_back_to_status_date() {
        let goal = remote_goal(
            r#"{ "id": "g2", "lifecycleStatus": "active", "statusDate": "2023-06-01",
                 "description": { "text": "Walk daily" } }"#,
        );
        let goal = goal_from_resource(&goal, &config()).unwrap();
        assert!(!goal.is_bp_goal());
        assert_eq!(goal.created(), Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn unreadable_goals_are_skipped() {
        let b = bundle(vec![
            Resource::Goal(remote_goal(r#"{ "id": "no-date", "lifecycleStatus": "active" }"#)),
            Resource::Goal(remote_goal(
                r#"{ "id": "bad-status", "lifecycleStatus": "paused", "startDate": "2024-01-01" }"#,
            )),
            Resource::Goal(remote_goal(
                r#"{ "id": "ok", "lifecycleStatus": "active", "startDate": "2024-01-01" }"#,
            )),
        ]);
        let goals = goals_from_bundle(&b, &config());
        assert_eq!(goals.len(), 1);
        assert_eq!(goals[0].ext_goal_id(), "ok");
    }

    #[test]
    fn outgoing_panel_is_home_tagged_and_reads_back() {
        let config = config();
        let subject = SubjectId::new("p1").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let reading = Reading::blood_pressure(ReadingSource::Home, at, Some(121.0), Some(79.0))
            .unwrap()
            .with_protocol_followed(Some(true));

        let panel = bp_panel_observation(&subject, &reading, &config);
        assert!(panel.has_home_setting_extension());
        assert_eq!(panel.component.len(), 2);
        assert_eq!(panel.effective_date_time.as_deref(), Some("2024-05-01T10:00:00Z"));

        let protocol = protocol_observation(&subject, &reading, &config).unwrap();
        let b = Bundle::collection(vec![
            Resource::Observation(panel),
            Resource::Observation(protocol),
        ]);
        let back = readings_from_bundle(&b, ReadingKind::BloodPressure, &config);
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].source(), ReadingSource::Home);
        assert_eq!(back[0].protocol_followed(), Some(true));
        assert_eq!(back[0].logical_equality_key(), reading.logical_equality_key());
    }

    #[test]
    fn outgoing_office_reading_has_no_home_extension() {
        let config = config();
        let subject = SubjectId::new("p1").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let reading =
            Reading::blood_pressure(ReadingSource::Office, at, Some(121.0), None).unwrap();

        let split = bp_split_observations(&subject, &reading, &config);
        assert_eq!(split.len(), 1);
        assert!(split[0].extension.iter().all(|e: &Extension| e.url != fhir::observation::HOME_SETTING_EXTENSION_URL));
        assert!(protocol_observation(&subject, &reading, &config).is_none());
        assert!(pulse_observation(&subject, &reading, &config).is_err());

        let entry = BundleEntry::new(Resource::Observation(split[0].clone()));
        assert!(entry.relative_reference().is_none());
    }
}
