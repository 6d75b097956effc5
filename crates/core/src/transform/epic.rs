//! Epic: no transaction support, and blood pressure is written as separate systolic and
//! diastolic observations, one create per resource.

use super::{common, VendorTransformer};
use crate::config::{ReconcileConfig, VendorProfile};
use crate::models::{Reading, ReadingKind, SubjectId};
use crate::remote::RemoteRecordSystem;
use crate::CoachResult;
use async_trait::async_trait;
use fhir::{Bundle, Resource};
use std::sync::Arc;

pub struct EpicTransformer {
    config: Arc<ReconcileConfig>,
}

impl EpicTransformer {
    pub fn new(config: Arc<ReconcileConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl VendorTransformer for EpicTransformer {
    fn profile(&self) -> VendorProfile {
        VendorProfile::Epic
    }

    fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    fn transform_outgoing_reading(
        &self,
        subject: &SubjectId,
        reading: &Reading,
    ) -> CoachResult<Bundle> {
        let observations = match reading.kind() {
            ReadingKind::BloodPressure => {
                common::bp_split_observations(subject, reading, &self.config)
            }
            ReadingKind::Pulse => vec![common::pulse_observation(subject, reading, &self.config)?],
        };
        Ok(Bundle::collection(
            observations.into_iter().map(Resource::Observation),
        ))
    }

    /// Creates each resource in order and stops at the first failure.
    async fn write_remote(
        &self,
        remote: &dyn RemoteRecordSystem,
        bundle: Bundle,
    ) -> CoachResult<Bundle> {
        let mut created = Vec::with_capacity(bundle.entry.len());
        for resource in bundle.resources() {
            created.push(remote.create(resource).await?);
        }
        Ok(Bundle::collection(created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReadingSource;
    use crate::remote::mock::MockRemote;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::Ordering;

    fn transformer() -> EpicTransformer {
        EpicTransformer::new(Arc::new(ReconcileConfig::defaults().unwrap()))
    }

    fn subject() -> SubjectId {
        SubjectId::new("p1").unwrap()
    }

    fn reading() -> Reading {
        Reading::blood_pressure(
            ReadingSource::Home,
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
            Some(135.0),
            Some(88.0),
        )
        .unwrap()
    }

    #[test]
    fn bp_reading_becomes_two_single_concept_observations() {
        let config = ReconcileConfig::defaults().unwrap();
        let bundle = transformer()
            .transform_outgoing_reading(&subject(), &reading())
            .unwrap();

        let observations: Vec<_> = bundle.observations().collect();
        assert_eq!(observations.len(), 2);
        assert!(config.systolic_codes.matches(&observations[0].code));
        assert!(config.diastolic_codes.matches(&observations[1].code));
        assert!(observations.iter().all(|o| o.component.is_empty()));
        assert!(observations.iter().all(|o| o.has_home_setting_extension()));
    }

    #[tokio::test]
    async fn write_remote_creates_each_resource_and_pairs_them_back() {
        let transformer = transformer();
        let remote = MockRemote::new();
        let bundle = transformer
            .transform_outgoing_reading(&subject(), &reading())
            .unwrap();

        let created = transformer.write_remote(&remote, bundle).await.unwrap();

        assert_eq!(remote.create_calls.load(Ordering::SeqCst), 2);
        assert_eq!(remote.transaction_calls.load(Ordering::SeqCst), 0);
        let readings = transformer.transform_incoming_readings(&created, ReadingKind::BloodPressure);
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].systolic(), Some(135.0));
        assert_eq!(readings[0].diastolic(), Some(88.0));
        assert_eq!(readings[0].source(), ReadingSource::Home);
    }

    #[tokio::test]
    async fn write_failure_stops_at_first_create() {
        let transformer = transformer();
        let remote = MockRemote::new().failing_writes();
        let bundle = transformer
            .transform_outgoing_reading(&subject(), &reading())
            .unwrap();

        assert!(transformer.write_remote(&remote, bundle).await.is_err());
        assert_eq!(remote.create_calls.load(Ordering::SeqCst), 1);
    }
}
