//! The default vendor: panel observations submitted as one transaction.

use super::{common, VendorTransformer};
use crate::config::{ReconcileConfig, VendorProfile};
use crate::models::{Reading, ReadingKind, SubjectId};
use crate::remote::RemoteRecordSystem;
use crate::CoachResult;
use async_trait::async_trait;
use fhir::{Bundle, Resource};
use std::sync::Arc;

pub struct DefaultTransformer {
    config: Arc<ReconcileConfig>,
}

impl DefaultTransformer {
    pub fn new(config: Arc<ReconcileConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl VendorTransformer for DefaultTransformer {
    fn profile(&self) -> VendorProfile {
        VendorProfile::Default
    }

    fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// A blood pressure reading becomes one panel observation, followed by a protocol
    /// observation when the answer is known. Everything travels in a single transaction.
    fn transform_outgoing_reading(
        &self,
        subject: &SubjectId,
        reading: &Reading,
    ) -> CoachResult<Bundle> {
        let resources = match reading.kind() {
            ReadingKind::BloodPressure => {
                let mut resources = vec![Resource::Observation(common::bp_panel_observation(
                    subject,
                    reading,
                    &self.config,
                ))];
                if let Some(protocol) = common::protocol_observation(subject, reading, &self.config)
                {
                    resources.push(Resource::Observation(protocol));
                }
                resources
            }
            ReadingKind::Pulse => vec![Resource::Observation(common::pulse_observation(
                subject,
                reading,
                &self.config,
            )?)],
        };
        Ok(Bundle::transaction(resources))
    }

    async fn write_remote(
        &self,
        remote: &dyn RemoteRecordSystem,
        bundle: Bundle,
    ) -> CoachResult<Bundle> {
        remote.transaction(&bundle).await
    }
}
