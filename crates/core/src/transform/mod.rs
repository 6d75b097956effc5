//! Vendor transformers: translation between wire bundles and canonical readings and goals.
//!
//! Every supported remote vendor shares the incoming extraction logic in [`common`]; they differ
//! in how a locally originated reading is encoded and submitted. The transformer for a subject is
//! selected once, from the configured [`VendorProfile`], via [`transformer_for`].

pub mod common;
pub mod default;
pub mod epic;

pub use default::DefaultTransformer;
pub use epic::EpicTransformer;

use crate::config::{ReconcileConfig, VendorProfile};
use crate::models::{Goal, Reading, ReadingKind, SubjectId};
use crate::remote::RemoteRecordSystem;
use crate::CoachResult;
use async_trait::async_trait;
use fhir::Bundle;
use std::sync::Arc;

#[async_trait]
pub trait VendorTransformer: Send + Sync {
    fn profile(&self) -> VendorProfile;

    fn config(&self) -> &ReconcileConfig;

    /// Canonical readings of `kind` in `bundle`. Resources that cannot be read are logged and
    /// skipped.
    fn transform_incoming_readings(&self, bundle: &Bundle, kind: ReadingKind) -> Vec<Reading> {
        common::readings_from_bundle(bundle, kind, self.config())
    }

    fn transform_incoming_goals(&self, bundle: &Bundle) -> Vec<Goal> {
        common::goals_from_bundle(bundle, self.config())
    }

    /// Encode a locally originated reading for submission to the remote.
    fn transform_outgoing_reading(&self, subject: &SubjectId, reading: &Reading)
        -> CoachResult<Bundle>;

    /// Submit an outgoing bundle, returning what the remote accepted.
    ///
    /// # Errors
    ///
    /// Fails with the remote's error on any non-success status.
    async fn write_remote(
        &self,
        remote: &dyn RemoteRecordSystem,
        bundle: Bundle,
    ) -> CoachResult<Bundle>;
}

pub fn transformer_for(
    profile: VendorProfile,
    config: Arc<ReconcileConfig>,
) -> Arc<dyn VendorTransformer> {
    match profile {
        VendorProfile::Default => Arc::new(DefaultTransformer::new(config)),
        VendorProfile::Epic => Arc::new(EpicTransformer::new(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_transformer_by_profile() {
        let config = Arc::new(ReconcileConfig::defaults().unwrap());
        assert_eq!(
            transformer_for(VendorProfile::Epic, config.clone()).profile(),
            VendorProfile::Epic
        );
        assert_eq!(
            transformer_for(VendorProfile::Default, config).profile(),
            VendorProfile::Default
        );
    }
}
