//! The remote clinical record system collaborator.
//!
//! [`RemoteRecordSystem`] is the seam between reconciliation and the network. The production
//! implementation is [`HttpRemote`]; tests use an in-crate mock.

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use http::HttpRemote;

use crate::config::{CodeSet, LookbackPeriod};
use crate::models::SubjectId;
use crate::{CoachError, CoachResult};
use async_trait::async_trait;
use fhir::{Bundle, CapabilityStatement, Resource};

/// An observation search against the remote record system.
#[derive(Clone, Debug)]
pub struct ObservationQuery {
    pub subject: SubjectId,
    pub codes: CodeSet,
    pub lookback: LookbackPeriod,
    /// Restrict to observations recorded against this encounter reference.
    pub encounter: Option<String>,
}

impl ObservationQuery {
    pub fn new(subject: SubjectId, codes: CodeSet, lookback: LookbackPeriod) -> Self {
        Self {
            subject,
            codes,
            lookback,
            encounter: None,
        }
    }

    pub fn with_encounter(mut self, encounter: impl Into<String>) -> Self {
        self.encounter = Some(encounter.into());
        self
    }
}

/// A FHIR server holding the subject's authoritative clinical record.
#[async_trait]
pub trait RemoteRecordSystem: Send + Sync {
    /// Search observations. Related encounters are included in the returned bundle.
    async fn query(&self, query: &ObservationQuery) -> CoachResult<Bundle>;

    /// Search the subject's active goals.
    async fn query_goals(&self, subject: &SubjectId) -> CoachResult<Bundle>;

    /// Create one resource, returning the server's representation.
    async fn create(&self, resource: &Resource) -> CoachResult<Resource>;

    /// Submit a transaction bundle, returning the transaction-response bundle.
    async fn transaction(&self, bundle: &Bundle) -> CoachResult<Bundle>;

    /// The server's capability statement (`GET [base]/metadata`).
    async fn metadata(&self) -> CoachResult<CapabilityStatement>;
}

/// Discover the OAuth token endpoint the remote advertises in its capability statement.
///
/// # Errors
///
/// Returns [`CoachError::Data`] if the statement carries no token endpoint, or the remote error
/// if the statement cannot be fetched.
pub async fn resolve_token_endpoint(remote: &dyn RemoteRecordSystem) -> CoachResult<String> {
    let statement = remote.metadata().await?;
    statement
        .token_endpoint()
        .map_err(|e| CoachError::Data(e.to_string()))
}
