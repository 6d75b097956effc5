//! FHIR R4 wire/boundary support for the COACH reconciliation engine.
//!
//! This crate provides **wire models** and **translation helpers** for resources exchanged with a
//! remote clinical record system over FHIR JSON:
//! - `Bundle` collections and their entries
//! - `Observation`, `Goal`, `Encounter` and `CapabilityStatement` resources
//! - reference and identifier helpers used to decide whether two entries describe the same
//!   logical resource
//! - the [`BundleMerger`] that accumulates repeatedly fetched bundles without duplicates
//!
//! This crate focuses on:
//! - FHIR semantic alignment (only the elements the reconciliation engine reads or writes)
//! - serialisation/deserialisation
//! - pure, I/O-free helpers
//!
//! Unknown elements on known resources are ignored on input. Unknown resource types are carried
//! through losslessly as [`Resource::Other`].

pub mod bundle;
pub mod capability;
pub mod datatypes;
pub mod datetime;
pub mod goal;
pub mod merge;
pub mod observation;
pub mod reference;
pub mod resource;

// Re-export facades
pub use bundle::{Bundle, BundleEntry, BundleEntryRequest, BundleEntryResponse, BundleLink, BundleType};
pub use capability::{CapabilityRest, CapabilitySecurity, CapabilityStatement};
pub use datatypes::{
    CodeableConcept, Coding, Extension, Identifier, IdentifierUse, Period, Quantity, Reference,
};
pub use datetime::{format_fhir_datetime, parse_fhir_datetime};
pub use goal::{Goal, GoalTarget};
pub use merge::BundleMerger;
pub use observation::{Encounter, Observation, ObservationComponent};
pub use reference::{
    extract_id_from_reference, is_uuid, relative_reference_for, to_relative_reference,
};
pub use resource::{OtherResource, Resource};

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;
