//! Assessment units, their registry and the result adapter.
//!
//! A unit takes a prepared [`nrf_spatial::Boundary`] and reads reference data
//! through a [`nrf_reference::ReferenceStore`]. It returns [`NamedTables`],
//! which [`adapt`] turns into typed [`AssessmentRecords`].

pub mod adapter;
pub mod calculators;
pub mod error;
pub mod gcn;
pub mod nutrient;
pub mod records;
pub mod registry;
pub mod tables;

pub use adapter::adapt;
pub use error::{AdapterError, AssessmentError, Result};
pub use gcn::GcnAssessment;
pub use nutrient::NutrientAssessment;
pub use records::{
    AssessmentRecords, Development, GcnAssessmentResult, GcnDevelopment, GcnHabitatImpact,
    GcnPondFrequency, GcnPondInfo, ImpactAssessmentResult, LandUseImpact, NutrientImpact,
    SpatialAssignment, WastewaterImpact,
};
pub use registry::{dispatch_tag, unit_for, AssessmentSettings, AssessmentUnit};
pub use tables::{NamedTables, TableBuilder, TableReader};
