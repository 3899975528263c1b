//! Shared protocol for the NRF impact worker.
//!
//! Defines the queue payload ([`ImpactAssessmentJob`]), the closed set of
//! assessment kinds, canonical defaults and the plain configuration structs
//! consumed by every other crate in the workspace.

pub mod config;
pub mod defaults;
pub mod error;
pub mod job;
pub mod types;

pub use config::{GcnConfig, IntakeConfig, NutrientConfig, SpatialConfig, SudsConfig};
pub use error::{ConfigError, EnvelopeError};
pub use job::{ImpactAssessmentJob, JobMetadata};
pub use types::AssessmentType;
