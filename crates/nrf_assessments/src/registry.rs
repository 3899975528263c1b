//! Assessment dispatch.
//!
//! The set of units is closed: [`unit_for`] matches exhaustively over
//! [`AssessmentType`], so adding a kind without a unit does not compile.
//! Tags that arrive as free text go through [`dispatch_tag`], which fails
//! with [`AssessmentError::UnsupportedType`] instead of doing nothing.

use async_trait::async_trait;

use nrf_protocol::{AssessmentType, GcnConfig, JobMetadata, NutrientConfig};
use nrf_reference::ReferenceStore;
use nrf_spatial::{Boundary, GridSize};

use crate::error::{AssessmentError, Result};
use crate::gcn::GcnAssessment;
use crate::nutrient::NutrientAssessment;
use crate::tables::NamedTables;

/// One pluggable calculation.
///
/// Units read reference data through `store` only and return their tables;
/// persistence and notification belong to the caller.
#[async_trait]
pub trait AssessmentUnit: Send + Sync {
    fn kind(&self) -> AssessmentType;

    async fn run(
        &self,
        boundary: &Boundary,
        metadata: &JobMetadata,
        store: &dyn ReferenceStore,
    ) -> Result<NamedTables>;
}

/// Settings shared by every unit.
#[derive(Debug, Clone, Default)]
pub struct AssessmentSettings {
    pub grid: GridSize,
    pub nutrient: NutrientConfig,
    pub gcn: GcnConfig,
}

pub fn unit_for(kind: AssessmentType, settings: &AssessmentSettings) -> Box<dyn AssessmentUnit> {
    match kind {
        AssessmentType::Nutrient => Box::new(NutrientAssessment::new(
            settings.nutrient.clone(),
            settings.grid,
        )),
        AssessmentType::Gcn => Box::new(GcnAssessment::new(settings.gcn.clone(), settings.grid)),
    }
}

pub fn dispatch_tag(tag: &str, settings: &AssessmentSettings) -> Result<Box<dyn AssessmentUnit>> {
    let kind = tag
        .parse::<AssessmentType>()
        .map_err(|_| AssessmentError::UnsupportedType(tag.to_string()))?;
    Ok(unit_for(kind, settings))
}
