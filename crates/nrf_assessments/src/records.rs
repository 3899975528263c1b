//! Typed assessment records, as persisted and reported.

use serde::{Deserialize, Serialize};

use nrf_protocol::AssessmentType;

/// A proposed residential development (one red line boundary feature).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Development {
    pub id: String,
    pub name: String,
    pub dwelling_category: String,
    pub source: String,
    pub dwellings: i64,
    pub area_m2: f64,
    pub area_ha: f64,
}

/// Majority-overlap assignments of a development.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialAssignment {
    /// Fallback id when outside every modelled catchment.
    pub wwtw_id: i64,
    pub wwtw_name: Option<String>,
    pub wwtw_subcatchment: Option<String>,
    pub lpa_name: String,
    pub nn_catchment: Option<String>,
    pub dev_subcatchment: Option<String>,
    pub area_in_nn_catchment_ha: Option<f64>,
}

/// Land use uplift; `None` outside every nutrient neutrality catchment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandUseImpact {
    pub nitrogen_kg_yr: Option<f64>,
    pub phosphorus_kg_yr: Option<f64>,
    pub nitrogen_post_suds_kg_yr: Option<f64>,
    pub phosphorus_post_suds_kg_yr: Option<f64>,
}

/// Wastewater loads. Rates may be missing inside a treatment works
/// catchment that has no rates entry; concentrations are still reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WastewaterImpact {
    pub occupancy_rate: Option<f64>,
    #[serde(rename = "water_usage_L_per_person_day")]
    pub water_usage_l_per_person_day: Option<f64>,
    #[serde(rename = "daily_water_usage_L")]
    pub daily_water_usage_l: Option<f64>,
    #[serde(rename = "nitrogen_conc_2025_2030_mg_L")]
    pub nitrogen_conc_2025_2030_mg_l: Option<f64>,
    #[serde(rename = "phosphorus_conc_2025_2030_mg_L")]
    pub phosphorus_conc_2025_2030_mg_l: Option<f64>,
    #[serde(rename = "nitrogen_conc_2030_onwards_mg_L")]
    pub nitrogen_conc_2030_onwards_mg_l: Option<f64>,
    #[serde(rename = "phosphorus_conc_2030_onwards_mg_L")]
    pub phosphorus_conc_2030_onwards_mg_l: Option<f64>,
    pub nitrogen_temp_kg_yr: Option<f64>,
    pub phosphorus_temp_kg_yr: Option<f64>,
    pub nitrogen_perm_kg_yr: Option<f64>,
    pub phosphorus_perm_kg_yr: Option<f64>,
}

/// Totals including the precautionary buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutrientImpact {
    pub nitrogen_total_kg_yr: f64,
    pub phosphorus_total_kg_yr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactAssessmentResult {
    pub rlb_id: i64,
    pub development: Development,
    pub spatial: SpatialAssignment,
    pub land_use: LandUseImpact,
    /// Present only when a treatment works was matched.
    pub wastewater: Option<WastewaterImpact>,
    pub total: NutrientImpact,
}

impl ImpactAssessmentResult {
    pub fn is_within_nn_catchment(&self) -> bool {
        self.spatial.nn_catchment.is_some()
    }

    pub fn is_within_wwtw_catchment(&self) -> bool {
        self.wastewater.is_some() && self.spatial.wwtw_name.is_some()
    }

    pub fn requires_assessment(&self) -> bool {
        self.is_within_nn_catchment() || self.is_within_wwtw_catchment()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcnDevelopment {
    pub id: String,
    pub name: Option<String>,
    pub unique_ref: String,
    /// `{unique_ref}_SiteNNNNN`.
    pub unique_site: String,
    pub unique_buffer_site: Option<String>,
    pub area: String,
    pub orig_fid: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcnHabitatImpact {
    pub area: String,
    pub risk_zone: String,
    pub shape_area: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcnPondFrequency {
    pub pans: String,
    pub area: String,
    pub max_zone: String,
    pub tmp_imp: String,
    pub frequency: i64,
}

/// One pond inside the red line boundary or its buffer. Zone fields are
/// `None` for ponds outside every risk zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcnPondInfo {
    pub pond_id: String,
    pub pans: String,
    pub tmp_imp: String,
    pub area: String,
    pub concatenate_rz: Option<String>,
    pub max_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcnAssessmentResult {
    pub unique_ref: String,
    pub development: GcnDevelopment,
    pub habitat_impacts: Vec<GcnHabitatImpact>,
    pub pond_frequencies: Vec<GcnPondFrequency>,
    pub ponds_in_rlb: Vec<GcnPondInfo>,
    pub ponds_in_buffer: Vec<GcnPondInfo>,
}

/// Typed output of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "assessment_type", content = "results", rename_all = "lowercase")]
pub enum AssessmentRecords {
    Nutrient(Vec<ImpactAssessmentResult>),
    Gcn(Vec<GcnAssessmentResult>),
}

impl AssessmentRecords {
    pub fn kind(&self) -> AssessmentType {
        match self {
            AssessmentRecords::Nutrient(_) => AssessmentType::Nutrient,
            AssessmentRecords::Gcn(_) => AssessmentType::Gcn,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AssessmentRecords::Nutrient(results) => results.len(),
            AssessmentRecords::Gcn(results) => results.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
