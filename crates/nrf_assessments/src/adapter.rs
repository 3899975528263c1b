//! Result tables to typed records.
//!
//! Every row maps to exactly one record. Any missing table, missing required
//! column or null in a required field fails the whole call.

use nrf_protocol::AssessmentType;

use crate::error::AdapterError;
use crate::gcn::{AREA_BUFFER, AREA_RLB, DEVELOPMENT, HABITAT_IMPACT, POND_FREQUENCY, PONDS};
use crate::nutrient::IMPACT_SUMMARY;
use crate::records::{
    AssessmentRecords, Development, GcnAssessmentResult, GcnDevelopment, GcnHabitatImpact,
    GcnPondFrequency, GcnPondInfo, ImpactAssessmentResult, LandUseImpact, NutrientImpact,
    SpatialAssignment, WastewaterImpact,
};
use crate::tables::{NamedTables, TableReader};

pub fn adapt(kind: AssessmentType, tables: &NamedTables) -> Result<AssessmentRecords, AdapterError> {
    match kind {
        AssessmentType::Nutrient => nutrient(tables).map(AssessmentRecords::Nutrient),
        AssessmentType::Gcn => gcn(tables).map(|result| AssessmentRecords::Gcn(vec![result])),
    }
}

fn nutrient(tables: &NamedTables) -> Result<Vec<ImpactAssessmentResult>, AdapterError> {
    let t = TableReader::open(tables, IMPACT_SUMMARY)?;
    (0..t.num_rows()).map(|row| nutrient_row(&t, row)).collect()
}

fn nutrient_row(t: &TableReader<'_>, row: usize) -> Result<ImpactAssessmentResult, AdapterError> {
    let wwtw_name = t.opt_str("wwtw_name", row)?;
    let wastewater = match wwtw_name {
        Some(_) => Some(WastewaterImpact {
            occupancy_rate: t.opt_f64("occupancy_rate", row)?,
            water_usage_l_per_person_day: t.opt_f64("water_usage_L_per_person_day", row)?,
            daily_water_usage_l: t.opt_f64("daily_water_usage_L", row)?,
            nitrogen_conc_2025_2030_mg_l: t.opt_f64("nitrogen_conc_2025_2030_mg_L", row)?,
            phosphorus_conc_2025_2030_mg_l: t.opt_f64("phosphorus_conc_2025_2030_mg_L", row)?,
            nitrogen_conc_2030_onwards_mg_l: t.opt_f64("nitrogen_conc_2030_onwards_mg_L", row)?,
            phosphorus_conc_2030_onwards_mg_l: t.opt_f64("phosphorus_conc_2030_onwards_mg_L", row)?,
            nitrogen_temp_kg_yr: t.opt_f64("n_wwtw_temp", row)?,
            phosphorus_temp_kg_yr: t.opt_f64("p_wwtw_temp", row)?,
            nitrogen_perm_kg_yr: t.opt_f64("n_wwtw_perm", row)?,
            phosphorus_perm_kg_yr: t.opt_f64("p_wwtw_perm", row)?,
        }),
        None => None,
    };

    Ok(ImpactAssessmentResult {
        rlb_id: t.required_i64("rlb_id", row)?,
        development: Development {
            id: t.required_str("id", row)?,
            name: t.opt_str("name", row)?.unwrap_or_default(),
            dwelling_category: t.required_str("dwelling_category", row)?,
            source: t.required_str("source", row)?,
            dwellings: t.required_i64("dwellings", row)?,
            area_m2: t.required_f64("shape_area", row)?,
            area_ha: t.required_f64("dev_area_ha", row)?,
        },
        spatial: SpatialAssignment {
            wwtw_id: t.required_i64("majority_wwtw_id", row)?,
            wwtw_name,
            wwtw_subcatchment: t.opt_str("wwtw_subcatchment", row)?,
            lpa_name: t.required_str("majority_name", row)?,
            nn_catchment: t.opt_str("nn_catchment", row)?,
            dev_subcatchment: t.opt_str("majority_opcat_name", row)?,
            area_in_nn_catchment_ha: t.opt_f64("area_in_nn_catchment_ha", row)?,
        },
        land_use: LandUseImpact {
            nitrogen_kg_yr: t.opt_f64("n_lu_uplift", row)?,
            phosphorus_kg_yr: t.opt_f64("p_lu_uplift", row)?,
            nitrogen_post_suds_kg_yr: t.opt_f64("n_lu_post_suds", row)?,
            phosphorus_post_suds_kg_yr: t.opt_f64("p_lu_post_suds", row)?,
        },
        wastewater,
        total: NutrientImpact {
            nitrogen_total_kg_yr: t.required_f64("n_total", row)?,
            phosphorus_total_kg_yr: t.required_f64("p_total", row)?,
        },
    })
}

fn gcn(tables: &NamedTables) -> Result<GcnAssessmentResult, AdapterError> {
    let dev = TableReader::open(tables, DEVELOPMENT)?;
    if dev.num_rows() == 0 {
        return Err(AdapterError::EmptyTable(DEVELOPMENT.to_string()));
    }
    let development = GcnDevelopment {
        id: dev.required_str("id", 0)?,
        name: dev.opt_str("name", 0)?,
        unique_ref: dev.required_str("unique_ref", 0)?,
        unique_site: dev.required_str("unique_site", 0)?,
        unique_buffer_site: dev.opt_str("unique_buffer_site", 0)?,
        area: dev.required_str("area", 0)?,
        orig_fid: dev.required_i64("orig_fid", 0)?,
    };

    let habitat = TableReader::open(tables, HABITAT_IMPACT)?;
    let habitat_impacts = (0..habitat.num_rows())
        .map(|row| {
            Ok(GcnHabitatImpact {
                area: habitat.required_str("Area", row)?,
                risk_zone: habitat.required_str("RZ", row)?,
                shape_area: habitat.required_f64("Shape_Area", row)?,
            })
        })
        .collect::<Result<Vec<_>, AdapterError>>()?;

    let frequency = TableReader::open(tables, POND_FREQUENCY)?;
    let pond_frequencies = (0..frequency.num_rows())
        .map(|row| {
            Ok(GcnPondFrequency {
                pans: frequency.required_str("PANS", row)?,
                area: frequency.required_str("Area", row)?,
                max_zone: frequency.required_str("MaxZone", row)?,
                tmp_imp: frequency.required_str("TmpImp", row)?,
                frequency: frequency.required_i64("FREQUENCY", row)?,
            })
        })
        .collect::<Result<Vec<_>, AdapterError>>()?;

    let ponds = TableReader::open(tables, PONDS)?;
    let mut ponds_in_rlb = Vec::new();
    let mut ponds_in_buffer = Vec::new();
    for row in 0..ponds.num_rows() {
        let pond = GcnPondInfo {
            pond_id: ponds.required_str("Pond_ID", row)?,
            pans: ponds.required_str("PANS", row)?,
            tmp_imp: ponds.required_str("TmpImp", row)?,
            area: ponds.required_str("Area", row)?,
            concatenate_rz: ponds.opt_str("CONCATENATE_RZ", row)?,
            max_zone: ponds.opt_str("MaxZone", row)?,
        };
        match pond.area.as_str() {
            AREA_RLB => ponds_in_rlb.push(pond),
            AREA_BUFFER => ponds_in_buffer.push(pond),
            _ => {}
        }
    }

    Ok(GcnAssessmentResult {
        unique_ref: development.unique_ref.clone(),
        development,
        habitat_impacts,
        pond_frequencies,
        ponds_in_rlb,
        ponds_in_buffer,
    })
}
