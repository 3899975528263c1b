//! Nutrient neutrality assessment.
//!
//! Per development: majority-overlap assignment to treatment works, planning
//! authority and subcatchment; land use uplift inside nutrient neutrality
//! catchments; wastewater loads from the assigned treatment works; totals
//! with the precautionary buffer. Developments outside every catchment are
//! dropped from the `impact_summary` table.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use arrow::array::RecordBatch;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use nrf_protocol::{AssessmentType, JobMetadata, NutrientConfig};
use nrf_reference::{
    load_scoped, BufferedBoundaryScope, LayerKind, LocatorScope, Query, ReferenceStore, Row, Scope,
    ScopeStrategy, Source,
};
use nrf_spatial::feature::{value_as_f64, value_as_string};
use nrf_spatial::overlay::overlay_pieces;
use nrf_spatial::{majority_overlap, Attributes, Boundary, Feature, FeatureSet, GridSize};

use crate::calculators::{
    apply_precautionary_buffer, land_use_uplift, round_dp, suds_mitigation, wastewater_load,
    SQUARE_METRES_PER_HECTARE,
};
use crate::error::{AssessmentError, Result};
use crate::registry::AssessmentUnit;
use crate::tables::{NamedTables, TableBuilder};

pub const IMPACT_SUMMARY: &str = "impact_summary";
pub const RATES_LOOKUP: &str = "rates_lookup";
pub const WWTW_LOOKUP: &str = "wwtw_lookup";

const PACKAGE_TREATMENT_PLANT: &str = "Package Treatment Plant default";
const UNKNOWN_LPA: &str = "UNKNOWN";

pub struct NutrientAssessment {
    config: NutrientConfig,
    grid: GridSize,
}

impl NutrientAssessment {
    pub fn new(config: NutrientConfig, grid: GridSize) -> Self {
        Self { config, grid }
    }
}

#[async_trait]
impl AssessmentUnit for NutrientAssessment {
    fn kind(&self) -> AssessmentType {
        AssessmentType::Nutrient
    }

    async fn run(
        &self,
        boundary: &Boundary,
        metadata: &JobMetadata,
        store: &dyn ReferenceStore,
    ) -> Result<NamedTables> {
        info!(
            unique_ref = %metadata.unique_ref,
            developments = boundary.len(),
            "running nutrient assessment"
        );
        let mut rows = prepare(boundary)?;
        self.assign_spatial(boundary, store, &mut rows).await?;
        self.land_use(boundary, store, &mut rows).await?;
        self.wastewater(store, &mut rows).await?;
        self.totals(&mut rows);

        let assessed = rows.len();
        rows.retain(DevelopmentRow::in_scope);
        info!(
            assessed,
            in_scope = rows.len(),
            "nutrient assessment complete"
        );

        let table = impact_summary(&rows).map_err(|e| AssessmentError::table(IMPACT_SUMMARY, e))?;
        Ok(NamedTables::from([(IMPACT_SUMMARY.to_string(), table)]))
    }
}

/// One development as it moves through the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
struct DevelopmentRow {
    rlb_id: i64,
    id: String,
    name: Option<String>,
    dwelling_category: String,
    source: String,
    dwellings: i64,
    shape_area: f64,

    majority_wwtw_id: i64,
    majority_name: String,
    majority_opcat_name: Option<String>,

    area_in_nn_catchment_ha: Option<f64>,
    nn_catchment: Option<String>,
    n_lu_uplift: Option<f64>,
    p_lu_uplift: Option<f64>,
    n_lu_post_suds: f64,
    p_lu_post_suds: f64,

    occupancy_rate: Option<f64>,
    water_usage: Option<f64>,
    daily_water_usage: Option<f64>,
    wwtw_name: Option<String>,
    wwtw_subcatchment: Option<String>,
    n_conc_temp: Option<f64>,
    n_conc_perm: Option<f64>,
    p_conc_temp: Option<f64>,
    p_conc_perm: Option<f64>,
    n_wwtw_temp: f64,
    p_wwtw_temp: f64,
    n_wwtw_perm: f64,
    p_wwtw_perm: f64,

    n_total: f64,
    p_total: f64,
    dev_area_ha: f64,
}

impl DevelopmentRow {
    fn in_scope(&self) -> bool {
        match (self.area_in_nn_catchment_ha, self.wwtw_name.as_deref()) {
            (None, None) => false,
            (None, Some(PACKAGE_TREATMENT_PLANT)) => false,
            _ => true,
        }
    }
}

fn prepare(boundary: &Boundary) -> Result<Vec<DevelopmentRow>> {
    let required = |feature: &Feature, key: &'static str| {
        feature
            .attr_string(key)
            .ok_or_else(|| AssessmentError::missing_attribute("boundary", key))
    };
    boundary
        .features()
        .iter()
        .enumerate()
        .map(|(index, feature)| {
            Ok(DevelopmentRow {
                rlb_id: index as i64 + 1,
                id: required(feature, "id")?,
                name: feature.attr_string("name"),
                dwelling_category: required(feature, "dwelling_category")?,
                source: required(feature, "source")?,
                dwellings: feature
                    .attr_f64("dwellings")
                    .ok_or_else(|| AssessmentError::missing_attribute("boundary", "dwellings"))?
                    as i64,
                shape_area: boundary.set().area_of(index)?,
                ..DevelopmentRow::default()
            })
        })
        .collect()
}

/// Features of a layer inside `scope`; an empty scope reads nothing.
async fn load_layer(
    store: &dyn ReferenceStore,
    kind: LayerKind,
    scope: &Scope,
    boundary: &Boundary,
) -> Result<FeatureSet> {
    Ok(load_scoped(store, Query::layer(kind), scope)
        .await?
        .into_features()
        .unwrap_or_else(|| FeatureSet::new(boundary.crs())))
}

impl NutrientAssessment {
    async fn assign_spatial(
        &self,
        boundary: &Boundary,
        store: &dyn ReferenceStore,
        rows: &mut [DevelopmentRow],
    ) -> Result<()> {
        let scope = BufferedBoundaryScope::new(0.0).resolve(boundary, store).await?;
        let input = boundary.set();

        let wwtw = load_layer(store, LayerKind::WwtwCatchments, &scope, boundary).await?;
        let fallback = self.config.fallback_wwtw_id;
        let ids = majority_overlap(input, &wwtw, "WwTw_ID", Value::from(fallback), self.grid)?;

        let lpa = load_layer(store, LayerKind::LpaBoundaries, &scope, boundary).await?;
        let names = majority_overlap(input, &lpa, "NAME", Value::from(UNKNOWN_LPA), self.grid)?;

        let subcatchments = load_layer(store, LayerKind::Subcatchments, &scope, boundary).await?;
        let opcats = majority_overlap(input, &subcatchments, "OPCAT_NAME", Value::Null, self.grid)?;

        for (((row, id), name), opcat) in rows.iter_mut().zip(ids).zip(names).zip(opcats) {
            row.majority_wwtw_id = value_as_f64(&id).map(|v| v as i64).unwrap_or(fallback);
            row.majority_name = value_as_string(&name).unwrap_or_else(|| UNKNOWN_LPA.to_string());
            row.majority_opcat_name = value_as_string(&opcat);
        }
        debug!(
            wwtw_candidates = wwtw.len(),
            lpa_candidates = lpa.len(),
            subcatchment_candidates = subcatchments.len(),
            "spatial assignment done"
        );
        Ok(())
    }

    /// Land use uplift from the three-way intersection of each development,
    /// the coefficient layer and the catchments it falls in.
    async fn land_use(
        &self,
        boundary: &Boundary,
        store: &dyn ReferenceStore,
        rows: &mut [DevelopmentRow],
    ) -> Result<()> {
        let reduction = self.config.suds.total_reduction_factor();
        let locator = LocatorScope::new(Query::layer(LayerKind::NnCatchments));
        let (scope, catchments) = locator.locate(boundary, store).await?;
        let coefficients = load_scoped(store, Query::features(Source::Coefficients), &scope)
            .await?
            .into_features()
            .unwrap_or_default();

        let sums = if coefficients.is_empty() {
            BTreeMap::new()
        } else {
            self.land_use_sums(boundary, &coefficients, &catchments)?
        };
        debug!(
            catchments = catchments.len(),
            coefficients = coefficients.len(),
            developments_in_catchment = sums.len(),
            "land use intersection done"
        );

        for (index, row) in rows.iter_mut().enumerate() {
            match sums.get(&index) {
                Some(sum) => {
                    row.area_in_nn_catchment_ha = Some(sum.area_ha);
                    row.nn_catchment = (!sum.catchments.is_empty())
                        .then(|| sum.catchments.iter().cloned().collect::<Vec<_>>().join("; "));
                    row.n_lu_uplift = Some(sum.nitrogen);
                    row.p_lu_uplift = Some(sum.phosphorus);
                    row.n_lu_post_suds = suds_mitigation(sum.nitrogen, reduction);
                    row.p_lu_post_suds = suds_mitigation(sum.phosphorus, reduction);
                }
                None => {
                    row.n_lu_post_suds = 0.0;
                    row.p_lu_post_suds = 0.0;
                }
            }
        }
        Ok(())
    }

    fn land_use_sums(
        &self,
        boundary: &Boundary,
        coefficients: &FeatureSet,
        catchments: &FeatureSet,
    ) -> Result<BTreeMap<usize, LandUseSum>> {
        let first = overlay_pieces(boundary.set(), coefficients, self.grid)?;
        let mut pieces = FeatureSet::new(boundary.crs()).with_features(
            first
                .iter()
                .map(|piece| Feature::new(piece.geometry.clone(), Attributes::new()))
                .collect(),
        );
        pieces.grid = Some(self.grid);
        let second = overlay_pieces(&pieces, catchments, self.grid)?;

        let mut sums: BTreeMap<usize, LandUseSum> = BTreeMap::new();
        for piece in &second {
            let parent = &first[piece.left];
            let coefficient = &coefficients.features[parent.right];
            let area_ha = piece.area() / SQUARE_METRES_PER_HECTARE;
            let sum = sums.entry(parent.left).or_default();
            sum.area_ha += area_ha;

            let (nitrogen, phosphorus) = land_use_uplift(
                area_ha,
                coefficient.attr_f64("lu_curr_n_coeff").unwrap_or(f64::NAN),
                coefficient.attr_f64("n_resi_coeff").unwrap_or(f64::NAN),
                coefficient.attr_f64("lu_curr_p_coeff").unwrap_or(f64::NAN),
                coefficient.attr_f64("p_resi_coeff").unwrap_or(f64::NAN),
            );
            // Pieces with a missing coefficient add area but no uplift.
            if nitrogen.is_finite() {
                sum.nitrogen += nitrogen;
            }
            if phosphorus.is_finite() {
                sum.phosphorus += phosphorus;
            }
            if let Some(name) = catchments.features[piece.right].attr_string("N2K_Site_N") {
                sum.catchments.insert(name);
            }
        }
        Ok(sums)
    }

    async fn wastewater(&self, store: &dyn ReferenceStore, rows: &mut [DevelopmentRow]) -> Result<()> {
        let rates = first_by(
            store.execute(&Query::lookup(RATES_LOOKUP)).await?.into_rows(),
            |row| text(row, "nn_catchment"),
        );
        for row in rows.iter_mut() {
            if let Some(rate) = row.nn_catchment.as_ref().and_then(|c| rates.get(c)) {
                row.occupancy_rate = number(rate, "occupancy_rate");
                row.water_usage = number(rate, "water_usage_L_per_person_day");
            }
        }
        fill_with_group_mean(rows, |r| r.majority_wwtw_id, |r| &mut r.occupancy_rate);
        fill_with_group_mean(rows, |r| r.majority_wwtw_id, |r| &mut r.water_usage);

        let works = first_by(
            store.execute(&Query::lookup(WWTW_LOOKUP)).await?.into_rows(),
            |row| number(row, "wwtw_code").map(|code| code as i64),
        );
        let fallback = self.config.fallback_wwtw_id;
        for row in rows.iter_mut() {
            row.daily_water_usage = match (row.occupancy_rate, row.water_usage) {
                (Some(occupancy), Some(usage)) => Some(row.dwellings as f64 * (occupancy * usage)),
                _ => None,
            };

            if let Some(entry) = works.get(&row.majority_wwtw_id) {
                row.wwtw_name = text(entry, "wwtw_name");
                row.wwtw_subcatchment = text(entry, "wwtw_subcatchment");
                row.n_conc_temp = number(entry, "nitrogen_conc_2025_2030_mg_L");
                row.n_conc_perm = number(entry, "nitrogen_conc_2030_onwards_mg_L");
                row.p_conc_temp = number(entry, "phosphorus_conc_2025_2030_mg_L");
                row.p_conc_perm = number(entry, "phosphorus_conc_2030_onwards_mg_L");
            }
            if row.majority_wwtw_id == fallback && row.wwtw_subcatchment.is_none() {
                row.wwtw_subcatchment = row.majority_opcat_name.clone();
            }

            let dwellings = row.dwellings as f64;
            let occupancy = row.occupancy_rate.unwrap_or(0.0);
            let usage = row.water_usage.unwrap_or(0.0);
            let temp = wastewater_load(
                dwellings,
                occupancy,
                usage,
                row.n_conc_temp.unwrap_or(0.0),
                row.p_conc_temp.unwrap_or(0.0),
            );
            let perm = wastewater_load(
                dwellings,
                occupancy,
                usage,
                row.n_conc_perm.unwrap_or(0.0),
                row.p_conc_perm.unwrap_or(0.0),
            );
            row.n_wwtw_temp = temp.nitrogen_kg_yr;
            row.p_wwtw_temp = temp.phosphorus_kg_yr;
            row.n_wwtw_perm = perm.nitrogen_kg_yr;
            row.p_wwtw_perm = perm.phosphorus_kg_yr;
        }
        Ok(())
    }

    fn totals(&self, rows: &mut [DevelopmentRow]) {
        let buffer = self.config.precautionary_buffer_percent;
        for row in rows.iter_mut() {
            row.n_total = apply_precautionary_buffer(row.n_lu_post_suds, row.n_wwtw_perm, buffer);
            row.p_total = apply_precautionary_buffer(row.p_lu_post_suds, row.p_wwtw_perm, buffer);
            row.dev_area_ha = round_dp(row.shape_area / SQUARE_METRES_PER_HECTARE, 2);

            row.area_in_nn_catchment_ha = row.area_in_nn_catchment_ha.map(|v| round_dp(v, 2));
            for value in [
                &mut row.n_wwtw_temp,
                &mut row.p_wwtw_temp,
                &mut row.n_wwtw_perm,
                &mut row.p_wwtw_perm,
                &mut row.n_total,
                &mut row.p_total,
            ] {
                *value = round_dp(*value, 2);
            }
        }
    }
}

#[derive(Debug, Default)]
struct LandUseSum {
    area_ha: f64,
    nitrogen: f64,
    phosphorus: f64,
    catchments: BTreeSet<String>,
}

fn text(row: &Row, key: &str) -> Option<String> {
    row.get(key).and_then(value_as_string)
}

fn number(row: &Row, key: &str) -> Option<f64> {
    row.get(key).and_then(value_as_f64)
}

/// Index lookup rows by key, keeping the first row per key.
fn first_by<K, F>(rows: Vec<Row>, key: F) -> HashMap<K, Row>
where
    K: std::hash::Hash + Eq,
    F: Fn(&Row) -> Option<K>,
{
    let mut out = HashMap::new();
    for row in rows {
        if let Some(k) = key(&row) {
            out.entry(k).or_insert(row);
        }
    }
    out
}

/// Replace missing values with the mean of the present values among rows
/// sharing the same group key.
fn fill_with_group_mean<G, F>(rows: &mut [DevelopmentRow], group: G, mut field: F)
where
    G: Fn(&DevelopmentRow) -> i64,
    F: FnMut(&mut DevelopmentRow) -> &mut Option<f64>,
{
    let mut totals: HashMap<i64, (f64, usize)> = HashMap::new();
    for row in rows.iter_mut() {
        let key = group(row);
        if let Some(value) = *field(row) {
            let entry = totals.entry(key).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    for row in rows.iter_mut() {
        let key = group(row);
        let slot = field(row);
        if slot.is_none() {
            *slot = totals.get(&key).map(|(sum, count)| sum / *count as f64);
        }
    }
}

fn impact_summary(rows: &[DevelopmentRow]) -> std::result::Result<RecordBatch, arrow::error::ArrowError> {
    let col = |f: fn(&DevelopmentRow) -> f64| rows.iter().map(f).collect::<Vec<_>>();
    let opt = |f: fn(&DevelopmentRow) -> Option<f64>| rows.iter().map(f).collect::<Vec<_>>();
    let opt_text = |f: fn(&DevelopmentRow) -> Option<String>| rows.iter().map(f).collect::<Vec<_>>();

    TableBuilder::new()
        .int64("rlb_id", rows.iter().map(|r| r.rlb_id).collect())
        .utf8("id", rows.iter().map(|r| r.id.clone()).collect())
        .opt_utf8("name", opt_text(|r| r.name.clone()))
        .utf8("dwelling_category", rows.iter().map(|r| r.dwelling_category.clone()).collect())
        .utf8("source", rows.iter().map(|r| r.source.clone()).collect())
        .int64("dwellings", rows.iter().map(|r| r.dwellings).collect())
        .float64("shape_area", col(|r| r.shape_area))
        .int64("majority_wwtw_id", rows.iter().map(|r| r.majority_wwtw_id).collect())
        .utf8("majority_name", rows.iter().map(|r| r.majority_name.clone()).collect())
        .opt_utf8("majority_opcat_name", opt_text(|r| r.majority_opcat_name.clone()))
        .opt_float64("area_in_nn_catchment_ha", opt(|r| r.area_in_nn_catchment_ha))
        .opt_utf8("nn_catchment", opt_text(|r| r.nn_catchment.clone()))
        .opt_float64("n_lu_uplift", opt(|r| r.n_lu_uplift))
        .opt_float64("p_lu_uplift", opt(|r| r.p_lu_uplift))
        .float64("n_lu_post_suds", col(|r| r.n_lu_post_suds))
        .float64("p_lu_post_suds", col(|r| r.p_lu_post_suds))
        .opt_float64("occupancy_rate", opt(|r| r.occupancy_rate))
        .opt_float64("water_usage_L_per_person_day", opt(|r| r.water_usage))
        .opt_float64("daily_water_usage_L", opt(|r| r.daily_water_usage))
        .opt_utf8("wwtw_name", opt_text(|r| r.wwtw_name.clone()))
        .opt_utf8("wwtw_subcatchment", opt_text(|r| r.wwtw_subcatchment.clone()))
        .opt_float64("nitrogen_conc_2025_2030_mg_L", opt(|r| r.n_conc_temp))
        .opt_float64("nitrogen_conc_2030_onwards_mg_L", opt(|r| r.n_conc_perm))
        .opt_float64("phosphorus_conc_2025_2030_mg_L", opt(|r| r.p_conc_temp))
        .opt_float64("phosphorus_conc_2030_onwards_mg_L", opt(|r| r.p_conc_perm))
        .float64("n_wwtw_temp", col(|r| r.n_wwtw_temp))
        .float64("p_wwtw_temp", col(|r| r.p_wwtw_temp))
        .float64("n_wwtw_perm", col(|r| r.n_wwtw_perm))
        .float64("p_wwtw_perm", col(|r| r.p_wwtw_perm))
        .float64("n_total", col(|r| r.n_total))
        .float64("p_total", col(|r| r.p_total))
        .float64("dev_area_ha", col(|r| r.dev_area_ha))
        .build()
}
