//! Great crested newt assessment.
//!
//! Ponds and risk zones around the red line boundary (RLB) are split into
//! what lies inside the RLB and what lies in the surrounding buffer, then
//! summarised as habitat impact areas and pond counts per zone.

use std::collections::{BTreeMap, BTreeSet};

use arrow::array::RecordBatch;
use arrow::error::ArrowError;
use async_trait::async_trait;
use geo::Intersects;
use tracing::{debug, info};

use nrf_protocol::{AssessmentType, GcnConfig, JobMetadata};
use nrf_reference::{load_scoped, BufferedBoundaryScope, LayerKind, Query, ReferenceStore, Scope, ScopeStrategy};
use nrf_spatial::assign::geometry_distance;
use nrf_spatial::feature::value_as_string;
use nrf_spatial::overlay::{dissolve, intersect};
use nrf_spatial::{
    any_intersection, buffer, clip, overlay_intersection, Boundary, Feature, FeatureSet, GridSize,
};

use crate::error::{AssessmentError, Result};
use crate::registry::AssessmentUnit;
use crate::tables::{NamedTables, TableBuilder};

pub const DEVELOPMENT: &str = "development";
pub const HABITAT_IMPACT: &str = "habitat_impact";
pub const POND_FREQUENCY: &str = "pond_frequency";
pub const PONDS: &str = "ponds";

pub const AREA_RLB: &str = "RLB";
pub const AREA_BUFFER: &str = "Buffer";

const NATIONAL_SURVEY: &str = "NS";
const NOT_TEMPORARY: &str = "F";

/// Zones from highest to lowest risk.
const ZONE_PRIORITY: [&str; 3] = ["Red", "Amber", "Green"];

pub struct GcnAssessment {
    config: GcnConfig,
    grid: GridSize,
}

impl GcnAssessment {
    pub fn new(config: GcnConfig, grid: GridSize) -> Self {
        Self { config, grid }
    }
}

#[async_trait]
impl AssessmentUnit for GcnAssessment {
    fn kind(&self) -> AssessmentType {
        AssessmentType::Gcn
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
            buffer_m = self.config.buffer_distance_m,
            "running gcn assessment"
        );
        let grid = self.grid;
        let rlb = boundary.set().tagged("Area", AREA_RLB);
        let surround = buffer(boundary.set(), self.config.buffer_distance_m, true, grid)?
            .tagged("Area", AREA_BUFFER);
        let mut rlb_with_buffer = FeatureSet::new(boundary.crs())
            .with_features(rlb.iter().chain(surround.iter()).cloned().collect());
        rlb_with_buffer.grid = Some(grid);
        let extent = dissolve(&rlb_with_buffer, grid);

        let scope = BufferedBoundaryScope::new(self.config.buffer_distance_m)
            .resolve(boundary, store)
            .await?;
        let risk_zones = clip(
            &load_layer(store, LayerKind::GcnRiskZones, &scope, boundary).await?,
            &extent,
            grid,
        )?;
        if !risk_zones.iter().any(|zone| zone.attr("RZ").is_some()) {
            return Err(AssessmentError::missing_attribute("gcn_risk_zones", "RZ"));
        }

        let national = load_layer(store, LayerKind::GcnPonds, &scope, boundary)
            .await?
            .tagged("PANS", NATIONAL_SURVEY)
            .tagged("TmpImp", NOT_TEMPORARY);
        let ponds = self.split_ponds(&clip(&national, &extent, grid)?, &rlb);
        debug!(
            risk_zones = risk_zones.len(),
            ponds = ponds.len(),
            "reference data clipped to extent"
        );

        let habitat = self.habitat_impact(&ponds, &risk_zones, &rlb_with_buffer)?;
        let pond_rows = pond_zones(&ponds, &risk_zones)?;
        let frequencies = pond_frequency(&pond_rows);
        let developments = self.developments(boundary, &metadata.unique_ref);
        info!(
            habitat_rows = habitat.len(),
            ponds = pond_rows.len(),
            frequency_rows = frequencies.len(),
            "gcn assessment complete"
        );

        let table = |name: &'static str, built: std::result::Result<RecordBatch, ArrowError>| {
            built
                .map(|batch| (name.to_string(), batch))
                .map_err(|e| AssessmentError::table(name, e))
        };
        Ok(NamedTables::from([
            table(DEVELOPMENT, development_table(&developments))?,
            table(HABITAT_IMPACT, habitat_table(&habitat))?,
            table(POND_FREQUENCY, frequency_table(&frequencies))?,
            table(PONDS, ponds_table(&pond_rows))?,
        ]))
    }
}

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

#[derive(Debug, Clone, PartialEq)]
struct HabitatRow {
    area: String,
    risk_zone: String,
    shape_area: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct PondRow {
    pond_id: String,
    pans: String,
    tmp_imp: String,
    area: String,
    concatenate_rz: Option<String>,
    max_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct DevelopmentRow {
    id: String,
    name: Option<String>,
    unique_ref: String,
    unique_site: String,
    orig_fid: i64,
}

impl GcnAssessment {
    /// Ponds touching the RLB are cut to it; the rest belong to the buffer.
    fn split_ponds(&self, ponds: &FeatureSet, rlb: &FeatureSet) -> FeatureSet {
        let rlb_area = dissolve(rlb, self.grid);
        let mut inside = Vec::new();
        let mut outside = Vec::new();
        for pond in ponds.iter() {
            if pond.geometry.intersects(&rlb_area) {
                let geometry = intersect(&pond.geometry, &rlb_area, self.grid);
                if !geometry.0.is_empty() {
                    inside.push(Feature::new(geometry, pond.attributes.clone()));
                }
            } else {
                outside.push(pond.clone());
            }
        }

        let label = |features: Vec<Feature>, area: &str, prefix: &str| -> Vec<Feature> {
            features
                .into_iter()
                .enumerate()
                .map(|(i, pond)| {
                    pond.with_attr("Area", area)
                        .with_attr("Pond_ID", format!("{prefix}_{i}"))
                })
                .collect()
        };
        let mut features = label(inside, AREA_RLB, "RLB");
        features.extend(label(outside, AREA_BUFFER, "BUF"));

        FeatureSet {
            crs: ponds.crs,
            grid: Some(self.grid),
            features,
        }
    }

    fn habitat_impact(
        &self,
        ponds: &FeatureSet,
        risk_zones: &FeatureSet,
        rlb_with_buffer: &FeatureSet,
    ) -> Result<Vec<HabitatRow>> {
        if ponds.is_empty() {
            return Ok(Vec::new());
        }
        let reach = buffer(ponds, self.config.pond_buffer_distance_m, true, self.grid)?;
        let zones_in_reach = clip(risk_zones, &dissolve(&reach, self.grid), self.grid)?;
        let pieces = overlay_intersection(rlb_with_buffer, &zones_in_reach, self.grid)?;
        Ok(pieces
            .iter()
            .filter_map(|piece| {
                let shape_area = piece.planar_area();
                Some(HabitatRow {
                    area: piece.attr_string("Area")?,
                    risk_zone: piece.attr_string("RZ")?,
                    shape_area,
                })
                .filter(|row| row.shape_area > 0.0)
            })
            .collect())
    }

    fn developments(&self, boundary: &Boundary, unique_ref: &str) -> Vec<DevelopmentRow> {
        let sites = site_numbers(boundary.features(), self.config.merge_distance_m);
        boundary
            .features()
            .iter()
            .zip(sites)
            .enumerate()
            .map(|(index, (feature, site))| DevelopmentRow {
                id: feature
                    .attr_string("id")
                    .unwrap_or_else(|| unique_ref.to_string()),
                name: feature.attr_string("name"),
                unique_ref: unique_ref.to_string(),
                unique_site: format!("{unique_ref}_Site{site:05}"),
                orig_fid: index as i64,
            })
            .collect()
    }
}

/// Highest-risk zone present, or the first zone when none is ranked.
fn max_zone(zones: &BTreeSet<String>) -> Option<String> {
    ZONE_PRIORITY
        .iter()
        .find(|z| zones.contains(**z))
        .map(|z| z.to_string())
        .or_else(|| zones.iter().next().cloned())
}

fn pond_zones(ponds: &FeatureSet, risk_zones: &FeatureSet) -> Result<Vec<PondRow>> {
    let zones = any_intersection(ponds, risk_zones, "RZ")?;
    Ok(ponds
        .iter()
        .zip(zones)
        .map(|(pond, values)| {
            let distinct: BTreeSet<String> = values.iter().filter_map(value_as_string).collect();
            let concatenate_rz =
                (!distinct.is_empty()).then(|| distinct.iter().cloned().collect::<Vec<_>>().join(":"));
            PondRow {
                pond_id: pond.attr_string("Pond_ID").unwrap_or_default(),
                pans: pond.attr_string("PANS").unwrap_or_default(),
                tmp_imp: pond.attr_string("TmpImp").unwrap_or_default(),
                area: pond.attr_string("Area").unwrap_or_default(),
                max_zone: max_zone(&distinct),
                concatenate_rz,
            }
        })
        .collect())
}

type FrequencyKey = (String, String, String, String);

fn pond_frequency(ponds: &[PondRow]) -> BTreeMap<FrequencyKey, i64> {
    let mut counts = BTreeMap::new();
    for pond in ponds {
        let Some(zone) = &pond.max_zone else { continue };
        let key = (
            pond.pans.clone(),
            pond.area.clone(),
            zone.clone(),
            pond.tmp_imp.clone(),
        );
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

/// 1-based site number per feature. Features closer than `merge_distance`
/// share a site; sites are numbered in order of first appearance.
fn site_numbers(features: &[Feature], merge_distance: f64) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..features.len()).collect();
    fn root(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }
    for i in 0..features.len() {
        for j in (i + 1)..features.len() {
            if geometry_distance(&features[i].geometry, &features[j].geometry) <= merge_distance {
                let (a, b) = (root(&mut parent, i), root(&mut parent, j));
                if a != b {
                    parent[a.max(b)] = a.min(b);
                }
            }
        }
    }

    let mut numbers = BTreeMap::new();
    (0..features.len())
        .map(|i| {
            let r = root(&mut parent, i);
            let next = numbers.len() + 1;
            *numbers.entry(r).or_insert(next)
        })
        .collect()
}

fn development_table(rows: &[DevelopmentRow]) -> std::result::Result<RecordBatch, ArrowError> {
    TableBuilder::new()
        .utf8("id", rows.iter().map(|r| r.id.clone()).collect())
        .opt_utf8("name", rows.iter().map(|r| r.name.clone()).collect())
        .utf8("unique_ref", rows.iter().map(|r| r.unique_ref.clone()).collect())
        .utf8("unique_site", rows.iter().map(|r| r.unique_site.clone()).collect())
        .opt_utf8("unique_buffer_site", vec![None; rows.len()])
        .utf8("area", vec![AREA_RLB.to_string(); rows.len()])
        .int64("orig_fid", rows.iter().map(|r| r.orig_fid).collect())
        .build()
}

fn habitat_table(rows: &[HabitatRow]) -> std::result::Result<RecordBatch, ArrowError> {
    TableBuilder::new()
        .utf8("Area", rows.iter().map(|r| r.area.clone()).collect())
        .utf8("RZ", rows.iter().map(|r| r.risk_zone.clone()).collect())
        .float64("Shape_Area", rows.iter().map(|r| r.shape_area).collect())
        .build()
}

fn frequency_table(counts: &BTreeMap<FrequencyKey, i64>) -> std::result::Result<RecordBatch, ArrowError> {
    let column = |f: fn(&FrequencyKey) -> &String| -> Vec<String> { counts.keys().map(f).cloned().collect() };
    TableBuilder::new()
        .utf8("PANS", column(|k| &k.0))
        .utf8("Area", column(|k| &k.1))
        .utf8("MaxZone", column(|k| &k.2))
        .utf8("TmpImp", column(|k| &k.3))
        .int64("FREQUENCY", counts.values().copied().collect())
        .build()
}

fn ponds_table(rows: &[PondRow]) -> std::result::Result<RecordBatch, ArrowError> {
    TableBuilder::new()
        .utf8("Pond_ID", rows.iter().map(|r| r.pond_id.clone()).collect())
        .utf8("PANS", rows.iter().map(|r| r.pans.clone()).collect())
        .utf8("TmpImp", rows.iter().map(|r| r.tmp_imp.clone()).collect())
        .utf8("Area", rows.iter().map(|r| r.area.clone()).collect())
        .opt_utf8("CONCATENATE_RZ", rows.iter().map(|r| r.concatenate_rz.clone()).collect())
        .opt_utf8("MaxZone", rows.iter().map(|r| r.max_zone.clone()).collect())
        .build()
}
