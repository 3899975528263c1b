//! Boolean overlays on the precision grid.
//!
//! Operands are snapped before the overlay and results are snapped after, so
//! pieces produced by successive overlays stay on one grid.

use geo::{Area, BooleanOps, MultiPolygon};

use crate::error::Result;
use crate::feature::{common_crs, Attributes, Feature, FeatureSet};
use crate::index::EnvelopeIndex;
use crate::precision::{check_grid, snap_set, snap_to_precision, GridSize};

/// Suffix given to right-hand attributes whose names clash with the left.
pub const CLASH_SUFFIX: &str = "_2";

pub fn intersect(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>, grid: GridSize) -> MultiPolygon<f64> {
    let a = snap_to_precision(a, grid);
    let b = snap_to_precision(b, grid);
    snap_to_precision(&a.intersection(&b), grid)
}

pub fn difference(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>, grid: GridSize) -> MultiPolygon<f64> {
    let a = snap_to_precision(a, grid);
    let b = snap_to_precision(b, grid);
    snap_to_precision(&a.difference(&b), grid)
}

/// Union of all geometries, merged pairwise as a balanced tree.
pub fn union_all(geoms: &[MultiPolygon<f64>]) -> MultiPolygon<f64> {
    match geoms {
        [] => MultiPolygon::new(Vec::new()),
        [single] => single.clone(),
        _ => {
            let (left, right) = geoms.split_at(geoms.len() / 2);
            union_all(left).union(&union_all(right))
        }
    }
}

/// Snapped union of every feature in a set.
pub fn dissolve(set: &FeatureSet, grid: GridSize) -> MultiPolygon<f64> {
    let geoms: Vec<MultiPolygon<f64>> = set.geometries().cloned().collect();
    snap_to_precision(&union_all(&geoms), grid)
}

/// Clip every feature to `mask`, dropping features left empty.
pub fn clip(set: &FeatureSet, mask: &MultiPolygon<f64>, grid: GridSize) -> Result<FeatureSet> {
    set.require_crs()?;
    check_grid(set, grid)?;
    let mask = snap_to_precision(mask, grid);
    let mut out = snap_set(set, grid);
    out.features = out
        .features
        .into_iter()
        .filter_map(|mut feature| {
            feature.geometry = snap_to_precision(&feature.geometry.intersection(&mask), grid);
            (!feature.is_empty()).then_some(feature)
        })
        .collect();
    Ok(out)
}

/// A non-empty intersection between one left and one right feature.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayPiece {
    pub left: usize,
    pub right: usize,
    pub geometry: MultiPolygon<f64>,
}

impl OverlayPiece {
    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }
}

/// Every non-empty pairwise intersection, ordered by left position then right
/// position.
pub fn overlay_pieces(left: &FeatureSet, right: &FeatureSet, grid: GridSize) -> Result<Vec<OverlayPiece>> {
    common_crs(left, right)?;
    check_grid(left, grid)?;
    check_grid(right, grid)?;
    let left = snap_set(left, grid);
    let right = snap_set(right, grid);
    let index = EnvelopeIndex::build(&right);

    let mut pieces = Vec::new();
    for (l, feature) in left.iter().enumerate() {
        for r in index.candidates_for(&feature.geometry) {
            let shared = feature.geometry.intersection(&right.features[r].geometry);
            let geometry = snap_to_precision(&shared, grid);
            if !geometry.0.is_empty() {
                pieces.push(OverlayPiece {
                    left: l,
                    right: r,
                    geometry,
                });
            }
        }
    }
    tracing::trace!(
        left = left.len(),
        right = right.len(),
        pieces = pieces.len(),
        "overlay intersection"
    );
    Ok(pieces)
}

/// Split features carrying both attribute sets.
pub fn overlay_intersection(left: &FeatureSet, right: &FeatureSet, grid: GridSize) -> Result<FeatureSet> {
    let crs = common_crs(left, right)?;
    let pieces = overlay_pieces(left, right, grid)?;
    let features = pieces
        .into_iter()
        .map(|piece| {
            let attributes = merge_attributes(
                &left.features[piece.left].attributes,
                &right.features[piece.right].attributes,
            );
            Feature::new(piece.geometry, attributes)
        })
        .collect();
    let mut out = FeatureSet::new(crs).with_features(features);
    out.grid = Some(grid);
    Ok(out)
}

pub fn merge_attributes(left: &Attributes, right: &Attributes) -> Attributes {
    let mut merged = left.clone();
    for (key, value) in right {
        if merged.contains_key(key) {
            merged.insert(format!("{key}{CLASH_SUFFIX}"), value.clone());
        } else {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}
