//! Spatial assignment of overlay attributes to input features.
//!
//! Every strategy answers with one entry per input feature, in input order.

use geo::{BoundingRect, Intersects, MultiPolygon, Rect};
use serde_json::Value;

use crate::error::Result;
use crate::feature::{common_crs, FeatureSet};
use crate::index::EnvelopeIndex;
use crate::overlay::{overlay_intersection, overlay_pieces};
use crate::precision::GridSize;
use crate::segment::boundary_segments;

/// Key of the overlay feature sharing the largest area with each input
/// feature.
///
/// Ties go to the overlay feature that comes first. Input features with no
/// overlap, or whose winner has no value for `key`, get `default`.
pub fn majority_overlap(
    input: &FeatureSet,
    overlay: &FeatureSet,
    key: &str,
    default: Value,
    grid: GridSize,
) -> Result<Vec<Value>> {
    input.require_projected()?;
    let pieces = overlay_pieces(input, overlay, grid)?;
    let mut best: Vec<Option<(f64, usize)>> = vec![None; input.len()];
    for piece in &pieces {
        let area = piece.area();
        let replace = match best[piece.left] {
            Some((best_area, _)) => area > best_area,
            None => true,
        };
        if replace {
            best[piece.left] = Some((area, piece.right));
        }
    }
    Ok(best
        .into_iter()
        .map(|winner| {
            winner
                .and_then(|(_, right)| overlay.features[right].attr(key).cloned())
                .unwrap_or_else(|| default.clone())
        })
        .collect())
}

/// Keys of every overlay feature intersecting each input feature, in overlay
/// order. Touching counts as intersecting; features without a value for `key`
/// are skipped.
pub fn any_intersection(input: &FeatureSet, overlay: &FeatureSet, key: &str) -> Result<Vec<Vec<Value>>> {
    common_crs(input, overlay)?;
    let index = EnvelopeIndex::build(overlay);
    Ok(input
        .iter()
        .map(|feature| {
            index
                .candidates_for(&feature.geometry)
                .into_iter()
                .filter(|&i| feature.geometry.intersects(&overlay.features[i].geometry))
                .filter_map(|i| overlay.features[i].attr(key).cloned())
                .collect()
        })
        .collect())
}

/// Key of the closest overlay feature to each input feature.
///
/// Distance is zero for intersecting features. With `max_distance`, a nearest
/// feature further away than that assigns nothing. Ties go to the overlay
/// feature that comes first.
pub fn nearest(
    input: &FeatureSet,
    overlay: &FeatureSet,
    key: &str,
    max_distance: Option<f64>,
) -> Result<Vec<Option<Value>>> {
    common_crs(input, overlay)?;
    input.require_projected()?;
    let envelopes: Vec<Option<Rect<f64>>> = overlay.geometries().map(|g| g.bounding_rect()).collect();

    Ok(input
        .iter()
        .map(|feature| {
            let (index, distance) = nearest_feature(&feature.geometry, overlay, &envelopes)?;
            if max_distance.is_some_and(|max| distance > max) {
                return None;
            }
            overlay.features[index].attr(key).cloned()
        })
        .collect())
}

fn nearest_feature(
    geom: &MultiPolygon<f64>,
    overlay: &FeatureSet,
    envelopes: &[Option<Rect<f64>>],
) -> Option<(usize, f64)> {
    let rect = geom.bounding_rect()?;
    let mut order: Vec<(f64, usize)> = envelopes
        .iter()
        .enumerate()
        .filter_map(|(i, env)| env.map(|env| (rect_distance(&rect, &env), i)))
        .collect();
    order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut best: Option<(usize, f64)> = None;
    for (lower_bound, i) in order {
        if let Some((_, best_distance)) = best {
            if lower_bound > best_distance {
                break;
            }
        }
        let distance = geometry_distance(geom, &overlay.features[i].geometry);
        let better = match best {
            None => true,
            Some((best_index, best_distance)) => {
                distance < best_distance || (distance == best_distance && i < best_index)
            }
        };
        if better {
            best = Some((i, distance));
        }
    }
    best
}

/// Minimum distance between two polygonal geometries; zero when they
/// intersect.
pub fn geometry_distance(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> f64 {
    if a.intersects(b) {
        return 0.0;
    }
    let segs_b = boundary_segments(b);
    boundary_segments(a)
        .iter()
        .flat_map(|s| segs_b.iter().map(move |t| s.distance(t)))
        .fold(f64::INFINITY, f64::min)
}

fn rect_distance(a: &Rect<f64>, b: &Rect<f64>) -> f64 {
    let dx = (b.min().x - a.max().x).max(a.min().x - b.max().x).max(0.0);
    let dy = (b.min().y - a.max().y).max(a.min().y - b.max().y).max(0.0);
    dx.hypot(dy)
}

/// Split pieces of every input/overlay pair carrying both attribute sets, for
/// area-weighted aggregation.
pub fn full_intersection(input: &FeatureSet, overlay: &FeatureSet, grid: GridSize) -> Result<FeatureSet> {
    overlay_intersection(input, overlay, grid)
}
