//! Validity checks and geometry repair.

use geo::{Area, BooleanOps, BoundingRect, MultiPolygon, Polygon};

use crate::error::{Result, SpatialError};
use crate::feature::FeatureSet;
use crate::overlay::union_all;
use crate::precision::{clean_ring, map_rings};
use crate::segment::{ring_segments, Segment};

/// Make a polygonal geometry valid.
///
/// Rings are closed and stripped of consecutive duplicates first; when that
/// already yields a valid geometry it is returned as is. Otherwise every part
/// is rebuilt through a boolean union, which resolves self-crossings and
/// merges overlapping parts. The rebuilt geometry must itself be valid.
pub fn repair(geom: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
    let mut repaired = clean(geom);
    if let Err(problem) = validate(&repaired) {
        tracing::debug!(%problem, "rebuilding invalid geometry");
        repaired = clean(&rebuild(&repaired));
        validate(&repaired).map_err(SpatialError::Unrepairable)?;
    }
    if repaired.0.is_empty() && !geom.0.is_empty() {
        return Err(SpatialError::Unrepairable(
            "geometry has no area after repair".into(),
        ));
    }
    Ok(repaired)
}

pub fn repair_set(set: &FeatureSet) -> Result<FeatureSet> {
    let mut out = set.clone();
    for feature in &mut out.features {
        feature.geometry = repair(&feature.geometry)?;
    }
    Ok(out)
}

pub fn is_valid(geom: &MultiPolygon<f64>) -> bool {
    validate(geom).is_ok()
}

fn clean(geom: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    map_rings(geom, |ring| clean_ring(ring.coords().copied()))
}

fn rebuild(geom: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    let empty = MultiPolygon::<f64>::new(Vec::new());
    let parts: Vec<MultiPolygon<f64>> = geom
        .iter()
        .map(|poly| MultiPolygon::new(vec![poly.clone()]).union(&empty))
        .collect();
    union_all(&parts)
}

/// First reason the geometry is invalid, if any.
pub(crate) fn validate(geom: &MultiPolygon<f64>) -> std::result::Result<(), String> {
    for (index, poly) in geom.iter().enumerate() {
        validate_polygon(poly).map_err(|problem| format!("part {index}: {problem}"))?;
    }
    let polys = &geom.0;
    for i in 0..polys.len() {
        for j in (i + 1)..polys.len() {
            if parts_overlap(&polys[i], &polys[j]) {
                return Err(format!("parts {i} and {j} overlap"));
            }
        }
    }
    Ok(())
}

fn validate_polygon(poly: &Polygon<f64>) -> std::result::Result<(), String> {
    let rings: Vec<_> = std::iter::once(poly.exterior())
        .chain(poly.interiors())
        .collect();
    for ring in &rings {
        let n = ring.0.len();
        if n < 4 || ring.0.first() != ring.0.last() {
            return Err("ring is not closed with at least four points".into());
        }
        if ring.unsigned_area() == 0.0 {
            return Err("ring has no area".into());
        }
    }
    let segments: Vec<Vec<Segment>> = rings.iter().map(|r| ring_segments(r)).collect();
    for (r, segs) in segments.iter().enumerate() {
        ring_self_check(segs).map_err(|problem| format!("ring {r}: {problem}"))?;
    }
    for a in 0..segments.len() {
        for b in (a + 1)..segments.len() {
            let crossing = segments[a]
                .iter()
                .any(|s| segments[b].iter().any(|t| s.crosses(t) || s.overlaps(t)));
            if crossing {
                return Err(format!("rings {a} and {b} cross"));
            }
        }
    }
    Ok(())
}

fn ring_self_check(segs: &[Segment]) -> std::result::Result<(), String> {
    let n = segs.len();
    for i in 0..n {
        let next = (i + 1) % n;
        if segs[i].overlaps(&segs[next]) {
            return Err(format!("spike at vertex {next}"));
        }
        for j in (i + 2)..n {
            if i == 0 && j == n - 1 {
                // First and last segments share the closing vertex.
                if segs[i].overlaps(&segs[j]) {
                    return Err("spike at closing vertex".into());
                }
                continue;
            }
            if segs[i].crosses(&segs[j]) || segs[i].overlaps(&segs[j]) {
                return Err(format!("segments {i} and {j} cross"));
            }
        }
    }
    Ok(())
}

fn parts_overlap(a: &Polygon<f64>, b: &Polygon<f64>) -> bool {
    let (Some(ra), Some(rb)) = (a.bounding_rect(), b.bounding_rect()) else {
        return false;
    };
    let disjoint = ra.max().x < rb.min().x
        || rb.max().x < ra.min().x
        || ra.max().y < rb.min().y
        || rb.max().y < ra.min().y;
    if disjoint {
        return false;
    }
    let shared = a.intersection(b).unsigned_area();
    shared > 1e-9 * a.unsigned_area().min(b.unsigned_area()).max(1.0)
}
