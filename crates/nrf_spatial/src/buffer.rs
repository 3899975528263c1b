//! Positive-distance buffering with round joins.
//!
//! The outline of a polygon buffered by `r` is built as the union of the
//! polygon, one rectangle of width `r` along the outer side of every edge and
//! a pie-shaped fillet at every convex vertex. Fillets use sixteen segments
//! per quarter circle.

use std::f64::consts::PI;

use geo::{Coord, LineString, MultiPolygon, Polygon};

use crate::error::{Result, SpatialError};
use crate::feature::{Attributes, Feature, FeatureSet};
use crate::overlay::union_all;
use crate::precision::{clean_ring, ring_signed_area, snap_to_precision, GridSize};
use crate::segment::{cross, dot, length};

const FILLET_STEP: f64 = PI / 32.0;

/// Buffer every feature of a projected set by `distance` metres.
///
/// With `dissolve` the buffers are unioned into a single feature without
/// attributes; otherwise each feature keeps its attributes.
pub fn buffer(set: &FeatureSet, distance: f64, dissolve: bool, grid: GridSize) -> Result<FeatureSet> {
    let crs = set.require_projected()?;
    check_distance(distance)?;

    let buffered: Vec<MultiPolygon<f64>> = set
        .geometries()
        .map(|geom| buffer_geometry(geom, distance, grid))
        .collect();

    let features = if dissolve {
        let merged = snap_to_precision(&union_all(&buffered), grid);
        if merged.0.is_empty() {
            Vec::new()
        } else {
            vec![Feature::new(merged, Attributes::new())]
        }
    } else {
        set.features
            .iter()
            .zip(buffered)
            .map(|(feature, geometry)| Feature::new(geometry, feature.attributes.clone()))
            .collect()
    };

    let mut out = FeatureSet::new(crs).with_features(features);
    out.grid = Some(grid);
    Ok(out)
}

fn check_distance(distance: f64) -> Result<()> {
    if !distance.is_finite() || distance < 0.0 {
        return Err(SpatialError::invalid_input(format!(
            "buffer distance must be a non-negative number of metres, got {distance}"
        )));
    }
    Ok(())
}

/// Buffer a single geometry. The caller is responsible for the geometry being
/// in a projected system.
pub fn buffer_geometry(geom: &MultiPolygon<f64>, distance: f64, grid: GridSize) -> MultiPolygon<f64> {
    if distance == 0.0 {
        return snap_to_precision(geom, grid);
    }
    let mut pieces: Vec<MultiPolygon<f64>> = Vec::new();
    for poly in geom.iter() {
        let Some(exterior) = oriented(poly.exterior(), true) else {
            continue;
        };
        let holes: Vec<LineString<f64>> = poly
            .interiors()
            .iter()
            .filter_map(|ring| oriented(ring, false))
            .collect();
        for ring in std::iter::once(&exterior).chain(holes.iter()) {
            ring_pieces(ring, distance, &mut pieces);
        }
        pieces.push(MultiPolygon::new(vec![Polygon::new(exterior, holes)]));
    }
    snap_to_precision(&union_all(&pieces), grid)
}

/// Clean `ring` and orient it counter-clockwise (`ccw`) or clockwise, so the
/// polygon interior always lies to the left of each edge.
fn oriented(ring: &LineString<f64>, ccw: bool) -> Option<LineString<f64>> {
    let mut ring = clean_ring(ring.coords().copied())?;
    if (ring_signed_area(&ring) > 0.0) != ccw {
        ring.0.reverse();
    }
    Some(ring)
}

fn ring_pieces(ring: &LineString<f64>, r: f64, out: &mut Vec<MultiPolygon<f64>>) {
    // Closed ring: the last coordinate repeats the first.
    let pts = &ring.0[..ring.0.len() - 1];
    let n = pts.len();
    for i in 0..n {
        let a = pts[i];
        let b = pts[(i + 1) % n];
        let Some(normal) = right_normal(b - a) else {
            continue;
        };
        let offset = scale(normal, r);
        out.push(square_ring(vec![a, a + offset, b + offset, b]));

        let c = pts[(i + 2) % n];
        let (d1, d2) = (b - a, c - b);
        if cross(d1, d2) > 0.0 {
            if let Some(pie) = fillet(b, d1, d2, r) {
                out.push(pie);
            }
        }
    }
}

fn fillet(vertex: Coord<f64>, d1: Coord<f64>, d2: Coord<f64>, r: f64) -> Option<MultiPolygon<f64>> {
    let n1 = right_normal(d1)?;
    let theta = cross(d1, d2).atan2(dot(d1, d2));
    let steps = ((theta / FILLET_STEP + 0.5) as usize).max(1);
    let start = n1.y.atan2(n1.x);
    let mut coords = Vec::with_capacity(steps + 3);
    coords.push(vertex);
    for k in 0..=steps {
        let angle = start + theta * k as f64 / steps as f64;
        coords.push(Coord {
            x: vertex.x + r * angle.cos(),
            y: vertex.y + r * angle.sin(),
        });
    }
    Some(square_ring(coords))
}

fn square_ring(mut coords: Vec<Coord<f64>>) -> MultiPolygon<f64> {
    if let Some(first) = coords.first().copied() {
        coords.push(first);
    }
    MultiPolygon::new(vec![Polygon::new(LineString::new(coords), Vec::new())])
}

fn right_normal(d: Coord<f64>) -> Option<Coord<f64>> {
    let len = length(d);
    if len == 0.0 {
        return None;
    }
    Some(Coord {
        x: d.y / len,
        y: -d.x / len,
    })
}

fn scale(c: Coord<f64>, k: f64) -> Coord<f64> {
    Coord { x: c.x * k, y: c.y * k }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use geo::{polygon, Area};

    fn square_set(size: f64) -> FeatureSet {
        FeatureSet::new(Crs::BRITISH_NATIONAL_GRID).with_features(vec![Feature::from_polygon(
            polygon![(x: 0.0, y: 0.0), (x: size, y: 0.0), (x: size, y: size), (x: 0.0, y: size), (x: 0.0, y: 0.0)],
        )
        .with_attr("id", 7)])
    }

    #[test]
    fn square_buffer_area_matches_sixteen_segment_corners() {
        let out = buffer(&square_set(100.0), 250.0, false, GridSize::default()).unwrap();
        // Four quarter circles, each drawn as 16 triangles of angle pi/32.
        let corners = 64.0 * 0.5 * 250.0_f64.powi(2) * (PI / 32.0).sin();
        let expected = 100.0 * 100.0 + 4.0 * 100.0 * 250.0 + corners;
        let area = out.total_area().unwrap();
        assert!(((area - expected) / expected).abs() < 1e-5, "area {area} expected {expected}");
        assert!(((area - 306_034.281) / 306_034.281).abs() < 1e-5, "area {area}");
        assert_eq!(out.features[0].attr_string("id").as_deref(), Some("7"));
    }

    #[test]
    fn dissolved_square_buffer_is_within_tolerance_of_round_joins() {
        let out = buffer(&square_set(100.0), 250.0, true, GridSize::default()).unwrap();
        let area = out.total_area().unwrap();
        let reference = 100.0 * 100.0 + 4.0 * 100.0 * 250.0 + 32.0 * 250.0_f64.powi(2) * (PI / 32.0).sin();
        assert!(((area - reference) / reference).abs() < 1e-3, "area {area}");
    }

    #[test]
    fn clockwise_input_buffers_outwards() {
        let cw = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0), (x: 0.0, y: 10.0), (x: 10.0, y: 10.0), (x: 10.0, y: 0.0), (x: 0.0, y: 0.0)
        ]]);
        let out = buffer_geometry(&cw, 1.0, GridSize::default());
        assert!(out.unsigned_area() > 140.0);
    }

    #[test]
    fn zero_distance_returns_the_snapped_input() {
        let out = buffer(&square_set(10.0), 0.0, false, GridSize::default()).unwrap();
        assert!((out.total_area().unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn negative_distance_is_rejected() {
        let err = buffer(&square_set(10.0), -1.0, true, GridSize::default()).unwrap_err();
        assert!(matches!(err, SpatialError::InvalidInput(_)));
    }

    #[test]
    fn geographic_input_is_refused() {
        let mut set = square_set(1.0);
        set.crs = Some(Crs::WGS84);
        assert!(matches!(
            buffer(&set, 10.0, false, GridSize::default()),
            Err(SpatialError::GeographicMeasurement(_))
        ));
    }

    #[test]
    fn hole_narrower_than_twice_the_distance_is_filled() {
        let poly = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 30.0, y: 0.0), (x: 30.0, y: 30.0), (x: 0.0, y: 30.0), (x: 0.0, y: 0.0)],
            interiors: [[(x: 10.0, y: 10.0), (x: 20.0, y: 10.0), (x: 20.0, y: 20.0), (x: 10.0, y: 20.0), (x: 10.0, y: 10.0)]],
        );
        let out = buffer_geometry(&MultiPolygon::new(vec![poly]), 6.0, GridSize::default());
        assert!(out.iter().all(|p| p.interiors().is_empty()));
    }
}
