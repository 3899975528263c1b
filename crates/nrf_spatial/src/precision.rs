//! Fixed precision grid and regression tolerance.

use geo::{Coord, LineString, MultiPolygon, Polygon};

use crate::error::{Result, SpatialError};
use crate::feature::FeatureSet;

/// Spacing of the precision grid, in the units of the set's reference system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSize(f64);

impl GridSize {
    pub fn new(size: f64) -> Result<Self> {
        if !size.is_finite() || size <= 0.0 {
            return Err(SpatialError::invalid_input(format!(
                "precision grid size must be > 0, got {size}"
            )));
        }
        Ok(GridSize(size))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Default for GridSize {
    fn default() -> Self {
        GridSize(0.0001)
    }
}

pub fn snap_coord(c: Coord<f64>, grid: GridSize) -> Coord<f64> {
    let g = grid.0;
    Coord {
        x: (c.x / g).round() * g,
        y: (c.y / g).round() * g,
    }
}

/// Round every coordinate onto `grid`.
///
/// Consecutive duplicates introduced by rounding are removed. Rings left with
/// fewer than four points or no area are dropped, and a polygon whose
/// exterior is dropped is dropped with its holes. Applying it twice gives the
/// same result as applying it once.
pub fn snap_to_precision(geom: &MultiPolygon<f64>, grid: GridSize) -> MultiPolygon<f64> {
    map_rings(geom, |ring| {
        clean_ring(ring.coords().map(|c| snap_coord(*c, grid)))
    })
}

/// Snap every feature of a set and record the grid on it.
pub fn snap_set(set: &FeatureSet, grid: GridSize) -> FeatureSet {
    let mut out = set.clone();
    for feature in &mut out.features {
        feature.geometry = snap_to_precision(&feature.geometry, grid);
    }
    out.grid = Some(grid);
    out
}

/// Refuse operands already snapped to a grid other than `grid`.
pub fn check_grid(set: &FeatureSet, grid: GridSize) -> Result<()> {
    match set.grid {
        Some(found) if found != grid => Err(SpatialError::GridMismatch {
            expected: grid.0,
            found: found.0,
        }),
        _ => Ok(()),
    }
}

/// Rebuild every polygon ring with `f`, dropping polygons whose exterior is
/// rejected.
pub(crate) fn map_rings(
    geom: &MultiPolygon<f64>,
    f: impl Fn(&LineString<f64>) -> Option<LineString<f64>>,
) -> MultiPolygon<f64> {
    MultiPolygon::new(
        geom.iter()
            .filter_map(|poly| {
                let exterior = f(poly.exterior())?;
                let interiors = poly.interiors().iter().filter_map(&f).collect();
                Some(Polygon::new(exterior, interiors))
            })
            .collect(),
    )
}

/// Closed ring without consecutive duplicates, or `None` when degenerate.
pub(crate) fn clean_ring(coords: impl Iterator<Item = Coord<f64>>) -> Option<LineString<f64>> {
    let mut out: Vec<Coord<f64>> = Vec::new();
    for c in coords {
        if !(c.x.is_finite() && c.y.is_finite()) {
            return None;
        }
        if out.last() != Some(&c) {
            out.push(c);
        }
    }
    if out.len() > 1 && out.first() == out.last() {
        out.pop();
    }
    if out.len() < 3 {
        return None;
    }
    let first = out[0];
    out.push(first);
    let ring = LineString::new(out);
    if is_degenerate(&ring) {
        return None;
    }
    Some(ring)
}

/// Shoelace area of a closed ring, positive when counter-clockwise.
///
/// Computed relative to the first vertex so national-grid magnitudes do not
/// swamp the small differences between neighbouring vertices.
pub(crate) fn ring_signed_area(ring: &LineString<f64>) -> f64 {
    let coords = &ring.0;
    let Some(origin) = coords.first().copied() else {
        return 0.0;
    };
    let mut twice = 0.0;
    for w in coords.windows(2) {
        let (a, b) = (w[0] - origin, w[1] - origin);
        twice += a.x * b.y - b.x * a.y;
    }
    twice / 2.0
}

/// A ring whose vertices are all collinear. Self-crossing rings whose signed
/// lobes cancel out still enclose area and are kept for repair.
fn is_degenerate(ring: &LineString<f64>) -> bool {
    let coords = &ring.0;
    let origin = coords[0];
    let (mut min, mut max) = (origin, origin);
    let mut swept = 0.0;
    for w in coords.windows(2) {
        let (a, b) = (w[0] - origin, w[1] - origin);
        swept += (a.x * b.y - b.x * a.y).abs();
        min.x = min.x.min(w[1].x);
        min.y = min.y.min(w[1].y);
        max.x = max.x.max(w[1].x);
        max.y = max.y.max(w[1].y);
    }
    let extent = (max.x - min.x).max(max.y - min.y);
    swept <= 1e-12 * extent.max(1.0).powi(2)
}

/// Agreement test for regression checks: values match when within either the
/// absolute or the relative bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub relative: f64,
    pub absolute: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            relative: 0.001,
            absolute: 0.01,
        }
    }
}

impl Tolerance {
    pub fn new(relative: f64, absolute: f64) -> Self {
        Self { relative, absolute }
    }

    pub fn matches(&self, actual: f64, expected: f64) -> bool {
        if actual.is_nan() || expected.is_nan() {
            return false;
        }
        let diff = (actual - expected).abs();
        diff <= self.absolute || diff <= self.relative * expected.abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Area};

    fn grid() -> GridSize {
        GridSize::new(0.0001).unwrap()
    }

    #[test]
    fn coordinates_land_on_the_grid() {
        let c = snap_coord(Coord { x: 451_234.123_456, y: 0.000_049 }, grid());
        assert!((c.x - 451_234.1235).abs() < 1e-9);
        assert_eq!(c.y, 0.0);
    }

    #[test]
    fn sliver_ring_is_dropped() {
        let sliver = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 0.00001), (x: 0.0, y: 0.0)
        ]]);
        assert!(snap_to_precision(&sliver, grid()).0.is_empty());
    }

    #[test]
    fn hole_collapsing_keeps_the_shell() {
        let poly = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0), (x: 0.0, y: 0.0)],
            interiors: [[(x: 5.0, y: 5.0), (x: 5.00001, y: 5.0), (x: 5.00001, y: 5.00001), (x: 5.0, y: 5.0)]],
        );
        let snapped = snap_to_precision(&MultiPolygon::new(vec![poly]), grid());
        assert_eq!(snapped.0.len(), 1);
        assert!(snapped.0[0].interiors().is_empty());
        assert!((snapped.unsigned_area() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn overlay_inputs_on_other_grids_are_refused() {
        let set = snap_set(&FeatureSet::default(), GridSize::new(0.01).unwrap());
        assert!(matches!(
            check_grid(&set, grid()),
            Err(SpatialError::GridMismatch { .. })
        ));
        assert!(check_grid(&FeatureSet::default(), grid()).is_ok());
    }

    #[test]
    fn signed_area_at_national_grid_magnitudes() {
        let ring = LineString::from(vec![
            (651_409.0, 313_177.0),
            (651_410.0, 313_177.0),
            (651_410.0, 313_178.0),
            (651_409.0, 313_178.0),
            (651_409.0, 313_177.0),
        ]);
        assert!((ring_signed_area(&ring) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tolerance_accepts_either_bound() {
        let t = Tolerance::default();
        assert!(t.matches(1000.5, 1000.0));
        assert!(t.matches(0.005, 0.0));
        assert!(!t.matches(1002.0, 1000.0));
        assert!(!t.matches(f64::NAN, 1.0));
    }

    #[test]
    fn non_positive_grid_is_rejected() {
        assert!(GridSize::new(0.0).is_err());
        assert!(GridSize::new(-1.0).is_err());
    }
}
