//! Segment predicates and distances shared by validation and nearest lookup.

use geo::{Coord, LineString, MultiPolygon};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Segment {
    pub a: Coord<f64>,
    pub b: Coord<f64>,
}

impl Segment {
    pub fn new(a: Coord<f64>, b: Coord<f64>) -> Self {
        Self { a, b }
    }

    fn envelope_overlaps(&self, other: &Segment) -> bool {
        self.a.x.min(self.b.x) <= other.a.x.max(other.b.x)
            && other.a.x.min(other.b.x) <= self.a.x.max(self.b.x)
            && self.a.y.min(self.b.y) <= other.a.y.max(other.b.y)
            && other.a.y.min(other.b.y) <= self.a.y.max(self.b.y)
    }

    /// True when the segments cross at a single point interior to both.
    pub fn crosses(&self, other: &Segment) -> bool {
        if !self.envelope_overlaps(other) {
            return false;
        }
        let d1 = orient(self.a, self.b, other.a);
        let d2 = orient(self.a, self.b, other.b);
        let d3 = orient(other.a, other.b, self.a);
        let d4 = orient(other.a, other.b, self.b);
        d1 * d2 < 0.0 && d3 * d4 < 0.0
    }

    /// True when the segments are collinear and share more than a point.
    pub fn overlaps(&self, other: &Segment) -> bool {
        if !self.envelope_overlaps(other) {
            return false;
        }
        if orient(self.a, self.b, other.a) != 0.0 || orient(self.a, self.b, other.b) != 0.0 {
            return false;
        }
        let dir = self.b - self.a;
        let len2 = dot(dir, dir);
        if len2 == 0.0 {
            return false;
        }
        let t0 = dot(other.a - self.a, dir) / len2;
        let t1 = dot(other.b - self.a, dir) / len2;
        let (lo, hi) = (t0.min(t1).max(0.0), t0.max(t1).min(1.0));
        hi - lo > 1e-12
    }

    pub fn intersects(&self, other: &Segment) -> bool {
        if !self.envelope_overlaps(other) {
            return false;
        }
        let d1 = orient(self.a, self.b, other.a);
        let d2 = orient(self.a, self.b, other.b);
        let d3 = orient(other.a, other.b, self.a);
        let d4 = orient(other.a, other.b, self.b);
        if d1 * d2 < 0.0 && d3 * d4 < 0.0 {
            return true;
        }
        (d1 == 0.0 && on_segment(self, other.a))
            || (d2 == 0.0 && on_segment(self, other.b))
            || (d3 == 0.0 && on_segment(other, self.a))
            || (d4 == 0.0 && on_segment(other, self.b))
    }

    pub fn distance_to_point(&self, p: Coord<f64>) -> f64 {
        let dir = self.b - self.a;
        let len2 = dot(dir, dir);
        let t = if len2 == 0.0 {
            0.0
        } else {
            (dot(p - self.a, dir) / len2).clamp(0.0, 1.0)
        };
        let closest = Coord {
            x: self.a.x + t * dir.x,
            y: self.a.y + t * dir.y,
        };
        length(p - closest)
    }

    pub fn distance(&self, other: &Segment) -> f64 {
        if self.intersects(other) {
            return 0.0;
        }
        self.distance_to_point(other.a)
            .min(self.distance_to_point(other.b))
            .min(other.distance_to_point(self.a))
            .min(other.distance_to_point(self.b))
    }
}

/// Twice the signed area of triangle `abc`; positive for a left turn.
pub(crate) fn orient(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> f64 {
    cross(b - a, c - a)
}

pub(crate) fn cross(u: Coord<f64>, v: Coord<f64>) -> f64 {
    u.x * v.y - u.y * v.x
}

pub(crate) fn dot(u: Coord<f64>, v: Coord<f64>) -> f64 {
    u.x * v.x + u.y * v.y
}

pub(crate) fn length(u: Coord<f64>) -> f64 {
    u.x.hypot(u.y)
}

fn on_segment(s: &Segment, p: Coord<f64>) -> bool {
    p.x >= s.a.x.min(s.b.x)
        && p.x <= s.a.x.max(s.b.x)
        && p.y >= s.a.y.min(s.b.y)
        && p.y <= s.a.y.max(s.b.y)
}

pub(crate) fn ring_segments(ring: &LineString<f64>) -> Vec<Segment> {
    ring.0
        .windows(2)
        .map(|w| Segment::new(w[0], w[1]))
        .collect()
}

/// Every boundary segment of a multipolygon, holes included.
pub(crate) fn boundary_segments(geom: &MultiPolygon<f64>) -> Vec<Segment> {
    geom.iter()
        .flat_map(|poly| std::iter::once(poly.exterior()).chain(poly.interiors()))
        .flat_map(ring_segments)
        .collect()
}
