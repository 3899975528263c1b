//! Feature sets: polygonal geometries with JSON attributes and the reference
//! system / precision grid they are expressed in.

use geo::{Area, MultiPolygon, Polygon};
use serde_json::{Map, Value};

use crate::crs::Crs;
use crate::error::{Result, SpatialError};
use crate::precision::GridSize;

pub type Attributes = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: MultiPolygon<f64>,
    pub attributes: Attributes,
}

impl Feature {
    pub fn new(geometry: MultiPolygon<f64>, attributes: Attributes) -> Self {
        Self {
            geometry,
            attributes,
        }
    }

    pub fn from_polygon(polygon: Polygon<f64>) -> Self {
        Self::new(MultiPolygon::new(vec![polygon]), Attributes::new())
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key).filter(|v| !v.is_null())
    }

    /// Text value of an attribute; numbers and booleans are rendered.
    pub fn attr_string(&self, key: &str) -> Option<String> {
        value_as_string(self.attr(key)?)
    }

    /// Numeric value of an attribute; numeric strings are coerced, anything
    /// else is treated as missing.
    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        value_as_f64(self.attr(key)?)
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.0.is_empty()
    }

    /// Planar area in the set's linear unit. Callers go through
    /// [`FeatureSet::area`] when the reference system is not yet checked.
    pub fn planar_area(&self) -> f64 {
        self.geometry.unsigned_area()
    }
}

pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Features sharing one reference system.
///
/// `grid` records the precision grid the coordinates were last snapped to, so
/// overlays can refuse operands snapped to different grids.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureSet {
    pub crs: Option<Crs>,
    pub grid: Option<GridSize>,
    pub features: Vec<Feature>,
}

impl FeatureSet {
    pub fn new(crs: Crs) -> Self {
        Self {
            crs: Some(crs),
            grid: None,
            features: Vec::new(),
        }
    }

    pub fn with_features(mut self, features: Vec<Feature>) -> Self {
        self.features = features;
        self
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Feature> {
        self.features.iter()
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    /// Reference system, refusing sets without one.
    pub fn require_crs(&self) -> Result<Crs> {
        self.crs.ok_or(SpatialError::MissingCrs)
    }

    /// Reference system, refusing sets that cannot be measured in metres.
    pub fn require_projected(&self) -> Result<Crs> {
        let crs = self.require_crs()?;
        if crs.is_geographic() {
            return Err(SpatialError::GeographicMeasurement(crs));
        }
        Ok(crs)
    }

    /// Per-feature areas in square metres, in feature order.
    pub fn area(&self) -> Result<Vec<f64>> {
        self.require_projected()?;
        Ok(self.features.iter().map(Feature::planar_area).collect())
    }

    pub fn area_of(&self, index: usize) -> Result<f64> {
        self.require_projected()?;
        Ok(self
            .features
            .get(index)
            .map(Feature::planar_area)
            .unwrap_or(0.0))
    }

    /// Sum of feature areas (overlaps counted twice).
    pub fn total_area(&self) -> Result<f64> {
        self.require_projected()?;
        Ok(self.features.iter().map(Feature::planar_area).sum())
    }

    pub fn geometries(&self) -> impl Iterator<Item = &MultiPolygon<f64>> {
        self.features.iter().map(|f| &f.geometry)
    }

    /// Copy of this set with every feature tagged `key = value`.
    pub fn tagged(&self, key: &str, value: impl Into<Value>) -> FeatureSet {
        let value = value.into();
        let mut out = self.clone();
        for feature in &mut out.features {
            feature.attributes.insert(key.to_string(), value.clone());
        }
        out
    }
}

/// The reference system both operands share.
pub fn common_crs(left: &FeatureSet, right: &FeatureSet) -> Result<Crs> {
    let l = left.require_crs()?;
    let r = right.require_crs()?;
    if l != r {
        return Err(SpatialError::CrsMismatch { left: l, right: r });
    }
    Ok(l)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use serde_json::json;

    fn square(size: f64) -> Feature {
        Feature::from_polygon(polygon![
            (x: 0.0, y: 0.0), (x: size, y: 0.0), (x: size, y: size), (x: 0.0, y: size), (x: 0.0, y: 0.0)
        ])
    }

    #[test]
    fn numeric_strings_are_coerced() {
        let f = square(1.0)
            .with_attr("a", "12.5")
            .with_attr("b", json!(3))
            .with_attr("c", "n/a");
        assert_eq!(f.attr_f64("a"), Some(12.5));
        assert_eq!(f.attr_f64("b"), Some(3.0));
        assert_eq!(f.attr_f64("c"), None);
        assert_eq!(f.attr_string("b").as_deref(), Some("3"));
    }

    #[test]
    fn null_attribute_reads_as_missing() {
        let f = square(1.0).with_attr("a", Value::Null);
        assert!(f.attr("a").is_none());
        assert!(f.attr_string("a").is_none());
    }

    #[test]
    fn area_is_refused_in_degrees() {
        let set = FeatureSet::new(Crs::WGS84).with_features(vec![square(1.0)]);
        assert!(matches!(
            set.total_area(),
            Err(SpatialError::GeographicMeasurement(_))
        ));
    }

    #[test]
    fn area_in_metres() {
        let set = FeatureSet::new(Crs::BRITISH_NATIONAL_GRID).with_features(vec![square(10.0), square(2.0)]);
        assert!((set.total_area().unwrap() - 104.0).abs() < 1e-9);
    }

    #[test]
    fn mismatched_crs_is_reported() {
        let a = FeatureSet::new(Crs::BRITISH_NATIONAL_GRID);
        let b = FeatureSet::new(Crs::WEB_MERCATOR);
        assert!(matches!(common_crs(&a, &b), Err(SpatialError::CrsMismatch { .. })));
    }
}
