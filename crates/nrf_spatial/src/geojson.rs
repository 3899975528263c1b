//! GeoJSON decoding of submitted boundaries and encoding of stored geometry.
//!
//! The reference system is read from the pre-RFC 7946 `crs` member
//! (`{"type": "name", "properties": {"name": "EPSG:27700"}}`). Documents
//! without one decode to a set whose `crs` is `None`.

use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde_json::{json, Map, Value};

use crate::crs::Crs;
use crate::error::{Result, SpatialError};
use crate::feature::{Attributes, Feature, FeatureSet};

/// Decode a `FeatureCollection`, a single `Feature` or a bare polygonal
/// geometry. Every malformed feature is reported in one error.
pub fn decode(bytes: &[u8]) -> Result<FeatureSet> {
    let doc: Value = serde_json::from_slice(bytes)?;
    let Some(object) = doc.as_object() else {
        return Err(SpatialError::geojson("document is not a JSON object"));
    };
    let crs = read_crs(object)?;

    let kind = object.get("type").and_then(Value::as_str).unwrap_or_default();
    let raw_features: Vec<&Value> = match kind {
        "FeatureCollection" => object
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| SpatialError::geojson("FeatureCollection has no 'features' array"))?
            .iter()
            .collect(),
        "Feature" => vec![&doc],
        "Polygon" | "MultiPolygon" => {
            let geometry = decode_geometry(&doc)?;
            return Ok(FeatureSet {
                crs,
                grid: None,
                features: vec![Feature::new(geometry, Attributes::new())],
            });
        }
        "" => return Err(SpatialError::geojson("document has no 'type'")),
        other => {
            return Err(SpatialError::geojson(format!(
                "unsupported GeoJSON type '{other}'; expected polygon features"
            )))
        }
    };

    let mut features = Vec::with_capacity(raw_features.len());
    let mut problems = Vec::new();
    for (index, raw) in raw_features.into_iter().enumerate() {
        match decode_feature(raw) {
            Ok(feature) => features.push(feature),
            Err(problem) => problems.push(format!("feature {index}: {problem}")),
        }
    }
    if !problems.is_empty() {
        return Err(SpatialError::geojson(problems.join("; ")));
    }
    Ok(FeatureSet {
        crs,
        grid: None,
        features,
    })
}

fn read_crs(object: &Map<String, Value>) -> Result<Option<Crs>> {
    let Some(member) = object.get("crs").filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let name = member
        .pointer("/properties/name")
        .and_then(Value::as_str)
        .ok_or_else(|| SpatialError::geojson("'crs' member has no properties.name"))?;
    Crs::parse(name).map(Some)
}

fn decode_feature(raw: &Value) -> std::result::Result<Feature, String> {
    if raw.get("type").and_then(Value::as_str) != Some("Feature") {
        return Err("not a Feature object".into());
    }
    let geometry = match raw.get("geometry") {
        None | Some(Value::Null) => return Err("has no geometry".into()),
        Some(geometry) => decode_geometry(geometry).map_err(|e| match e {
            SpatialError::GeoJson(msg) => msg,
            other => other.to_string(),
        })?,
    };
    let attributes = match raw.get("properties") {
        None | Some(Value::Null) => Attributes::new(),
        Some(Value::Object(props)) => props.clone(),
        Some(_) => return Err("properties is not an object".into()),
    };
    Ok(Feature::new(geometry, attributes))
}

/// Decode a `Polygon` or `MultiPolygon` geometry object.
pub fn decode_geometry(value: &Value) -> Result<MultiPolygon<f64>> {
    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
    let coords = value
        .get("coordinates")
        .and_then(Value::as_array)
        .ok_or_else(|| SpatialError::geojson(format!("{kind} geometry has no coordinates")))?;
    match kind {
        "Polygon" => {
            if coords.is_empty() {
                return Ok(MultiPolygon::new(Vec::new()));
            }
            Ok(MultiPolygon::new(vec![polygon(coords)?]))
        }
        "MultiPolygon" => coords
            .iter()
            .map(|p| {
                p.as_array()
                    .ok_or_else(|| SpatialError::geojson("MultiPolygon member is not an array"))
                    .and_then(|rings| polygon(rings))
            })
            .collect::<Result<Vec<_>>>()
            .map(MultiPolygon::new),
        other => Err(SpatialError::geojson(format!(
            "geometry type '{other}' is not polygonal"
        ))),
    }
}

fn polygon(rings: &[Value]) -> Result<Polygon<f64>> {
    let mut decoded = rings
        .iter()
        .map(ring)
        .collect::<Result<Vec<LineString<f64>>>>()?
        .into_iter();
    let exterior = decoded
        .next()
        .ok_or_else(|| SpatialError::geojson("polygon has no rings"))?;
    Ok(Polygon::new(exterior, decoded.collect()))
}

fn ring(value: &Value) -> Result<LineString<f64>> {
    let positions = value
        .as_array()
        .ok_or_else(|| SpatialError::geojson("ring is not an array of positions"))?;
    positions
        .iter()
        .map(position)
        .collect::<Result<Vec<Coord<f64>>>>()
        .map(LineString::new)
}

fn position(value: &Value) -> Result<Coord<f64>> {
    let pair = value.as_array().filter(|p| p.len() >= 2);
    let xy = pair.and_then(|p| Some((p[0].as_f64()?, p[1].as_f64()?)));
    match xy {
        Some((x, y)) if x.is_finite() && y.is_finite() => Ok(Coord { x, y }),
        _ => Err(SpatialError::geojson(format!("invalid position {value}"))),
    }
}

pub fn encode_geometry(geom: &MultiPolygon<f64>) -> Value {
    let ring = |ls: &LineString<f64>| -> Value {
        Value::Array(ls.coords().map(|c| json!([c.x, c.y])).collect())
    };
    let polygons: Vec<Value> = geom
        .iter()
        .map(|poly| {
            Value::Array(
                std::iter::once(poly.exterior())
                    .chain(poly.interiors())
                    .map(ring)
                    .collect(),
            )
        })
        .collect();
    json!({ "type": "MultiPolygon", "coordinates": polygons })
}

pub fn encode_feature_collection(set: &FeatureSet) -> Value {
    let features: Vec<Value> = set
        .iter()
        .map(|f| {
            json!({
                "type": "Feature",
                "geometry": encode_geometry(&f.geometry),
                "properties": Value::Object(f.attributes.clone()),
            })
        })
        .collect();
    let mut doc = json!({ "type": "FeatureCollection", "features": features });
    if let (Some(crs), Some(object)) = (set.crs, doc.as_object_mut()) {
        object.insert(
            "crs".into(),
            json!({ "type": "name", "properties": { "name": crs.to_string() } }),
        );
    }
    doc
}
