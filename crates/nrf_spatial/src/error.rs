use thiserror::Error;

use crate::crs::Crs;

#[derive(Debug, Error)]
pub enum SpatialError {
    #[error("geometry has no coordinate reference system; refusing to assume one")]
    MissingCrs,
    #[error("unrecognised coordinate reference system '{0}'")]
    UnknownCrs(String),
    #[error("no transform available from {from} to {to}")]
    UnsupportedTransform { from: Crs, to: Crs },
    #[error("operands are in different reference systems ({left} vs {right})")]
    CrsMismatch { left: Crs, right: Crs },
    #[error("operand snapped to grid {found} but the operation uses grid {expected}")]
    GridMismatch { expected: f64, found: f64 },
    #[error("cannot measure in geographic reference system {0}; normalise to a projected system first")]
    GeographicMeasurement(Crs),
    #[error("geometry could not be repaired: {0}")]
    Unrepairable(String),
    #[error("invalid boundary: {0}")]
    InvalidBoundary(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("GeoJSON decode failed: {0}")]
    GeoJson(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SpatialError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        SpatialError::InvalidInput(msg.into())
    }

    pub fn geojson(msg: impl Into<String>) -> Self {
        SpatialError::GeoJson(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SpatialError>;
