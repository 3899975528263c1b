//! Spatial precision and overlay engine.
//!
//! Every assessment goes through this crate for geometry work: reference
//! system normalisation, snapping to a fixed precision grid, repair,
//! buffering, boolean overlays and the assignment of overlay attributes to
//! boundary features. Measurements are refused in geographic systems.

pub mod assign;
pub mod boundary;
pub mod buffer;
pub mod crs;
pub mod error;
pub mod feature;
pub mod geojson;
pub mod index;
pub mod overlay;
pub mod precision;
pub mod repair;
mod segment;

pub use assign::{any_intersection, full_intersection, majority_overlap, nearest};
pub use boundary::Boundary;
pub use buffer::buffer;
pub use crs::{normalize_crs, Crs};
pub use error::{Result, SpatialError};
pub use feature::{Attributes, Feature, FeatureSet};
pub use overlay::{clip, difference, intersect, overlay_intersection, union_all};
pub use precision::{snap_to_precision, GridSize, Tolerance};
pub use repair::repair;

/// Re-exported so downstream crates name geometry types through one path.
pub use geo::{MultiPolygon, Polygon};
