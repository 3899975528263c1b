//! Prepared development boundaries.

use geo::MultiPolygon;

use crate::crs::{normalize_crs, Crs};
use crate::error::{Result, SpatialError};
use crate::feature::{Feature, FeatureSet};
use crate::overlay::dissolve;
use crate::precision::{snap_set, GridSize};
use crate::repair::repair;

/// A submitted boundary that has been validated, repaired, reprojected and
/// snapped. It is not modified after preparation.
#[derive(Debug, Clone, PartialEq)]
pub struct Boundary {
    set: FeatureSet,
    crs: Crs,
    grid: GridSize,
}

impl Boundary {
    pub fn prepare(raw: FeatureSet, target: Crs, grid: GridSize) -> Result<Self> {
        if raw.crs.is_none() {
            return Err(SpatialError::MissingCrs);
        }
        let mut problems = Vec::new();
        if raw.is_empty() {
            problems.push("boundary has no features".to_string());
        }
        for (index, feature) in raw.iter().enumerate() {
            if feature.is_empty() {
                problems.push(format!("feature {index} has an empty geometry"));
            }
        }
        if !problems.is_empty() {
            return Err(SpatialError::InvalidBoundary(problems.join("; ")));
        }

        let mut repaired = raw;
        for (index, feature) in repaired.features.iter_mut().enumerate() {
            feature.geometry = repair(&feature.geometry).map_err(|e| match e {
                SpatialError::Unrepairable(msg) => {
                    SpatialError::Unrepairable(format!("feature {index}: {msg}"))
                }
                other => other,
            })?;
        }

        let projected = normalize_crs(&repaired, target)?;
        let snapped = snap_set(&projected, grid);
        let collapsed: Vec<String> = snapped
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_empty())
            .map(|(index, _)| format!("feature {index} has no area on the precision grid"))
            .collect();
        if !collapsed.is_empty() {
            return Err(SpatialError::InvalidBoundary(collapsed.join("; ")));
        }

        tracing::debug!(
            features = snapped.len(),
            crs = %target,
            grid = grid.value(),
            "boundary prepared"
        );
        Ok(Self {
            set: snapped,
            crs: target,
            grid,
        })
    }

    pub fn features(&self) -> &[Feature] {
        &self.set.features
    }

    pub fn set(&self) -> &FeatureSet {
        &self.set
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn grid(&self) -> GridSize {
        self.grid
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// All parts merged into one geometry.
    pub fn dissolved(&self) -> MultiPolygon<f64> {
        dissolve(&self.set, self.grid)
    }

    pub fn total_area(&self) -> Result<f64> {
        self.set.total_area()
    }
}
