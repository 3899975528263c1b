//! The reference store boundary.

use async_trait::async_trait;
use geo::Intersects;
use nrf_spatial::{Crs, Feature, FeatureSet, MultiPolygon};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::query::{Output, Query, QueryResult, Row, Source, SpatialPredicate};

/// Read access to versioned reference data.
///
/// Every query runs against one published version of its source. Stores
/// resolve [`crate::VersionPin::Latest`] themselves; jobs go through
/// [`crate::JobSession`] so the resolution happens once per source.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn execute(&self, query: &Query) -> Result<QueryResult>;

    /// Highest published version of `source`.
    async fn latest_version(&self, source: &Source) -> Result<i64>;
}

/// One stored record before query evaluation.
#[derive(Debug, Clone)]
pub(crate) struct StoredRecord {
    pub attributes: Map<String, Value>,
    pub geometry: Option<MultiPolygon<f64>>,
}

/// Refuse feature output from statements without a geometry column.
pub(crate) fn check_output(query: &Query) -> Result<()> {
    if query.output == Output::Features && !query.selects_geometry() {
        return Err(StoreError::NoGeometryColumn(query.source.name()));
    }
    Ok(())
}

/// Apply filters, the spatial predicate and the projection to candidate
/// records, keeping their stored order.
pub(crate) fn evaluate(
    query: &Query,
    records: impl IntoIterator<Item = StoredRecord>,
    crs: Crs,
) -> Result<QueryResult> {
    check_output(query)?;
    let matching = records.into_iter().filter(|record| {
        query.filters.iter().all(|f| f.matches(&record.attributes))
            && match &query.predicate {
                None => true,
                Some(SpatialPredicate::Intersects(area)) => record
                    .geometry
                    .as_ref()
                    .is_some_and(|geom| geom.intersects(area)),
            }
    });

    match query.output {
        Output::Features => {
            let features = matching
                .map(|record| {
                    Feature::new(
                        record.geometry.unwrap_or_else(|| MultiPolygon::new(Vec::new())),
                        query.projection.apply(record.attributes),
                    )
                })
                .collect();
            Ok(QueryResult::Features(FeatureSet::new(crs).with_features(features)))
        }
        Output::Rows => Ok(QueryResult::Rows(
            matching
                .map(|record| -> Row { query.projection.apply(record.attributes) })
                .collect(),
        )),
    }
}
