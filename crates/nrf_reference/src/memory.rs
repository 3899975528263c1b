//! In-process reference store for tests and fixtures.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use nrf_spatial::{Crs, FeatureSet};

use crate::error::{Result, StoreError};
use crate::query::{Query, QueryResult, Row, Source, VersionPin};
use crate::store::{evaluate, ReferenceStore, StoredRecord};

/// Versioned reference data held in memory. Every executed query is recorded
/// so tests can assert on what a job asked for.
pub struct InMemoryReferenceStore {
    crs: Crs,
    versions: RwLock<BTreeMap<String, Vec<Vec<StoredRecord>>>>,
    log: Mutex<Vec<Query>>,
}

impl Default for InMemoryReferenceStore {
    fn default() -> Self {
        Self::new(Crs::BRITISH_NATIONAL_GRID)
    }
}

impl InMemoryReferenceStore {
    pub fn new(crs: Crs) -> Self {
        Self {
            crs,
            versions: RwLock::new(BTreeMap::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Publish a new version of a spatial source; returns its number.
    pub fn publish_layer(&self, source: &Source, set: &FeatureSet) -> i64 {
        let records = set
            .iter()
            .map(|f| StoredRecord {
                attributes: f.attributes.clone(),
                geometry: Some(f.geometry.clone()),
            })
            .collect();
        self.publish(source, records)
    }

    pub fn publish_lookup(&self, name: &str, rows: Vec<Row>) -> i64 {
        let records = rows
            .into_iter()
            .map(|attributes| StoredRecord {
                attributes,
                geometry: None,
            })
            .collect();
        self.publish(&Source::lookup(name), records)
    }

    fn publish(&self, source: &Source, records: Vec<StoredRecord>) -> i64 {
        let mut versions = match self.versions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let history = versions.entry(source.name()).or_default();
        history.push(records);
        history.len() as i64
    }

    /// Queries executed so far, in order.
    pub fn queries(&self) -> Vec<Query> {
        match self.log.lock() {
            Ok(log) => log.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn queries_for(&self, source: &Source) -> usize {
        self.queries().iter().filter(|q| &q.source == source).count()
    }

    fn record(&self, query: &Query) {
        match self.log.lock() {
            Ok(mut log) => log.push(query.clone()),
            Err(poisoned) => poisoned.into_inner().push(query.clone()),
        }
    }

    fn records(&self, source: &Source, pin: VersionPin) -> Result<Vec<StoredRecord>> {
        let versions = match self.versions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let name = source.name();
        let history = versions
            .get(&name)
            .ok_or_else(|| StoreError::version_not_found(&name, pin))?;
        let index = match pin {
            VersionPin::Latest => history.len(),
            VersionPin::Exact(v) => usize::try_from(v).unwrap_or(0),
        };
        index
            .checked_sub(1)
            .and_then(|i| history.get(i))
            .cloned()
            .ok_or_else(|| StoreError::version_not_found(&name, pin))
    }
}

#[async_trait]
impl ReferenceStore for InMemoryReferenceStore {
    async fn execute(&self, query: &Query) -> Result<QueryResult> {
        self.record(query);
        let records = self.records(&query.source, query.version)?;
        evaluate(query, records, self.crs)
    }

    async fn latest_version(&self, source: &Source) -> Result<i64> {
        let versions = match self.versions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        versions
            .get(&source.name())
            .map(|history| history.len() as i64)
            .filter(|&v| v > 0)
            .ok_or_else(|| StoreError::version_not_found(source.name(), VersionPin::Latest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::LayerKind;
    use geo::polygon;
    use nrf_spatial::{Feature, MultiPolygon};
    use serde_json::json;

    fn square(x: f64, id: i64) -> Feature {
        Feature::from_polygon(polygon![
            (x: x, y: 0.0), (x: x + 1.0, y: 0.0), (x: x + 1.0, y: 1.0), (x: x, y: 1.0), (x: x, y: 0.0)
        ])
        .with_attr("id", id)
        .with_attr("name", format!("zone {id}"))
    }

    fn layer(features: Vec<Feature>) -> FeatureSet {
        FeatureSet::new(Crs::BRITISH_NATIONAL_GRID).with_features(features)
    }

    #[tokio::test]
    async fn intersects_predicate_includes_touching_features() {
        let store = InMemoryReferenceStore::default();
        let source = Source::Layer(LayerKind::LpaBoundaries);
        store.publish_layer(&source, &layer(vec![square(0.0, 1), square(1.0, 2), square(5.0, 3)]));

        let area = MultiPolygon::new(vec![polygon![
            (x: -1.0, y: 0.0), (x: 0.0, y: 0.0), (x: 0.0, y: 1.0), (x: -1.0, y: 1.0), (x: -1.0, y: 0.0)
        ]]);
        let result = store
            .execute(&Query::features(source).intersecting(area))
            .await
            .unwrap();
        let ids: Vec<_> = result.into_rows().into_iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1)]);
    }

    #[tokio::test]
    async fn exact_pin_reads_the_older_version() {
        let store = InMemoryReferenceStore::default();
        let source = Source::Layer(LayerKind::GcnPonds);
        assert_eq!(store.publish_layer(&source, &layer(vec![square(0.0, 1)])), 1);
        assert_eq!(store.publish_layer(&source, &layer(vec![square(0.0, 1), square(2.0, 2)])), 2);

        let v1 = store
            .execute(&Query::features(source.clone()).version(VersionPin::Exact(1)))
            .await
            .unwrap();
        assert_eq!(v1.len(), 1);
        assert_eq!(store.latest_version(&source).await.unwrap(), 2);
        assert!(matches!(
            store
                .execute(&Query::features(source).version(VersionPin::Exact(3)))
                .await,
            Err(StoreError::VersionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn lookup_rows_cannot_be_features() {
        let store = InMemoryReferenceStore::default();
        let mut row = Row::new();
        row.insert("wwtw_code".into(), json!(141));
        store.publish_lookup("wwtw_lookup", vec![row]);

        let err = store
            .execute(&Query::features(Source::lookup("wwtw_lookup")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoGeometryColumn(_)));

        let rows = store.execute(&Query::lookup("wwtw_lookup").filter("wwtw_code", 141)).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn unpublished_source_has_no_version() {
        let store = InMemoryReferenceStore::default();
        let err = store
            .latest_version(&Source::Coefficients)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionNotFound { .. }));
    }
}
