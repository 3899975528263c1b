//! Per-job version pinning.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::query::{Query, QueryResult, Source, VersionPin};
use crate::store::ReferenceStore;

/// A store view for one job.
///
/// The first `Latest` query against a source resolves and caches its version;
/// every later query in the job reads that same version, even if a newer one
/// is published meanwhile.
pub struct JobSession {
    store: Arc<dyn ReferenceStore>,
    pins: Mutex<BTreeMap<String, i64>>,
}

impl JobSession {
    pub fn new(store: Arc<dyn ReferenceStore>) -> Self {
        Self {
            store,
            pins: Mutex::new(BTreeMap::new()),
        }
    }

    /// Versions resolved so far, keyed by source name.
    pub async fn pins(&self) -> BTreeMap<String, i64> {
        self.pins.lock().await.clone()
    }

    async fn pin(&self, source: &Source) -> Result<i64> {
        // Held across the lookup so a source is resolved once.
        let mut pins = self.pins.lock().await;
        let key = source.name();
        if let Some(version) = pins.get(&key) {
            return Ok(*version);
        }
        let version = self.store.latest_version(source).await?;
        tracing::debug!(source = %key, version, "pinned reference version");
        pins.insert(key, version);
        Ok(version)
    }
}

#[async_trait]
impl ReferenceStore for JobSession {
    async fn execute(&self, query: &Query) -> Result<QueryResult> {
        match query.version {
            VersionPin::Exact(_) => self.store.execute(query).await,
            VersionPin::Latest => {
                let version = self.pin(&query.source).await?;
                let pinned = query.clone().version(VersionPin::Exact(version));
                self.store.execute(&pinned).await
            }
        }
    }

    async fn latest_version(&self, source: &Source) -> Result<i64> {
        self.pin(source).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryReferenceStore;
    use crate::query::LayerKind;
    use geo::polygon;
    use nrf_spatial::{Crs, Feature, FeatureSet};

    fn layer(count: usize) -> FeatureSet {
        let features = (0..count)
            .map(|i| {
                let x = i as f64 * 10.0;
                Feature::from_polygon(polygon![
                    (x: x, y: 0.0), (x: x + 1.0, y: 0.0), (x: x + 1.0, y: 1.0), (x: x, y: 0.0)
                ])
            })
            .collect();
        FeatureSet::new(Crs::BRITISH_NATIONAL_GRID).with_features(features)
    }

    #[tokio::test]
    async fn newer_version_published_mid_job_is_not_observed() {
        let store = Arc::new(InMemoryReferenceStore::default());
        let source = Source::Layer(LayerKind::WwtwCatchments);
        store.publish_layer(&source, &layer(1));

        let session = JobSession::new(store.clone());
        let first = session.execute(&Query::features(source.clone())).await.unwrap();
        store.publish_layer(&source, &layer(3));
        let second = session.execute(&Query::features(source.clone())).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(session.pins().await.get("wwtw_catchments"), Some(&1));

        // Every query reached the store with an explicit version.
        assert!(store
            .queries()
            .iter()
            .all(|q| q.version == VersionPin::Exact(1)));

        let fresh = JobSession::new(store.clone());
        assert_eq!(fresh.execute(&Query::features(source)).await.unwrap().len(), 3);
    }
}
