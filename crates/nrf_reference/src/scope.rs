//! Reference-scope optimisation.
//!
//! Large reference layers are not scanned whole. A [`ScopeStrategy`] turns
//! the job boundary into a filter geometry first, and [`load_scoped`] adds it
//! to the large-layer query as an intersects predicate. Loading through a
//! scope and then filtering by the boundary yields the same features as a
//! full scan filtered by the boundary.

use async_trait::async_trait;
use nrf_spatial::buffer::buffer;
use nrf_spatial::{union_all, Boundary, FeatureSet, MultiPolygon};

use crate::error::{Result, StoreError};
use crate::query::{Query, QueryResult};
use crate::store::ReferenceStore;

#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    /// No prefilter; the query runs as given.
    Unbounded,
    /// Nothing can match; the query is skipped.
    Empty,
    Bounded {
        filter: MultiPolygon<f64>,
        matched: usize,
    },
}

#[async_trait]
pub trait ScopeStrategy: Send + Sync {
    async fn resolve(&self, boundary: &Boundary, store: &dyn ReferenceStore) -> Result<Scope>;
}

/// Scope a layer to the regions of a smaller locator layer that the boundary
/// touches. The filter is the union of the matched regions, so features of
/// the large layer nested inside them are all kept.
#[derive(Debug, Clone)]
pub struct LocatorScope {
    pub locator: Query,
}

impl LocatorScope {
    pub fn new(locator: Query) -> Self {
        Self { locator }
    }

    /// Resolve the scope and return the matched locator features with it.
    pub async fn locate(
        &self,
        boundary: &Boundary,
        store: &dyn ReferenceStore,
    ) -> Result<(Scope, FeatureSet)> {
        let query = self.locator.clone().intersecting(boundary.dissolved());
        let matched = store
            .execute(&query)
            .await?
            .into_features()
            .ok_or_else(|| StoreError::NoGeometryColumn(query.source.name()))?;
        if matched.is_empty() {
            tracing::debug!(locator = %query.source, "boundary outside every locator region");
            return Ok((Scope::Empty, matched));
        }
        let geoms: Vec<MultiPolygon<f64>> = matched.geometries().cloned().collect();
        let scope = Scope::Bounded {
            filter: union_all(&geoms),
            matched: matched.len(),
        };
        Ok((scope, matched))
    }
}

#[async_trait]
impl ScopeStrategy for LocatorScope {
    async fn resolve(&self, boundary: &Boundary, store: &dyn ReferenceStore) -> Result<Scope> {
        Ok(self.locate(boundary, store).await?.0)
    }
}

/// Scope a layer to the boundary buffered by `distance` metres.
#[derive(Debug, Clone, Copy)]
pub struct BufferedBoundaryScope {
    pub distance: f64,
}

impl BufferedBoundaryScope {
    pub fn new(distance: f64) -> Self {
        Self { distance }
    }
}

#[async_trait]
impl ScopeStrategy for BufferedBoundaryScope {
    async fn resolve(&self, boundary: &Boundary, _store: &dyn ReferenceStore) -> Result<Scope> {
        let filter = if self.distance == 0.0 {
            boundary.dissolved()
        } else {
            let buffered = buffer(boundary.set(), self.distance, true, boundary.grid())?;
            union_all(&buffered.geometries().cloned().collect::<Vec<_>>())
        };
        if filter.0.is_empty() {
            return Ok(Scope::Empty);
        }
        Ok(Scope::Bounded {
            filter,
            matched: boundary.len(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScopedLoad {
    /// The scope was empty and no query was issued.
    Skipped,
    Loaded(QueryResult),
}

impl ScopedLoad {
    /// Features loaded; `None` when skipped or when rows were requested.
    pub fn into_features(self) -> Option<FeatureSet> {
        match self {
            ScopedLoad::Skipped => None,
            ScopedLoad::Loaded(result) => result.into_features(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ScopedLoad::Skipped)
    }
}

pub async fn load_scoped(store: &dyn ReferenceStore, query: Query, scope: &Scope) -> Result<ScopedLoad> {
    let query = match scope {
        Scope::Empty => {
            tracing::debug!(source = %query.source, "scope empty; skipping query");
            return Ok(ScopedLoad::Skipped);
        }
        Scope::Unbounded => query,
        Scope::Bounded { filter, matched } => {
            tracing::debug!(source = %query.source, matched, "scoped query");
            query.intersecting(filter.clone())
        }
    };
    Ok(ScopedLoad::Loaded(store.execute(&query).await?))
}
