//! SQLite-backed reference store.
//!
//! Geometry is stored as GeoJSON text next to its bounding box, so spatial
//! predicates become an indexed box prefilter in SQL followed by an exact
//! intersection test on the decoded candidates.

use std::path::Path;

use async_trait::async_trait;
use geo::BoundingRect;
use nrf_spatial::{geojson, Crs, FeatureSet, MultiPolygon};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row as _, Sqlite};

use crate::error::{Result, StoreError};
use crate::query::{Query, QueryResult, Row, Source, SpatialPredicate, VersionPin};
use crate::store::{check_output, evaluate, ReferenceStore, StoredRecord};

pub struct SqliteReferenceStore {
    pool: SqlitePool,
    crs: Crs,
}

impl SqliteReferenceStore {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self> {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await?;
        let store = Self::from_pool(pool, Crs::BRITISH_NATIONAL_GRID);
        store.initialize_tables().await?;
        Ok(store)
    }

    /// Wrap an existing pool; the pool is shared, connections are acquired
    /// per query.
    pub fn from_pool(pool: SqlitePool, crs: Crs) -> Self {
        Self { pool, crs }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn initialize_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reference_version (
                source TEXT NOT NULL,
                version INTEGER NOT NULL,
                published_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (source, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS spatial_layer (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                version INTEGER NOT NULL,
                attributes TEXT NOT NULL,
                geometry TEXT NOT NULL,
                min_x REAL NOT NULL,
                min_y REAL NOT NULL,
                max_x REAL NOT NULL,
                max_y REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_spatial_layer_bbox
            ON spatial_layer(source, version, min_x, max_x, min_y, max_y)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lookup_table (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                data TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_lookup_table_version
            ON lookup_table(name, version)
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Publish a new version of a spatial source; returns its number.
    pub async fn publish_layer(&self, source: &Source, set: &FeatureSet) -> Result<i64> {
        if !source.has_geometry() {
            return Err(StoreError::execution(format!(
                "'{source}' is a lookup; publish it with publish_lookup"
            )));
        }
        let mut tx = self.pool.begin().await?;
        let version = next_version(&mut tx, source).await?;
        for feature in set.iter() {
            let Some(rect) = feature.geometry.bounding_rect() else {
                continue;
            };
            let attributes = serde_json::to_string(&feature.attributes)?;
            let geometry = geojson::encode_geometry(&feature.geometry).to_string();
            sqlx::query(
                r#"
                INSERT INTO spatial_layer
                    (source, version, attributes, geometry, min_x, min_y, max_x, max_y)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(source.name())
            .bind(version)
            .bind(attributes)
            .bind(geometry)
            .bind(rect.min().x)
            .bind(rect.min().y)
            .bind(rect.max().x)
            .bind(rect.max().y)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        tracing::info!(source = %source, version, features = set.len(), "published reference layer");
        Ok(version)
    }

    pub async fn publish_lookup(&self, name: &str, rows: &[Row]) -> Result<i64> {
        let source = Source::lookup(name);
        let mut tx = self.pool.begin().await?;
        let version = next_version(&mut tx, &source).await?;
        for row in rows {
            sqlx::query("INSERT INTO lookup_table (name, version, data) VALUES (?, ?, ?)")
                .bind(name)
                .bind(version)
                .bind(serde_json::to_string(row)?)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        tracing::info!(lookup = name, version, rows = rows.len(), "published lookup table");
        Ok(version)
    }

    async fn resolve(&self, source: &Source, pin: VersionPin) -> Result<i64> {
        match pin {
            VersionPin::Latest => self.latest_version(source).await,
            VersionPin::Exact(version) => {
                let known: Option<i64> = sqlx::query_scalar(
                    "SELECT version FROM reference_version WHERE source = ? AND version = ?",
                )
                .bind(source.name())
                .bind(version)
                .fetch_optional(&self.pool)
                .await?;
                known.ok_or_else(|| StoreError::version_not_found(source.name(), pin))
            }
        }
    }

    async fn fetch_spatial(&self, query: &Query, version: i64) -> Result<Vec<StoredRecord>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT attributes, geometry FROM spatial_layer WHERE source = ",
        );
        builder.push_bind(query.source.name());
        builder.push(" AND version = ");
        builder.push_bind(version);
        if let Some(SpatialPredicate::Intersects(area)) = &query.predicate {
            let Some(rect) = area.bounding_rect() else {
                return Ok(Vec::new());
            };
            builder.push(" AND max_x >= ").push_bind(rect.min().x);
            builder.push(" AND min_x <= ").push_bind(rect.max().x);
            builder.push(" AND max_y >= ").push_bind(rect.min().y);
            builder.push(" AND min_y <= ").push_bind(rect.max().y);
        }
        builder.push(" ORDER BY id");

        let mut conn = self.pool.acquire().await?;
        let rows = builder.build().fetch_all(&mut *conn).await?;
        drop(conn);

        rows.iter()
            .map(|row| {
                let attributes: String = row.try_get("attributes")?;
                let geometry: String = row.try_get("geometry")?;
                Ok(StoredRecord {
                    attributes: decode_object(&attributes)?,
                    geometry: Some(decode_geometry(&geometry)?),
                })
            })
            .collect()
    }

    async fn fetch_lookup(&self, name: &str, version: i64) -> Result<Vec<StoredRecord>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query("SELECT data FROM lookup_table WHERE name = ? AND version = ? ORDER BY id")
            .bind(name)
            .bind(version)
            .fetch_all(&mut *conn)
            .await?;
        drop(conn);

        rows.iter()
            .map(|row| {
                let data: String = row.try_get("data")?;
                Ok(StoredRecord {
                    attributes: decode_object(&data)?,
                    geometry: None,
                })
            })
            .collect()
    }
}

async fn next_version(conn: &mut sqlx::SqliteConnection, source: &Source) -> Result<i64> {
    let current: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM reference_version WHERE source = ?")
            .bind(source.name())
            .fetch_one(&mut *conn)
            .await?;
    let version = current.unwrap_or(0) + 1;
    sqlx::query("INSERT INTO reference_version (source, version) VALUES (?, ?)")
        .bind(source.name())
        .bind(version)
        .execute(&mut *conn)
        .await?;
    Ok(version)
}

fn decode_object(text: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::decode(format!("expected a JSON object, found {other}"))),
    }
}

fn decode_geometry(text: &str) -> Result<MultiPolygon<f64>> {
    let value: Value = serde_json::from_str(text)?;
    geojson::decode_geometry(&value).map_err(|e| StoreError::decode(e.to_string()))
}

#[async_trait]
impl ReferenceStore for SqliteReferenceStore {
    async fn execute(&self, query: &Query) -> Result<QueryResult> {
        check_output(query)?;
        let version = self.resolve(&query.source, query.version).await?;
        let records = match &query.source {
            Source::Lookup(name) => self.fetch_lookup(name, version).await?,
            _ => self.fetch_spatial(query, version).await?,
        };
        tracing::debug!(
            source = %query.source,
            version,
            candidates = records.len(),
            "reference query"
        );
        evaluate(query, records, self.crs)
    }

    async fn latest_version(&self, source: &Source) -> Result<i64> {
        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM reference_version WHERE source = ?")
                .bind(source.name())
                .fetch_one(&self.pool)
                .await?;
        latest.ok_or_else(|| StoreError::version_not_found(source.name(), VersionPin::Latest))
    }
}
