//! Opportunity store implementations + HTTP fetch utilities for FedScout.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fedscout_core::{SourceKind, StoredOpportunity};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;

pub mod http;

pub use http::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, HttpClientConfig,
    HttpFetcher, RetryDisposition, SimpleTokenBucket, TokenBucketConfig,
};

pub const CRATE_NAME: &str = "fedscout-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored record for {natural_id} is not decodable: {reason}")]
    Corrupt { natural_id: String, reason: String },
}

/// The exact read/write surface the ingestion core depends on.
///
/// `set_coordinates` exists so enrichment can write latitude/longitude
/// without touching the fingerprint, `updated_at`, or any ingestion-owned
/// field.
#[async_trait]
pub trait OpportunityStore: Send + Sync {
    async fn get(
        &self,
        source: SourceKind,
        natural_id: &str,
    ) -> Result<Option<StoredOpportunity>, StoreError>;

    /// Single atomic upsert keyed by `(source, natural_id)`; last writer wins.
    async fn upsert(&self, opportunity: StoredOpportunity) -> Result<(), StoreError>;

    async fn set_coordinates(
        &self,
        source: SourceKind,
        natural_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), StoreError>;

    /// Records lacking coordinates, oldest first, capped at `limit`.
    async fn missing_coordinates(&self, limit: usize)
        -> Result<Vec<StoredOpportunity>, StoreError>;

    /// `(total, geocoded)` counts for coverage stats.
    async fn counts(&self) -> Result<(u64, u64), StoreError>;
}

/// In-memory store used by tests and local dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<(SourceKind, String), StoredOpportunity>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OpportunityStore for MemoryStore {
    async fn get(
        &self,
        source: SourceKind,
        natural_id: &str,
    ) -> Result<Option<StoredOpportunity>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.get(&(source, natural_id.to_string())).cloned())
    }

    async fn upsert(&self, opportunity: StoredOpportunity) -> Result<(), StoreError> {
        let key = (
            opportunity.record.source,
            opportunity.record.natural_id.clone(),
        );
        let mut records = self.records.lock().await;
        records.insert(key, opportunity);
        Ok(())
    }

    async fn set_coordinates(
        &self,
        source: SourceKind,
        natural_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        if let Some(stored) = records.get_mut(&(source, natural_id.to_string())) {
            stored.record.latitude = Some(latitude);
            stored.record.longitude = Some(longitude);
        }
        Ok(())
    }

    async fn missing_coordinates(
        &self,
        limit: usize,
    ) -> Result<Vec<StoredOpportunity>, StoreError> {
        let records = self.records.lock().await;
        let mut missing: Vec<_> = records
            .values()
            .filter(|stored| !stored.record.has_coordinates())
            .cloned()
            .collect();
        missing.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.record.natural_id.cmp(&b.record.natural_id))
        });
        missing.truncate(limit);
        Ok(missing)
    }

    async fn counts(&self) -> Result<(u64, u64), StoreError> {
        let records = self.records.lock().await;
        let total = records.len() as u64;
        let geocoded = records
            .values()
            .filter(|stored| stored.record.has_coordinates())
            .count() as u64;
        Ok((total, geocoded))
    }
}

/// Postgres-backed store.
///
/// The canonical record is persisted as a JSONB document next to the columns
/// the core queries on; coordinate columns are authoritative and overlaid on
/// read so `set_coordinates` never rewrites the document.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS opportunities (
                id UUID NOT NULL,
                source_kind TEXT NOT NULL,
                natural_id TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                latitude DOUBLE PRECISION,
                longitude DOUBLE PRECISION,
                record_json JSONB NOT NULL,
                PRIMARY KEY (source_kind, natural_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_stored(row: &sqlx::postgres::PgRow) -> Result<StoredOpportunity, StoreError> {
        let source_kind: String = row.try_get("source_kind")?;
        let natural_id: String = row.try_get("natural_id")?;
        let record_json: serde_json::Value = row.try_get("record_json")?;
        if SourceKind::parse(&source_kind).is_none() {
            return Err(StoreError::Corrupt {
                natural_id,
                reason: format!("unknown source_kind {source_kind}"),
            });
        }

        let mut record: fedscout_core::CanonicalRecord = serde_json::from_value(record_json)
            .map_err(|err| StoreError::Corrupt {
                natural_id: natural_id.clone(),
                reason: err.to_string(),
            })?;
        record.latitude = row.try_get("latitude")?;
        record.longitude = row.try_get("longitude")?;

        let id: uuid::Uuid = row.try_get("id")?;
        let fingerprint: String = row.try_get("fingerprint")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
        Ok(StoredOpportunity {
            id,
            fingerprint,
            created_at,
            updated_at,
            record,
        })
    }
}

#[async_trait]
impl OpportunityStore for PgStore {
    async fn get(
        &self,
        source: SourceKind,
        natural_id: &str,
    ) -> Result<Option<StoredOpportunity>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, source_kind, natural_id, fingerprint, created_at, updated_at,
                   latitude, longitude, record_json
              FROM opportunities
             WHERE source_kind = $1 AND natural_id = $2
            "#,
        )
        .bind(source.as_str())
        .bind(natural_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_stored).transpose()
    }

    async fn upsert(&self, opportunity: StoredOpportunity) -> Result<(), StoreError> {
        let record_json =
            serde_json::to_value(&opportunity.record).map_err(|err| StoreError::Corrupt {
                natural_id: opportunity.record.natural_id.clone(),
                reason: err.to_string(),
            })?;
        sqlx::query(
            r#"
            INSERT INTO opportunities
                (id, source_kind, natural_id, fingerprint, created_at, updated_at,
                 latitude, longitude, record_json)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (source_kind, natural_id) DO UPDATE
               SET fingerprint = EXCLUDED.fingerprint,
                   updated_at = EXCLUDED.updated_at,
                   record_json = EXCLUDED.record_json
            "#,
        )
        .bind(opportunity.id)
        .bind(opportunity.record.source.as_str())
        .bind(&opportunity.record.natural_id)
        .bind(&opportunity.fingerprint)
        .bind(opportunity.created_at)
        .bind(opportunity.updated_at)
        .bind(opportunity.record.latitude)
        .bind(opportunity.record.longitude)
        .bind(record_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_coordinates(
        &self,
        source: SourceKind,
        natural_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE opportunities
               SET latitude = $3, longitude = $4
             WHERE source_kind = $1 AND natural_id = $2
            "#,
        )
        .bind(source.as_str())
        .bind(natural_id)
        .bind(latitude)
        .bind(longitude)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn missing_coordinates(
        &self,
        limit: usize,
    ) -> Result<Vec<StoredOpportunity>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_kind, natural_id, fingerprint, created_at, updated_at,
                   latitude, longitude, record_json
              FROM opportunities
             WHERE latitude IS NULL OR longitude IS NULL
             ORDER BY created_at ASC, natural_id ASC
             LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_stored).collect()
    }

    async fn counts(&self) -> Result<(u64, u64), StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE latitude IS NOT NULL AND longitude IS NOT NULL)
                       AS geocoded
              FROM opportunities
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = row.try_get("total")?;
        let geocoded: i64 = row.try_get("geocoded")?;
        Ok((total as u64, geocoded as u64))
    }
}
