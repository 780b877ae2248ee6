//! Budget-limited geocoding enrichment, independent of ingestion runs.

use std::sync::Arc;

use async_trait::async_trait;
use fedscout_core::{CanonicalRecord, GeocodeStats};
use fedscout_store::{FetchError, HttpFetcher, OpportunityStore, StoreError};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("geocoding lookup failed: {0}")]
    Lookup(#[from] FetchError),
    #[error("geocoder returned an unexpected payload: {0}")]
    UnexpectedPayload(String),
}

/// External geocoding capability. Returns `None` when the record carries
/// nothing resolvable (no state), which is a skip rather than a failure.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn lookup(&self, record: &CanonicalRecord)
        -> Result<Option<(f64, f64)>, GeocodeError>;
}

/// Census-bureau-style one-line-address geocoder.
#[derive(Debug)]
pub struct CensusGeocoder {
    pub base_url: String,
    pub http: Arc<HttpFetcher>,
}

#[async_trait]
impl Geocoder for CensusGeocoder {
    async fn lookup(
        &self,
        record: &CanonicalRecord,
    ) -> Result<Option<(f64, f64)>, GeocodeError> {
        let Some(state) = record.state.as_deref() else {
            return Ok(None);
        };

        let query = vec![
            ("address", format!("{state}, USA")),
            ("benchmark", "Public_AR_Current".to_string()),
            ("format", "json".to_string()),
        ];
        let response = self
            .http
            .get_json("geocoder", &self.base_url, &query)
            .await?;

        let Some(coordinates) = response.pointer("/result/addressMatches/0/coordinates") else {
            return Ok(None);
        };
        let longitude = coordinates.get("x").and_then(|v| v.as_f64());
        let latitude = coordinates.get("y").and_then(|v| v.as_f64());
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => Ok(Some((lat, lon))),
            _ => Err(GeocodeError::UnexpectedPayload(
                "address match without x/y coordinates".into(),
            )),
        }
    }
}

/// Scans records lacking coordinates and enriches them in place, up to
/// `limit` per call. Writes only coordinate fields; per-record lookup
/// failures are left for a future batch.
pub struct GeocodingEnricher {
    store: Arc<dyn OpportunityStore>,
    geocoder: Arc<dyn Geocoder>,
}

impl GeocodingEnricher {
    pub fn new(store: Arc<dyn OpportunityStore>, geocoder: Arc<dyn Geocoder>) -> Self {
        Self { store, geocoder }
    }

    pub async fn batch_geocode(&self, limit: usize) -> Result<u64, StoreError> {
        let pending = self.store.missing_coordinates(limit).await?;
        let mut geocoded = 0u64;

        for stored in pending {
            let record = &stored.record;
            match self.geocoder.lookup(record).await {
                Ok(Some((latitude, longitude))) => {
                    self.store
                        .set_coordinates(record.source, &record.natural_id, latitude, longitude)
                        .await?;
                    geocoded += 1;
                }
                Ok(None) => {
                    debug!(
                        source = %record.source,
                        natural_id = %record.natural_id,
                        "nothing resolvable to geocode"
                    );
                }
                Err(err) => {
                    debug!(
                        source = %record.source,
                        natural_id = %record.natural_id,
                        error = %err,
                        "geocode lookup failed, leaving for a later batch"
                    );
                }
            }
        }

        info!(geocoded, requested = limit, "geocode batch finished");
        Ok(geocoded)
    }

    pub async fn stats(&self) -> Result<GeocodeStats, StoreError> {
        let (total, geocoded) = self.store.counts().await?;
        Ok(GeocodeStats::from_counts(total, geocoded))
    }
}
