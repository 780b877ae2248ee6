//! Change detection and idempotent create-or-update against the store.

use std::sync::Arc;

use chrono::Utc;
use fedscout_core::{CanonicalRecord, ReconcileOutcome, StoredOpportunity};
use fedscout_store::{OpportunityStore, StoreError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store conflict while reconciling: {0}")]
    Conflict(#[from] StoreError),
}

/// Applies normalized records to the store, one atomic upsert per record.
pub struct Upserter {
    store: Arc<dyn OpportunityStore>,
}

impl Upserter {
    pub fn new(store: Arc<dyn OpportunityStore>) -> Self {
        Self { store }
    }

    /// Looks up by `(source, natural_id)` and decides created / updated /
    /// unchanged via fingerprint comparison.
    ///
    /// Updates overwrite ingestion-owned fields only: coordinates and
    /// `created_at` are carried over from the existing row.
    pub async fn reconcile(
        &self,
        record: CanonicalRecord,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let existing = self.store.get(record.source, &record.natural_id).await?;
        let now = Utc::now();

        let Some(existing) = existing else {
            self.store
                .upsert(StoredOpportunity::from_record(record, now))
                .await?;
            return Ok(ReconcileOutcome::Created);
        };

        let fingerprint = record.fingerprint();
        if fingerprint == existing.fingerprint {
            debug!(
                source = %existing.record.source,
                natural_id = %existing.record.natural_id,
                "fingerprint unchanged"
            );
            return Ok(ReconcileOutcome::Unchanged);
        }

        let mut merged = record;
        merged.latitude = existing.record.latitude;
        merged.longitude = existing.record.longitude;

        self.store
            .upsert(StoredOpportunity {
                id: existing.id,
                fingerprint,
                created_at: existing.created_at,
                updated_at: now,
                record: merged,
            })
            .await?;
        Ok(ReconcileOutcome::Updated)
    }
}
