//! Core domain model and run accounting types for FedScout.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const CRATE_NAME: &str = "fedscout-core";

/// External data source a record was harvested from.
///
/// Records from different sources are never merged: the dedup identity is
/// always `(source, natural_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Primary,
    SbirSttr,
    FederalSpending,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::Primary,
        SourceKind::SbirSttr,
        SourceKind::FederalSpending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Primary => "primary",
            SourceKind::SbirSttr => "sbir_sttr",
            SourceKind::FederalSpending => "federal_spending",
        }
    }

    pub fn parse(input: &str) -> Option<SourceKind> {
        match input.trim().to_ascii_lowercase().as_str() {
            "primary" | "sam" => Some(SourceKind::Primary),
            "sbir_sttr" | "sbir" | "sttr" => Some(SourceKind::SbirSttr),
            "federal_spending" | "spending" | "usaspending" => Some(SourceKind::FederalSpending),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SBIR/STTR award phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SbirPhase {
    I,
    II,
    III,
}

impl SbirPhase {
    pub fn parse(input: &str) -> Option<SbirPhase> {
        let cleaned = input
            .trim()
            .trim_start_matches("Phase")
            .trim_start_matches("phase")
            .trim();
        match cleaned {
            "I" | "1" => Some(SbirPhase::I),
            "II" | "2" => Some(SbirPhase::II),
            "III" | "3" => Some(SbirPhase::III),
            _ => None,
        }
    }
}

/// Normalized, source-agnostic opportunity/award record.
///
/// Produced by the normalizer from one raw source payload. Coordinates are
/// enrichment-owned: they are written by the geocoding pass, never by
/// ingestion, and are excluded from the content fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub source: SourceKind,
    pub natural_id: String,
    pub title: String,
    pub agency: Option<String>,
    pub naics_codes: Vec<String>,
    pub posted_date: Option<NaiveDate>,
    pub response_deadline: Option<NaiveDate>,
    pub value_amount: Option<f64>,
    pub status: Option<String>,
    pub state: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_sbir: bool,
    pub is_sttr: bool,
    pub phase: Option<SbirPhase>,
}

impl CanonicalRecord {
    /// Content fingerprint over the change-relevant fields only.
    ///
    /// Title, deadline, value and status participate; coordinates, fetch
    /// timestamps and everything else volatile do not, so reingesting
    /// unchanged upstream data or geocoding a record never reads as an
    /// update.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update(b"|");
        if let Some(deadline) = self.response_deadline {
            hasher.update(deadline.to_string().as_bytes());
        }
        hasher.update(b"|");
        if let Some(value) = self.value_amount {
            hasher.update(format!("{value:.2}").as_bytes());
        }
        hasher.update(b"|");
        if let Some(status) = &self.status {
            hasher.update(status.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn has_coordinates(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

/// Persisted form of a canonical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOpportunity {
    pub id: Uuid,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub record: CanonicalRecord,
}

impl StoredOpportunity {
    pub fn from_record(record: CanonicalRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint: record.fingerprint(),
            created_at: now,
            updated_at: now,
            record,
        }
    }
}

/// Outcome of reconciling one normalized record against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Overall status of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

/// Aggregated accounting for one orchestrator invocation.
///
/// Record-level failures are absorbed into `skipped_records`; only
/// source-level failures move `status` away from `Success`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub status: RunStatus,
    pub message: String,
    pub new_records: u64,
    pub updated_records: u64,
    pub skipped_records: u64,
    pub duration_ms: u64,
}

/// Mutable counters folded over per-record outcomes while a run is in
/// flight, finalized into a [`RunResult`].
#[derive(Debug, Clone, Default)]
pub struct RunCounters {
    pub new_records: u64,
    pub updated_records: u64,
    pub skipped_records: u64,
    pub failed_sources: Vec<String>,
    pub completed_sources: Vec<String>,
}

impl RunCounters {
    pub fn record_outcome(&mut self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Created => self.new_records += 1,
            ReconcileOutcome::Updated => self.updated_records += 1,
            ReconcileOutcome::Unchanged => {}
        }
    }

    pub fn record_skip(&mut self) {
        self.skipped_records += 1;
    }

    pub fn finish(self, duration_ms: u64) -> RunResult {
        let status = if self.failed_sources.is_empty() {
            RunStatus::Success
        } else if self.completed_sources.is_empty() {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        };
        let mut message = format!(
            "ingested {} new, {} updated, {} skipped",
            self.new_records, self.updated_records, self.skipped_records
        );
        if !self.completed_sources.is_empty() {
            message.push_str(&format!("; sources: {}", self.completed_sources.join(", ")));
        }
        if !self.failed_sources.is_empty() {
            message.push_str(&format!("; unavailable: {}", self.failed_sources.join(", ")));
        }
        RunResult {
            status,
            message,
            new_records: self.new_records,
            updated_records: self.updated_records,
            skipped_records: self.skipped_records,
            duration_ms,
        }
    }
}

/// Geocoding coverage, computed on demand from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeStats {
    pub total_opportunities: u64,
    pub geocoded_count: u64,
    pub needs_geocoding_count: u64,
    pub geocoded_percentage: f64,
}

impl GeocodeStats {
    pub fn from_counts(total: u64, geocoded: u64) -> Self {
        let percentage = if total == 0 {
            0.0
        } else {
            (geocoded as f64 / total as f64) * 100.0
        };
        Self {
            total_opportunities: total,
            geocoded_count: geocoded,
            needs_geocoding_count: total.saturating_sub(geocoded),
            geocoded_percentage: (percentage * 10.0).round() / 10.0,
        }
    }
}

/// Narrowing filter passed through to a source client.
///
/// An absent field means "iterate the configured candidate set", never
/// "fetch everything".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFilter {
    pub naics: Option<String>,
    pub agency: Option<String>,
    pub year: Option<i32>,
}

/// Which sources one orchestrator invocation covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelector {
    Single(SourceKind, FetchFilter),
    SbirOnly,
    Full,
}

impl SourceSelector {
    pub fn sources(&self) -> Vec<(SourceKind, FetchFilter)> {
        match self {
            SourceSelector::Single(kind, filter) => vec![(*kind, filter.clone())],
            SourceSelector::SbirOnly => vec![(SourceKind::SbirSttr, FetchFilter::default())],
            SourceSelector::Full => SourceKind::ALL
                .iter()
                .map(|kind| (*kind, FetchFilter::default()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CanonicalRecord {
        CanonicalRecord {
            source: SourceKind::Primary,
            natural_id: "W912DY-26-R-0012".into(),
            title: "Facility Maintenance Services".into(),
            agency: Some("Dept of the Army".into()),
            naics_codes: vec!["561210".into()],
            posted_date: NaiveDate::from_ymd_opt(2026, 7, 1),
            response_deadline: NaiveDate::from_ymd_opt(2026, 8, 15),
            value_amount: Some(250_000.0),
            status: Some("active".into()),
            state: Some("AL".into()),
            latitude: None,
            longitude: None,
            is_sbir: false,
            is_sttr: false,
            phase: None,
        }
    }

    #[test]
    fn fingerprint_changes_with_deadline() {
        let base = record();
        let mut moved = record();
        moved.response_deadline = NaiveDate::from_ymd_opt(2026, 9, 1);
        assert_ne!(base.fingerprint(), moved.fingerprint());
    }

    #[test]
    fn fingerprint_ignores_coordinates() {
        let base = record();
        let mut geocoded = record();
        geocoded.latitude = Some(32.36);
        geocoded.longitude = Some(-86.29);
        assert_eq!(base.fingerprint(), geocoded.fingerprint());
    }

    #[test]
    fn fingerprint_is_stable_for_identical_records() {
        assert_eq!(record().fingerprint(), record().fingerprint());
    }

    #[test]
    fn run_counters_fold_into_partial_status() {
        let mut counters = RunCounters::default();
        counters.record_outcome(ReconcileOutcome::Created);
        counters.record_outcome(ReconcileOutcome::Updated);
        counters.record_outcome(ReconcileOutcome::Unchanged);
        counters.record_skip();
        counters.completed_sources.push("primary".into());
        counters.failed_sources.push("sbir_sttr".into());

        let result = counters.finish(1200);
        assert_eq!(result.status, RunStatus::Partial);
        assert_eq!(result.new_records, 1);
        assert_eq!(result.updated_records, 1);
        assert_eq!(result.skipped_records, 1);
        assert!(result.message.contains("unavailable: sbir_sttr"));
    }

    #[test]
    fn run_counters_all_sources_down_is_failed() {
        let mut counters = RunCounters::default();
        counters.failed_sources.push("primary".into());
        let result = counters.finish(10);
        assert_eq!(result.status, RunStatus::Failed);
    }

    #[test]
    fn geocode_stats_percentage_rounds_to_one_decimal() {
        let stats = GeocodeStats::from_counts(3, 1);
        assert_eq!(stats.needs_geocoding_count, 2);
        assert_eq!(stats.geocoded_percentage, 33.3);

        let empty = GeocodeStats::from_counts(0, 0);
        assert_eq!(empty.geocoded_percentage, 0.0);
    }

    #[test]
    fn selector_full_covers_every_source_once() {
        let sources = SourceSelector::Full.sources();
        assert_eq!(sources.len(), 3);
        let kinds: Vec<_> = sources.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, SourceKind::ALL.to_vec());
    }

    #[test]
    fn source_kind_parse_accepts_aliases() {
        assert_eq!(SourceKind::parse("SBIR"), Some(SourceKind::SbirSttr));
        assert_eq!(
            SourceKind::parse("usaspending"),
            Some(SourceKind::FederalSpending)
        );
        assert_eq!(SourceKind::parse("unknown"), None);
    }
}
