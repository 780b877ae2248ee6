//! Source client contracts + one concrete client per external procurement API.

use async_trait::async_trait;
use fedscout_core::{FetchFilter, SourceKind};
use fedscout_store::{FetchError, HttpFetcher};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "fedscout-sources";

/// Opaque, source-specific payload for one record of one page.
///
/// Lives only for the duration of a fetch cycle; the normalizer consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSourceRecord {
    pub source: SourceKind,
    pub payload: JsonValue,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source {source} unavailable: {cause}")]
    Unavailable {
        source: SourceKind,
        #[source]
        cause: FetchError,
    },
    #[error("source {kind} returned an unexpected payload: {reason}")]
    UnexpectedPayload { kind: SourceKind, reason: String },
}

/// One external procurement API.
///
/// `fetch` performs one full finite harvest: serial pagination, bounded by
/// the client's page ceiling, paced and retried by the shared fetcher. It is
/// not restartable mid-stream; callers retry the whole pass.
#[async_trait]
pub trait SourceClient: Send + Sync {
    fn source(&self) -> SourceKind;

    async fn fetch(
        &self,
        http: &HttpFetcher,
        filter: &FetchFilter,
    ) -> Result<Vec<RawSourceRecord>, SourceError>;
}

fn unavailable(source: SourceKind) -> impl FnOnce(FetchError) -> SourceError {
    move |cause| SourceError::Unavailable { source, cause }
}

fn expect_array<'a>(
    kind: SourceKind,
    value: &'a JsonValue,
    key: &str,
) -> Result<&'a Vec<JsonValue>, SourceError> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| SourceError::UnexpectedPayload {
            kind,
            reason: format!("missing array field `{key}`"),
        })
}

/// A reported total drives the stop condition; a source that omits it pages
/// until an empty batch or the page ceiling.
fn harvest_complete(offset: u64, total: Option<u64>) -> bool {
    total.is_some_and(|total| offset >= total)
}

/// Primary solicitation source (SAM-style): GET with offset/limit paging,
/// api key, one request stream per NAICS code.
#[derive(Debug, Clone)]
pub struct PrimarySolicitationClient {
    pub base_url: String,
    pub api_key: String,
    pub naics_codes: Vec<String>,
    pub page_size: u64,
    pub max_pages: u64,
}

impl PrimarySolicitationClient {
    fn candidate_naics(&self, filter: &FetchFilter) -> Vec<String> {
        match &filter.naics {
            Some(code) => vec![code.clone()],
            None => self.naics_codes.clone(),
        }
    }
}

#[async_trait]
impl SourceClient for PrimarySolicitationClient {
    fn source(&self) -> SourceKind {
        SourceKind::Primary
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        filter: &FetchFilter,
    ) -> Result<Vec<RawSourceRecord>, SourceError> {
        let mut records = Vec::new();

        for naics in self.candidate_naics(filter) {
            let mut offset = 0u64;
            for _page in 0..self.max_pages {
                let mut query = vec![
                    ("api_key", self.api_key.clone()),
                    ("ncode", naics.clone()),
                    ("limit", self.page_size.to_string()),
                    ("offset", offset.to_string()),
                ];
                if let Some(agency) = &filter.agency {
                    query.push(("organizationName", agency.clone()));
                }

                let page = http
                    .get_json(self.source().as_str(), &self.base_url, &query)
                    .await
                    .map_err(unavailable(self.source()))?;

                let total = page.get("totalRecords").and_then(|v| v.as_u64());
                let batch = expect_array(self.source(), &page, "opportunitiesData")?;
                debug!(naics = %naics, offset, total, returned = batch.len(), "primary page");

                if batch.is_empty() {
                    break;
                }
                offset += batch.len() as u64;
                records.extend(batch.iter().cloned().map(|payload| RawSourceRecord {
                    source: SourceKind::Primary,
                    payload,
                }));
                if harvest_complete(offset, total) {
                    break;
                }
            }
        }

        Ok(records)
    }
}

/// SBIR/STTR award source: GET with start/rows paging, bare JSON array
/// response, one request stream per configured agency.
#[derive(Debug, Clone)]
pub struct SbirAwardClient {
    pub base_url: String,
    pub agencies: Vec<String>,
    pub page_size: u64,
    pub max_pages: u64,
}

impl SbirAwardClient {
    fn candidate_agencies(&self, filter: &FetchFilter) -> Vec<String> {
        match &filter.agency {
            Some(agency) => vec![agency.clone()],
            None => self.agencies.clone(),
        }
    }
}

#[async_trait]
impl SourceClient for SbirAwardClient {
    fn source(&self) -> SourceKind {
        SourceKind::SbirSttr
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        filter: &FetchFilter,
    ) -> Result<Vec<RawSourceRecord>, SourceError> {
        let mut records = Vec::new();

        for agency in self.candidate_agencies(filter) {
            let mut start = 0u64;
            for _page in 0..self.max_pages {
                let mut query = vec![
                    ("agency", agency.clone()),
                    ("start", start.to_string()),
                    ("rows", self.page_size.to_string()),
                ];
                if let Some(year) = filter.year {
                    query.push(("year", year.to_string()));
                }

                let page = http
                    .get_json(self.source().as_str(), &self.base_url, &query)
                    .await
                    .map_err(unavailable(self.source()))?;

                let batch = page
                    .as_array()
                    .ok_or_else(|| SourceError::UnexpectedPayload {
                        kind: self.source(),
                        reason: "expected top-level array".into(),
                    })?;
                debug!(agency = %agency, start, returned = batch.len(), "sbir page");

                if batch.is_empty() {
                    break;
                }
                let full_page = batch.len() as u64 >= self.page_size;
                start += batch.len() as u64;
                records.extend(batch.iter().cloned().map(|payload| RawSourceRecord {
                    source: SourceKind::SbirSttr,
                    payload,
                }));
                if !full_page {
                    break;
                }
            }
        }

        Ok(records)
    }
}

/// Federal spending award source: POST search with page/limit in the body,
/// `results` array and `page_metadata.hasNext` continuation flag.
#[derive(Debug, Clone)]
pub struct SpendingAwardClient {
    pub base_url: String,
    pub naics_codes: Vec<String>,
    pub page_size: u64,
    pub max_pages: u64,
}

impl SpendingAwardClient {
    fn candidate_naics(&self, filter: &FetchFilter) -> Vec<String> {
        match &filter.naics {
            Some(code) => vec![code.clone()],
            None => self.naics_codes.clone(),
        }
    }

    fn search_body(&self, naics: &str, filter: &FetchFilter, page: u64) -> JsonValue {
        let mut filters = json!({
            "naics_codes": [naics],
            "award_type_codes": ["A", "B", "C", "D"],
        });
        if let Some(year) = filter.year {
            filters["time_period"] = json!([{
                "start_date": format!("{year}-01-01"),
                "end_date": format!("{year}-12-31"),
            }]);
        }
        if let Some(agency) = &filter.agency {
            filters["agencies"] = json!([{
                "type": "awarding",
                "tier": "toptier",
                "name": agency,
            }]);
        }
        json!({
            "filters": filters,
            "fields": [
                "Award ID", "Recipient Name", "Award Amount", "Awarding Agency",
                "Start Date", "End Date", "naics_code", "place_of_performance_state_code",
            ],
            "page": page,
            "limit": self.page_size,
        })
    }
}

#[async_trait]
impl SourceClient for SpendingAwardClient {
    fn source(&self) -> SourceKind {
        SourceKind::FederalSpending
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        filter: &FetchFilter,
    ) -> Result<Vec<RawSourceRecord>, SourceError> {
        let mut records = Vec::new();

        for naics in self.candidate_naics(filter) {
            for page_no in 1..=self.max_pages {
                let body = self.search_body(&naics, filter, page_no);
                let page = http
                    .post_json(self.source().as_str(), &self.base_url, &body)
                    .await
                    .map_err(unavailable(self.source()))?;

                let batch = expect_array(self.source(), &page, "results")?;
                debug!(naics = %naics, page = page_no, returned = batch.len(), "spending page");

                if batch.is_empty() {
                    break;
                }
                records.extend(batch.iter().cloned().map(|payload| RawSourceRecord {
                    source: SourceKind::FederalSpending,
                    payload,
                }));

                let has_next = page
                    .get("page_metadata")
                    .and_then(|m| m.get("hasNext"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if !has_next {
                    break;
                }
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_filter_narrows_candidate_set() {
        let client = PrimarySolicitationClient {
            base_url: "https://example.test/opps".into(),
            api_key: "k".into(),
            naics_codes: vec!["541511".into(), "561210".into()],
            page_size: 100,
            max_pages: 10,
        };

        let all = client.candidate_naics(&FetchFilter::default());
        assert_eq!(all, vec!["541511", "561210"]);

        let narrowed = client.candidate_naics(&FetchFilter {
            naics: Some("236220".into()),
            ..Default::default()
        });
        assert_eq!(narrowed, vec!["236220"]);
    }

    #[test]
    fn sbir_filter_narrows_agencies() {
        let client = SbirAwardClient {
            base_url: "https://example.test/awards".into(),
            agencies: vec!["DOD".into(), "HHS".into(), "NASA".into()],
            page_size: 50,
            max_pages: 5,
        };

        let narrowed = client.candidate_agencies(&FetchFilter {
            agency: Some("DOE".into()),
            ..Default::default()
        });
        assert_eq!(narrowed, vec!["DOE"]);
        assert_eq!(client.candidate_agencies(&FetchFilter::default()).len(), 3);
    }

    #[test]
    fn spending_search_body_carries_paging_and_year_window() {
        let client = SpendingAwardClient {
            base_url: "https://example.test/search".into(),
            naics_codes: vec!["541511".into()],
            page_size: 25,
            max_pages: 4,
        };

        let body = client.search_body(
            "541511",
            &FetchFilter {
                year: Some(2025),
                ..Default::default()
            },
            3,
        );
        assert_eq!(body["page"], 3);
        assert_eq!(body["limit"], 25);
        assert_eq!(body["filters"]["naics_codes"][0], "541511");
        assert_eq!(
            body["filters"]["time_period"][0]["start_date"],
            "2025-01-01"
        );
    }

    #[test]
    fn expect_array_reports_missing_field() {
        let err = expect_array(SourceKind::Primary, &json!({"total": 1}), "opportunitiesData")
            .unwrap_err();
        match err {
            SourceError::UnexpectedPayload { kind, reason } => {
                assert_eq!(kind, SourceKind::Primary);
                assert!(reason.contains("opportunitiesData"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn only_unavailable_carries_an_underlying_error_source() {
        use std::error::Error as _;

        let unavailable = SourceError::Unavailable {
            source: SourceKind::Primary,
            cause: FetchError::HttpStatus {
                status: 503,
                url: "https://example.test".into(),
            },
        };
        assert!(unavailable.source().is_some());

        let payload = SourceError::UnexpectedPayload {
            kind: SourceKind::SbirSttr,
            reason: "missing array".into(),
        };
        assert!(payload.source().is_none());
        assert!(payload.to_string().contains("sbir_sttr"));
    }

    #[test]
    fn primary_paging_continues_when_total_is_missing() {
        assert!(!harvest_complete(100, None));
        assert!(!harvest_complete(50, Some(100)));
        assert!(harvest_complete(100, Some(100)));
        assert!(harvest_complete(150, Some(100)));
    }
}
