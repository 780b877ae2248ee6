//! Axum trigger surface for ingestion runs and geocoding enrichment.
//!
//! This is the boundary the excluded application layer calls; no auth, no UI.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fedscout_core::{FetchFilter, SourceKind, SourceSelector};
use fedscout_ingest::{GeocodingEnricher, IngestionOrchestrator};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

pub const CRATE_NAME: &str = "fedscout-web";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<IngestionOrchestrator>,
    pub enricher: Arc<GeocodingEnricher>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestRunRequest {
    pub source: Option<String>,
    pub naics: Option<String>,
    pub agency: Option<String>,
    pub year: Option<i32>,
}

impl IngestRunRequest {
    fn selector(&self) -> Result<SourceSelector, String> {
        let Some(source) = &self.source else {
            // A full run ignores filters, so accepting them here would
            // silently drop them.
            if self.naics.is_some() || self.agency.is_some() || self.year.is_some() {
                return Err("naics/agency/year filters require a source".to_string());
            }
            return Ok(SourceSelector::Full);
        };
        let kind = SourceKind::parse(source)
            .ok_or_else(|| format!("unknown source `{source}`"))?;
        Ok(SourceSelector::Single(
            kind,
            FetchFilter {
                naics: self.naics.clone(),
                agency: self.agency.clone(),
                year: self.year,
            },
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct GeocodeBatchRequest {
    pub limit: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeBatchResponse {
    pub geocoded_count: u64,
    pub requested_limit: usize,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/ingest/run", post(ingest_run_handler))
        .route("/geocode/batch", post(geocode_batch_handler))
        .route("/geocode/stats", get(geocode_stats_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "trigger surface listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn ingest_run_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestRunRequest>,
) -> Response {
    let selector = match request.selector() {
        Ok(selector) => selector,
        Err(reason) => return bad_request(reason),
    };
    // Partial failure is still a structured summary, never an error status.
    let result = state.orchestrator.run(selector).await;
    Json(result).into_response()
}

async fn geocode_batch_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GeocodeBatchRequest>,
) -> Response {
    match state.enricher.batch_geocode(request.limit).await {
        Ok(geocoded_count) => Json(GeocodeBatchResponse {
            geocoded_count,
            requested_limit: request.limit,
        })
        .into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn geocode_stats_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.enricher.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => server_error(err.into()),
    }
}

fn bad_request(reason: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": reason })),
    )
        .into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}
