//! Health check handlers

use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use manualqa_common::store::StoreStats;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub evidence: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    pub stats: StoreStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: manualqa_common::VERSION,
    })
}

/// Readiness probe - ready once a snapshot with facts is loaded
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let loaded = state.stats.facts > 0;

    let evidence = CheckResult {
        status: if loaded { "up" } else { "empty" }.to_string(),
        stats: state.stats,
        document: state.document.as_deref().map(str::to_string),
    };

    let status = if loaded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            status: if loaded { "ready" } else { "not_ready" }.to_string(),
            checks: HealthChecks { evidence },
        }),
    )
}

/// Prometheus scrape endpoint
pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus.render()
}
