//! Health, readiness and metrics handlers

use crate::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: CheckResult,
    pub queue: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Basic health - returns healthy if the server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: atabot_common::VERSION.to_string(),
    })
}

/// Liveness probe
pub async fn live() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "alive".to_string(),
        version: atabot_common::VERSION.to_string(),
    })
}

/// Readiness probe - checks dependencies; the database being down reports
/// degraded rather than panicking
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    let start = std::time::Instant::now();

    let db_check = match state.db.ping().await {
        Ok(_) => CheckResult {
            status: "up".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => CheckResult {
            status: "down".to_string(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    };

    let queue_stats = state.queue.stats();
    let queue_check = CheckResult {
        status: "up".to_string(),
        latency_ms: None,
        error: None,
    };

    let all_healthy = db_check.status == "up";

    Json(ReadyResponse {
        status: if all_healthy { "ready" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            database: db_check,
            queue: CheckResult {
                status: format!(
                    "{} ({} queued)",
                    queue_check.status, queue_stats.queued_texts
                ),
                ..queue_check
            },
        },
    })
}

/// Prometheus scrape endpoint
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}
