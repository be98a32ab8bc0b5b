//! Sync handlers: unified sync trigger, status, jobs, cache clears and the
//! optional realtime listener

use crate::state::AppState;
use atabot_common::errors::{AppError, Result};
use atabot_sync::{ChangeOp, JobState, SyncMode};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::postgres::PgListener;
use tracing::{error, info, warn};

/// Unified sync request: a whole schema, a list of tables, or one table
#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub schema: String,
    pub table: Option<String>,
    pub tables: Option<Vec<String>>,
    #[serde(default)]
    pub force_full: bool,
    pub mode: Option<SyncMode>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub schema: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClearCacheRequest {
    pub schema: String,
    pub table: Option<String>,
}

/// POST /api/v1/sync
///
/// Starts a background job and returns its id immediately
pub async fn start_sync(
    State(state): State<AppState>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<serde_json::Value>> {
    let mode = if request.force_full {
        SyncMode::Full
    } else {
        request.mode.unwrap_or(SyncMode::Incremental)
    };

    let sync = state.sync.clone();
    let schema = request.schema.clone();

    let job_id = match (&request.table, &request.tables) {
        (Some(table), _) => {
            let job_id = sync.jobs().create(&schema, Some(table), mode.as_str());
            let table = table.clone();
            let id = job_id.clone();
            tokio::spawn(async move {
                let state = match sync.sync_table(&schema, &table, mode, &id).await {
                    Ok(_) => JobState::Completed,
                    Err(e) => {
                        sync.jobs().push_error(&id, e.to_string());
                        JobState::Failed
                    }
                };
                sync.jobs().finish(&id, state);
            });
            job_id
        }
        (None, tables) => {
            let job_id = sync.jobs().create(&schema, None, mode.as_str());
            let tables = tables.clone();
            let id = job_id.clone();
            tokio::spawn(async move {
                let state = match sync.sync_schema(&schema, tables, mode, &id).await {
                    Ok(()) => JobState::Completed,
                    Err(e) => {
                        sync.jobs().push_error(&id, e.to_string());
                        JobState::Failed
                    }
                };
                sync.jobs().finish(&id, state);
            });
            job_id
        }
    };

    Ok(Json(json!({
        "job_id": job_id,
        "mode": mode.as_str(),
        "status": "started",
    })))
}

/// GET /api/v1/sync/status
pub async fn status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<serde_json::Value>> {
    let statuses = state.sync.sync_status(query.schema.as_deref()).await?;
    let queue = state.queue.stats();

    Ok(Json(json!({
        "tables": statuses,
        "queue": queue,
    })))
}

/// GET /api/v1/sync/jobs
pub async fn jobs(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "jobs": state.sync.jobs().list() }))
}

/// GET /api/v1/sync/jobs/{id}
pub async fn job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let job = state
        .sync
        .jobs()
        .get(&id)
        .ok_or(AppError::JobNotFound { id })?;
    Ok(Json(json!(job)))
}

/// DELETE /api/v1/sync/cache
pub async fn clear_cache(
    State(state): State<AppState>,
    Json(request): Json<ClearCacheRequest>,
) -> Result<Json<serde_json::Value>> {
    let deleted = state
        .sync
        .clear_embeddings(&request.schema, request.table.as_deref())
        .await?;
    state.cache.clear_memory();

    Ok(Json(json!({ "embeddings_deleted": deleted })))
}

/// POST /api/v1/sync/realtime/{schema}/{table}
pub async fn enable_realtime(
    State(state): State<AppState>,
    Path((schema, table)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>> {
    if !state.config.features.realtime_sync {
        return Err(AppError::Validation {
            message: "realtime sync is disabled".to_string(),
        });
    }
    state.sync.enable_realtime_sync(&schema, &table).await?;
    Ok(Json(json!({ "schema": schema, "table": table, "realtime": true })))
}

/// Trigger payload published on the `atabot_changes` channel
#[derive(Debug, Deserialize)]
struct ChangePayload {
    schema: String,
    table: String,
    operation: ChangeOp,
    data: serde_json::Map<String, serde_json::Value>,
}

/// Spawn the LISTEN task feeding trigger notifications into the single-row
/// sync path
pub fn spawn_realtime_listener(state: AppState) {
    tokio::spawn(async move {
        let mut listener = match PgListener::connect_with(state.db.inner()).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, "Failed to start realtime listener");
                return;
            }
        };
        if let Err(e) = listener.listen("atabot_changes").await {
            error!(error = %e, "Failed to LISTEN on atabot_changes");
            return;
        }
        info!("Realtime change listener running");

        loop {
            match listener.recv().await {
                Ok(notification) => {
                    let payload: ChangePayload =
                        match serde_json::from_str(notification.payload()) {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(error = %e, "Ignoring malformed change payload");
                                continue;
                            }
                        };
                    if let Err(e) = state
                        .sync
                        .process_change(
                            &payload.schema,
                            &payload.table,
                            payload.operation,
                            payload.data,
                        )
                        .await
                    {
                        warn!(error = %e, "Realtime change processing failed");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Realtime listener reconnecting");
                }
            }
        }
    });
}
