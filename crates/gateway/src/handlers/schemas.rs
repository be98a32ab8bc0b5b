//! Schema management handlers

use crate::state::AppState;
use atabot_common::errors::{AppError, Result};
use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::json;

/// GET /api/v1/schemas
///
/// Registered schemas plus discoverable (unregistered) ones
pub async fn list_schemas(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let registered = state.registry.list().await?;
    let available = state.db.get_schemas().await?;

    let registered_names: Vec<&str> = registered
        .iter()
        .map(|s| s.schema_name.as_str())
        .collect();
    let unregistered: Vec<&String> = available
        .iter()
        .filter(|s| !registered_names.contains(&s.as_str()))
        .collect();

    Ok(Json(json!({
        "registered": registered,
        "available": unregistered,
    })))
}

/// GET /api/v1/schemas/{name}/tables
pub async fn tables(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let tables = state.db.get_tables(&name).await?;
    if tables.is_empty() && state.registry.get(&name).await?.is_none() {
        return Err(AppError::SchemaNotFound { name });
    }

    Ok(Json(json!({
        "schema": name,
        "tables": tables,
    })))
}

/// POST /api/v1/schemas/{name}/analyze
///
/// Registers (or refreshes) the schema with heuristic per-table patterns
pub async fn analyze(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let available = state.db.get_schemas().await?;
    if !available.contains(&name) {
        return Err(AppError::SchemaNotFound { name });
    }

    let managed = state.registry.register(&name).await?;
    Ok(Json(json!({
        "schema": managed.schema_name,
        "total_tables": managed.total_tables,
        "total_rows": managed.total_rows,
        "is_active": managed.is_active,
    })))
}

/// POST /api/v1/schemas/{name}/activate
pub async fn activate(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    if !state.registry.set_active(&name, true).await? {
        return Err(AppError::SchemaNotFound { name });
    }
    Ok(Json(json!({ "schema": name, "is_active": true })))
}

/// DELETE /api/v1/schemas/{name}
///
/// Removes the registration and every embedding derived from the schema
pub async fn remove(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>> {
    if !state.registry.delete(&name).await? {
        return Err(AppError::SchemaNotFound { name });
    }
    let deleted = state.sync.clear_embeddings(&name, None).await?;

    Ok(Json(json!({
        "schema": name,
        "embeddings_deleted": deleted,
    })))
}
