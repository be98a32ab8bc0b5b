//! Chat handlers: plain, SSE streaming, and session history

use crate::state::AppState;
use atabot_chat::{ChatEvent, ChatRequest, ChatResponse};
use atabot_common::errors::{AppError, Result};
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc;

/// POST /api/v1/chat
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    let response = state.orchestrator.process(request).await?;
    Ok(Json(response))
}

/// POST /api/v1/chat/stream
///
/// SSE lines carry JSON events: start, content, sources, complete, error.
/// Dropping the connection closes the channel and cancels the producer.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<ChatEvent>(32);

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        orchestrator.process_streaming(request, tx).await;
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let sse = Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data("{}"));
        Some((Ok(sse), rx))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /api/v1/chat/history/{session_id}
pub async fn history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let history = state
        .orchestrator
        .sessions()
        .history(&session_id)
        .ok_or_else(|| AppError::NotFound {
            resource_type: "session".to_string(),
            id: session_id.clone(),
        })?;

    Ok(Json(json!({
        "session_id": session_id,
        "messages": history,
    })))
}

/// DELETE /api/v1/chat/history/{session_id}
pub async fn clear_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let deleted = state.orchestrator.sessions().delete(&session_id);
    Ok(Json(json!({ "deleted": deleted })))
}
