//! Chat management endpoints.

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use lifequery_core::Error;

use crate::error::ApiResult;
use crate::sse::{sse_response, value_stream};
use crate::state::AppState;

/// `GET /api/chats` — all chats with inclusion status.
///
/// While the source is disconnected, stale empty chat rows are swept so the
/// list stays tidy without a manual cleanup.
pub async fn list_chats(State(state): State<AppState>) -> ApiResult<Json<JsonValue>> {
    let connected = state
        .source
        .status()
        .await
        .map(|s| s.is_connected())
        .unwrap_or(false);
    if !connected {
        if let Err(e) = state.db.chats.cleanup_empty().await {
            debug!(error = %e, "Chat auto-cleanup failed (benign)");
        }
    }

    let chats = state.db.chats.list().await?;
    Ok(Json(json!({ "chats": chats })))
}

#[derive(Debug, Deserialize)]
pub struct ChatUpdateRequest {
    pub included: bool,
}

/// `PUT /api/chats/{id}` — toggle the inclusion mask.
pub async fn update_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(request): Json<ChatUpdateRequest>,
) -> ApiResult<Json<JsonValue>> {
    let updated = state.db.chats.set_included(&chat_id, request.included).await?;
    if !updated {
        return Err(Error::NotFound(format!("Chat not found: {chat_id}")).into());
    }
    info!(chat_id = %chat_id, included = request.included, "Updated chat inclusion");
    Ok(Json(json!({ "ok": true })))
}

/// `DELETE /api/chats/{id}` — delete messages and chunks, then evict the
/// chunks' vectors.
pub async fn delete_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    if state.db.chats.get(&chat_id).await?.is_none() {
        return Err(Error::NotFound(format!("Chat not found: {chat_id}")).into());
    }

    let deletion = state.db.delete_chat(&chat_id).await?;
    if let Err(e) = state.vectors.delete(&deletion.chunk_ids).await {
        // The next incremental embed reconciles leftover vectors.
        warn!(error = %e, chat_id = %chat_id, "Vector eviction failed");
    }

    Ok(Json(json!({
        "ok": true,
        "messages_deleted": deletion.messages_deleted,
        "chunks_deleted": deletion.chunks_deleted,
    })))
}

/// `POST /api/chats/sync` — refresh the chat list from the source (SSE).
pub async fn sync_chats(State(state): State<AppState>) -> Response {
    let (vtx, vrx) = mpsc::channel::<JsonValue>(64);
    let pipeline = state.pipeline.clone();

    tokio::spawn(async move {
        let (ptx, mut prx) = mpsc::channel(64);
        let forward_tx = vtx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = prx.recv().await {
                let value = serde_json::to_value(&event).unwrap_or_default();
                if forward_tx.send(value).await.is_err() {
                    break;
                }
            }
        });

        match pipeline.sync_chat_list(ptx).await {
            Ok(outcome) => {
                let _ = forwarder.await;
                let _ = vtx
                    .send(json!({
                        "type": "done",
                        "updated": outcome.updated,
                        "new": outcome.new,
                        "removed": outcome.removed,
                    }))
                    .await;
            }
            Err(e) => {
                let _ = forwarder.await;
                let _ = vtx
                    .send(json!({ "type": "error", "message": e.to_string() }))
                    .await;
            }
        }
    });

    sse_response(value_stream(vrx))
}
