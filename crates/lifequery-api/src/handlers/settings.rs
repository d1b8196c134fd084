//! Settings and provider endpoints.

use std::collections::HashMap;

use axum::extract::State;
use axum::Json;
use serde_json::Value as JsonValue;
use tracing::info;

use lifequery_core::sanitize_update;

use crate::error::ApiResult;
use crate::state::AppState;

/// `GET /api/settings` — all settings with sensitive fields masked.
pub async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<JsonValue>> {
    let settings = state.settings().await;
    Ok(Json(settings.masked_json()))
}

/// `POST /api/settings` — partial update. Sentinel (`****`) writes to
/// sensitive keys are discarded; empty values are ignored.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(updates): Json<HashMap<String, JsonValue>>,
) -> ApiResult<Json<JsonValue>> {
    let sanitized = sanitize_update(updates);
    if sanitized.is_empty() {
        return Ok(Json(serde_json::json!({ "ok": true })));
    }

    let touches_embedding =
        sanitized.contains_key("ollama_url") || sanitized.contains_key("embedding_model");

    state.db.config.write_many(&sanitized).await?;
    let fresh = state.reload_settings().await?;

    if touches_embedding {
        state.embedder.reset(&fresh);
    }

    info!(
        subsystem = "api",
        op = "update_settings",
        keys = ?sanitized.keys().collect::<Vec<_>>(),
        "Settings updated"
    );
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `GET /api/providers` — stored provider profiles, keys masked.
pub async fn get_providers(State(state): State<AppState>) -> ApiResult<Json<JsonValue>> {
    let profiles = state.db.config.list_providers().await?;
    let masked: Vec<_> = profiles.iter().map(|p| p.masked()).collect();
    Ok(Json(serde_json::to_value(masked).unwrap_or_default()))
}
