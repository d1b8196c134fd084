//! Bearer-key authorization.
//!
//! When the `api_key` setting is non-empty every gateway request must carry
//! `Authorization: Bearer <key>`; with no key configured, requests pass
//! unauthenticated. The health endpoint is always open.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::state::AppState;

pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.settings().await.api_key;
    if expected.is_empty() {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(key) if key == expected => next.run(request).await,
        _ => {
            warn!(subsystem = "api", "Request rejected: missing or invalid API key");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Unauthorized: missing or invalid API key" })),
            )
                .into_response()
        }
    }
}
