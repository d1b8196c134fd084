//! Message-source (Telegram) status and auth endpoints.
//!
//! All of these delegate to the configured [`lifequery_core::MessageSource`]
//! implementation; the gateway adds no provider logic of its own.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuthStartRequest {
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthVerifyRequest {
    pub token: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn to_json(status: lifequery_core::SourceStatus) -> JsonValue {
    serde_json::to_value(status).unwrap_or_default()
}

/// `GET /api/telegram/status`
pub async fn status(State(state): State<AppState>) -> ApiResult<Json<JsonValue>> {
    Ok(Json(to_json(state.source.status().await?)))
}

/// `POST /api/telegram/auth/start`
pub async fn auth_start(
    State(state): State<AppState>,
    Json(request): Json<AuthStartRequest>,
) -> ApiResult<Json<JsonValue>> {
    if request.phone.trim().is_empty() {
        return Err(lifequery_core::Error::InvalidInput(
            "Phone number is required".to_string(),
        )
        .into());
    }
    Ok(Json(to_json(state.source.start_auth(&request.phone).await?)))
}

/// `POST /api/telegram/auth/verify`
pub async fn auth_verify(
    State(state): State<AppState>,
    Json(request): Json<AuthVerifyRequest>,
) -> ApiResult<Json<JsonValue>> {
    if request.code.is_none() && request.password.is_none() {
        return Err(lifequery_core::Error::InvalidInput(
            "Either code or password must be provided".to_string(),
        )
        .into());
    }
    let status = state
        .source
        .verify_auth(
            &request.token,
            request.code.as_deref(),
            request.password.as_deref(),
        )
        .await?;
    Ok(Json(to_json(status)))
}

/// `POST /api/telegram/disconnect`
pub async fn disconnect(State(state): State<AppState>) -> ApiResult<Json<JsonValue>> {
    Ok(Json(to_json(state.source.disconnect().await?)))
}
