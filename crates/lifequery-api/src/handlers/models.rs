//! Model discovery endpoint.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use lifequery_core::MASKED_VALUE;
use lifequery_inference::discovery;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ModelsQuery {
    provider: Option<String>,
    url: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    models: Vec<String>,
    embedding_models: Vec<String>,
    chat_models: Vec<String>,
}

/// `GET /api/models?provider&url&api_key` — list a provider's models.
///
/// Defaults to the configured chat provider. A masked key from the UI is
/// replaced with the stored one, and switching providers looks up that
/// provider's stored profile for its URL and key.
pub async fn get_models(
    State(state): State<AppState>,
    Query(query): Query<ModelsQuery>,
) -> ApiResult<Json<ModelsResponse>> {
    let settings = state.settings().await;
    let provider = query
        .provider
        .clone()
        .unwrap_or_else(|| settings.chat_provider.clone());

    let mut url_override = query.url.clone();
    let mut key_override = query.api_key.clone();
    if key_override.as_deref() == Some(MASKED_VALUE) {
        key_override = None;
    }

    // Switching providers in the UI: pull the target provider's stored
    // profile so the preview uses its saved endpoint.
    if provider != settings.chat_provider {
        match state.db.config.get_provider(&provider).await {
            Ok(Some(profile)) => {
                if url_override.is_none() {
                    url_override = profile.base_url.filter(|u| !u.is_empty());
                }
                if key_override.is_none() {
                    key_override = profile
                        .api_key
                        .filter(|k| !k.is_empty() && k != MASKED_VALUE);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, provider = %provider, "Profile lookup failed"),
        }
    }

    let models = discovery::list_models(
        &settings,
        &provider,
        url_override.as_deref(),
        key_override.as_deref(),
    )
    .await?;

    // The full list feeds both dropdowns; aggressive pattern filtering hid
    // valid models with unconventional names.
    Ok(Json(ModelsResponse {
        embedding_models: models.clone(),
        chat_models: models.clone(),
        models,
    }))
}
