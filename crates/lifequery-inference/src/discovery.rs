//! Model discovery across providers.
//!
//! Lists the models a provider advertises, using the native Ollama
//! `/api/tags` endpoint for local installs and `/models` for everything
//! OpenAI-compatible.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use lifequery_core::{Error, Result, Settings};

use crate::provider::{default_base_url, ensure_versioned_url};

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

/// List models on a native Ollama install via `/api/tags`.
pub async fn list_ollama_models(ollama_url: &str) -> Result<Vec<String>> {
    // The native API lives next to /v1, not under it.
    let base = ollama_url.trim_end_matches('/').replace("/v1", "");
    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default();

    let response = client
        .get(format!("{base}/api/tags"))
        .send()
        .await
        .map_err(Error::from)?;
    if !response.status().is_success() {
        return Err(Error::Upstream(format!(
            "Ollama tags endpoint returned {}",
            response.status()
        )));
    }
    let tags: TagsResponse = response
        .json()
        .await
        .map_err(|e| Error::Upstream(format!("Failed to parse tags: {e}")))?;
    Ok(tags.models.into_iter().map(|m| m.name).collect())
}

/// List models on an OpenAI-compatible endpoint via `/models`.
pub async fn list_openai_models(base_url: &str, api_key: &str) -> Result<Vec<String>> {
    let base = ensure_versioned_url(base_url);
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default();

    let mut builder = client.get(format!("{base}/models"));
    if !api_key.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {api_key}"));
    }

    let response = builder.send().await.map_err(Error::from)?;
    if !response.status().is_success() {
        return Err(Error::Upstream(format!(
            "Models endpoint returned {}",
            response.status()
        )));
    }
    let models: ModelsResponse = response
        .json()
        .await
        .map_err(|e| Error::Upstream(format!("Failed to parse model list: {e}")))?;
    Ok(models.data.into_iter().map(|m| m.id).collect())
}

/// Resolve the URL and key to probe for a provider, preferring explicit
/// arguments, then the provider's default URL when the configured one still
/// points elsewhere.
pub fn resolve_discovery_target(
    settings: &Settings,
    provider: &str,
    url_override: Option<&str>,
    key_override: Option<&str>,
) -> (String, String) {
    let mut url = url_override
        .map(|u| u.to_string())
        .unwrap_or_else(|| settings.chat_url.clone());
    let mut key = key_override
        .map(|k| k.to_string())
        .unwrap_or_else(|| settings.chat_api_key.clone());
    if key.is_empty() {
        key = settings.openrouter_api_key.clone();
    }

    match provider {
        "openrouter" if url.is_empty() || url.contains("ollama") => {
            url = default_base_url("openrouter").unwrap().to_string();
        }
        "openai" if url.is_empty() || url.contains("ollama") || url.contains("openrouter") => {
            url = default_base_url("openai").unwrap().to_string();
        }
        "custom" if (url.is_empty() || url.contains("ollama")) => {
            if !settings.custom_chat_url.is_empty() {
                url = settings.custom_chat_url.clone();
            }
        }
        _ => {}
    }

    (url, key)
}

/// List the models of `provider`, sorted. Ollama uses the native tags API;
/// everything else goes through `/models`, falling back to a static list
/// for providers that refuse discovery.
pub async fn list_models(
    settings: &Settings,
    provider: &str,
    url_override: Option<&str>,
    key_override: Option<&str>,
) -> Result<Vec<String>> {
    let mut models = if provider == "ollama" {
        let url = url_override.unwrap_or(&settings.ollama_url);
        list_ollama_models(url).await?
    } else {
        let (url, key) = resolve_discovery_target(settings, provider, url_override, key_override);
        match list_openai_models(&url, &key).await {
            Ok(models) => models,
            Err(e) if provider == "openai" => {
                warn!(error = %e, "Model listing failed; using static OpenAI defaults");
                vec![
                    "gpt-4o".to_string(),
                    "gpt-4o-mini".to_string(),
                    "o1".to_string(),
                    "o3-mini".to_string(),
                ]
            }
            Err(e) => return Err(e),
        }
    };

    models.sort();
    Ok(models)
}
