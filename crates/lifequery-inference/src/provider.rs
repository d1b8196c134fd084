//! Chat provider resolution.
//!
//! A factory keyed on the `chat_provider` setting selects one of two
//! adapters: the Ollama-native backend (which preserves the structured
//! reasoning field the OpenAI-compatible endpoint drops) or the generic
//! OpenAI-compatible backend parametric on base URL and key.

use std::sync::Arc;

use tracing::info;

use lifequery_core::{ChatBackend, Error, Result, Settings};

use crate::ollama::OllamaChatBackend;
use crate::openai::OpenAiChatBackend;

/// Default base URL per known provider id.
pub fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("https://api.openai.com/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        _ => None,
    }
}

/// Append `/v1` to a base URL unless it already ends in a version segment
/// (`/v1`, `/v4`, `/v1beta`, ...).
pub fn ensure_versioned_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if has_version_suffix(trimmed) {
        trimmed.to_string()
    } else {
        format!("{trimmed}/v1")
    }
}

fn has_version_suffix(url: &str) -> bool {
    let Some(segment) = url.rsplit('/').next() else {
        return false;
    };
    let mut chars = segment.chars();
    if chars.next() != Some('v') {
        return false;
    }
    let rest: Vec<char> = chars.collect();
    if rest.is_empty() || !rest[0].is_ascii_digit() {
        return false;
    }
    rest.iter()
        .all(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
}

/// Resolved endpoint configuration for the OpenAI-compatible adapter.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

/// Resolve the effective endpoint for a non-Ollama provider, falling back
/// to the provider's default URL when the configured one still points at a
/// different provider (stale after a switch).
pub fn resolve_endpoint(settings: &Settings) -> Result<ResolvedEndpoint> {
    let provider = settings.chat_provider.as_str();
    let mut url = settings.chat_url.clone();

    match provider {
        "openrouter" => {
            if url.is_empty() || url.contains("ollama") {
                url = default_base_url("openrouter").unwrap().to_string();
            }
        }
        "openai" => {
            if url.is_empty() || url.contains("ollama") || url.contains("openrouter") {
                url = default_base_url("openai").unwrap().to_string();
            }
        }
        "custom" => {
            if (url.is_empty() || url.contains("ollama")) && !settings.custom_chat_url.is_empty() {
                url = settings.custom_chat_url.clone();
            }
            if url.is_empty() {
                return Err(Error::Config(
                    "custom provider selected but no chat_url configured".to_string(),
                ));
            }
        }
        other => {
            return Err(Error::Config(format!("Unknown chat provider: {other}")));
        }
    }

    let api_key = if !settings.chat_api_key.is_empty() {
        settings.chat_api_key.clone()
    } else {
        settings.openrouter_api_key.clone()
    };

    Ok(ResolvedEndpoint {
        base_url: ensure_versioned_url(&url),
        api_key,
        model: settings.chat_model.clone(),
    })
}

/// Build the chat backend selected by the settings snapshot.
pub fn create_chat_backend(settings: &Settings) -> Result<Arc<dyn ChatBackend>> {
    if settings.chat_provider == "ollama" {
        // Native API so think=false is respected; the /v1 endpoint routes
        // all output of thinking models into the reasoning field.
        info!(
            subsystem = "inference",
            component = "factory",
            host = %settings.chat_url,
            model = %settings.chat_model,
            "Creating Ollama-native chat backend"
        );
        return Ok(Arc::new(OllamaChatBackend::new(
            settings.chat_url.clone(),
            settings.chat_model.clone(),
        )));
    }

    let endpoint = resolve_endpoint(settings)?;
    info!(
        subsystem = "inference",
        component = "factory",
        provider = %settings.chat_provider,
        base_url = %endpoint.base_url,
        model = %endpoint.model,
        "Creating OpenAI-compatible chat backend"
    );
    Ok(Arc::new(OpenAiChatBackend::new(
        endpoint.base_url,
        endpoint.api_key,
        endpoint.model,
    )))
}
