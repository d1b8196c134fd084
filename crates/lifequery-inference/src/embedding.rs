//! Embedding client over the OpenAI-compatible `/embeddings` endpoint.
//!
//! Works against Ollama's `/v1` surface or any other OpenAI-compatible
//! provider; the base URL is derived from the `ollama_url` setting. The
//! endpoint configuration is cached and swapped atomically when settings
//! change, so in-flight operations keep the snapshot they started with.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lifequery_core::{defaults, EmbeddingBackend, Error, Result, Settings};

use crate::provider::ensure_versioned_url;

#[derive(Debug, Clone, PartialEq)]
struct Endpoint {
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

/// Embedding client with a resettable cached endpoint.
pub struct EmbeddingClient {
    client: Client,
    endpoint: RwLock<Endpoint>,
}

impl EmbeddingClient {
    pub fn new(settings: &Settings) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(defaults::EMBED_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        let endpoint = Endpoint {
            base_url: ensure_versioned_url(&settings.ollama_url),
            model: settings.embedding_model.clone(),
        };
        info!(
            subsystem = "inference",
            component = "embedder",
            base_url = %endpoint.base_url,
            model = %endpoint.model,
            "Embedding client initialized"
        );
        Self {
            client,
            endpoint: RwLock::new(endpoint),
        }
    }

    /// Invalidate the cached endpoint after a URL or model change.
    pub fn reset(&self, settings: &Settings) {
        let next = Endpoint {
            base_url: ensure_versioned_url(&settings.ollama_url),
            model: settings.embedding_model.clone(),
        };
        let mut endpoint = self.endpoint.write().expect("endpoint lock poisoned");
        if *endpoint != next {
            info!(
                subsystem = "inference",
                component = "embedder",
                base_url = %next.base_url,
                model = %next.model,
                "Embedding client reconfigured"
            );
            *endpoint = next;
        }
    }

    fn snapshot(&self) -> Endpoint {
        self.endpoint.read().expect("endpoint lock poisoned").clone()
    }
}

#[async_trait]
impl EmbeddingBackend for EmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let endpoint = self.snapshot();
        let request = EmbeddingRequest {
            model: &endpoint.model,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", endpoint.base_url))
            .json(&request)
            .send()
            .await
            .map_err(Error::from)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = format!("Embedding endpoint returned {status}: {body}");
            // Rate limits and server hiccups are retryable; 4xx is not.
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(Error::Transient(message))
            } else {
                Err(Error::Upstream(message))
            };
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("Failed to parse embedding response: {e}")))?;

        let mut data = result.data;
        data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();

        if vectors.len() != texts.len() {
            return Err(Error::Upstream(format!(
                "Embedding count mismatch: {} inputs, {} vectors",
                texts.len(),
                vectors.len()
            )));
        }
        let dim = vectors[0].len();
        if vectors.iter().any(|v| v.len() != dim) {
            return Err(Error::Upstream(
                "Embedding response mixes vector dimensions".to_string(),
            ));
        }

        debug!(
            subsystem = "inference",
            component = "embedder",
            input_count = texts.len(),
            model = %endpoint.model,
            "Embedding batch complete"
        );
        Ok(vectors)
    }

    async fn health_check(&self) -> Result<bool> {
        let endpoint = self.snapshot();
        match self
            .client
            .get(format!("{}/models", endpoint.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => Ok(true),
            Ok(resp) => {
                warn!(status = %resp.status(), "Embedding service health check failed");
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "Embedding service unreachable");
                Ok(false)
            }
        }
    }

    async fn model_exists(&self, model: &str) -> Result<bool> {
        let endpoint = self.snapshot();
        let response = self
            .client
            .get(format!("{}/models", endpoint.base_url))
            .send()
            .await
            .map_err(Error::from)?;
        if !response.status().is_success() {
            return Ok(false);
        }
        let models: ModelsResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("Failed to parse model list: {e}")))?;

        let available: Vec<String> = models.data.into_iter().map(|m| m.id).collect();
        Ok(model_listed(model, &available))
    }

    fn model_name(&self) -> String {
        self.snapshot().model
    }
}

/// Match a wanted model against the advertised list, tolerating namespace
/// prefixes (`org/model`), tag suffixes (`:Q8_0`, `:latest`), and case.
fn model_listed(wanted: &str, available: &[String]) -> bool {
    let want_lower = wanted.to_lowercase();
    let want_base = want_lower.split(':').next().unwrap_or(&want_lower);

    available.iter().any(|id| {
        let id_lower = id.to_lowercase();
        let id_short = id_lower.rsplit('/').next().unwrap_or(&id_lower);
        let id_base = id_short.split(':').next().unwrap_or(id_short);

        id_lower == want_lower
            || id_short == want_lower
            || id_short == format!("{want_lower}:latest")
            || id_base == want_base
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_model_listed_exact() {
        assert!(model_listed("qwen3:8b", &list(&["qwen3:8b"])));
    }

    #[test]
    fn test_model_listed_namespace_prefix() {
        assert!(model_listed(
            "Qwen3-Embedding-0.6B:Q8_0",
            &list(&["ZimaBlueAI/qwen3-embedding-0.6b:q8_0"])
        ));
    }

    #[test]
    fn test_model_listed_tag_stripped() {
        assert!(model_listed("nomic-embed-text", &list(&["nomic-embed-text:latest"])));
        assert!(model_listed("nomic-embed-text:v1.5", &list(&["nomic-embed-text:latest"])));
    }

    #[test]
    fn test_model_listed_absent() {
        assert!(!model_listed("mystery-model", &list(&["qwen3:8b", "llama3"])));
        assert!(!model_listed("anything", &[]));
    }

    #[test]
    fn test_reset_swaps_endpoint() {
        let settings = Settings::default();
        let client = EmbeddingClient::new(&settings);
        assert_eq!(client.model_name(), settings.embedding_model);

        let mut updated = settings.clone();
        updated.embedding_model = "nomic-embed-text".to_string();
        updated.ollama_url = "http://localhost:11434".to_string();
        client.reset(&updated);
        assert_eq!(client.model_name(), "nomic-embed-text");
        assert_eq!(
            client.snapshot().base_url,
            "http://localhost:11434/v1"
        );
    }
}
