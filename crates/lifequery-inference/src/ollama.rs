//! Ollama-native streaming chat backend.
//!
//! Uses the native `/api/chat` endpoint rather than the OpenAI-compatible
//! `/v1` surface: the native API keeps the model's reasoning in a separate
//! `thinking` field, where `/v1` either drops it or leaks it into content
//! for thinking models.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use lifequery_core::{
    CancelToken, ChatBackend, ChatDelta, ChatMessage, ChatParams, ChatStream, Error, Result,
};

use crate::streaming::{parse_native_line, receiver_stream, LineBuffer};

/// How long to wait for the initial connection.
const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Serialize)]
struct NativeOptions {
    temperature: f64,
    num_predict: i64,
}

#[derive(Serialize)]
struct NativeChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: NativeOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    think: Option<bool>,
}

/// Streaming chat backend for the Ollama native API.
pub struct OllamaChatBackend {
    client: Client,
    host: String,
    model: String,
}

impl OllamaChatBackend {
    pub fn new(host: String, model: String) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            model,
        }
    }
}

#[async_trait]
impl ChatBackend for OllamaChatBackend {
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        params: &ChatParams,
        cancel: CancelToken,
    ) -> Result<ChatStream> {
        let url = format!("{}/api/chat", self.host);
        let request = NativeChatRequest {
            model: &self.model,
            messages: &messages,
            stream: true,
            options: NativeOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
            },
            // Only hint the model when thinking is wanted; sending
            // think=false breaks models without the capability.
            think: params.enable_thinking.then_some(true),
        };

        debug!(
            subsystem = "inference",
            component = "ollama",
            model = %self.model,
            message_count = messages.len(),
            "Starting native chat stream"
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(Error::from)?;

        if !response.status().is_success() {
            let status = response.status();
            let body: JsonValue = response.json().await.unwrap_or(JsonValue::Null);
            let detail = body
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown error")
                .to_string();
            return Err(Error::Upstream(format!("Ollama returned {status}: {detail}")));
        }

        let (tx, rx) = mpsc::channel::<ChatDelta>(64);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = LineBuffer::new();

            'outer: while let Some(chunk) = bytes.next().await {
                if cancel.is_cancelled() {
                    break;
                }
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(error = %e, "Ollama stream read failed");
                        let _ = tx.send(ChatDelta::Error(format!("Stream error: {e}"))).await;
                        return;
                    }
                };

                for line in buffer.push(&chunk) {
                    let (deltas, done) = parse_native_line(&line);
                    for delta in deltas {
                        let is_error = matches!(delta, ChatDelta::Error(_));
                        if tx.send(delta).await.is_err() || is_error {
                            return;
                        }
                    }
                    if done {
                        break 'outer;
                    }
                }
            }

            let _ = tx.send(ChatDelta::Done).await;
        });

        Ok(receiver_stream(rx))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
