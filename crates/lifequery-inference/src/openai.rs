//! OpenAI-compatible streaming chat backend.
//!
//! Parametric on base URL and key, this adapter covers every provider that
//! speaks the `/chat/completions` SSE protocol (OpenAI, OpenRouter, custom
//! gateways). Reasoning deltas are surfaced whichever field name the
//! provider uses.

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

use crate::streaming::{parse_sse_line, receiver_stream, LineBuffer};

const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: i64,
    stream: bool,
}

/// Streaming chat backend for OpenAI-compatible endpoints.
pub struct OpenAiChatBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChatBackend {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAiChatBackend {
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        params: &ChatParams,
        cancel: CancelToken,
    ) -> Result<ChatStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: &messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream: true,
        };

        debug!(
            subsystem = "inference",
            component = "openai",
            model = %self.model,
            message_count = messages.len(),
            "Starting chat completion stream"
        );

        let mut builder = self.client.post(&url).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = builder.send().await.map_err(Error::from)?;

        if !response.status().is_success() {
            let status = response.status();
            let body: JsonValue = response.json().await.unwrap_or(JsonValue::Null);
            let detail = body
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            return Err(Error::Upstream(format!(
                "Chat endpoint returned {status}: {detail}"
            )));
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
                        warn!(error = %e, "Chat completion stream read failed");
                        let _ = tx.send(ChatDelta::Error(format!("Stream error: {e}"))).await;
                        return;
                    }
                };

                for line in buffer.push(&chunk) {
                    match parse_sse_line(&line) {
                        Some(deltas) => {
                            for delta in deltas {
                                let is_error = matches!(delta, ChatDelta::Error(_));
                                if tx.send(delta).await.is_err() || is_error {
                                    return;
                                }
                            }
                        }
                        None if line.starts_with("data:") => break 'outer, // [DONE]
                        None => {}
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
