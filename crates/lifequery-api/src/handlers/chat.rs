//! The `/api/chat` streaming endpoint.

use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::info;

use lifequery_core::{CancelToken, ChatMessage, ChatRole};

use crate::sse::{error_payload, sse_response, value_stream};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<IncomingChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct IncomingChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

/// Validate the conversation and split it into history plus the query
/// (the last message, which must be from the user and non-empty).
pub fn split_conversation(
    messages: &[IncomingChatMessage],
) -> Result<(Vec<ChatMessage>, String), String> {
    let Some(last) = messages.last() else {
        return Err("No messages provided".to_string());
    };
    if last.role != "user" {
        return Err("Last message must be from user".to_string());
    }
    if last.content.trim().is_empty() {
        return Err("Query cannot be empty".to_string());
    }

    let history = messages[..messages.len() - 1]
        .iter()
        .filter_map(|m| {
            let role = match m.role.as_str() {
                "system" => ChatRole::System,
                "user" => ChatRole::User,
                "assistant" => ChatRole::Assistant,
                _ => return None,
            };
            Some(ChatMessage {
                role,
                content: m.content.clone(),
            })
        })
        .collect();
    Ok((history, last.content.clone()))
}

/// `POST /api/chat` — answer over the memory corpus, streamed as SSE.
///
/// Errors are delivered as SSE events rather than HTTP status codes; the
/// stream always ends with `[DONE]`.
pub async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    let (vtx, vrx) = mpsc::channel::<JsonValue>(256);

    match split_conversation(&request.messages) {
        Ok((history, query)) => {
            info!(
                subsystem = "api",
                op = "chat",
                message_count = request.messages.len(),
                "Chat request received"
            );
            let orchestrator = state.orchestrator.clone();
            let settings = state.settings().await;
            tokio::spawn(async move {
                let (etx, mut erx) = mpsc::channel(256);
                let stream_task = tokio::spawn(async move {
                    orchestrator
                        .stream_chat(history, query, settings, CancelToken::new(), etx)
                        .await;
                });
                while let Some(event) = erx.recv().await {
                    let value = serde_json::to_value(&event).unwrap_or_default();
                    if vtx.send(value).await.is_err() {
                        // Client went away; stop reading so the
                        // orchestrator's sends fail and it unwinds.
                        break;
                    }
                }
                let _ = stream_task.await;
            });
        }
        Err(message) => {
            tokio::spawn(async move {
                let _ = vtx.send(error_payload(&message)).await;
            });
        }
    }

    sse_response(value_stream(vrx))
}
