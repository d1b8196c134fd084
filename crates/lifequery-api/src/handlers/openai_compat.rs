//! OpenAI-compatible surface (`/v1/chat/completions`, `/v1/completions`,
//! `/v1/models`).
//!
//! Reuses the same orchestrator path as `/api/chat`, translating between
//! the external schema and the internal event stream. Citations ride along
//! in an `x_citations` side field.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use lifequery_core::{now_ts, CancelToken, ChatEvent, Citation, Error, Settings};

use crate::error::ApiResult;
use crate::handlers::chat::{split_conversation, IncomingChatMessage};
use crate::sse::{sse_response, value_stream};
use crate::state::AppState;

/// The virtual model id reported by this server.
const MODEL_ID: &str = "lifequery";

#[derive(Debug, Deserialize)]
pub struct OpenAiChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<IncomingChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub rag: Option<bool>,
    #[serde(default)]
    pub thinking: Option<bool>,
    #[serde(default)]
    pub enable_thinking: Option<bool>,
}

#[derive(Debug, Serialize)]
struct Usage {
    prompt_tokens: i64,
    completion_tokens: i64,
    total_tokens: i64,
}

fn generate_chat_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("chatcmpl-{}-{}", now_ts(), &suffix[..8])
}

/// Apply per-request overrides (explicit fields plus model-name hints) to
/// a settings snapshot.
fn apply_overrides(mut settings: Settings, request: &OpenAiChatRequest) -> Settings {
    if let Some(temperature) = request.temperature {
        settings.temperature = temperature;
    }
    if let Some(max_tokens) = request.max_tokens {
        settings.max_tokens = max_tokens;
    }

    let rag = request.rag.or_else(|| {
        request.model.as_deref().and_then(|model| {
            let model = model.to_lowercase();
            if model.contains("norag") || model.contains("regular") || model.contains("chat") {
                Some(false)
            } else if model.contains("rag") || model.contains("memory") {
                Some(true)
            } else {
                None
            }
        })
    });
    if let Some(rag) = rag {
        settings.enable_rag = rag;
    }

    if let Some(thinking) = request.enable_thinking.or(request.thinking) {
        settings.enable_thinking = thinking;
    }
    settings
}

fn stream_chunk(chat_id: &str, content: &str) -> JsonValue {
    json!({
        "id": chat_id,
        "object": "chat.completion.chunk",
        "model": MODEL_ID,
        "choices": [{
            "index": 0,
            "delta": { "content": content },
            "finish_reason": JsonValue::Null,
        }],
    })
}

fn final_chunk(chat_id: &str, citations: &[Citation]) -> JsonValue {
    json!({
        "id": chat_id,
        "object": "chat.completion.chunk",
        "model": MODEL_ID,
        "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }],
        "x_citations": citations,
    })
}

/// `POST /v1/chat/completions`
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<OpenAiChatRequest>,
) -> ApiResult<Response> {
    let (history, query) =
        split_conversation(&request.messages).map_err(Error::InvalidInput)?;
    let settings = apply_overrides(state.settings().await, &request);
    let chat_id = generate_chat_id();
    info!(
        subsystem = "api",
        op = "openai_chat",
        stream = request.stream,
        rag = settings.enable_rag,
        "OpenAI-compatible chat request"
    );

    let orchestrator = state.orchestrator.clone();
    let (etx, mut erx) = mpsc::channel::<ChatEvent>(256);
    let query_for_usage = query.clone();
    tokio::spawn(async move {
        orchestrator
            .stream_chat(history, query, settings, CancelToken::new(), etx)
            .await;
    });

    if request.stream {
        let (vtx, vrx) = mpsc::channel::<JsonValue>(256);
        tokio::spawn(async move {
            let mut citations: Vec<Citation> = vec![];
            while let Some(event) = erx.recv().await {
                match event {
                    ChatEvent::Token { content } => {
                        if vtx.send(stream_chunk(&chat_id, &content)).await.is_err() {
                            return;
                        }
                    }
                    ChatEvent::Citations { citations: c } => citations = c,
                    // Debug and reasoning events are internal-surface only.
                    _ => {}
                }
            }
            let _ = vtx.send(final_chunk(&chat_id, &citations)).await;
        });
        return Ok(sse_response(value_stream(vrx)));
    }

    // Non-streaming: collect the whole answer.
    let mut content = String::new();
    let mut citations: Vec<Citation> = vec![];
    while let Some(event) = erx.recv().await {
        match event {
            ChatEvent::Token { content: c } => content.push_str(&c),
            ChatEvent::Citations { citations: c } => citations = c,
            _ => {}
        }
    }

    let prompt_tokens = lifequery_core::estimate_tokens(&query_for_usage);
    let completion_tokens = lifequery_core::estimate_tokens(&content);
    let response = json!({
        "id": chat_id,
        "object": "chat.completion",
        "created": now_ts(),
        "model": MODEL_ID,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
        "usage": Usage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
        "x_citations": if citations.is_empty() { JsonValue::Null } else { json!(citations) },
    });
    Ok(Json(response).into_response())
}

/// `POST /v1/completions` — legacy shim. Accepts either `messages` or the
/// old `prompt` field and forwards to the chat path.
pub async fn legacy_completions(
    State(state): State<AppState>,
    Json(body): Json<JsonValue>,
) -> ApiResult<Response> {
    let messages: Vec<IncomingChatMessage> = match body.get("messages") {
        Some(messages) => serde_json::from_value(messages.clone())
            .map_err(|e| Error::InvalidInput(format!("Invalid messages: {e}")))?,
        None => {
            let prompt = match body.get("prompt") {
                Some(JsonValue::String(s)) => s.clone(),
                Some(JsonValue::Array(parts)) => parts
                    .iter()
                    .map(|p| p.as_str().map(str::to_string).unwrap_or_else(|| p.to_string()))
                    .collect::<Vec<_>>()
                    .join(" "),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            vec![IncomingChatMessage {
                role: "user".to_string(),
                content: prompt,
            }]
        }
    };

    let request = OpenAiChatRequest {
        model: body.get("model").and_then(|m| m.as_str()).map(String::from),
        messages,
        stream: body.get("stream").and_then(|s| s.as_bool()).unwrap_or(false),
        temperature: body.get("temperature").and_then(|t| t.as_f64()),
        max_tokens: body.get("max_tokens").and_then(|t| t.as_i64()),
        rag: body.get("rag").and_then(|r| r.as_bool()),
        thinking: None,
        enable_thinking: None,
    };
    chat_completions(State(state), Json(request)).await
}

/// `GET /v1/models` — the virtual models this server serves. The
/// `-memory` / `-chat` variants force RAG on and off respectively.
pub async fn list_models() -> Json<JsonValue> {
    let created = now_ts();
    let entry = |id: &str| {
        json!({ "id": id, "object": "model", "created": created, "owned_by": MODEL_ID })
    };
    Json(json!({
        "object": "list",
        "data": [entry("lifequery"), entry("lifequery-memory"), entry("lifequery-chat")],
    }))
}
