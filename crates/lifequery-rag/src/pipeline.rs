//! Chat orchestrator: retrieval, prompt composition, and the streamed
//! answer with citations.
//!
//! Event contract (in order): exactly one `debug`, then `token`s (with
//! optional `reasoning` interleaved), then `citations`, and the gateway's
//! terminal `[DONE]`. On a backend failure a single token carrying
//! `[Error: …]` is emitted and citations are skipped; the stream still
//! terminates cleanly.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};

use lifequery_core::defaults::CHAT_STREAM_TIMEOUT_SECS;
use lifequery_core::settings::current_date;
use lifequery_core::{
    CancelToken, ChatBackend, ChatDelta, ChatEvent, ChatMessage, ChatParams, EmbeddingBackend,
    Error, Settings,
};
use lifequery_db::Database;
use lifequery_inference::create_chat_backend;
use lifequery_vector::VectorStore;

use crate::assemble::{
    build_context, build_messages, build_system_message, no_context_system_message,
    with_thinking_directive,
};
use crate::format::format_citations;
use crate::retrieve::retrieve;

/// Orchestrates one chat turn end-to-end.
#[derive(Clone)]
pub struct ChatOrchestrator {
    db: Database,
    vectors: VectorStore,
    embedder: Arc<dyn EmbeddingBackend>,
}

async fn emit(events: &Sender<ChatEvent>, event: ChatEvent) -> bool {
    events.send(event).await.is_ok()
}

/// Strip inline `<think>` delimiters when thinking output is disabled.
fn strip_think_tags(content: &str) -> String {
    content.replace("<think>", "").replace("</think>", "")
}

impl ChatOrchestrator {
    pub fn new(db: Database, vectors: VectorStore, embedder: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            db,
            vectors,
            embedder,
        }
    }

    /// Run one chat turn, pushing events into `events`. The settings
    /// snapshot (including any per-request overrides) is fixed for the
    /// whole turn.
    pub async fn stream_chat(
        &self,
        history: Vec<ChatMessage>,
        query: String,
        settings: Settings,
        cancel: CancelToken,
        events: Sender<ChatEvent>,
    ) {
        let backend = match create_chat_backend(&settings) {
            Ok(backend) => backend,
            Err(e) => {
                // Compose-and-debug first so the client sees what would
                // have been sent, matching the normal event order.
                let messages =
                    build_messages(no_context_system_message(&settings), &history, &query);
                self.emit_debug(&events, &messages, &settings).await;
                let _ = emit(&events, ChatEvent::Token {
                    content: format!("[Error: {e}]"),
                })
                .await;
                return;
            }
        };
        self.stream_with_backend(backend, history, query, settings, cancel, events)
            .await
    }

    /// Variant taking an explicit backend (used by tests and anywhere the
    /// caller already resolved one).
    pub async fn stream_with_backend(
        &self,
        backend: Arc<dyn ChatBackend>,
        history: Vec<ChatMessage>,
        query: String,
        settings: Settings,
        cancel: CancelToken,
        events: Sender<ChatEvent>,
    ) {
        info!(
            subsystem = "rag",
            op = "stream_chat",
            model = %backend.model_name(),
            rag = settings.enable_rag,
            "Starting chat turn"
        );

        // Step 1: retrieval (degrades to empty on failure).
        let retrieved = if settings.enable_rag {
            match retrieve(&query, &settings, &self.db, &self.vectors, &self.embedder).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!(error = %e, "Retrieval failed; answering without context");
                    vec![]
                }
            }
        } else {
            debug!("RAG disabled in settings; skipping retrieval");
            vec![]
        };

        // Step 2: context assembly and prompt composition.
        let (context_text, used_chunks, _tokens) =
            build_context(retrieved, settings.context_cap);

        let system_message = if context_text.is_empty() {
            no_context_system_message(&settings)
        } else {
            with_thinking_directive(
                &build_system_message(&context_text, &settings.system_prompt_resolved()),
                settings.enable_thinking,
            )
        };
        let messages = build_messages(system_message, &history, &query);

        // Step 3: debug event with the exact outgoing messages.
        if !self.emit_debug(&events, &messages, &settings).await {
            return;
        }

        // Step 4: stream the answer.
        let params = ChatParams {
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            enable_thinking: settings.enable_thinking,
        };
        let mut stream = match backend.stream_chat(messages, &params, cancel.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = emit(&events, ChatEvent::Token {
                    content: format!("[Error: {e}]"),
                })
                .await;
                return;
            }
        };

        let idle_timeout = Duration::from_secs(CHAT_STREAM_TIMEOUT_SECS);
        loop {
            if cancel.is_cancelled() {
                info!("Chat turn cancelled");
                return;
            }

            let delta = match tokio::time::timeout(idle_timeout, stream.next()).await {
                Ok(Some(delta)) => delta,
                Ok(None) => break,
                Err(_) => {
                    let _ = emit(&events, ChatEvent::Token {
                        content: format!(
                            "[Error: {}]",
                            Error::Upstream("stream idle timeout exceeded".to_string())
                        ),
                    })
                    .await;
                    return;
                }
            };

            match delta {
                ChatDelta::Token(content) => {
                    let content = if settings.enable_thinking {
                        content
                    } else {
                        strip_think_tags(&content)
                    };
                    if !content.is_empty()
                        && !emit(&events, ChatEvent::Token { content }).await
                    {
                        return;
                    }
                }
                ChatDelta::Reasoning(content) => {
                    if settings.enable_thinking
                        && !emit(&events, ChatEvent::Reasoning { content }).await
                    {
                        return;
                    }
                }
                ChatDelta::Done => break,
                ChatDelta::Error(message) => {
                    warn!(error = %message, "Chat backend stream failed");
                    let _ = emit(&events, ChatEvent::Token {
                        content: format!("[Error: {message}]"),
                    })
                    .await;
                    return;
                }
            }
        }

        // Step 5: citations, after the last token.
        let citations = format_citations(&used_chunks);
        info!(
            subsystem = "rag",
            op = "stream_chat",
            result_count = citations.len(),
            "Chat turn complete"
        );
        let _ = emit(&events, ChatEvent::Citations { citations }).await;
    }

    async fn emit_debug(
        &self,
        events: &Sender<ChatEvent>,
        messages: &[ChatMessage],
        settings: &Settings,
    ) -> bool {
        emit(
            events,
            ChatEvent::Debug {
                messages: messages.to_vec(),
                user_name: settings.user_name(),
                current_date: current_date(),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_think_tags() {
        assert_eq!(strip_think_tags("a<think>b</think>c"), "abc");
        assert_eq!(strip_think_tags("plain"), "plain");
    }
}
