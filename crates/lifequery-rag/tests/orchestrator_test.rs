//! Chat orchestrator event-order and degradation tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use lifequery_core::{
    CancelToken, ChatBackend, ChatDelta, ChatEvent, ChatMessage, ChatParams, ChatStream,
    EmbeddingBackend, Error, Result, Settings, VectorRecord,
};
use lifequery_db::Database;
use lifequery_rag::ChatOrchestrator;
use lifequery_vector::{Collection, VectorStore};

struct MockEmbedder;

#[async_trait]
impl EmbeddingBackend for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
    async fn model_exists(&self, _model: &str) -> Result<bool> {
        Ok(true)
    }
    fn model_name(&self) -> String {
        "test-model".to_string()
    }
}

/// Embedder that always fails, to exercise graceful degradation.
struct BrokenEmbedder;

#[async_trait]
impl EmbeddingBackend for BrokenEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::Upstream("embedding endpoint down".to_string()))
    }
    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }
    async fn model_exists(&self, _model: &str) -> Result<bool> {
        Ok(false)
    }
    fn model_name(&self) -> String {
        "broken".to_string()
    }
}

/// Scripted chat backend yielding a fixed delta sequence.
struct ScriptedBackend {
    deltas: Vec<ChatDelta>,
    fail_on_start: Option<String>,
}

impl ScriptedBackend {
    fn ok(deltas: Vec<ChatDelta>) -> Self {
        Self {
            deltas,
            fail_on_start: None,
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            deltas: vec![],
            fail_on_start: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn stream_chat(
        &self,
        _messages: Vec<ChatMessage>,
        _params: &ChatParams,
        _cancel: CancelToken,
    ) -> Result<ChatStream> {
        if let Some(message) = &self.fail_on_start {
            return Err(Error::Upstream(message.clone()));
        }
        let deltas = self.deltas.clone();
        Ok(Box::pin(futures::stream::iter(deltas)))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

fn record(chunk_id: &str, chat_id: &str, start: i64, embedding: Vec<f32>) -> VectorRecord {
    VectorRecord {
        chunk_id: chunk_id.to_string(),
        chat_id: chat_id.to_string(),
        chat_name: Some(format!("Chat {chat_id}")),
        participants: vec!["Alice".to_string()],
        timestamp_start: start,
        timestamp_end: start + 60,
        message_count: 1,
        content: format!("content of {chunk_id}"),
        content_hash: format!("hash-{chunk_id}"),
        embedding_version: "test-model".to_string(),
        embedding,
    }
}

async fn fixture() -> (ChatOrchestrator, Database, VectorStore) {
    let db = Database::connect_memory().await.unwrap();
    let vectors = VectorStore::open_memory().await.unwrap();
    let orchestrator =
        ChatOrchestrator::new(db.clone(), vectors.clone(), Arc::new(MockEmbedder));
    (orchestrator, db, vectors)
}

async fn collect_events(
    orchestrator: &ChatOrchestrator,
    backend: Arc<dyn ChatBackend>,
    settings: Settings,
    query: &str,
) -> Vec<ChatEvent> {
    let (tx, mut rx) = mpsc::channel(256);
    orchestrator
        .stream_with_backend(
            backend,
            vec![],
            query.to_string(),
            settings,
            CancelToken::new(),
            tx,
        )
        .await;

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn kinds(events: &[ChatEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|e| match e {
            ChatEvent::Debug { .. } => "debug",
            ChatEvent::Token { .. } => "token",
            ChatEvent::Reasoning { .. } => "reasoning",
            ChatEvent::Citations { .. } => "citations",
            ChatEvent::Error { .. } => "error",
        })
        .collect()
}

#[tokio::test]
async fn successful_turn_orders_debug_tokens_citations() {
    let (orchestrator, db, vectors) = fixture().await;
    db.chats.upsert("a", "Chat a", "private", 1, 60).await.unwrap();
    vectors
        .upsert(&[record("c1", "a", 0, vec![1.0, 0.0])], Collection::Live)
        .await
        .unwrap();

    let backend = Arc::new(ScriptedBackend::ok(vec![
        ChatDelta::Token("Hello".to_string()),
        ChatDelta::Token(" world".to_string()),
        ChatDelta::Done,
    ]));
    let events = collect_events(&orchestrator, backend, Settings::default(), "hello?").await;

    assert_eq!(kinds(&events), vec!["debug", "token", "token", "citations"]);
    match &events[3] {
        ChatEvent::Citations { citations } => {
            assert_eq!(citations.len(), 1);
            assert_eq!(citations[0].chat_name, "Chat a");
        }
        other => panic!("expected citations, got {other:?}"),
    }
}

#[tokio::test]
async fn debug_event_carries_outgoing_messages() {
    let (orchestrator, db, vectors) = fixture().await;
    db.chats.upsert("a", "Chat a", "private", 1, 60).await.unwrap();
    vectors
        .upsert(&[record("c1", "a", 0, vec![1.0, 0.0])], Collection::Live)
        .await
        .unwrap();

    let backend = Arc::new(ScriptedBackend::ok(vec![ChatDelta::Done]));
    let mut settings = Settings::default();
    settings.user_first_name = "Ada".to_string();
    let events = collect_events(&orchestrator, backend, settings, "what happened?").await;

    match &events[0] {
        ChatEvent::Debug {
            messages,
            user_name,
            ..
        } => {
            assert_eq!(user_name, "Ada");
            // System prompt first, latest user query last.
            assert!(messages[0].content.contains("content of c1"));
            assert_eq!(messages.last().unwrap().content, "what happened?");
        }
        other => panic!("expected debug, got {other:?}"),
    }
}

#[tokio::test]
async fn backend_error_emits_error_token_and_no_citations() {
    let (orchestrator, _db, _vectors) = fixture().await;
    let backend = Arc::new(ScriptedBackend::failing("401 Unauthorized"));
    let events = collect_events(&orchestrator, backend, Settings::default(), "hi").await;

    assert_eq!(kinds(&events), vec!["debug", "token"]);
    match &events[1] {
        ChatEvent::Token { content } => {
            assert!(content.starts_with("[Error:"));
            assert!(content.contains("401"));
        }
        other => panic!("expected error token, got {other:?}"),
    }
}

#[tokio::test]
async fn mid_stream_error_stops_without_citations() {
    let (orchestrator, _db, _vectors) = fixture().await;
    let backend = Arc::new(ScriptedBackend::ok(vec![
        ChatDelta::Token("partial".to_string()),
        ChatDelta::Error("connection reset".to_string()),
    ]));
    let events = collect_events(&orchestrator, backend, Settings::default(), "hi").await;

    assert_eq!(kinds(&events), vec!["debug", "token", "token"]);
    match &events[2] {
        ChatEvent::Token { content } => assert!(content.contains("[Error: connection reset]")),
        other => panic!("expected error token, got {other:?}"),
    }
}

#[tokio::test]
async fn excluded_chats_never_surface_in_citations() {
    let (orchestrator, db, vectors) = fixture().await;
    db.chats.upsert("a", "Chat a", "private", 1, 60).await.unwrap();
    db.chats.upsert("b", "Chat b", "private", 1, 60).await.unwrap();
    db.chats.set_included("b", false).await.unwrap();
    vectors
        .upsert(
            &[
                record("keep", "a", 0, vec![0.5, 0.5]),
                // The excluded chat's record matches the query exactly.
                record("hidden", "b", 0, vec![1.0, 0.0]),
            ],
            Collection::Live,
        )
        .await
        .unwrap();

    let backend = Arc::new(ScriptedBackend::ok(vec![ChatDelta::Done]));
    let events = collect_events(&orchestrator, backend, Settings::default(), "query").await;

    match events.last().unwrap() {
        ChatEvent::Citations { citations } => {
            assert_eq!(citations.len(), 1);
            assert_eq!(citations[0].chat_name, "Chat a");
        }
        other => panic!("expected citations, got {other:?}"),
    }
}

#[tokio::test]
async fn rag_disabled_yields_empty_citations() {
    let (orchestrator, db, vectors) = fixture().await;
    db.chats.upsert("a", "Chat a", "private", 1, 60).await.unwrap();
    vectors
        .upsert(&[record("c1", "a", 0, vec![1.0, 0.0])], Collection::Live)
        .await
        .unwrap();

    let mut settings = Settings::default();
    settings.enable_rag = false;
    let backend = Arc::new(ScriptedBackend::ok(vec![
        ChatDelta::Token("answer".to_string()),
        ChatDelta::Done,
    ]));
    let events = collect_events(&orchestrator, backend, settings, "query").await;

    match events.last().unwrap() {
        ChatEvent::Citations { citations } => assert!(citations.is_empty()),
        other => panic!("expected citations, got {other:?}"),
    }
}

#[tokio::test]
async fn retrieval_failure_degrades_to_no_context() {
    let db = Database::connect_memory().await.unwrap();
    let vectors = VectorStore::open_memory().await.unwrap();
    db.chats.upsert("a", "Chat a", "private", 1, 60).await.unwrap();
    let orchestrator =
        ChatOrchestrator::new(db.clone(), vectors.clone(), Arc::new(BrokenEmbedder));

    let backend = Arc::new(ScriptedBackend::ok(vec![
        ChatDelta::Token("fallback answer".to_string()),
        ChatDelta::Done,
    ]));
    let (tx, mut rx) = mpsc::channel(64);
    orchestrator
        .stream_with_backend(
            backend,
            vec![],
            "query".to_string(),
            Settings::default(),
            CancelToken::new(),
            tx,
        )
        .await;

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert_eq!(kinds(&events), vec!["debug", "token", "citations"]);
    match events.last().unwrap() {
        ChatEvent::Citations { citations } => assert!(citations.is_empty()),
        other => panic!("expected citations, got {other:?}"),
    }
}

#[tokio::test]
async fn reasoning_deltas_follow_thinking_setting() {
    let (orchestrator, _db, _vectors) = fixture().await;
    let deltas = vec![
        ChatDelta::Reasoning("pondering".to_string()),
        ChatDelta::Token("answer".to_string()),
        ChatDelta::Done,
    ];

    // Disabled: reasoning is discarded.
    let backend = Arc::new(ScriptedBackend::ok(deltas.clone()));
    let events = collect_events(&orchestrator, backend, Settings::default(), "hi").await;
    assert_eq!(kinds(&events), vec!["debug", "token", "citations"]);

    // Enabled: reasoning is surfaced as its own event kind.
    let mut settings = Settings::default();
    settings.enable_thinking = true;
    let backend = Arc::new(ScriptedBackend::ok(deltas));
    let events = collect_events(&orchestrator, backend, settings, "hi").await;
    assert_eq!(kinds(&events), vec!["debug", "reasoning", "token", "citations"]);
}

#[tokio::test]
async fn inline_think_tags_stripped_when_thinking_disabled() {
    let (orchestrator, _db, _vectors) = fixture().await;
    let backend = Arc::new(ScriptedBackend::ok(vec![
        ChatDelta::Token("<think>secret</think>visible".to_string()),
        ChatDelta::Done,
    ]));
    let events = collect_events(&orchestrator, backend, Settings::default(), "hi").await;
    match &events[1] {
        ChatEvent::Token { content } => assert_eq!(content, "secretvisible"),
        other => panic!("expected token, got {other:?}"),
    }
}
