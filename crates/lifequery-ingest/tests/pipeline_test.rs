//! End-to-end pipeline tests against an in-memory source and a
//! deterministic mock embedder.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use lifequery_core::{
    CancelToken, EmbeddingBackend, IncomingMessage, MessageSource, PipelineEvent, Result, Settings,
    SourceChat, SourceStatus,
};
use lifequery_db::Database;
use lifequery_ingest::IngestPipeline;
use lifequery_vector::{Collection, QueryFilter, VectorStore};

/// Deterministic embedder: maps text to a tiny vector derived from its
/// bytes, so identical text always lands on the same point.
struct MockEmbedder;

#[async_trait]
impl EmbeddingBackend for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let sum: u32 = t.bytes().map(|b| b as u32).sum();
                vec![
                    (sum % 101) as f32 / 101.0,
                    (t.len() % 97) as f32 / 97.0,
                    1.0,
                ]
            })
            .collect())
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

/// In-memory message source with optional cancellation after N fetches.
struct StaticSource {
    chats: Vec<SourceChat>,
    messages: HashMap<String, Vec<IncomingMessage>>,
    fetches: AtomicUsize,
    cancel_after: Option<(usize, CancelToken)>,
}

impl StaticSource {
    fn new(chats: Vec<SourceChat>, messages: HashMap<String, Vec<IncomingMessage>>) -> Self {
        Self {
            chats,
            messages,
            fetches: AtomicUsize::new(0),
            cancel_after: None,
        }
    }

    fn with_cancel_after(mut self, fetches: usize, token: CancelToken) -> Self {
        self.cancel_after = Some((fetches, token));
        self
    }
}

#[async_trait]
impl MessageSource for StaticSource {
    async fn status(&self) -> Result<SourceStatus> {
        Ok(SourceStatus::state("connected"))
    }

    async fn start_auth(&self, _phone: &str) -> Result<SourceStatus> {
        Ok(SourceStatus::state("phone_sent"))
    }

    async fn verify_auth(
        &self,
        _token: &str,
        _code: Option<&str>,
        _password: Option<&str>,
    ) -> Result<SourceStatus> {
        Ok(SourceStatus::state("connected"))
    }

    async fn disconnect(&self) -> Result<SourceStatus> {
        Ok(SourceStatus::state("needs_auth"))
    }

    async fn list_chats(&self) -> Result<Vec<SourceChat>> {
        Ok(self.chats.clone())
    }

    async fn fetch_messages(
        &self,
        chat_id: &str,
        after_message_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<IncomingMessage>> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if n >= *after {
                token.cancel();
            }
        }

        let after = after_message_id.unwrap_or(0);
        Ok(self
            .messages
            .get(chat_id)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| m.message_id.parse::<i64>().unwrap_or(0) > after)
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn source_chat(id: &str, name: &str) -> SourceChat {
    SourceChat {
        chat_id: id.to_string(),
        chat_name: name.to_string(),
        chat_type: "private".to_string(),
    }
}

fn incoming(chat_id: &str, id: i64, ts: i64, text: &str) -> IncomingMessage {
    IncomingMessage {
        message_id: id.to_string(),
        chat_id: chat_id.to_string(),
        chat_name: format!("Chat {chat_id}"),
        sender_id: "7".to_string(),
        sender_name: "Alice".to_string(),
        text: text.to_string(),
        timestamp: ts,
    }
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.embedding_model = "test-model".to_string();
    settings.telegram_fetch_wait = 0;
    settings
}

async fn pipeline_with(
    source: StaticSource,
) -> (IngestPipeline, Database, VectorStore) {
    let db = Database::connect_memory().await.unwrap();
    let vectors = VectorStore::open_memory().await.unwrap();
    let pipeline = IngestPipeline::new(
        db.clone(),
        vectors.clone(),
        Arc::new(MockEmbedder),
        Arc::new(source),
    );
    (pipeline, db, vectors)
}

fn progress() -> (
    mpsc::Sender<PipelineEvent>,
    mpsc::Receiver<PipelineEvent>,
) {
    mpsc::channel(1024)
}

#[tokio::test]
async fn clean_ingest_produces_chunk_and_vector() {
    let source = StaticSource::new(
        vec![source_chat("a", "Chat a")],
        HashMap::from([(
            "a".to_string(),
            vec![incoming("a", 1, 0, "hi"), incoming("a", 2, 60, "how are you")],
        )]),
    );
    let (pipeline, db, vectors) = pipeline_with(source).await;
    let (tx, _rx) = progress();

    let counts = pipeline
        .sync(&settings(), CancelToken::new(), tx)
        .await
        .unwrap();

    assert_eq!(counts.messages_added, 2);
    assert_eq!(counts.chunks_created, 1);
    assert_eq!(counts.chunks_embedded, 1);
    assert!(!counts.cancelled);

    let stats = db.stats().await.unwrap();
    assert_eq!(stats.message_count, 2);
    assert_eq!(stats.chunk_count, 1);
    assert_eq!(stats.embedded_count, 1);
    assert_eq!(vectors.count(Collection::Live).await.unwrap(), 1);
}

#[tokio::test]
async fn double_sync_is_idempotent() {
    let messages = HashMap::from([(
        "a".to_string(),
        vec![incoming("a", 1, 0, "hi"), incoming("a", 2, 60, "how are you")],
    )]);
    let source = StaticSource::new(vec![source_chat("a", "Chat a")], messages.clone());
    let (pipeline, db, _vectors) = pipeline_with(source).await;

    let (tx, _rx) = progress();
    pipeline.sync(&settings(), CancelToken::new(), tx).await.unwrap();

    let (tx, _rx) = progress();
    let second = pipeline
        .sync(&settings(), CancelToken::new(), tx)
        .await
        .unwrap();

    assert_eq!(second.messages_added, 0);
    assert_eq!(second.chunks_created, 0);
    let stats = db.stats().await.unwrap();
    assert_eq!(stats.message_count, 2);
    assert_eq!(stats.chunk_count, 1);
}

#[tokio::test]
async fn gap_break_produces_two_chunks() {
    let source = StaticSource::new(
        vec![source_chat("a", "Chat a")],
        HashMap::from([(
            "a".to_string(),
            vec![
                incoming("a", 1, 0, "morning"),
                incoming("a", 2, 5 * 3600, "evening"),
            ],
        )]),
    );
    let (pipeline, db, _vectors) = pipeline_with(source).await;
    let (tx, _rx) = progress();

    let counts = pipeline
        .sync(&settings(), CancelToken::new(), tx)
        .await
        .unwrap();
    assert_eq!(counts.chunks_created, 2);

    let chunks = db.chunks.list_all().await.unwrap();
    assert_eq!(chunks[0].timestamp_start, 0);
    assert_eq!(chunks[1].timestamp_start, 5 * 3600);
}

#[tokio::test]
async fn cancelled_sync_keeps_committed_messages() {
    let cancel = CancelToken::new();
    let messages: Vec<IncomingMessage> = (1..=1000)
        .map(|i| incoming("a", i, i * 60, &format!("message number {i}")))
        .collect();
    let mut settings = settings();
    settings.telegram_fetch_batch = 50;

    let source = StaticSource::new(
        vec![source_chat("a", "Chat a")],
        HashMap::from([("a".to_string(), messages)]),
    )
    .with_cancel_after(2, cancel.clone());
    let (pipeline, db, _vectors) = pipeline_with(source).await;
    let (tx, _rx) = progress();

    let counts = pipeline.sync(&settings, cancel, tx).await.unwrap();
    assert!(counts.cancelled);
    // Both fetched batches committed before the cancel took effect.
    assert_eq!(counts.messages_added, 100);
    assert_eq!(db.messages.count().await.unwrap(), 100);
    // Later stages were skipped.
    assert_eq!(counts.chunks_created, 0);
}

#[tokio::test]
async fn excluded_chats_are_not_synced() {
    let source = StaticSource::new(
        vec![source_chat("a", "Chat a"), source_chat("b", "Chat b")],
        HashMap::from([
            ("a".to_string(), vec![incoming("a", 1, 0, "keep me")]),
            ("b".to_string(), vec![incoming("b", 1, 0, "skip me")]),
        ]),
    );
    let (pipeline, db, _vectors) = pipeline_with(source).await;
    db.chats.upsert("b", "Chat b", "private", 0, 0).await.unwrap();
    db.chats.set_included("b", false).await.unwrap();

    let (tx, _rx) = progress();
    let counts = pipeline
        .sync(&settings(), CancelToken::new(), tx)
        .await
        .unwrap();
    assert_eq!(counts.messages_added, 1);
    assert_eq!(db.messages.count_for_chat("b").await.unwrap(), 0);
}

#[tokio::test]
async fn reindex_rebuilds_live_collection() {
    let source = StaticSource::new(
        vec![source_chat("a", "Chat a")],
        HashMap::from([(
            "a".to_string(),
            vec![
                incoming("a", 1, 0, "first conversation"),
                incoming("a", 2, 6 * 3600, "second conversation"),
            ],
        )]),
    );
    let (pipeline, db, vectors) = pipeline_with(source).await;
    let (tx, _rx) = progress();
    pipeline.sync(&settings(), CancelToken::new(), tx).await.unwrap();

    let chunk_count = db.chunks.count().await.unwrap();
    assert_eq!(chunk_count, 2);

    let (tx, _rx) = progress();
    let counts = pipeline
        .reindex(&settings(), CancelToken::new(), tx)
        .await
        .unwrap();
    assert_eq!(counts.chunks_embedded, chunk_count);

    // Exactly one vector per chunk in the live collection.
    assert_eq!(vectors.count(Collection::Live).await.unwrap(), chunk_count);
    let hits = vectors
        .query(&[0.5, 0.5, 1.0], 10, &QueryFilter::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), chunk_count as usize);
}

#[tokio::test]
async fn delete_chat_then_resync_restores_identical_chunks() {
    let messages = HashMap::from([(
        "a".to_string(),
        vec![incoming("a", 1, 0, "hi"), incoming("a", 2, 60, "how are you")],
    )]);
    let source = StaticSource::new(vec![source_chat("a", "Chat a")], messages.clone());
    let (pipeline, db, vectors) = pipeline_with(source).await;

    let (tx, _rx) = progress();
    pipeline.sync(&settings(), CancelToken::new(), tx).await.unwrap();
    let original_hashes: Vec<String> = db
        .chunks
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.content_hash)
        .collect();

    let deletion = db.delete_chat("a").await.unwrap();
    vectors.delete(&deletion.chunk_ids).await.unwrap();
    // The source chat was re-included for the next sync.
    db.chats.upsert("a", "Chat a", "private", 0, 0).await.unwrap();
    db.chats.set_included("a", true).await.unwrap();

    let (tx, _rx) = progress();
    pipeline.sync(&settings(), CancelToken::new(), tx).await.unwrap();
    let restored_hashes: Vec<String> = db
        .chunks
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.content_hash)
        .collect();
    assert_eq!(original_hashes, restored_hashes);
}

#[tokio::test]
async fn import_persists_messages_and_chat() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("export.json");
    std::fs::write(
        &path,
        r#"{
            "id": 99, "name": "Saved Messages",
            "messages": [
                {"type": "message", "id": 1, "date": "2024-01-01T00:00:00",
                 "from": "Ada", "from_id": "user1", "text": "note to self"},
                {"type": "service", "id": 2, "text": ""}
            ]
        }"#,
    )
    .unwrap();

    let source = StaticSource::new(vec![], HashMap::new());
    let (pipeline, db, _vectors) = pipeline_with(source).await;
    let (tx, _rx) = progress();

    let counts = pipeline
        .import(&path, None, CancelToken::new(), tx)
        .await
        .unwrap();
    assert_eq!(counts.messages_added, 1);
    assert_eq!(counts.skipped_empty, 1);

    let chat = db.chats.get("99").await.unwrap().expect("chat created");
    assert_eq!(chat.chat_name.as_deref(), Some("Saved Messages"));
    assert_eq!(chat.message_count, 1);

    // Process picks the imported messages up.
    let (tx, _rx) = progress();
    let processed = pipeline
        .process(&settings(), CancelToken::new(), tx)
        .await
        .unwrap();
    assert_eq!(processed.chunks_created, 1);
    assert_eq!(processed.chunks_embedded, 1);
}

#[tokio::test]
async fn model_switch_wipes_and_reembeds() {
    let source = StaticSource::new(
        vec![source_chat("a", "Chat a")],
        HashMap::from([("a".to_string(), vec![incoming("a", 1, 0, "hello there")])]),
    );
    let (pipeline, db, vectors) = pipeline_with(source).await;
    let (tx, _rx) = progress();
    pipeline.sync(&settings(), CancelToken::new(), tx).await.unwrap();
    assert_eq!(vectors.count(Collection::Live).await.unwrap(), 1);

    let mut switched = settings();
    switched.embedding_model = "other-model".to_string();
    let (tx, _rx) = progress();
    let counts = pipeline
        .process(&switched, CancelToken::new(), tx)
        .await
        .unwrap();

    // Everything was re-embedded under the new model.
    assert_eq!(counts.chunks_embedded, 1);
    let fingerprints = vectors.stored_fingerprints().await.unwrap();
    assert!(fingerprints.values().all(|(_, v)| v == "other-model"));
    assert_eq!(db.chunks.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn chat_list_refresh_counts_new_and_removed() {
    let source = StaticSource::new(vec![source_chat("a", "Chat a")], HashMap::new());
    let (pipeline, db, _vectors) = pipeline_with(source).await;
    // A stale chat with no messages should be removed.
    db.chats.upsert("ghost", "Ghost", "private", 0, 0).await.unwrap();

    let (tx, _rx) = progress();
    let outcome = pipeline.sync_chat_list(tx).await.unwrap();
    assert_eq!(outcome.new, 1);
    assert_eq!(outcome.removed, 1);
    assert!(db.chats.get("a").await.unwrap().is_some());
    assert!(db.chats.get("ghost").await.unwrap().is_none());
}
