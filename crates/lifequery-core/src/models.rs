//! Domain models for LifeQuery.
//!
//! Plain data types mirroring the persisted rows plus the event types that
//! flow through the ingest and chat pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single archived message. `(chat_id, message_id)` is the natural key;
/// rows are never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub chat_id: String,
    pub chat_name: Option<String>,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub text: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Where this message came from ("source_sync", "json_import").
    pub source: String,
}

/// A message arriving from a [`crate::MessageSource`] or an import file,
/// before persistence.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub message_id: String,
    pub chat_id: String,
    pub chat_name: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub timestamp: i64,
}

/// A time-window-grouped block of messages — the unit of embedding and
/// retrieval. Identity is content-derived: identical inputs produce the
/// same `chunk_id`/`content_hash`, which makes repeat ingest idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub chat_id: String,
    pub chat_name: Option<String>,
    pub participants: Vec<String>,
    pub timestamp_start: i64,
    pub timestamp_end: i64,
    pub message_count: i64,
    pub content: String,
    pub content_hash: String,
    /// Embedding model this chunk was (or will be) embedded with.
    pub embedding_version: String,
    /// Set when the chunk's vector has been persisted; None = pending.
    pub embedded_at: Option<i64>,
}

impl Chunk {
    pub fn is_embedded(&self) -> bool {
        self.embedded_at.is_some()
    }
}

/// Chat metadata row. `included` gates retrieval (the inclusion mask).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub chat_id: String,
    pub chat_name: Option<String>,
    /// "private", "group", or "channel".
    pub chat_type: Option<String>,
    pub included: bool,
    pub message_count: i64,
    pub last_message_at: Option<i64>,
    /// High-water mark of chunk coverage: messages at or before this
    /// timestamp have been chunked.
    pub last_chunked_at: Option<i64>,
    pub created_at: i64,
}

/// A chat as reported by the external message source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceChat {
    pub chat_id: String,
    pub chat_name: String,
    pub chat_type: String,
}

/// Background operation kinds, each limited to one running instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Sync,
    Import,
    Reindex,
    Process,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Sync => "sync",
            OperationKind::Import => "import",
            OperationKind::Reindex => "reindex",
            OperationKind::Process => "process",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal (or running) status of an operation-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Success,
    Error,
    Cancelled,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Running => "running",
            OperationStatus::Success => "success",
            OperationStatus::Error => "error",
            OperationStatus::Cancelled => "cancelled",
        }
    }
}

/// One row of the operation log (sync/import/reindex/process history).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub id: i64,
    pub operation: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: Option<String>,
    pub messages_added: i64,
    pub chunks_created: i64,
    pub skipped_duplicate: i64,
    pub skipped_empty: i64,
    pub detail: Option<String>,
}

/// Counters accumulated by an ingest run and reported in the terminal event.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IngestCounts {
    pub messages_added: i64,
    pub skipped_duplicate: i64,
    pub skipped_empty: i64,
    pub chunks_created: i64,
    pub chunks_embedded: i64,
    pub cancelled: bool,
}

/// Progress/terminal events emitted by the ingest pipelines.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PipelineEvent {
    Progress { stage: String, message: String },
    Done(IngestCounts),
    Error { message: String },
}

impl PipelineEvent {
    pub fn progress(stage: &str, message: impl Into<String>) -> Self {
        PipelineEvent::Progress {
            stage: stage.to_string(),
            message: message.into(),
        }
    }
}

/// A vector store record: the embedding plus the chunk metadata projected
/// to a query-friendly form.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub chunk_id: String,
    pub chat_id: String,
    pub chat_name: Option<String>,
    pub participants: Vec<String>,
    pub timestamp_start: i64,
    pub timestamp_end: i64,
    pub message_count: i64,
    pub content: String,
    pub content_hash: String,
    pub embedding_version: String,
    pub embedding: Vec<f32>,
}

impl VectorRecord {
    /// Project a chunk and its embedding into a store record.
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            chat_id: chunk.chat_id.clone(),
            chat_name: chunk.chat_name.clone(),
            participants: chunk.participants.clone(),
            timestamp_start: chunk.timestamp_start,
            timestamp_end: chunk.timestamp_end,
            message_count: chunk.message_count,
            content: chunk.content.clone(),
            content_hash: chunk.content_hash.clone(),
            embedding_version: chunk.embedding_version.clone(),
            embedding,
        }
    }
}

/// A chunk retrieved by vector search, carrying its cosine distance.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub chat_id: String,
    pub chat_name: Option<String>,
    pub participants: Vec<String>,
    pub timestamp_start: i64,
    pub timestamp_end: i64,
    pub message_count: i64,
    pub content: String,
    pub distance: f32,
}

/// A citation surfaced to the client alongside the answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub chat_name: String,
    pub date_range: String,
    pub participants: Vec<String>,
    pub content: String,
}

/// Role of a chat message sent to an LLM backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One `(role, content)` entry of an LLM conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// One element of an LLM token stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatDelta {
    /// Main content token.
    Token(String),
    /// Structured reasoning token, where the backend separates them.
    Reasoning(String),
    /// Stream ended normally.
    Done,
    /// Stream failed; terminates the sequence.
    Error(String),
}

/// Events emitted by the chat orchestrator toward the gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatEvent {
    /// Emitted once, up front: the exact messages about to be sent.
    Debug {
        messages: Vec<ChatMessage>,
        user_name: String,
        current_date: String,
    },
    Token {
        content: String,
    },
    Reasoning {
        content: String,
    },
    Citations {
        citations: Vec<Citation>,
    },
    Error {
        message: String,
    },
}

/// Corpus statistics shown in the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub message_count: i64,
    pub chunk_count: i64,
    pub embedded_count: i64,
    pub chat_count: i64,
    pub included_chat_count: i64,
    pub excluded_chat_count: i64,
    pub last_sync: Option<i64>,
    pub last_sync_added: i64,
}

/// Counts of work waiting for the next process run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingStats {
    pub unchunked_messages: i64,
    pub unembedded_chunks: i64,
    pub has_pending: bool,
}

/// Format a Unix timestamp as a `YYYY-MM-DD` date (UTC).
pub fn fmt_date(timestamp: i64) -> String {
    match DateTime::<Utc>::from_timestamp(timestamp, 0) {
        Some(dt) if timestamp != 0 => dt.format("%Y-%m-%d").to_string(),
        _ => "Unknown".to_string(),
    }
}

/// Format a Unix timestamp as `YYYY-MM-DD HH:MM` (UTC).
pub fn fmt_datetime(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Current Unix time in seconds.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_kind_round_trip() {
        for kind in [
            OperationKind::Sync,
            OperationKind::Import,
            OperationKind::Reindex,
            OperationKind::Process,
        ] {
            let s = serde_json::to_string(&kind).unwrap();
            let back: OperationKind = serde_json::from_str(&s).unwrap();
            assert_eq!(kind, back);
        }
    }

    #[test]
    fn test_chunk_embedded_flag() {
        let mut chunk = Chunk {
            chunk_id: "c1".into(),
            chat_id: "a".into(),
            chat_name: None,
            participants: vec![],
            timestamp_start: 0,
            timestamp_end: 0,
            message_count: 1,
            content: "hi".into(),
            content_hash: "h".into(),
            embedding_version: "m".into(),
            embedded_at: None,
        };
        assert!(!chunk.is_embedded());
        chunk.embedded_at = Some(100);
        assert!(chunk.is_embedded());
    }

    #[test]
    fn test_fmt_date() {
        assert_eq!(fmt_date(0), "Unknown");
        assert_eq!(fmt_date(1_700_000_000), "2023-11-14");
    }

    #[test]
    fn test_fmt_datetime() {
        assert_eq!(fmt_datetime(0), "1970-01-01 00:00");
    }

    #[test]
    fn test_chat_event_serializes_with_type_tag() {
        let event = ChatEvent::Token {
            content: "hello".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "token");
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn test_pipeline_event_serializes_with_type_tag() {
        let event = PipelineEvent::progress("chunk", "Processing...");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["stage"], "chunk");
    }

    #[test]
    fn test_chat_role_serializes_lowercase() {
        let msg = ChatMessage::system("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
    }
}
