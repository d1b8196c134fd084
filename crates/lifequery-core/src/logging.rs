//! Structured logging field name constants for LifeQuery.
//!
//! All crates use these constants for consistent structured logging fields
//! so the log output can be queried by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, operation completions |
//! | DEBUG | Decision points, intermediate values |
//! | TRACE | Per-item iteration (messages, chunks, tokens) |

/// Subsystem originating the log event.
/// Values: "api", "db", "vector", "inference", "ingest", "rag", "tasks"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "chunker", "embedder", "pool", "scheduler", "ollama"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "sync", "embed_batch", "retrieve", "stream_chat"
pub const OPERATION: &str = "op";

/// Chat being operated on.
pub const CHAT_ID: &str = "chat_id";

/// Chunk being operated on.
pub const CHUNK_ID: &str = "chunk_id";

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of chunks processed.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of messages processed.
pub const MESSAGE_COUNT: &str = "message_count";

/// Number of input texts sent to the embedding model.
pub const INPUT_COUNT: &str = "input_count";

/// Model name used for inference or embedding.
pub const MODEL: &str = "model";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";
