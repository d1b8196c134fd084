//! Centralized default constants for the LifeQuery system.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// CHUNKING
// =============================================================================

/// Gap that always seals the open chunk (hard break): 4 hours, in seconds.
pub const GAP_BREAK_SECONDS: i64 = 4 * 60 * 60;

/// Gap that seals the open chunk once it has reached its target size
/// (soft break): 20 minutes, in seconds.
pub const GAP_JOIN_SECONDS: i64 = 20 * 60;

/// Default target chunk size in tokens (soft-break threshold).
pub const CHUNK_TARGET_TOKENS: i64 = 1000;

/// Default hard maximum chunk size in tokens.
pub const CHUNK_MAX_TOKENS: i64 = 1500;

/// Default overlap carried into the successor chunk on a size split, in tokens.
pub const CHUNK_OVERLAP_TOKENS: i64 = 250;

/// Multiplier applied to the whitespace word count when estimating tokens.
/// Part of the chunk schema contract: changing it changes chunk identity.
pub const TOKEN_ESTIMATE_FACTOR: f64 = 1.35;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model name.
pub const EMBED_MODEL: &str = "qwen3-Embedding-0.6B:Q8_0";

/// Chunks embedded per request batch.
pub const EMBED_BATCH_SIZE: usize = 32;

/// Timeout for one embedding batch, in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Ollama base URL (docker-compose service name).
pub const OLLAMA_URL: &str = "http://ollama:11434";

/// Default generation model name.
pub const CHAT_MODEL: &str = "qwen3:8b";

/// Per-stream idle timeout for chat generation, in seconds.
pub const CHAT_STREAM_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// RETRIEVAL
// =============================================================================

/// Default number of nearest neighbors requested from the vector store.
pub const TOP_K: i64 = 15;

/// Default token cap for the assembled retrieval context.
pub const CONTEXT_CAP_TOKENS: i64 = 10_000;

// =============================================================================
// INGEST
// =============================================================================

/// Default messages fetched from the source per batch.
pub const FETCH_BATCH_SIZE: i64 = 2000;

/// Default wait between source fetch batches, in seconds.
pub const FETCH_WAIT_SECS: i64 = 5;

/// Messages inserted per import transaction.
pub const IMPORT_BATCH_SIZE: usize = 500;

/// Maximum accepted import file size in bytes (500 MB).
pub const IMPORT_MAX_FILE_BYTES: u64 = 500 * 1024 * 1024;

// =============================================================================
// TASKS
// =============================================================================

/// Default auto-sync interval in minutes (0 disables).
pub const AUTO_SYNC_INTERVAL_MINUTES: i64 = 30;

/// Retries for transient failures within one task.
pub const TRANSIENT_MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff between retries, in milliseconds.
pub const TRANSIENT_BACKOFF_BASE_MS: u64 = 500;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 8000;

/// Default operation-log page size.
pub const LOG_PAGE_LIMIT: i64 = 50;
