//! # lifequery-core
//!
//! Core types, traits, and abstractions for the LifeQuery memory engine.
//!
//! This crate provides the foundational data structures, the typed settings
//! layer, and the trait definitions that the other LifeQuery crates depend
//! on.

pub mod cancel;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod retry;
pub mod settings;
pub mod tokens;
pub mod traits;

// Re-export commonly used types at crate root
pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use models::*;
pub use retry::with_retries;
pub use settings::{sanitize_update, Settings, MASKED_VALUE, SENSITIVE_KEYS};
pub use tokens::{chunk_id, content_hash, estimate_tokens, tail_tokens};
pub use traits::{
    ChatBackend, ChatParams, ChatStream, DisconnectedSource, EmbeddingBackend, MessageSource,
    SourceStatus,
};
