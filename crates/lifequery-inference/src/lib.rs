//! # lifequery-inference
//!
//! Remote model clients for LifeQuery: the embedding client (C3) and the
//! streaming chat backend family (C4) behind a single factory.

pub mod discovery;
pub mod embedding;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod streaming;

pub use embedding::EmbeddingClient;
pub use ollama::OllamaChatBackend;
pub use openai::OpenAiChatBackend;
pub use provider::{create_chat_backend, ensure_versioned_url, resolve_endpoint};
