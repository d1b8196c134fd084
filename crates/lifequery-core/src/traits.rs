//! Core traits for LifeQuery abstractions.
//!
//! These traits define the seams between the pipeline and its pluggable
//! backends: the embedding endpoint, the streaming LLM family, and the
//! external message source.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::models::{ChatDelta, ChatMessage, IncomingMessage, SourceChat};

/// Lazy stream of [`ChatDelta`] items produced by a chat backend.
pub type ChatStream = Pin<Box<dyn Stream<Item = ChatDelta> + Send>>;

/// Maps text to fixed-dimension vectors via a remote model endpoint.
///
/// A query vector must be produced by the same model and normalization as
/// the stored vectors; mixing models requires a full reindex first.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a batch of texts. The result has one vector per input, all of
    /// uniform dimension.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Check that the endpoint is reachable.
    async fn health_check(&self) -> Result<bool>;

    /// Check that a model is available on the endpoint.
    async fn model_exists(&self, model: &str) -> Result<bool>;

    /// The model producing the vectors.
    fn model_name(&self) -> String;
}

/// Generation parameters shared by all chat backends.
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub temperature: f64,
    pub max_tokens: i64,
    pub enable_thinking: bool,
}

/// Streaming chat contract implemented by every LLM backend.
///
/// The stream yields `Token`/`Reasoning` deltas and ends with `Done`, or
/// with a single `Error` delta on failure. Cancelling the token stops the
/// producer within a bounded time.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        params: &ChatParams,
        cancel: CancelToken,
    ) -> Result<ChatStream>;

    /// The generation model in use.
    fn model_name(&self) -> &str;
}

/// Connection state of the external message source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatus {
    /// "uninitialized", "needs_auth", "phone_sent", or "connected".
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceStatus {
    pub fn state(state: &str) -> Self {
        Self {
            state: state.to_string(),
            phone: None,
            token: None,
            error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == "connected"
    }
}

/// The external message source: an opaque provider that yields
/// `(chat_id, message_id, timestamp, sender, text)` tuples and carries its
/// own authentication flow. Provider-specific plumbing lives outside the
/// core; the pipeline only sees this contract.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Current connection state.
    async fn status(&self) -> Result<SourceStatus>;

    /// Begin the auth flow (send a login code to the given phone).
    async fn start_auth(&self, phone: &str) -> Result<SourceStatus>;

    /// Complete the auth flow with a code and/or password.
    async fn verify_auth(
        &self,
        token: &str,
        code: Option<&str>,
        password: Option<&str>,
    ) -> Result<SourceStatus>;

    /// Drop the stored session.
    async fn disconnect(&self) -> Result<SourceStatus>;

    /// Enumerate the chats visible to the authenticated account.
    async fn list_chats(&self) -> Result<Vec<SourceChat>>;

    /// Fetch up to `limit` messages of one chat, oldest first, strictly
    /// after `after_message_id` when given.
    async fn fetch_messages(
        &self,
        chat_id: &str,
        after_message_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<IncomingMessage>>;
}

/// A message source that is never connected. Used when no provider adapter
/// is configured; sync refuses with a config error, imports still work.
#[derive(Debug, Default)]
pub struct DisconnectedSource;

#[async_trait]
impl MessageSource for DisconnectedSource {
    async fn status(&self) -> Result<SourceStatus> {
        Ok(SourceStatus::state("uninitialized"))
    }

    async fn start_auth(&self, _phone: &str) -> Result<SourceStatus> {
        Err(crate::Error::Config(
            "No message source provider is configured".to_string(),
        ))
    }

    async fn verify_auth(
        &self,
        _token: &str,
        _code: Option<&str>,
        _password: Option<&str>,
    ) -> Result<SourceStatus> {
        Err(crate::Error::Config(
            "No message source provider is configured".to_string(),
        ))
    }

    async fn disconnect(&self) -> Result<SourceStatus> {
        Ok(SourceStatus::state("needs_auth"))
    }

    async fn list_chats(&self) -> Result<Vec<SourceChat>> {
        Ok(vec![])
    }

    async fn fetch_messages(
        &self,
        _chat_id: &str,
        _after_message_id: Option<i64>,
        _limit: i64,
    ) -> Result<Vec<IncomingMessage>> {
        Err(crate::Error::Config(
            "No message source provider is configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disconnected_source_status() {
        let source = DisconnectedSource;
        let status = source.status().await.unwrap();
        assert_eq!(status.state, "uninitialized");
        assert!(!status.is_connected());
    }

    #[tokio::test]
    async fn test_disconnected_source_refuses_fetch() {
        let source = DisconnectedSource;
        let err = source.fetch_messages("1", None, 10).await.unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
