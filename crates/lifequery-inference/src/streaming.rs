//! Wire types and parsing for streaming chat responses.
//!
//! Both backends ship their responses as newline-framed payloads (SSE
//! `data:` lines for OpenAI-compatible endpoints, bare NDJSON for the
//! Ollama native API). [`LineBuffer`] reassembles complete lines across
//! network chunk boundaries before they are parsed.

use serde::Deserialize;
use tokio::sync::mpsc;

use lifequery_core::{ChatDelta, ChatStream};

/// Adapt the receiving end of a producer task's channel into a
/// [`ChatStream`]. The stream ends when the producer drops the sender.
pub fn receiver_stream(rx: mpsc::Receiver<ChatDelta>) -> ChatStream {
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|delta| (delta, rx))
    }))
}

/// Reassembles newline-delimited frames from arbitrary byte chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk and drain every complete line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }
}

// =============================================================================
// OpenAI-compatible SSE chunk types
// =============================================================================

/// Delta payload of one streamed choice. Reasoning arrives under different
/// field names depending on the provider.
#[derive(Debug, Deserialize, Default)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub thought: Option<String>,
}

impl ChunkDelta {
    /// The reasoning token, whichever field the provider used.
    pub fn reasoning_token(&self) -> Option<&str> {
        self.reasoning_content
            .as_deref()
            .or(self.reasoning.as_deref())
            .or(self.thought.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One `chat.completion.chunk` object from an OpenAI-compatible stream.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// Parse one SSE line into deltas. `None` means the `[DONE]` marker.
pub fn parse_sse_line(line: &str) -> Option<Vec<ChatDelta>> {
    // Comments and event names are ignored; only data lines matter.
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return None;
    }

    let mut deltas = Vec::new();
    match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(chunk) => {
            for choice in chunk.choices {
                if let Some(reasoning) = choice.delta.reasoning_token() {
                    deltas.push(ChatDelta::Reasoning(reasoning.to_string()));
                }
                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        deltas.push(ChatDelta::Token(content));
                    }
                }
            }
        }
        Err(e) => {
            deltas.push(ChatDelta::Error(format!("Failed to parse stream chunk: {e}")));
        }
    }
    Some(deltas)
}

// =============================================================================
// Ollama native chat types
// =============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct NativeMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub thought: Option<String>,
}

impl NativeMessage {
    pub fn reasoning_token(&self) -> Option<&str> {
        self.thinking
            .as_deref()
            .or(self.reasoning.as_deref())
            .or(self.thought.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// One NDJSON line from the Ollama `/api/chat` stream.
#[derive(Debug, Deserialize)]
pub struct NativeChunk {
    #[serde(default)]
    pub message: NativeMessage,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Parse one NDJSON line into deltas. The bool is the done flag.
pub fn parse_native_line(line: &str) -> (Vec<ChatDelta>, bool) {
    let mut deltas = Vec::new();
    match serde_json::from_str::<NativeChunk>(line) {
        Ok(chunk) => {
            if let Some(error) = chunk.error {
                return (vec![ChatDelta::Error(error)], true);
            }
            if let Some(reasoning) = chunk.message.reasoning_token() {
                deltas.push(ChatDelta::Reasoning(reasoning.to_string()));
            }
            if let Some(content) = chunk.message.content {
                if !content.is_empty() {
                    deltas.push(ChatDelta::Token(content));
                }
            }
            (deltas, chunk.done)
        }
        Err(e) => (
            vec![ChatDelta::Error(format!("Failed to parse stream chunk: {e}"))],
            true,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_reassembles_split_lines() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"data: {\"par").is_empty());
        let lines = buffer.push(b"tial\": 1}\n\ndata: next\n");
        assert_eq!(lines, vec!["data: {\"partial\": 1}", "data: next"]);
    }

    #[test]
    fn test_line_buffer_strips_crlf() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"data: x\r\n\r\n");
        assert_eq!(lines, vec!["data: x"]);
    }

    #[test]
    fn test_parse_sse_line_content() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let deltas = parse_sse_line(line).unwrap();
        assert_eq!(deltas, vec![ChatDelta::Token("Hello".to_string())]);
    }

    #[test]
    fn test_parse_sse_line_done_marker() {
        assert!(parse_sse_line("data: [DONE]").is_none());
    }

    #[test]
    fn test_parse_sse_line_non_data_ignored() {
        assert!(parse_sse_line(": keep-alive").is_none());
        assert!(parse_sse_line("event: message").is_none());
    }

    #[test]
    fn test_parse_sse_line_reasoning_variants() {
        for field in ["reasoning_content", "reasoning", "thought"] {
            let line = format!(
                r#"data: {{"choices":[{{"delta":{{"{field}":"thinking..."}},"finish_reason":null}}]}}"#
            );
            let deltas = parse_sse_line(&line).unwrap();
            assert_eq!(
                deltas,
                vec![ChatDelta::Reasoning("thinking...".to_string())],
                "field {field}"
            );
        }
    }

    #[test]
    fn test_parse_sse_line_reasoning_then_content() {
        let line = r#"data: {"choices":[{"delta":{"reasoning":"hm","content":"Hi"},"finish_reason":null}]}"#;
        let deltas = parse_sse_line(line).unwrap();
        assert_eq!(
            deltas,
            vec![
                ChatDelta::Reasoning("hm".to_string()),
                ChatDelta::Token("Hi".to_string())
            ]
        );
    }

    #[test]
    fn test_parse_sse_line_invalid_json() {
        let deltas = parse_sse_line("data: {invalid json}").unwrap();
        assert!(matches!(deltas[0], ChatDelta::Error(_)));
    }

    #[test]
    fn test_parse_native_line_content_and_done() {
        let (deltas, done) =
            parse_native_line(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#);
        assert_eq!(deltas, vec![ChatDelta::Token("Hi".to_string())]);
        assert!(!done);

        let (deltas, done) =
            parse_native_line(r#"{"message":{"role":"assistant","content":""},"done":true}"#);
        assert!(deltas.is_empty());
        assert!(done);
    }

    #[test]
    fn test_parse_native_line_thinking_field() {
        let (deltas, _) =
            parse_native_line(r#"{"message":{"thinking":"let me see","content":""},"done":false}"#);
        assert_eq!(deltas, vec![ChatDelta::Reasoning("let me see".to_string())]);
    }

    #[test]
    fn test_parse_native_line_error_field() {
        let (deltas, done) = parse_native_line(r#"{"error":"model not found"}"#);
        assert_eq!(deltas, vec![ChatDelta::Error("model not found".to_string())]);
        assert!(done);
    }
}
