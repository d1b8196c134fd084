//! Chunking engine: groups chronologically ordered messages into
//! semantically coherent blocks.
//!
//! Rules, applied per message within one chat:
//! 1. a gap of 4 hours or more always seals the open chunk;
//! 2. a gap of 20 minutes or more seals it once it has reached its target
//!    token size;
//! 3. a message that would push the chunk past the hard maximum seals it
//!    and seeds the successor with the tail of the sealed text.
//!
//! Sealing computes a content hash; chunks whose hash is already known are
//! skipped, so re-running the chunker over the same messages is idempotent.

use std::collections::HashSet;

use tracing::debug;

use lifequery_core::defaults::{GAP_BREAK_SECONDS, GAP_JOIN_SECONDS};
use lifequery_core::{
    chunk_id, content_hash, estimate_tokens, fmt_datetime, tail_tokens, Chunk, Message, Settings,
};

/// Chunker configuration, snapshotted from settings.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub target_tokens: i64,
    pub max_tokens: i64,
    pub overlap_tokens: i64,
    pub noise_keywords: Vec<String>,
    /// Embedding model the resulting chunks will be embedded with.
    pub embedding_version: String,
}

impl ChunkerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            target_tokens: settings.chunk_target,
            max_tokens: settings.chunk_max,
            overlap_tokens: settings.chunk_overlap,
            noise_keywords: settings.noise_keywords(),
            embedding_version: settings.embedding_model.clone(),
        }
    }
}

/// Result of chunking one chat.
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    pub chunks: Vec<Chunk>,
    /// Messages dropped by the noise filter.
    pub noise_dropped: i64,
}

/// Render one message as a chunk content line.
fn format_message(msg: &Message) -> String {
    let sender = msg
        .sender_name
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or("Unknown");
    format!("[{}] {}: {}", fmt_datetime(msg.timestamp), sender, msg.text)
}

/// The open chunk being accumulated.
struct OpenChunk {
    /// Overlap text carried from a size-split predecessor.
    seed: Option<String>,
    lines: Vec<String>,
    participants: Vec<String>,
    start_ts: i64,
    end_ts: i64,
    message_count: i64,
}

impl OpenChunk {
    fn new(seed: Option<String>) -> Self {
        Self {
            seed,
            lines: Vec::new(),
            participants: Vec::new(),
            start_ts: 0,
            end_ts: 0,
            message_count: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.message_count == 0
    }

    fn content(&self) -> String {
        let body = self.lines.join("\n");
        match &self.seed {
            Some(seed) if !seed.is_empty() => format!("{seed}\n{body}"),
            _ => body,
        }
    }

    fn tokens(&self) -> i64 {
        estimate_tokens(&self.content())
    }

    fn tokens_with(&self, line: &str) -> i64 {
        let mut content = self.content();
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(line);
        estimate_tokens(&content)
    }

    fn append(&mut self, msg: &Message, line: String) {
        if self.is_empty() {
            self.start_ts = msg.timestamp;
        }
        self.end_ts = msg.timestamp;
        self.message_count += 1;
        self.lines.push(line);
        if let Some(sender) = msg.sender_name.as_deref().filter(|s| !s.is_empty()) {
            if !self.participants.iter().any(|p| p == sender) {
                self.participants.push(sender.to_string());
            }
        }
    }
}

/// Chunk one chat's messages (chronological order assumed).
///
/// `known_hashes` carries the content hashes already live in the store;
/// sealed chunks matching one are skipped.
pub fn chunk_chat(
    messages: &[Message],
    config: &ChunkerConfig,
    known_hashes: &HashSet<String>,
) -> ChunkOutcome {
    let mut outcome = ChunkOutcome::default();
    if messages.is_empty() {
        return outcome;
    }

    let chat_id = &messages[0].chat_id;
    let chat_name = messages[0].chat_name.clone();
    let mut seen: HashSet<String> = known_hashes.clone();
    let mut cur = OpenChunk::new(None);

    let mut seal =
        |cur: &mut OpenChunk, seed_next: bool, outcome: &mut ChunkOutcome| -> Option<String> {
            if cur.is_empty() {
                return None;
            }
            let content = cur.content();
            let hash = content_hash(&content);
            let next_seed = seed_next
                .then(|| tail_tokens(&content, config.overlap_tokens.max(0) as usize));
            if seen.insert(hash.clone()) {
                outcome.chunks.push(Chunk {
                    chunk_id: chunk_id(chat_id, &hash),
                    chat_id: chat_id.clone(),
                    chat_name: chat_name.clone(),
                    participants: cur.participants.clone(),
                    timestamp_start: cur.start_ts,
                    timestamp_end: cur.end_ts,
                    message_count: cur.message_count,
                    content: content.clone(),
                    content_hash: hash,
                    embedding_version: config.embedding_version.clone(),
                    embedded_at: None,
                });
            } else {
                debug!(
                    subsystem = "ingest",
                    component = "chunker",
                    chat_id = %chat_id,
                    "Skipping duplicate chunk"
                );
            }
            next_seed
        };

    for msg in messages {
        if msg.text.trim().is_empty() {
            continue;
        }

        let text_lower = msg.text.to_lowercase();
        if config
            .noise_keywords
            .iter()
            .any(|keyword| text_lower.contains(keyword))
        {
            outcome.noise_dropped += 1;
            continue;
        }

        let line = format_message(msg);

        if cur.is_empty() {
            cur.append(msg, line);
            continue;
        }

        let gap = msg.timestamp - cur.end_ts;

        // Hard break: the conversation moved on.
        if gap >= GAP_BREAK_SECONDS {
            seal(&mut cur, false, &mut outcome);
            cur = OpenChunk::new(None);
            cur.append(msg, line);
            continue;
        }

        // Soft break: a pause, and the chunk is already big enough.
        if gap >= GAP_JOIN_SECONDS && cur.tokens() >= config.target_tokens {
            seal(&mut cur, false, &mut outcome);
            cur = OpenChunk::new(None);
            cur.append(msg, line);
            continue;
        }

        // Size split: seal and seed the successor with the tail.
        if cur.tokens_with(&line) > config.max_tokens {
            let seed = seal(&mut cur, true, &mut outcome);
            cur = OpenChunk::new(seed);
            cur.append(msg, line);
            continue;
        }

        cur.append(msg, line);
    }

    seal(&mut cur, false, &mut outcome);
    outcome
}
