//! Token estimation and content hashing.
//!
//! Token counting is approximate (whitespace word count scaled by
//! [`crate::defaults::TOKEN_ESTIMATE_FACTOR`]) but deterministic, which is
//! what chunk identity depends on.

use sha2::{Digest, Sha256};

use crate::defaults::TOKEN_ESTIMATE_FACTOR;

/// Estimate the token count of a text.
pub fn estimate_tokens(text: &str) -> i64 {
    if text.is_empty() {
        return 0;
    }
    (text.split_whitespace().count() as f64 * TOKEN_ESTIMATE_FACTOR) as i64
}

/// Compute a chunk content hash: first 16 hex chars of SHA-256(content).
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex_prefix(&digest, 16)
}

/// Compute a stable chunk ID from the chat and the content hash:
/// first 20 hex chars of SHA-256("{chat_id}:{content_hash}").
pub fn chunk_id(chat_id: &str, content_hash: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", chat_id, content_hash).as_bytes());
    hex_prefix(&digest, 20)
}

fn hex_prefix(digest: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}

/// Return the last `n` whitespace tokens of a text, joined by single spaces.
/// Used to seed the successor chunk after a size split.
pub fn tail_tokens(text: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let start = words.len().saturating_sub(n);
    words[start..].join(" ")
}
