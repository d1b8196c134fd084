//! Chat-export JSON import.
//!
//! Accepts the standard export format: either a single chat object
//! (`{"id": ..., "name": ..., "messages": [...]}`) or a top-level list of
//! such objects. Service events (`type != "message"`) and empty texts are
//! skipped; the message `text` field may be a plain string or a list of
//! entity fragments.

use std::path::Path;

use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::info;

use lifequery_core::defaults::IMPORT_MAX_FILE_BYTES;
use lifequery_core::{now_ts, Error, IncomingMessage, Result};

#[derive(Debug, Deserialize)]
pub struct ExportMessage {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    id: JsonValue,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    from_id: Option<JsonValue>,
    #[serde(default)]
    text: JsonValue,
}

#[derive(Debug, Deserialize)]
pub struct ExportChat {
    #[serde(default)]
    id: JsonValue,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    messages: Vec<ExportMessage>,
}

/// One chat's parsed import payload.
#[derive(Debug)]
pub struct ParsedChat {
    pub chat_id: String,
    pub chat_name: String,
    pub messages: Vec<IncomingMessage>,
    pub skipped_empty: i64,
}

fn value_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Flatten the `text` field, which may be a string or a list of strings and
/// `{ "text": ... }` entity fragments.
pub fn flatten_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(parts) => parts
            .iter()
            .map(|part| match part {
                JsonValue::String(s) => s.clone(),
                JsonValue::Object(map) => map
                    .get("text")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string(),
                _ => String::new(),
            })
            .collect(),
        other => other.to_string(),
    }
}

fn parse_timestamp(date: Option<&str>, fallback: i64) -> i64 {
    let Some(date) = date else {
        return fallback;
    };
    let normalized = date.replace('Z', "+00:00");
    DateTime::parse_from_rfc3339(&normalized)
        .map(|dt| dt.timestamp())
        // Exports without an offset are taken as UTC.
        .or_else(|_| {
            DateTime::parse_from_rfc3339(&format!("{normalized}+00:00")).map(|dt| dt.timestamp())
        })
        .unwrap_or(fallback)
}

fn convert_chat(chat: ExportChat, username: Option<&str>) -> ParsedChat {
    let chat_id = value_to_string(&chat.id);
    let chat_name = chat.name.unwrap_or_else(|| "Unknown".to_string());
    let imported_at = now_ts();

    let mut messages = Vec::new();
    let mut skipped_empty = 0i64;

    for msg in chat.messages {
        if msg.kind.as_deref() != Some("message") {
            skipped_empty += 1;
            continue;
        }
        let text = flatten_text(&msg.text);
        if text.trim().is_empty() {
            skipped_empty += 1;
            continue;
        }

        let from_id = msg
            .from_id
            .as_ref()
            .map(value_to_string)
            .unwrap_or_default();
        let mut from_name = msg.from.clone().unwrap_or_else(|| "Unknown".to_string());

        // Deleted-account exports lose the sender name; let the caller
        // attribute those messages explicitly.
        if let Some(username) = username {
            if from_name.is_empty() || from_name == "Unknown" || from_id.starts_with("user") {
                if msg.from.is_none() || msg.from.as_deref() == Some(username) {
                    from_name = username.to_string();
                }
            }
        }

        messages.push(IncomingMessage {
            message_id: value_to_string(&msg.id),
            chat_id: chat_id.clone(),
            chat_name: chat_name.clone(),
            sender_id: from_id,
            sender_name: from_name,
            text,
            timestamp: parse_timestamp(msg.date.as_deref(), imported_at),
        });
    }

    ParsedChat {
        chat_id,
        chat_name,
        messages,
        skipped_empty,
    }
}

/// Parse an export file into per-chat message lists.
pub fn parse_export_file(path: &Path, username: Option<&str>) -> Result<Vec<ParsedChat>> {
    let metadata = std::fs::metadata(path)
        .map_err(|_| Error::NotFound(format!("File not found: {}", path.display())))?;
    if metadata.len() > IMPORT_MAX_FILE_BYTES {
        return Err(Error::InvalidInput(format!(
            "File too large. Maximum size is {} MB",
            IMPORT_MAX_FILE_BYTES / (1024 * 1024)
        )));
    }

    let raw = std::fs::read_to_string(path)?;
    parse_export(&raw, username)
}

/// Parse export JSON text (single chat object or list of chats).
pub fn parse_export(raw: &str, username: Option<&str>) -> Result<Vec<ParsedChat>> {
    let value: JsonValue = serde_json::from_str(raw)
        .map_err(|e| Error::InvalidInput(format!("Invalid JSON: {e}")))?;

    let chats: Vec<ExportChat> = if value.is_array() {
        serde_json::from_value(value)
            .map_err(|e| Error::InvalidInput(format!("Invalid chat list: {e}")))?
    } else {
        vec![serde_json::from_value(value)
            .map_err(|e| Error::InvalidInput(format!("Invalid chat object: {e}")))?]
    };

    let parsed: Vec<ParsedChat> = chats
        .into_iter()
        .map(|chat| convert_chat(chat, username))
        .collect();
    info!(
        subsystem = "ingest",
        component = "import",
        chat_count = parsed.len(),
        "Parsed export file"
    );
    Ok(parsed)
}
