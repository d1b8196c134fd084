//! Typed settings for LifeQuery.
//!
//! Settings live in the string-keyed `config` table; this module is the
//! typed view over it. Reads coerce each key to its declared type, missing
//! keys fall back to the declared default. Sensitive keys never leave the
//! process verbatim: they serialize to the `****` sentinel, and writes of
//! the sentinel are discarded. In-memory values are always plaintext.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::defaults;

/// Sentinel returned for sensitive values and ignored on write.
pub const MASKED_VALUE: &str = "****";

/// Keys whose values are masked on the wire.
pub const SENSITIVE_KEYS: &[&str] = &[
    "telegram_api_hash",
    "openrouter_api_key",
    "chat_api_key",
    "api_key",
];

/// Default system prompt template. `{user_name}`, `{current_date}` and
/// `{context_text}` are substituted at request time.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are LifeQuery, a personal memory assistant for {user_name}. Today's date is {current_date}.\n\nAnswer the user's question using ONLY the provided chat history context.\n\n### REASONING STEPS:\n1. **Target Identification**: Based on today's date ({current_date}), identify the specific time period or event being questioned.\n2. **Context Filtering**: Focus strictly on messages relevant to the query. Ignore extraneous information.\n3. **Literal Accuracy**: Use the exact names and terms found in the logs.\n\n### OUTPUT FORMAT:\nIf the information is found:\n1. A brief direct answer.\n2. Supporting log entries in this format:\n   - [YYYY-MM-DD] Summary of relevant fact [Chat Name]\n\nIf the information is NOT found:\n\"I couldn't find any specific information about that in my current memory index.\"\n\n### CONTEXT DATA:\n{context_text}";

/// Typed application settings.
///
/// One snapshot is read at the start of each operation; mid-run config
/// changes are not observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub telegram_api_id: String,
    pub telegram_api_hash: String,
    pub telegram_fetch_batch: i64,
    pub telegram_fetch_wait: i64,
    pub ollama_url: String,
    pub embedding_model: String,
    pub chat_provider: String,
    pub chat_model: String,
    pub chat_url: String,
    pub chat_api_key: String,
    pub openrouter_api_key: String,
    pub custom_chat_url: String,
    pub temperature: f64,
    pub max_tokens: i64,
    pub top_k: i64,
    pub context_cap: i64,
    pub chunk_target: i64,
    pub chunk_max: i64,
    pub chunk_overlap: i64,
    pub api_key: String,
    pub auto_sync_interval: i64,
    pub enable_thinking: bool,
    pub enable_rag: bool,
    pub system_prompt: String,
    pub user_first_name: String,
    pub user_last_name: String,
    pub user_username: String,
    pub noise_filter_keywords: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telegram_api_id: String::new(),
            telegram_api_hash: String::new(),
            telegram_fetch_batch: defaults::FETCH_BATCH_SIZE,
            telegram_fetch_wait: defaults::FETCH_WAIT_SECS,
            ollama_url: defaults::OLLAMA_URL.to_string(),
            embedding_model: defaults::EMBED_MODEL.to_string(),
            chat_provider: "ollama".to_string(),
            chat_model: defaults::CHAT_MODEL.to_string(),
            chat_url: defaults::OLLAMA_URL.to_string(),
            chat_api_key: String::new(),
            openrouter_api_key: String::new(),
            custom_chat_url: String::new(),
            temperature: 0.2,
            max_tokens: 4096,
            top_k: defaults::TOP_K,
            context_cap: defaults::CONTEXT_CAP_TOKENS,
            chunk_target: defaults::CHUNK_TARGET_TOKENS,
            chunk_max: defaults::CHUNK_MAX_TOKENS,
            chunk_overlap: defaults::CHUNK_OVERLAP_TOKENS,
            api_key: String::new(),
            auto_sync_interval: defaults::AUTO_SYNC_INTERVAL_MINUTES,
            enable_thinking: false,
            enable_rag: true,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            user_first_name: String::new(),
            user_last_name: String::new(),
            user_username: String::new(),
            noise_filter_keywords: String::new(),
        }
    }
}

fn coerce_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

fn coerce_i64(value: &str, fallback: i64) -> i64 {
    value.trim().parse().unwrap_or(fallback)
}

fn coerce_f64(value: &str, fallback: f64) -> f64 {
    value.trim().parse().unwrap_or(fallback)
}

impl Settings {
    /// Build settings from raw `(key, value)` rows, coercing each known key
    /// to its declared type. Empty values keep the default.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut settings = Settings::default();
        for (key, value) in rows {
            if value.is_empty() {
                continue;
            }
            settings.apply(&key, &value);
        }
        settings
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "telegram_api_id" => self.telegram_api_id = value.to_string(),
            "telegram_api_hash" => self.telegram_api_hash = value.to_string(),
            "telegram_fetch_batch" => {
                self.telegram_fetch_batch = coerce_i64(value, self.telegram_fetch_batch)
            }
            "telegram_fetch_wait" => {
                self.telegram_fetch_wait = coerce_i64(value, self.telegram_fetch_wait)
            }
            "ollama_url" => self.ollama_url = value.to_string(),
            "embedding_model" => self.embedding_model = value.to_string(),
            "chat_provider" => self.chat_provider = value.to_string(),
            "chat_model" => self.chat_model = value.to_string(),
            "chat_url" => self.chat_url = value.to_string(),
            "chat_api_key" => self.chat_api_key = value.to_string(),
            "openrouter_api_key" => self.openrouter_api_key = value.to_string(),
            "custom_chat_url" => self.custom_chat_url = value.to_string(),
            "temperature" => self.temperature = coerce_f64(value, self.temperature),
            "max_tokens" => self.max_tokens = coerce_i64(value, self.max_tokens),
            "top_k" => self.top_k = coerce_i64(value, self.top_k),
            "context_cap" => self.context_cap = coerce_i64(value, self.context_cap),
            "chunk_target" => self.chunk_target = coerce_i64(value, self.chunk_target),
            "chunk_max" => self.chunk_max = coerce_i64(value, self.chunk_max),
            "chunk_overlap" => self.chunk_overlap = coerce_i64(value, self.chunk_overlap),
            "api_key" => self.api_key = value.to_string(),
            "auto_sync_interval" => {
                self.auto_sync_interval = coerce_i64(value, self.auto_sync_interval)
            }
            "enable_thinking" => self.enable_thinking = coerce_bool(value),
            "enable_rag" => self.enable_rag = coerce_bool(value),
            // Un-escape literal \n left by older storage formats.
            "system_prompt" => self.system_prompt = value.replace("\\n", "\n"),
            "user_first_name" => self.user_first_name = value.to_string(),
            "user_last_name" => self.user_last_name = value.to_string(),
            "user_username" => self.user_username = value.to_string(),
            "noise_filter_keywords" => self.noise_filter_keywords = value.to_string(),
            _ => {}
        }
    }

    /// Serialize with sensitive values replaced by the sentinel.
    pub fn masked_json(&self) -> JsonValue {
        let mut value = serde_json::to_value(self).unwrap_or(JsonValue::Null);
        if let Some(map) = value.as_object_mut() {
            for key in SENSITIVE_KEYS {
                if let Some(entry) = map.get_mut(*key) {
                    if entry.as_str().map(|s| !s.is_empty()).unwrap_or(false) {
                        *entry = JsonValue::String(MASKED_VALUE.to_string());
                    }
                }
            }
        }
        value
    }

    /// The user's display name for the system prompt: first+last name, then
    /// username, then a generic fallback.
    pub fn user_name(&self) -> String {
        let first = self.user_first_name.trim();
        let last = self.user_last_name.trim();
        if !first.is_empty() && !last.is_empty() {
            format!("{} {}", first, last)
        } else if !first.is_empty() {
            first.to_string()
        } else if !self.user_username.is_empty() {
            self.user_username.clone()
        } else {
            "the user".to_string()
        }
    }

    /// Noise filter keywords, lowercased and trimmed; empty entries dropped.
    pub fn noise_keywords(&self) -> Vec<String> {
        self.noise_filter_keywords
            .split(',')
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect()
    }

    /// The system prompt with `{user_name}` and `{current_date}` replaced.
    /// `{context_text}` stays for the orchestrator to fill in.
    pub fn system_prompt_resolved(&self) -> String {
        self.system_prompt
            .replace("{user_name}", &self.user_name())
            .replace("{current_date}", &current_date())
    }
}

/// Today's date formatted for the system prompt.
pub fn current_date() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Filter a raw settings update before persisting: drop null and empty
/// values, and drop sentinel writes to sensitive keys (preserving the
/// stored value).
pub fn sanitize_update(updates: HashMap<String, JsonValue>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (key, value) in updates {
        let text = match value {
            JsonValue::Null => continue,
            JsonValue::String(s) => s,
            other => other.to_string(),
        };
        if text.is_empty() {
            continue;
        }
        if SENSITIVE_KEYS.contains(&key.as_str()) && text == MASKED_VALUE {
            continue;
        }
        out.insert(key, text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.chat_provider, "ollama");
        assert_eq!(s.chunk_target, 1000);
        assert_eq!(s.chunk_max, 1500);
        assert_eq!(s.chunk_overlap, 250);
        assert!(s.enable_rag);
        assert!(!s.enable_thinking);
    }

    #[test]
    fn test_from_rows_coerces_types() {
        let s = Settings::from_rows(vec![
            ("top_k".to_string(), "25".to_string()),
            ("temperature".to_string(), "0.7".to_string()),
            ("enable_thinking".to_string(), "True".to_string()),
            ("enable_rag".to_string(), "0".to_string()),
        ]);
        assert_eq!(s.top_k, 25);
        assert!((s.temperature - 0.7).abs() < f64::EPSILON);
        assert!(s.enable_thinking);
        assert!(!s.enable_rag);
    }

    #[test]
    fn test_from_rows_bad_values_keep_defaults() {
        let s = Settings::from_rows(vec![
            ("top_k".to_string(), "lots".to_string()),
            ("temperature".to_string(), "warm".to_string()),
        ]);
        assert_eq!(s.top_k, Settings::default().top_k);
        assert_eq!(s.temperature, Settings::default().temperature);
    }

    #[test]
    fn test_from_rows_empty_value_keeps_default() {
        let s = Settings::from_rows(vec![("chat_model".to_string(), String::new())]);
        assert_eq!(s.chat_model, Settings::default().chat_model);
    }

    #[test]
    fn test_bool_coercion_variants() {
        for truthy in ["true", "True", "1", "yes", "YES"] {
            assert!(coerce_bool(truthy), "{truthy} should be true");
        }
        for falsy in ["false", "0", "no", "off", ""] {
            assert!(!coerce_bool(falsy), "{falsy} should be false");
        }
    }

    #[test]
    fn test_system_prompt_unescapes_newlines() {
        let s = Settings::from_rows(vec![(
            "system_prompt".to_string(),
            "line one\\nline two".to_string(),
        )]);
        assert_eq!(s.system_prompt, "line one\nline two");
    }

    #[test]
    fn test_masked_json_hides_sensitive_values() {
        let mut s = Settings::default();
        s.api_key = "secret".to_string();
        s.chat_api_key = "also-secret".to_string();
        let json = s.masked_json();
        assert_eq!(json["api_key"], MASKED_VALUE);
        assert_eq!(json["chat_api_key"], MASKED_VALUE);
        // Empty sensitive values stay empty, not masked.
        assert_eq!(json["openrouter_api_key"], "");
        // Non-sensitive values pass through.
        assert_eq!(json["chat_provider"], "ollama");
    }

    #[test]
    fn test_sanitize_update_drops_sentinel_and_empty() {
        let mut updates = HashMap::new();
        updates.insert("api_key".to_string(), JsonValue::String("****".into()));
        updates.insert("chat_model".to_string(), JsonValue::String("llama3".into()));
        updates.insert("chat_url".to_string(), JsonValue::String(String::new()));
        updates.insert("top_k".to_string(), JsonValue::from(20));
        let out = sanitize_update(updates);
        assert!(!out.contains_key("api_key"));
        assert!(!out.contains_key("chat_url"));
        assert_eq!(out.get("chat_model").unwrap(), "llama3");
        assert_eq!(out.get("top_k").unwrap(), "20");
    }

    #[test]
    fn test_user_name_preference_order() {
        let mut s = Settings::default();
        assert_eq!(s.user_name(), "the user");
        s.user_username = "ada".to_string();
        assert_eq!(s.user_name(), "ada");
        s.user_first_name = "Ada".to_string();
        assert_eq!(s.user_name(), "Ada");
        s.user_last_name = "Lovelace".to_string();
        assert_eq!(s.user_name(), "Ada Lovelace");
    }

    #[test]
    fn test_noise_keywords_parsing() {
        let mut s = Settings::default();
        s.noise_filter_keywords = "Spam, JOINED the group, ,".to_string();
        assert_eq!(s.noise_keywords(), vec!["spam", "joined the group"]);
        s.noise_filter_keywords = String::new();
        assert!(s.noise_keywords().is_empty());
    }

    #[test]
    fn test_system_prompt_resolution_keeps_context_placeholder() {
        let mut s = Settings::default();
        s.user_first_name = "Ada".to_string();
        let resolved = s.system_prompt_resolved();
        assert!(resolved.contains("Ada"));
        assert!(!resolved.contains("{user_name}"));
        assert!(resolved.contains("{context_text}"));
    }
}
