//! Context assembly and prompt construction.
//!
//! Retrieved chunks are re-sorted into date order (similarity decided
//! inclusion, date decides display) and greedily packed under the context
//! token cap. A record that would overflow the cap is skipped but assembly
//! continues, so small early records are not starved by one large one.

use tracing::debug;

use lifequery_core::{estimate_tokens, fmt_date, ChatMessage, RetrievedChunk, Settings};

const NO_THINKING_INSTRUCTION: &str = "INSTRUCTION: DO NOT provide internal reasoning or show \
     your thought process. Respond directly with the final answer.";

const THINKING_INSTRUCTION: &str = "INSTRUCTION: If you need to reason or think step-by-step, \
     wrap your internal monologue entirely within <think> and </think> tags before providing \
     your final answer.";

/// Render one retrieved chunk as a context block.
pub fn render_chunk(chunk: &RetrievedChunk) -> String {
    format!(
        "[{}] {} → {}, participants: {}\n\n{}\n---",
        chunk.chat_name.as_deref().unwrap_or("Unknown"),
        fmt_date(chunk.timestamp_start),
        fmt_date(chunk.timestamp_end),
        chunk.participants.join(", "),
        chunk.content
    )
}

/// Assemble the context string from retrieved chunks under the token cap.
/// Returns the context text, the chunks actually used (in display order),
/// and the token count.
pub fn build_context(
    mut chunks: Vec<RetrievedChunk>,
    context_cap: i64,
) -> (String, Vec<RetrievedChunk>, i64) {
    chunks.sort_by_key(|c| c.timestamp_start);

    let mut parts: Vec<String> = Vec::new();
    let mut used: Vec<RetrievedChunk> = Vec::new();
    let mut token_count = 0i64;

    for chunk in chunks {
        let rendered = render_chunk(&chunk);
        let tokens = estimate_tokens(&rendered);
        if token_count + tokens > context_cap {
            continue;
        }
        token_count += tokens;
        parts.push(rendered);
        used.push(chunk);
    }

    if parts.is_empty() {
        return (String::new(), vec![], 0);
    }

    debug!(
        subsystem = "rag",
        op = "assemble",
        chunk_count = used.len(),
        token_count,
        "Context assembled"
    );
    (parts.join("\n\n"), used, token_count)
}

/// Substitute the context into the system prompt template, appending a
/// context section when the template carries no placeholder.
pub fn build_system_message(context_text: &str, resolved_prompt: &str) -> String {
    if resolved_prompt.contains("{context_text}") {
        resolved_prompt.replace("{context_text}", context_text)
    } else {
        format!("{resolved_prompt}\n\n--- CONTEXT ---\n{context_text}")
    }
}

/// Prepend the reasoning directive matching the thinking setting.
pub fn with_thinking_directive(system_message: &str, enable_thinking: bool) -> String {
    let directive = if enable_thinking {
        THINKING_INSTRUCTION
    } else {
        NO_THINKING_INSTRUCTION
    };
    format!("{directive}\n\n{system_message}")
}

/// System content for the case where no context is available.
pub fn no_context_system_message(settings: &Settings) -> String {
    let base = if !settings.enable_rag {
        "You are LifeQuery, a helpful and intelligent assistant. Answer the user's questions \
         clearly and accurately."
            .to_string()
    } else {
        "You are LifeQuery, a personal memory assistant. I couldn't find specific records in \
         your chat history to answer this query with high precision, so I will answer based on \
         my general knowledge. To help me find relevant details, ensure your chats are indexed \
         and your query contains specific keywords."
            .to_string()
    };
    with_thinking_directive(&base, settings.enable_thinking)
}

/// Build the full LLM conversation: system, prior history, latest query.
pub fn build_messages(
    system_message: String,
    history: &[ChatMessage],
    query: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_message));
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(query));
    messages
}
