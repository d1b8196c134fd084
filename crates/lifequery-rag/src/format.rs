//! Citation formatting.

use lifequery_core::{fmt_date, Citation, RetrievedChunk};

/// Format one retrieved chunk as a citation.
pub fn format_citation(chunk: &RetrievedChunk) -> Citation {
    Citation {
        chat_name: chunk
            .chat_name
            .clone()
            .unwrap_or_else(|| "Unknown".to_string()),
        date_range: format!(
            "{}–{}",
            fmt_date(chunk.timestamp_start),
            fmt_date(chunk.timestamp_end)
        ),
        participants: chunk.participants.clone(),
        content: chunk.content.clone(),
    }
}

/// Format the used chunks as citations, preserving their order.
pub fn format_citations(chunks: &[RetrievedChunk]) -> Vec<Citation> {
    chunks.iter().map(format_citation).collect()
}
