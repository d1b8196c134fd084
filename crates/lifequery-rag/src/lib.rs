//! # lifequery-rag
//!
//! The answer side of LifeQuery: query-time retrieval with context
//! assembly (C7) and the streaming chat orchestrator (C8).

pub mod assemble;
pub mod format;
pub mod pipeline;
pub mod retrieve;

pub use assemble::{build_context, build_messages, build_system_message, render_chunk};
pub use format::{format_citation, format_citations};
pub use pipeline::ChatOrchestrator;
pub use retrieve::{parse_date_range, retrieve};
