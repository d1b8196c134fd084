//! # lifequery-ingest
//!
//! Ingest side of the LifeQuery pipeline: the chunking engine (C5), the
//! chat-export importer, and the sync / process / reindex drivers (C6).

pub mod chunker;
pub mod json_import;
pub mod pipeline;

pub use chunker::{chunk_chat, ChunkOutcome, ChunkerConfig};
pub use json_import::{flatten_text, parse_export, parse_export_file, ParsedChat};
pub use pipeline::{ChatListOutcome, IngestPipeline};
