//! Ingest pipelines: sync, import, process, and reindex.
//!
//! Each pipeline is a sequence of stages (fetch → persist → chunk → embed →
//! mark embedded) that reports `{stage, message}` progress through an mpsc
//! channel the gateway multiplexes into its SSE response. Cancellation is
//! checked at every batch boundary: committed work stays committed, and the
//! terminal counts carry a `cancelled` flag.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::Sender;
use tracing::{info, warn};

use lifequery_core::defaults::{EMBED_BATCH_SIZE, IMPORT_BATCH_SIZE};
use lifequery_core::{
    with_retries, CancelToken, Chunk, EmbeddingBackend, Error, IncomingMessage, IngestCounts,
    MessageSource, PipelineEvent, Result, Settings, VectorRecord,
};
use lifequery_db::Database;
use lifequery_vector::{Collection, VectorStore};

use crate::chunker::{chunk_chat, ChunkerConfig};
use crate::json_import::parse_export_file;

/// Outcome of a chat-list refresh.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ChatListOutcome {
    pub updated: i64,
    pub new: i64,
    pub removed: i64,
}

/// Drives ingest operations end-to-end against the store, the vector
/// store, the embedding client, and the message source.
#[derive(Clone)]
pub struct IngestPipeline {
    db: Database,
    vectors: VectorStore,
    embedder: Arc<dyn EmbeddingBackend>,
    source: Arc<dyn MessageSource>,
}

async fn emit(progress: &Sender<PipelineEvent>, stage: &str, message: impl Into<String>) {
    // A dropped receiver means the client went away; the pipeline keeps
    // running and commits its work regardless.
    let _ = progress.send(PipelineEvent::progress(stage, message)).await;
}

impl IngestPipeline {
    pub fn new(
        db: Database,
        vectors: VectorStore,
        embedder: Arc<dyn EmbeddingBackend>,
        source: Arc<dyn MessageSource>,
    ) -> Self {
        Self {
            db,
            vectors,
            embedder,
            source,
        }
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Full sync: fetch from the source, persist, chunk, embed.
    pub async fn sync(
        &self,
        settings: &Settings,
        cancel: CancelToken,
        progress: Sender<PipelineEvent>,
    ) -> Result<IngestCounts> {
        let mut counts = IngestCounts::default();

        let status = self.source.status().await?;
        if !status.is_connected() {
            return Err(Error::Config(
                "Message source is not connected. Please authenticate first.".to_string(),
            ));
        }

        emit(&progress, "ingest", "Fetching chat list...").await;
        let chats = self.source.list_chats().await?;
        let excluded = self.db.chats.excluded_ids().await?;

        'chats: for chat in &chats {
            if cancel.is_cancelled() {
                info!("Sync cancelled after current chat");
                counts.cancelled = true;
                break;
            }
            if excluded.contains(&chat.chat_id) {
                continue;
            }

            emit(&progress, "ingest", format!("Syncing {}...", chat.chat_name)).await;
            let mut chat_added = 0i64;
            let mut last_ts = 0i64;

            loop {
                let after_id = self.db.messages.last_message_id(&chat.chat_id).await?;
                let fetched = with_retries("fetch_messages", || {
                    self.source.fetch_messages(
                        &chat.chat_id,
                        after_id,
                        settings.telegram_fetch_batch,
                    )
                })
                .await?;
                if fetched.is_empty() {
                    break;
                }
                let batch_len = fetched.len() as i64;

                let kept: Vec<IncomingMessage> = fetched
                    .into_iter()
                    .filter(|m| !m.text.trim().is_empty())
                    .collect();
                counts.skipped_empty += batch_len - kept.len() as i64;

                let outcome = self.db.messages.insert_batch(&kept, "source_sync").await?;
                counts.messages_added += outcome.inserted;
                counts.skipped_duplicate += outcome.duplicates;
                chat_added += outcome.inserted;
                if let Some(last) = kept.last() {
                    last_ts = last.timestamp.max(last_ts);
                }

                if batch_len < settings.telegram_fetch_batch {
                    break;
                }
                if cancel.is_cancelled() {
                    counts.cancelled = true;
                    break 'chats;
                }
                tokio::time::sleep(Duration::from_secs(
                    settings.telegram_fetch_wait.max(0) as u64
                ))
                .await;
            }

            let total = self.db.messages.count_for_chat(&chat.chat_id).await?;
            self.db
                .chats
                .upsert(
                    &chat.chat_id,
                    &chat.chat_name,
                    &chat.chat_type,
                    total,
                    last_ts,
                )
                .await?;
            if chat_added > 0 {
                emit(
                    &progress,
                    "ingest",
                    format!("Added {chat_added} messages from {}", chat.chat_name),
                )
                .await;
            }
        }

        if counts.cancelled {
            return Ok(counts);
        }

        self.chunk_stage(settings, &cancel, &progress, &mut counts)
            .await?;
        if counts.cancelled {
            return Ok(counts);
        }
        self.embed_pending(settings, &cancel, &progress, &mut counts)
            .await?;
        Ok(counts)
    }

    // =========================================================================
    // Import
    // =========================================================================

    /// Import a chat-export JSON file. Chunking and embedding run later via
    /// `process`.
    pub async fn import(
        &self,
        path: &Path,
        username: Option<&str>,
        cancel: CancelToken,
        progress: Sender<PipelineEvent>,
    ) -> Result<IngestCounts> {
        let mut counts = IngestCounts::default();

        emit(&progress, "import", "Validating JSON structure...").await;
        let chats = parse_export_file(path, username)?;

        for (i, chat) in chats.iter().enumerate() {
            cancel.check("import")?;
            emit(
                &progress,
                "import",
                format!("Processing chat {}: {}", i + 1, chat.chat_name),
            )
            .await;
            counts.skipped_empty += chat.skipped_empty;

            let mut last_ts = 0i64;
            for batch in chat.messages.chunks(IMPORT_BATCH_SIZE) {
                cancel.check("import")?;
                let outcome = self.db.messages.insert_batch(batch, "json_import").await?;
                counts.messages_added += outcome.inserted;
                counts.skipped_duplicate += outcome.duplicates;
                if let Some(max) = batch.iter().map(|m| m.timestamp).max() {
                    last_ts = last_ts.max(max);
                }
                emit(
                    &progress,
                    "import",
                    format!(
                        "Chat {}: imported {} messages...",
                        chat.chat_name, counts.messages_added
                    ),
                )
                .await;
            }

            if !chat.chat_id.is_empty() {
                let total = self.db.messages.count_for_chat(&chat.chat_id).await?;
                self.db
                    .chats
                    .upsert(&chat.chat_id, &chat.chat_name, "private", total, last_ts)
                    .await?;
            }
        }

        info!(
            subsystem = "ingest",
            op = "import",
            message_count = counts.messages_added,
            "Import complete"
        );
        Ok(counts)
    }

    // =========================================================================
    // Process (chunk + embed, no source contact)
    // =========================================================================

    pub async fn process(
        &self,
        settings: &Settings,
        cancel: CancelToken,
        progress: Sender<PipelineEvent>,
    ) -> Result<IngestCounts> {
        let mut counts = IngestCounts::default();
        self.chunk_stage(settings, &cancel, &progress, &mut counts)
            .await?;
        if counts.cancelled {
            return Ok(counts);
        }
        self.embed_pending(settings, &cancel, &progress, &mut counts)
            .await?;
        Ok(counts)
    }

    // =========================================================================
    // Chunk stage
    // =========================================================================

    async fn chunk_stage(
        &self,
        settings: &Settings,
        cancel: &CancelToken,
        progress: &Sender<PipelineEvent>,
        counts: &mut IngestCounts,
    ) -> Result<()> {
        let chat_ids = self.db.chats.ids_with_pending_messages().await?;
        if chat_ids.is_empty() {
            emit(progress, "chunk", "No messages to chunk").await;
            return Ok(());
        }

        let config = ChunkerConfig::from_settings(settings);
        for chat_id in chat_ids {
            if cancel.is_cancelled() {
                counts.cancelled = true;
                return Ok(());
            }

            let chat = self.db.chats.get(&chat_id).await?;
            // An unset coverage marker means nothing is covered yet; the
            // threshold sits below zero so epoch-adjacent messages count.
            let after_ts = chat
                .as_ref()
                .and_then(|c| c.last_chunked_at)
                .unwrap_or(-1);
            let messages = self.db.messages.list_for_chat(&chat_id, after_ts).await?;
            if messages.is_empty() {
                continue;
            }
            let chat_name = messages[0]
                .chat_name
                .clone()
                .unwrap_or_else(|| chat_id.clone());
            emit(progress, "chunk", format!("Processing {chat_name}...")).await;

            let outcome = chunk_chat(&messages, &config, &HashSet::new());
            counts.skipped_empty += outcome.noise_dropped;
            let last_ts = messages.last().map(|m| m.timestamp);
            let inserted = self
                .db
                .chunks
                .insert_for_chat(&chat_id, &outcome.chunks, last_ts)
                .await?;
            counts.chunks_created += inserted;
            emit(
                progress,
                "chunk",
                format!("Created {inserted} chunks from {chat_name}"),
            )
            .await;
        }
        Ok(())
    }

    // =========================================================================
    // Embed stage (incremental)
    // =========================================================================

    /// Embed pending chunks in batches, keeping the invariant that a chunk
    /// is flagged embedded iff its vector is stored. A failed batch leaves
    /// its chunks pending, so the operation is safely resumable.
    async fn embed_pending(
        &self,
        settings: &Settings,
        cancel: &CancelToken,
        progress: &Sender<PipelineEvent>,
        counts: &mut IngestCounts,
    ) -> Result<()> {
        self.preflight_embedding(settings).await?;
        self.reconcile_vectors(settings).await?;

        let pending = self.db.chunks.list_pending(None).await?;
        if pending.is_empty() {
            emit(progress, "embed", "No chunks to embed - everything is up to date").await;
            return Ok(());
        }

        let total = pending.len();
        let mut errors = 0usize;
        let mut last_error: Option<Error> = None;

        for batch in pending.chunks(EMBED_BATCH_SIZE) {
            if cancel.is_cancelled() {
                counts.cancelled = true;
                return Ok(());
            }

            match self.embed_batch(batch, settings).await {
                Ok(()) => {
                    counts.chunks_embedded += batch.len() as i64;
                    emit(
                        progress,
                        "embed",
                        format!("Embedded {}/{} chunks...", counts.chunks_embedded, total),
                    )
                    .await;
                }
                Err(e) => {
                    warn!(error = %e, "Embedding batch failed; chunks stay pending");
                    errors += batch.len();
                    last_error = Some(e);
                }
            }
        }

        if counts.chunks_embedded == 0 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        if errors > 0 {
            emit(
                progress,
                "embed",
                format!("{errors} chunks failed to embed and remain pending"),
            )
            .await;
        }
        Ok(())
    }

    async fn preflight_embedding(&self, settings: &Settings) -> Result<()> {
        if !self.embedder.health_check().await? {
            return Err(Error::Config(
                "Embedding service is not reachable. Please check your settings.".to_string(),
            ));
        }
        if !self.embedder.model_exists(&settings.embedding_model).await? {
            return Err(Error::Config(format!(
                "Embedding model '{}' is not available on the endpoint.",
                settings.embedding_model
            )));
        }
        Ok(())
    }

    /// Bring store and vector collection back in line before embedding:
    /// wipe on a model switch, evict orphaned vectors, and re-flag chunks
    /// whose vector went missing.
    async fn reconcile_vectors(&self, settings: &Settings) -> Result<()> {
        let fingerprints = self.vectors.stored_fingerprints().await?;
        let mismatch = fingerprints
            .values()
            .any(|(_, version)| version != &settings.embedding_model);
        if mismatch {
            warn!(
                model = %settings.embedding_model,
                "Embedding model changed; wiping vector store for a full re-embed"
            );
            self.vectors.wipe().await?;
            self.db.chunks.mark_all_pending().await?;
            return Ok(());
        }

        let store_ids = self.vectors.chunk_ids().await?;
        let chunks = self.db.chunks.list_all().await?;
        let live_ids: HashSet<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();

        let orphans: Vec<String> = store_ids
            .iter()
            .filter(|id| !live_ids.contains(id.as_str()))
            .cloned()
            .collect();
        if !orphans.is_empty() {
            info!(count = orphans.len(), "Evicting orphaned vectors");
            self.vectors.delete(&orphans).await?;
        }

        let missing: Vec<String> = chunks
            .iter()
            .filter(|c| c.is_embedded() && !store_ids.contains(&c.chunk_id))
            .map(|c| c.chunk_id.clone())
            .collect();
        if !missing.is_empty() {
            warn!(
                count = missing.len(),
                "Chunks flagged embedded without vectors; re-flagging as pending"
            );
            self.db.chunks.mark_pending(&missing).await?;
        }
        Ok(())
    }

    async fn embed_batch(&self, batch: &[Chunk], settings: &Settings) -> Result<()> {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let embeddings = with_retries("embed_batch", || self.embedder.embed(&texts)).await?;

        let records: Vec<VectorRecord> = batch
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                let mut record = VectorRecord::from_chunk(chunk, embedding);
                record.embedding_version = settings.embedding_model.clone();
                record
            })
            .collect();
        self.vectors.upsert(&records, Collection::Live).await?;

        let ids: Vec<String> = batch.iter().map(|c| c.chunk_id.clone()).collect();
        self.db
            .chunks
            .mark_embedded(&ids, &settings.embedding_model)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Reindex
    // =========================================================================

    /// Re-embed every chunk into a fresh temp collection and swap it live.
    /// The relational store is not mutated (beyond the embedded flags); on
    /// any failure the temp collection is dropped and the live one stays.
    pub async fn reindex(
        &self,
        settings: &Settings,
        cancel: CancelToken,
        progress: Sender<PipelineEvent>,
    ) -> Result<IngestCounts> {
        let mut counts = IngestCounts::default();
        self.preflight_embedding(settings).await?;

        let all = self.db.chunks.list_all().await?;
        if all.is_empty() {
            emit(&progress, "reindex", "No chunks to embed - database is empty").await;
            return Ok(counts);
        }

        emit(&progress, "reindex", "Re-embedding all chunks...").await;
        self.vectors.create_temp().await?;
        let total = all.len();

        for batch in all.chunks(EMBED_BATCH_SIZE) {
            if cancel.is_cancelled() {
                self.vectors.drop_temp().await?;
                counts.cancelled = true;
                return Ok(counts);
            }

            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embeddings = match with_retries("embed_batch", || self.embedder.embed(&texts)).await
            {
                Ok(embeddings) => embeddings,
                Err(e) => {
                    // Rollback: the live collection is untouched.
                    self.vectors.drop_temp().await?;
                    return Err(e);
                }
            };

            let records: Vec<VectorRecord> = batch
                .iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| {
                    let mut record = VectorRecord::from_chunk(chunk, embedding);
                    record.embedding_version = settings.embedding_model.clone();
                    record
                })
                .collect();
            if let Err(e) = self.vectors.upsert(&records, Collection::Temp).await {
                self.vectors.drop_temp().await?;
                return Err(e);
            }

            let ids: Vec<String> = batch.iter().map(|c| c.chunk_id.clone()).collect();
            self.db
                .chunks
                .mark_embedded(&ids, &settings.embedding_model)
                .await?;

            counts.chunks_embedded += batch.len() as i64;
            emit(
                &progress,
                "reindex",
                format!("Re-embedding: {}/{} chunks...", counts.chunks_embedded, total),
            )
            .await;
        }

        self.vectors.swap_from_temp().await?;
        info!(
            subsystem = "ingest",
            op = "reindex",
            chunk_count = counts.chunks_embedded,
            "Reindex complete"
        );
        Ok(counts)
    }

    // =========================================================================
    // Chat list refresh
    // =========================================================================

    /// Refresh the chat list from the source. When the source is offline
    /// this degrades to a cleanup of stale empty chat rows.
    pub async fn sync_chat_list(
        &self,
        progress: Sender<PipelineEvent>,
    ) -> Result<ChatListOutcome> {
        let mut outcome = ChatListOutcome::default();

        emit(&progress, "sync_chats", "Checking for new chats...").await;
        let status = self.source.status().await?;
        if !status.is_connected() {
            emit(&progress, "sync_chats", "Cleaning up list...").await;
            outcome.removed = self.db.chats.cleanup_empty().await?;
            return Ok(outcome);
        }

        let source_chats = self.source.list_chats().await?;
        emit(
            &progress,
            "sync_chats",
            format!("Checking {} dialogs...", source_chats.len()),
        )
        .await;

        let source_ids: HashSet<&str> = source_chats.iter().map(|c| c.chat_id.as_str()).collect();
        for chat in &source_chats {
            let created = self
                .db
                .chats
                .ensure(&chat.chat_id, &chat.chat_name, &chat.chat_type)
                .await?;
            if created {
                outcome.new += 1;
            } else {
                outcome.updated += 1;
            }
        }

        // Chats gone from the source are kept only while they still hold
        // messages (imported or previously synced).
        for chat in self.db.chats.list().await? {
            if source_ids.contains(chat.chat_id.as_str()) {
                continue;
            }
            if self.db.messages.count_for_chat(&chat.chat_id).await? == 0 {
                self.db.chats.remove(&chat.chat_id).await?;
                outcome.removed += 1;
            }
        }

        Ok(outcome)
    }
}
