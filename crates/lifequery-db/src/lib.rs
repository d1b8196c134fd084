//! # lifequery-db
//!
//! SQLite database layer for LifeQuery: the single authoritative store for
//! messages, chunks, chats, settings, and the operation log.
//!
//! Concurrency discipline: readers run in parallel; all writes go through
//! one in-process `tokio::sync::Mutex`, and every multi-statement operation
//! runs inside one transaction that fully commits or fully rolls back.

pub mod chats;
pub mod chunks;
pub mod config;
pub mod messages;
pub mod op_log;
pub mod pool;
pub mod schema;

use std::path::Path;
use std::sync::Arc;

use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::info;

use lifequery_core::{PendingStats, Result, Stats};

pub use chats::ChatStore;
pub use chunks::ChunkStore;
pub use config::{ConfigStore, ProviderProfile};
pub use messages::{InsertOutcome, MessageStore};
pub use op_log::OpLogStore;

/// Result of a chat deletion cascade. The caller evicts `chunk_ids` from
/// the vector store.
#[derive(Debug, Clone)]
pub struct ChatDeletion {
    pub messages_deleted: i64,
    pub chunks_deleted: i64,
    pub chunk_ids: Vec<String>,
}

/// Database facade bundling the repositories over one pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
    pub messages: MessageStore,
    pub chunks: ChunkStore,
    pub chats: ChatStore,
    pub config: ConfigStore,
    pub log: OpLogStore,
}

impl Database {
    /// Open (or create) the database at `path` and initialize the schema.
    pub async fn connect(path: &Path) -> Result<Self> {
        let pool = pool::create_pool(path).await?;
        Self::from_pool(pool).await
    }

    /// In-memory database for tests.
    pub async fn connect_memory() -> Result<Self> {
        let pool = pool::create_memory_pool().await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        schema::init_schema(&pool).await?;
        let write_lock = Arc::new(Mutex::new(()));
        Ok(Self {
            messages: MessageStore::new(pool.clone(), write_lock.clone()),
            chunks: ChunkStore::new(pool.clone(), write_lock.clone()),
            chats: ChatStore::new(pool.clone(), write_lock.clone()),
            config: ConfigStore::new(pool.clone(), write_lock.clone()),
            log: OpLogStore::new(pool.clone(), write_lock.clone()),
            pool,
            write_lock,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Liveness probe for the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Delete a chat's messages and chunks in one transaction.
    ///
    /// Chats whose messages all came from manual imports (or that have no
    /// messages at all) are removed entirely; chats backed by the live
    /// source are kept but marked excluded so a later sync does not silently
    /// re-ingest them.
    pub async fn delete_chat(&self, chat_id: &str) -> Result<ChatDeletion> {
        let sources = self.messages.sources_for_chat(chat_id).await?;
        let remove_record =
            sources.is_empty() || sources.iter().all(|s| s == "json_import");

        let chunk_rows = sqlx::query("SELECT chunk_id FROM chunks WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_all(&self.pool)
            .await?;
        let chunk_ids: Vec<String> = chunk_rows
            .into_iter()
            .map(|row| row.get("chunk_id"))
            .collect();

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let messages_deleted = sqlx::query("DELETE FROM messages WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&mut *tx)
            .await?
            .rows_affected() as i64;
        let chunks_deleted = sqlx::query("DELETE FROM chunks WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&mut *tx)
            .await?
            .rows_affected() as i64;

        if remove_record {
            sqlx::query("DELETE FROM chats WHERE chat_id = ?")
                .bind(chat_id)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query(
                "UPDATE chats SET included = 0, message_count = 0, last_chunked_at = NULL \
                 WHERE chat_id = ?",
            )
            .bind(chat_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(
            subsystem = "db",
            chat_id,
            messages_deleted,
            chunks_deleted,
            removed_record = remove_record,
            "Deleted chat"
        );
        Ok(ChatDeletion {
            messages_deleted,
            chunks_deleted,
            chunk_ids,
        })
    }

    /// Corpus statistics for the UI.
    pub async fn stats(&self) -> Result<Stats> {
        let message_count = self.messages.count().await?;
        let chunk_count = self.chunks.count().await?;
        let embedded_count = self.chunks.count_embedded().await?;
        let (chat_count, included_chat_count, excluded_chat_count) =
            self.chats.counts().await?;

        let last = self.log.last().await?;
        let (last_sync, last_sync_added) = last
            .map(|entry| (entry.finished_at, entry.messages_added))
            .unwrap_or((None, 0));

        Ok(Stats {
            message_count,
            chunk_count,
            embedded_count,
            chat_count,
            included_chat_count,
            excluded_chat_count,
            last_sync,
            last_sync_added,
        })
    }

    /// Counts of work waiting for the next process run.
    pub async fn pending_stats(&self) -> Result<PendingStats> {
        let unchunked_messages = self.chats.pending_message_count().await?;
        let unembedded_chunks = self.chunks.count_pending().await?;
        Ok(PendingStats {
            unchunked_messages,
            unembedded_chunks,
            has_pending: unchunked_messages > 0 || unembedded_chunks > 0,
        })
    }
}
