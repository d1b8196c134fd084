//! Chunk repository.
//!
//! Chunks are content-addressed: `content_hash` is unique across live rows,
//! so re-chunking the same messages is a no-op. A chunk is replaced (new id,
//! new hash), never updated in place.

use std::sync::Arc;

use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::debug;

use lifequery_core::{now_ts, Chunk, Result};

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    let participants_json: String = row.get("participants");
    Chunk {
        chunk_id: row.get("chunk_id"),
        chat_id: row.get("chat_id"),
        chat_name: row.get("chat_name"),
        participants: serde_json::from_str(&participants_json).unwrap_or_default(),
        timestamp_start: row.get("timestamp_start"),
        timestamp_end: row.get("timestamp_end"),
        message_count: row.get("message_count"),
        content: row.get("content"),
        content_hash: row.get("content_hash"),
        embedding_version: row.get("embedding_version"),
        embedded_at: row.get("embedded_at"),
    }
}

const CHUNK_COLUMNS: &str = "chunk_id, chat_id, chat_name, participants, timestamp_start, \
     timestamp_end, message_count, content, content_hash, embedding_version, embedded_at";

#[derive(Clone)]
pub struct ChunkStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl ChunkStore {
    pub(crate) fn new(pool: SqlitePool, write_lock: Arc<Mutex<()>>) -> Self {
        Self { pool, write_lock }
    }

    /// Insert a chat's freshly sealed chunks and advance the chat's chunk
    /// coverage marker in the same transaction. Chunks whose hash is
    /// already live are skipped. Returns the number actually inserted.
    pub async fn insert_for_chat(
        &self,
        chat_id: &str,
        chunks: &[Chunk],
        last_chunked_at: Option<i64>,
    ) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0i64;

        for chunk in chunks {
            let existing = sqlx::query("SELECT id FROM chunks WHERE content_hash = ?")
                .bind(&chunk.content_hash)
                .fetch_optional(&mut *tx)
                .await?;
            if existing.is_some() {
                debug!(
                    subsystem = "db",
                    component = "chunks",
                    content_hash = %chunk.content_hash,
                    "Skipping duplicate chunk"
                );
                continue;
            }

            sqlx::query(
                r#"
                INSERT INTO chunks
                    (chunk_id, chat_id, chat_name, participants, timestamp_start,
                     timestamp_end, message_count, content, content_hash,
                     embedding_version, embedded_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.chat_id)
            .bind(&chunk.chat_name)
            .bind(serde_json::to_string(&chunk.participants)?)
            .bind(chunk.timestamp_start)
            .bind(chunk.timestamp_end)
            .bind(chunk.message_count)
            .bind(&chunk.content)
            .bind(&chunk.content_hash)
            .bind(&chunk.embedding_version)
            .execute(&mut *tx)
            .await?;
            inserted += 1;
        }

        if let Some(ts) = last_chunked_at {
            sqlx::query("UPDATE chats SET last_chunked_at = ? WHERE chat_id = ?")
                .bind(ts)
                .bind(chat_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Chunks with no vector yet (`embedded_at IS NULL`), oldest first.
    pub async fn list_pending(&self, limit: Option<i64>) -> Result<Vec<Chunk>> {
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks WHERE embedded_at IS NULL \
             ORDER BY timestamp_start ASC LIMIT ?"
        );
        let rows = sqlx::query(&sql)
            .bind(limit.unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    /// Every live chunk, oldest first. Used by reindex.
    pub async fn list_all(&self) -> Result<Vec<Chunk>> {
        let sql = format!("SELECT {CHUNK_COLUMNS} FROM chunks ORDER BY timestamp_start ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    /// Flip the embedded flag for a set of chunks. The transition is atomic
    /// per chunk; the version records the model that produced the vectors.
    pub async fn mark_embedded(&self, chunk_ids: &[String], version: &str) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let placeholders = vec!["?"; chunk_ids.len()].join(",");
        let sql = format!(
            "UPDATE chunks SET embedded_at = ?, embedding_version = ? \
             WHERE chunk_id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(now_ts()).bind(version);
        for id in chunk_ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    /// Clear the embedded flag on specific chunks (their vectors are gone).
    pub async fn mark_pending(&self, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let placeholders = vec!["?"; chunk_ids.len()].join(",");
        let sql = format!(
            "UPDATE chunks SET embedded_at = NULL WHERE chunk_id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql);
        for id in chunk_ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    /// Clear the embedded flag on every chunk (a wiped vector store makes
    /// them all pending again).
    pub async fn mark_all_pending(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("UPDATE chunks SET embedded_at = NULL")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn count_embedded(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM chunks WHERE embedded_at IS NOT NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn count_pending(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM chunks WHERE embedded_at IS NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}
