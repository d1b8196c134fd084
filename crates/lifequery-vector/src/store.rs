//! SQLite-backed vector store.
//!
//! Each collection is one table in `vectors.db`: the live collection plus a
//! temp collection written during reindex. The swap is one transaction that
//! drops the live table and renames the temp into its place, so a
//! concurrent reader sees either the old collection or the new one — never
//! an empty store. A temp table left behind by a crash is dropped on open.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use lifequery_core::{Error, Result, RetrievedChunk, VectorRecord};

use crate::blob::{blob_to_vec, cosine_distance, vec_to_blob};

/// Name of the database file under the data directory.
pub const VECTOR_DB_FILE: &str = "vectors.db";

/// Collection to address in an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Live,
    Temp,
}

impl Collection {
    fn table(&self) -> &'static str {
        match self {
            Collection::Live => "vectors",
            Collection::Temp => "vectors_temp",
        }
    }
}

/// Metadata predicate applied inside a query.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    /// Restrict to these chats. `Some(empty)` matches nothing.
    pub chat_ids: Option<HashSet<String>>,
    /// Require `timestamp_start >= start_ts`.
    pub start_ts: Option<i64>,
    /// Require `timestamp_end <= end_ts`.
    pub end_ts: Option<i64>,
}

#[derive(Clone)]
pub struct VectorStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl VectorStore {
    /// Open the store under `data_dir`, creating the live collection and
    /// removing any stale temp collection from an interrupted reindex.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let pool = crate::pool::create_pool(&data_dir.join(VECTOR_DB_FILE)).await?;
        let store = Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        };
        store.create_table(Collection::Live).await?;
        if store.table_exists(Collection::Temp).await? {
            warn!("Removing stale temp collection from an interrupted reindex");
            store.drop_temp().await?;
        }
        info!(subsystem = "vector", op = "open", "Vector store ready");
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn open_memory() -> Result<Self> {
        let pool = crate::pool::create_memory_pool().await?;
        let store = Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        };
        store.create_table(Collection::Live).await?;
        Ok(store)
    }

    async fn create_table(&self, collection: Collection) -> Result<()> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                chunk_id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL,
                chat_name TEXT,
                participants TEXT NOT NULL,
                timestamp_start INTEGER NOT NULL,
                timestamp_end INTEGER NOT NULL,
                message_count INTEGER NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                embedding_version TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
            collection.table()
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn table_exists(&self, collection: Collection) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(collection.table())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") > 0)
    }

    /// Insert or replace records in a collection.
    pub async fn upsert(&self, records: &[VectorRecord], collection: Collection) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let dim = records[0].embedding.len();
        if records.iter().any(|r| r.embedding.len() != dim) {
            return Err(Error::Invariant(
                "upsert batch mixes embedding dimensions".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            r#"
            INSERT OR REPLACE INTO {}
                (chunk_id, chat_id, chat_name, participants, timestamp_start,
                 timestamp_end, message_count, content, content_hash,
                 embedding_version, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            collection.table()
        );
        for record in records {
            sqlx::query(&sql)
                .bind(&record.chunk_id)
                .bind(&record.chat_id)
                .bind(&record.chat_name)
                .bind(serde_json::to_string(&record.participants)?)
                .bind(record.timestamp_start)
                .bind(record.timestamp_end)
                .bind(record.message_count)
                .bind(&record.content)
                .bind(&record.content_hash)
                .bind(&record.embedding_version)
                .bind(vec_to_blob(&record.embedding))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!(
            subsystem = "vector",
            op = "upsert",
            result_count = records.len(),
            "Upserted vector records"
        );
        Ok(())
    }

    /// Delete records from the live collection.
    pub async fn delete(&self, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let placeholders = vec!["?"; chunk_ids.len()].join(",");
        let sql = format!("DELETE FROM vectors WHERE chunk_id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in chunk_ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    /// Cosine nearest-neighbor query over the live collection: up to `k`
    /// records passing the filter, closest first.
    pub async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<RetrievedChunk>> {
        if let Some(chat_ids) = &filter.chat_ids {
            if chat_ids.is_empty() {
                return Ok(vec![]);
            }
        }

        let mut sql = String::from(
            "SELECT chunk_id, chat_id, chat_name, participants, timestamp_start, \
             timestamp_end, message_count, content, embedding FROM vectors",
        );
        let mut clauses: Vec<String> = Vec::new();
        if let Some(chat_ids) = &filter.chat_ids {
            let placeholders = vec!["?"; chat_ids.len()].join(",");
            clauses.push(format!("chat_id IN ({placeholders})"));
        }
        if filter.start_ts.is_some() {
            clauses.push("timestamp_start >= ?".to_string());
        }
        if filter.end_ts.is_some() {
            clauses.push("timestamp_end <= ?".to_string());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let mut query = sqlx::query(&sql);
        if let Some(chat_ids) = &filter.chat_ids {
            for id in chat_ids {
                query = query.bind(id.clone());
            }
        }
        if let Some(start) = filter.start_ts {
            query = query.bind(start);
        }
        if let Some(end) = filter.end_ts {
            query = query.bind(end);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut scored: Vec<RetrievedChunk> = rows
            .into_iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let stored = blob_to_vec(&blob);
                let participants_json: String = row.get("participants");
                RetrievedChunk {
                    chunk_id: row.get("chunk_id"),
                    chat_id: row.get("chat_id"),
                    chat_name: row.get("chat_name"),
                    participants: serde_json::from_str(&participants_json).unwrap_or_default(),
                    timestamp_start: row.get("timestamp_start"),
                    timestamp_end: row.get("timestamp_end"),
                    message_count: row.get("message_count"),
                    content: row.get("content"),
                    distance: cosine_distance(embedding, &stored),
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        debug!(
            subsystem = "vector",
            op = "query",
            result_count = scored.len(),
            "Vector query complete"
        );
        Ok(scored)
    }

    /// Create a fresh temp collection for a reindex run.
    pub async fn create_temp(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DROP TABLE IF EXISTS vectors_temp")
            .execute(&self.pool)
            .await?;
        drop(_guard);
        self.create_table(Collection::Temp).await?;
        info!(subsystem = "vector", "Created temp collection");
        Ok(())
    }

    /// Atomically retire the live collection and promote the temp one.
    /// Fails (leaving the live collection untouched) when no temp exists.
    pub async fn swap_from_temp(&self) -> Result<()> {
        if !self.table_exists(Collection::Temp).await? {
            return Err(Error::Invariant(
                "reindex swap requested but no temp collection exists".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DROP TABLE IF EXISTS vectors")
            .execute(&mut *tx)
            .await?;
        sqlx::query("ALTER TABLE vectors_temp RENAME TO vectors")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(subsystem = "vector", "Collection swap complete");
        Ok(())
    }

    /// Drop the temp collection (reindex rollback).
    pub async fn drop_temp(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DROP TABLE IF EXISTS vectors_temp")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete and recreate the live collection.
    pub async fn wipe(&self) -> Result<()> {
        {
            let _guard = self.write_lock.lock().await;
            sqlx::query("DROP TABLE IF EXISTS vectors")
                .execute(&self.pool)
                .await?;
        }
        self.create_table(Collection::Live).await?;
        info!(subsystem = "vector", "Live collection wiped");
        Ok(())
    }

    pub async fn count(&self, collection: Collection) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", collection.table());
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.get("n"))
    }

    /// All chunk ids in the live collection.
    pub async fn chunk_ids(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT chunk_id FROM vectors")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("chunk_id")).collect())
    }

    /// `chunk_id -> (content_hash, embedding_version)` for the live
    /// collection, used to detect changed chunks and model switches.
    pub async fn stored_fingerprints(&self) -> Result<HashMap<String, (String, String)>> {
        let rows = sqlx::query("SELECT chunk_id, content_hash, embedding_version FROM vectors")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.get("chunk_id"),
                    (row.get("content_hash"), row.get("embedding_version")),
                )
            })
            .collect())
    }
}
