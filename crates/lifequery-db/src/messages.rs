//! Message repository.
//!
//! Messages are append-only: rows are inserted by ingest, never updated,
//! and deleted only by a chat deletion cascade.

use std::sync::Arc;

use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::debug;

use lifequery_core::{now_ts, IncomingMessage, Message, Result};

/// Outcome of a batch insert.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertOutcome {
    pub inserted: i64,
    pub duplicates: i64,
}

#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl MessageStore {
    pub(crate) fn new(pool: SqlitePool, write_lock: Arc<Mutex<()>>) -> Self {
        Self { pool, write_lock }
    }

    /// Insert a batch of messages in one transaction. Duplicates on the
    /// `(chat_id, message_id)` natural key are silently skipped and counted.
    pub async fn insert_batch(
        &self,
        messages: &[IncomingMessage],
        source: &str,
    ) -> Result<InsertOutcome> {
        if messages.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let imported_at = now_ts();
        let mut outcome = InsertOutcome::default();

        for msg in messages {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO messages
                    (message_id, chat_id, chat_name, sender_id, sender_name,
                     text, timestamp, source, imported_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&msg.message_id)
            .bind(&msg.chat_id)
            .bind(&msg.chat_name)
            .bind(&msg.sender_id)
            .bind(&msg.sender_name)
            .bind(&msg.text)
            .bind(msg.timestamp)
            .bind(source)
            .bind(imported_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                outcome.inserted += 1;
            } else {
                outcome.duplicates += 1;
            }
        }

        tx.commit().await?;
        debug!(
            subsystem = "db",
            component = "messages",
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            "Message batch persisted"
        );
        Ok(outcome)
    }

    /// List a chat's messages with `timestamp > after_ts`, ascending.
    pub async fn list_for_chat(&self, chat_id: &str, after_ts: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, chat_id, chat_name, sender_id, sender_name,
                   text, timestamp, source
            FROM messages
            WHERE chat_id = ? AND timestamp > ?
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(chat_id)
        .bind(after_ts)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Message {
                message_id: row.get("message_id"),
                chat_id: row.get("chat_id"),
                chat_name: row.get("chat_name"),
                sender_id: row.get("sender_id"),
                sender_name: row.get("sender_name"),
                text: row.get::<Option<String>, _>("text").unwrap_or_default(),
                timestamp: row.get("timestamp"),
                source: row.get("source"),
            })
            .collect())
    }

    /// The highest numeric message id stored for a chat, used to resume a
    /// source sync where the last one stopped.
    pub async fn last_message_id(&self, chat_id: &str) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT MAX(CAST(message_id AS INTEGER)) AS last_id FROM messages WHERE chat_id = ?",
        )
        .bind(chat_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("last_id"))
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn count_for_chat(&self, chat_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Distinct `source` values present for a chat (e.g. to decide whether
    /// a deleted chat row can be removed entirely).
    pub async fn sources_for_chat(&self, chat_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT source FROM messages WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("source")).collect())
    }
}
