//! Chat metadata repository.

use std::collections::HashSet;
use std::sync::Arc;

use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::info;

use lifequery_core::{now_ts, Chat, Result};

fn row_to_chat(row: &sqlx::sqlite::SqliteRow) -> Chat {
    Chat {
        chat_id: row.get("chat_id"),
        chat_name: row.get("chat_name"),
        chat_type: row.get("chat_type"),
        included: row.get::<i64, _>("included") != 0,
        message_count: row.get::<Option<i64>, _>("message_count").unwrap_or(0),
        last_message_at: row.get("last_message_at"),
        last_chunked_at: row.get("last_chunked_at"),
        created_at: row.get("created_at"),
    }
}

const CHAT_COLUMNS: &str = "chat_id, chat_name, chat_type, included, message_count, \
     last_message_at, last_chunked_at, created_at";

#[derive(Clone)]
pub struct ChatStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl ChatStore {
    pub(crate) fn new(pool: SqlitePool, write_lock: Arc<Mutex<()>>) -> Self {
        Self { pool, write_lock }
    }

    /// Create or refresh a chat entry. New chats start included; the
    /// inclusion flag of existing chats is never touched here.
    pub async fn upsert(
        &self,
        chat_id: &str,
        chat_name: &str,
        chat_type: &str,
        message_count: i64,
        last_message_at: i64,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO chats
                (chat_id, chat_name, chat_type, included, message_count,
                 last_message_at, created_at)
            VALUES (?, ?, ?, 1, ?, ?, ?)
            ON CONFLICT(chat_id) DO UPDATE SET
                chat_name = excluded.chat_name,
                chat_type = excluded.chat_type,
                message_count = excluded.message_count,
                last_message_at = MAX(IFNULL(chats.last_message_at, 0),
                                      excluded.last_message_at)
            "#,
        )
        .bind(chat_id)
        .bind(chat_name)
        .bind(chat_type)
        .bind(message_count)
        .bind(last_message_at)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Make sure a chat row exists, refreshing only its name and type.
    /// Counts and the inclusion flag are left alone. Returns true when the
    /// chat was newly created.
    pub async fn ensure(&self, chat_id: &str, chat_name: &str, chat_type: &str) -> Result<bool> {
        let existed = self.get(chat_id).await?.is_some();
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            INSERT INTO chats
                (chat_id, chat_name, chat_type, included, message_count,
                 last_message_at, created_at)
            VALUES (?, ?, ?, 1, 0, 0, ?)
            ON CONFLICT(chat_id) DO UPDATE SET
                chat_name = excluded.chat_name,
                chat_type = excluded.chat_type
            "#,
        )
        .bind(chat_id)
        .bind(chat_name)
        .bind(chat_type)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(!existed)
    }

    /// Delete one chat row (metadata only; messages and chunks are handled
    /// by the deletion cascade).
    pub async fn remove(&self, chat_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM chats WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, chat_id: &str) -> Result<Option<Chat>> {
        let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE chat_id = ?");
        let row = sqlx::query(&sql)
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_chat))
    }

    /// All chats, most recently active first.
    pub async fn list(&self) -> Result<Vec<Chat>> {
        let sql =
            format!("SELECT {CHAT_COLUMNS} FROM chats ORDER BY last_message_at DESC, chat_id ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_chat).collect())
    }

    /// Toggle the inclusion mask. Idempotent.
    pub async fn set_included(&self, chat_id: &str, included: bool) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE chats SET included = ? WHERE chat_id = ?")
            .bind(included as i64)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Chat ids with `included = true` — the retrieval inclusion mask.
    pub async fn included_ids(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT chat_id FROM chats WHERE included = 1")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("chat_id")).collect())
    }

    pub async fn excluded_ids(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT chat_id FROM chats WHERE included = 0")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("chat_id")).collect())
    }

    /// Ids of chats that have messages newer than their chunk coverage
    /// marker and are included — the chats the chunk stage must visit.
    pub async fn ids_with_pending_messages(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT c.chat_id
            FROM chats c
            JOIN messages m ON m.chat_id = c.chat_id
            WHERE c.included = 1
              AND m.timestamp > IFNULL(c.last_chunked_at, -1)
            ORDER BY c.chat_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.get("chat_id")).collect())
    }

    /// Count of messages not yet covered by chunking, across included chats.
    pub async fn pending_message_count(&self) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
            FROM messages m
            JOIN chats c ON c.chat_id = m.chat_id
            WHERE c.included = 1
              AND m.timestamp > IFNULL(c.last_chunked_at, -1)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    /// Remove chat rows that have neither metadata counts nor stored
    /// messages (stale discovery leftovers).
    pub async fn cleanup_empty(&self) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r#"
            DELETE FROM chats
            WHERE (message_count < 1 OR message_count IS NULL)
              AND NOT EXISTS (SELECT 1 FROM messages WHERE messages.chat_id = chats.chat_id)
            "#,
        )
        .execute(&self.pool)
        .await?;
        let removed = result.rows_affected() as i64;
        if removed > 0 {
            info!(removed, "Removed stale empty chats");
        }
        Ok(removed)
    }

    pub async fn counts(&self) -> Result<(i64, i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   SUM(CASE WHEN included = 1 THEN 1 ELSE 0 END) AS included,
                   SUM(CASE WHEN included = 0 THEN 1 ELSE 0 END) AS excluded
            FROM chats
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok((
            row.get::<i64, _>("total"),
            row.get::<Option<i64>, _>("included").unwrap_or(0),
            row.get::<Option<i64>, _>("excluded").unwrap_or(0),
        ))
    }
}
