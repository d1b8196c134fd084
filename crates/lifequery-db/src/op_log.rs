//! Operation log repository — the append-only history of sync / import /
//! reindex / process runs shown in the UI.

use std::sync::Arc;

use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use lifequery_core::{
    now_ts, IngestCounts, OperationKind, OperationLogEntry, OperationStatus, Result,
};

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> OperationLogEntry {
    OperationLogEntry {
        id: row.get("id"),
        operation: row.get("operation"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        status: row.get("status"),
        messages_added: row.get::<Option<i64>, _>("messages_added").unwrap_or(0),
        chunks_created: row.get::<Option<i64>, _>("chunks_created").unwrap_or(0),
        skipped_duplicate: row.get::<Option<i64>, _>("skipped_duplicate").unwrap_or(0),
        skipped_empty: row.get::<Option<i64>, _>("skipped_empty").unwrap_or(0),
        detail: row.get("detail"),
    }
}

#[derive(Clone)]
pub struct OpLogStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl OpLogStore {
    pub(crate) fn new(pool: SqlitePool, write_lock: Arc<Mutex<()>>) -> Self {
        Self { pool, write_lock }
    }

    /// Open a log entry with `status = running`, returning its id.
    pub async fn open(&self, kind: OperationKind) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            "INSERT INTO sync_log (operation, started_at, status) VALUES (?, ?, ?)",
        )
        .bind(kind.as_str())
        .bind(now_ts())
        .bind(OperationStatus::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Close a log entry with its final status, counters, and detail.
    pub async fn finish(
        &self,
        id: i64,
        status: OperationStatus,
        counts: &IngestCounts,
        detail: Option<&str>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            r#"
            UPDATE sync_log
            SET finished_at = ?, status = ?, messages_added = ?, chunks_created = ?,
                skipped_duplicate = ?, skipped_empty = ?, detail = ?
            WHERE id = ?
            "#,
        )
        .bind(now_ts())
        .bind(status.as_str())
        .bind(counts.messages_added)
        .bind(counts.chunks_created)
        .bind(counts.skipped_duplicate)
        .bind(counts.skipped_empty)
        .bind(detail)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The most recent entries, newest first.
    pub async fn tail(&self, limit: i64) -> Result<Vec<OperationLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, operation, started_at, finished_at, status,
                   messages_added, chunks_created, skipped_duplicate,
                   skipped_empty, detail
            FROM sync_log
            ORDER BY started_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_entry).collect())
    }

    /// The most recently written entry, for the stats endpoint.
    pub async fn last(&self) -> Result<Option<OperationLogEntry>> {
        let row = sqlx::query(
            r#"
            SELECT id, operation, started_at, finished_at, status,
                   messages_added, chunks_created, skipped_duplicate,
                   skipped_empty, detail
            FROM sync_log
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_entry))
    }
}
