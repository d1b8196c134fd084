//! Schema initialization and migrations.

use sqlx::SqlitePool;
use tracing::{debug, info};

use lifequery_core::{now_ts, Result};

const SCHEMA_SQL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id TEXT NOT NULL,
        chat_id TEXT NOT NULL,
        chat_name TEXT,
        sender_id TEXT,
        sender_name TEXT,
        text TEXT,
        timestamp INTEGER NOT NULL,
        source TEXT NOT NULL,
        imported_at INTEGER NOT NULL,
        UNIQUE(message_id, chat_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        chunk_id TEXT UNIQUE NOT NULL,
        chat_id TEXT NOT NULL,
        chat_name TEXT,
        participants TEXT NOT NULL,
        timestamp_start INTEGER NOT NULL,
        timestamp_end INTEGER NOT NULL,
        message_count INTEGER NOT NULL,
        content TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        embedding_version TEXT NOT NULL,
        embedded_at INTEGER
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chats (
        chat_id TEXT PRIMARY KEY,
        chat_name TEXT,
        chat_type TEXT,
        included INTEGER DEFAULT 1,
        message_count INTEGER DEFAULT 0,
        last_message_at INTEGER,
        last_chunked_at INTEGER,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS config (
        key TEXT PRIMARY KEY,
        value TEXT,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS providers (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        provider_type TEXT NOT NULL,
        base_url TEXT,
        api_key TEXT,
        last_model TEXT,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        operation TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        finished_at INTEGER,
        status TEXT,
        messages_added INTEGER,
        chunks_created INTEGER,
        skipped_duplicate INTEGER,
        skipped_empty INTEGER,
        detail TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_messages_chat_id ON messages(chat_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_chat_id ON chunks(chat_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_content_hash ON chunks(content_hash)",
];

/// Default LLM provider profiles seeded once; `INSERT OR IGNORE` keeps
/// user edits.
const PROVIDER_SEEDS: &[(&str, &str, &str, &str, &str)] = &[
    (
        "ollama",
        "Ollama (Local)",
        "ollama",
        "http://ollama:11434",
        "qwen3:8b",
    ),
    (
        "openai",
        "OpenAI",
        "openai",
        "https://api.openai.com/v1",
        "gpt-4o-mini",
    ),
    (
        "openrouter",
        "OpenRouter (Cloud)",
        "openrouter",
        "https://openrouter.ai/api/v1",
        "",
    ),
];

/// Create all tables, indexes, and seeds; run column migrations for
/// databases created by older versions.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA_SQL {
        sqlx::query(statement).execute(pool).await?;
    }

    seed_providers(pool).await?;

    // Migration: chats.last_chunked_at for databases predating chunk
    // coverage tracking. SQLite has no ADD COLUMN IF NOT EXISTS.
    match sqlx::query("ALTER TABLE chats ADD COLUMN last_chunked_at INTEGER")
        .execute(pool)
        .await
    {
        Ok(_) => info!("Added last_chunked_at column to chats table"),
        Err(e) => {
            let msg = e.to_string().to_lowercase();
            if !msg.contains("duplicate column") {
                debug!(error = %e, "last_chunked_at migration skipped");
            }
        }
    }

    info!(subsystem = "db", op = "init", "Database schema initialized");
    Ok(())
}

async fn seed_providers(pool: &SqlitePool) -> Result<()> {
    let now = now_ts();
    for (id, name, provider_type, base_url, model) in PROVIDER_SEEDS {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO providers
                (id, name, provider_type, base_url, api_key, last_model, updated_at)
            VALUES (?, ?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(provider_type)
        .bind(base_url)
        .bind(model)
        .bind(now)
        .execute(pool)
        .await?;
    }
    Ok(())
}
