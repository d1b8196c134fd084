//! Config and provider-profile repositories.
//!
//! The `config` table is the string-keyed backing store of the typed
//! [`lifequery_core::Settings`] view. The `providers` table keeps one
//! connection profile per LLM provider so switching back and forth does not
//! lose URLs, keys, or the last selected model.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::info;

use lifequery_core::{now_ts, Result, Settings, MASKED_VALUE};

/// One stored provider profile.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderProfile {
    pub id: String,
    pub name: String,
    pub provider_type: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub last_model: Option<String>,
}

impl ProviderProfile {
    /// Serialize with the API key replaced by the sentinel.
    pub fn masked(&self) -> Self {
        let mut profile = self.clone();
        if profile.api_key.as_deref().map(|k| !k.is_empty()).unwrap_or(false) {
            profile.api_key = Some(MASKED_VALUE.to_string());
        }
        profile
    }
}

#[derive(Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl ConfigStore {
    pub(crate) fn new(pool: SqlitePool, write_lock: Arc<Mutex<()>>) -> Self {
        Self { pool, write_lock }
    }

    /// Load the typed settings snapshot from the config table.
    pub async fn load_settings(&self) -> Result<Settings> {
        let rows = sqlx::query("SELECT key, value FROM config")
            .fetch_all(&self.pool)
            .await?;
        Ok(Settings::from_rows(rows.into_iter().map(|row| {
            (
                row.get::<String, _>("key"),
                row.get::<Option<String>, _>("value").unwrap_or_default(),
            )
        })))
    }

    pub async fn read(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.get::<Option<String>, _>("value")))
    }

    pub async fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut updates = HashMap::new();
        updates.insert(key.to_string(), value.to_string());
        self.write_many(&updates).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM config WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Atomically persist a batch of already-sanitized key/value updates,
    /// keeping the active provider profile coherent:
    /// - switching `chat_provider` pulls that profile's stored url/key/model
    ///   into config for keys not explicitly set in the same batch;
    /// - writes of `chat_url`/`chat_api_key`/`chat_model` sync back to the
    ///   active profile.
    pub async fn write_many(&self, updates: &HashMap<String, String>) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let active_provider = match updates.get("chat_provider") {
            Some(p) => p.clone(),
            None => self.load_settings().await?.chat_provider,
        };

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let now = now_ts();

        for (key, value) in updates {
            sqlx::query(
                "INSERT OR REPLACE INTO config (key, value, updated_at) VALUES (?, ?, ?)",
            )
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        if updates.contains_key("chat_provider") {
            let profile = sqlx::query(
                "SELECT base_url, api_key, last_model FROM providers WHERE id = ?",
            )
            .bind(&active_provider)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(profile) = profile {
                let pulls: [(&str, Option<String>); 3] = [
                    ("chat_url", profile.get("base_url")),
                    ("chat_api_key", profile.get("api_key")),
                    ("chat_model", profile.get("last_model")),
                ];
                for (cfg_key, stored) in pulls {
                    if updates.contains_key(cfg_key) {
                        continue;
                    }
                    if let Some(stored) = stored.filter(|v| !v.is_empty()) {
                        sqlx::query(
                            "INSERT OR REPLACE INTO config (key, value, updated_at) VALUES (?, ?, ?)",
                        )
                        .bind(cfg_key)
                        .bind(stored)
                        .bind(now)
                        .execute(&mut *tx)
                        .await?;
                    }
                }
            }
        }

        for (cfg_key, column) in [
            ("chat_url", "base_url"),
            ("chat_api_key", "api_key"),
            ("chat_model", "last_model"),
        ] {
            if let Some(value) = updates.get(cfg_key) {
                let sql = format!("UPDATE providers SET {column} = ?, updated_at = ? WHERE id = ?");
                sqlx::query(&sql)
                    .bind(value)
                    .bind(now)
                    .bind(&active_provider)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        info!(
            subsystem = "db",
            component = "config",
            keys = ?updates.keys().collect::<Vec<_>>(),
            provider = %active_provider,
            "Settings persisted"
        );
        Ok(())
    }

    /// Stored provider profiles, alphabetical.
    pub async fn list_providers(&self) -> Result<Vec<ProviderProfile>> {
        let rows = sqlx::query(
            "SELECT id, name, provider_type, base_url, api_key, last_model \
             FROM providers ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| ProviderProfile {
                id: row.get("id"),
                name: row.get("name"),
                provider_type: row.get("provider_type"),
                base_url: row.get("base_url"),
                api_key: row.get("api_key"),
                last_model: row.get("last_model"),
            })
            .collect())
    }

    pub async fn get_provider(&self, id: &str) -> Result<Option<ProviderProfile>> {
        Ok(self
            .list_providers()
            .await?
            .into_iter()
            .find(|p| p.id == id))
    }
}
