//! Operator-tunable settings stored next to the jobs they govern.
//!
//! Settings are read per job execution, so a `config set` takes effect on
//! the next attempt without restarting workers.

use sqlx::sqlite::SqlitePool;

use crate::error::Result;
use crate::store::Store;

/// Fallback values for keys that were never `set`.
const DEFAULTS: &[(&str, &str)] = &[("max_retries", "3"), ("backoff_base", "2")];

/// Key/value settings backed by the `config` table.
#[derive(Clone)]
pub struct ConfigStore {
    pool: SqlitePool,
}

impl ConfigStore {
    pub fn new(store: &Store) -> Self {
        Self {
            pool: store.pool().clone(),
        }
    }

    /// Stored value, or the built-in default, or `None`.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let stored = sqlx::query_scalar::<_, String>("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(stored.or_else(|| {
            DEFAULTS
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        }))
    }

    /// Integer view of a setting; absent or unparsable values read as 0.
    pub async fn get_int(&self, key: &str) -> Result<i64> {
        let value = self.get(key).await?;
        Ok(value.and_then(|v| v.trim().parse().ok()).unwrap_or(0))
    }

    /// Upsert a setting by key.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value)
            VALUES (?1, ?2)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
