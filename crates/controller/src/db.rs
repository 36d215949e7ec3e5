use anyhow::{Context, Result};
use irrigation_core::{Store, StoreFailure};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::warn;

/// SQLite-backed key/value store for the irrigator's persisted settings.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// db_url examples:
    /// - "sqlite:/home/pi/irrigation/irrigation.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }
}

fn store_failure(op: &str, key: &str, err: sqlx::Error) -> StoreFailure {
    warn!(op, key, "kv store error: {err}");
    StoreFailure
}

impl Store for SqliteStore {
    async fn get_data(&self, key: &str, default: &str) -> Result<String, StoreFailure> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_failure("get", key, e))?;
        Ok(row.map_or_else(|| default.to_string(), |(value,)| value))
    }

    async fn set_data(&self, key: &str, value: &str) -> Result<(), StoreFailure> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| store_failure("set", key, e))?;
        Ok(())
    }

    async fn remove_data(&self, key: &str) -> Result<(), StoreFailure> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| store_failure("remove", key, e))?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
