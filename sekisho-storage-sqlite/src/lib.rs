//! SQLite storage backend for sekisho.
//!
//! Records live in a single `login_attempts` table keyed by the storage key.
//! Timestamps are stored as Unix milliseconds. Failures are counted with a single
//! `INSERT .. ON CONFLICT DO UPDATE .. RETURNING` statement, which SQLite
//! executes atomically, so concurrent failures for one key are never lost.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sekisho_core::{RateLimiter, RateLimiterConfig};
//! use sekisho_storage_sqlite::SqliteAttemptStore;
//!
//! # async fn run() -> Result<(), sekisho_core::Error> {
//! let store = SqliteAttemptStore::connect("sqlite://attempts.db").await?;
//! store.migrate().await?;
//!
//! let limiter = RateLimiter::new(Arc::new(store), RateLimiterConfig::default());
//! # Ok(())
//! # }
//! ```

mod migrations;

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sekisho_core::{
    AttemptRecord, AttemptStore, Error,
    error::{StorageError, StorageResultExt},
    record::expiry_after,
};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

/// [`AttemptStore`] backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteAttemptStore {
    pool: SqlitePool,
}

/// Internal struct for query results
#[derive(Debug, sqlx::FromRow)]
struct SqliteAttemptRecord {
    failure_count: i64,
    window_expires_at: i64,
}

impl TryFrom<SqliteAttemptRecord> for AttemptRecord {
    type Error = Error;

    fn try_from(row: SqliteAttemptRecord) -> Result<Self, Self::Error> {
        let failure_count = u32::try_from(row.failure_count).map_err(|_| {
            StorageError::Serialization(format!("invalid failure count: {}", row.failure_count))
        })?;
        let window_expires_at =
            DateTime::from_timestamp_millis(row.window_expires_at).ok_or_else(|| {
                StorageError::Serialization(format!(
                    "invalid window expiry: {}",
                    row.window_expires_at
                ))
            })?;

        Ok(AttemptRecord {
            failure_count,
            window_expires_at,
        })
    }
}

impl SqliteAttemptStore {
    /// Create a store over an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url`.
    ///
    /// In-memory databases are private to their connection, so the pool is
    /// limited to one connection for them.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let options = SqliteConnectOptions::from_str(url)
            .map_connection_err("Invalid SQLite connection string")?
            .create_if_missing(true);

        let max_connections = if url.contains(":memory:") || url.contains("mode=memory") {
            1
        } else {
            SqlitePoolOptions::new().get_max_connections()
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_connection_err("Failed to connect to SQLite")?;

        Ok(Self::new(pool))
    }

    /// Create the `login_attempts` table and its index if they do not exist.
    pub async fn migrate(&self) -> Result<(), Error> {
        migrations::migrate(&self.pool).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            Error::Storage(StorageError::Migration(
                "Failed to run migrations".to_string(),
            ))
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl AttemptStore for SqliteAttemptStore {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<AttemptRecord>, Error> {
        let row = sqlx::query_as::<_, SqliteAttemptRecord>(
            r#"
            SELECT failure_count, window_expires_at
            FROM login_attempts
            WHERE key = ? AND window_expires_at > ?
            "#,
        )
        .bind(key)
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await
        .map_db_err("Failed to get login attempts")?;

        row.map(AttemptRecord::try_from).transpose()
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        record: &AttemptRecord,
        _ttl: Duration,
    ) -> Result<(), Error> {
        // The row expires with the record; purge_expired removes it afterwards.
        sqlx::query(
            r#"
            INSERT INTO login_attempts (key, failure_count, window_expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                failure_count = excluded.failure_count,
                window_expires_at = excluded.window_expires_at
            "#,
        )
        .bind(key)
        .bind(i64::from(record.failure_count))
        .bind(record.window_expires_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_db_err("Failed to store login attempts")?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM login_attempts WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_db_err("Failed to clear login attempts")?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment(
        &self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<AttemptRecord, Error> {
        let now_ms = now.timestamp_millis();
        let expires_ms = expiry_after(now, ttl)?.timestamp_millis();

        let row = sqlx::query_as::<_, SqliteAttemptRecord>(
            r#"
            INSERT INTO login_attempts (key, failure_count, window_expires_at)
            VALUES (?1, 1, ?3)
            ON CONFLICT (key) DO UPDATE SET
                failure_count = CASE
                    WHEN login_attempts.window_expires_at > ?2
                    THEN login_attempts.failure_count + 1
                    ELSE 1
                END,
                window_expires_at = CASE
                    WHEN login_attempts.window_expires_at > ?2
                    THEN MAX(login_attempts.window_expires_at, excluded.window_expires_at)
                    ELSE excluded.window_expires_at
                END
            RETURNING failure_count, window_expires_at
            "#,
        )
        .bind(key)
        .bind(now_ms)
        .bind(expires_ms)
        .fetch_one(&self.pool)
        .await
        .map_db_err("Failed to record failed login attempt")?;

        row.try_into()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM login_attempts WHERE window_expires_at <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_db_err("Failed to purge expired login attempts")?;

        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_db_err("SQLite health check failed")?;
        Ok(())
    }
}
