//! Schema for the SQLite attempt store.

use sqlx::SqlitePool;

/// Statements applied in order by [`migrate`]. Each one is idempotent.
const SCHEMA: &[(&str, &str)] = &[
    (
        "create_login_attempts",
        r#"
        CREATE TABLE IF NOT EXISTS login_attempts (
            key TEXT PRIMARY KEY NOT NULL,
            failure_count INTEGER NOT NULL CHECK (failure_count > 0),
            window_expires_at INTEGER NOT NULL
        )
        "#,
    ),
    (
        "index_login_attempts_expiry",
        r#"
        CREATE INDEX IF NOT EXISTS idx_login_attempts_window_expires_at
        ON login_attempts (window_expires_at)
        "#,
    ),
];

pub(crate) async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    for (name, statement) in SCHEMA {
        tracing::debug!(migration = *name, "Applying migration");
        sqlx::query(*statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    tracing::info!("Login attempt schema is up to date");
    Ok(())
}
