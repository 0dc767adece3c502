//! Tests for the Sekisho builder pattern

use std::sync::Arc;

use chrono::Duration;
use sekisho::{MemoryAttemptStore, RateLimiterConfig, SekishoBuilder, SekishoBuilderError};

#[tokio::test]
async fn test_builder_with_memory() {
    let limiter = SekishoBuilder::new()
        .with_memory()
        .build()
        .await
        .expect("Failed to build limiter");

    assert!(limiter.is_enabled());
    assert_eq!(limiter.config().threshold, 5);
    assert_eq!(limiter.config().window, Duration::minutes(15));
}

#[tokio::test]
async fn test_builder_with_shared_store() {
    let store = Arc::new(MemoryAttemptStore::new());

    let first = SekishoBuilder::new()
        .with_store(Arc::clone(&store))
        .build()
        .await
        .expect("Failed to build limiter");
    let second = SekishoBuilder::new()
        .with_store(Arc::clone(&store))
        .build()
        .await
        .expect("Failed to build limiter");

    first.record_failure("198.51.100.4").await.unwrap();
    let status = second.status("198.51.100.4").await.unwrap();
    assert_eq!(status.failed_attempts, 1);
}

#[tokio::test]
async fn test_builder_overrides() {
    let limiter = SekishoBuilder::new()
        .with_memory()
        .with_threshold(3)
        .with_window(Duration::minutes(5))
        .with_storage_timeout(std::time::Duration::from_millis(250))
        .fail_open(false)
        .with_key_prefix("myapp:attempts:")
        .build()
        .await
        .expect("Failed to build limiter");

    let config = limiter.config();
    assert_eq!(config.threshold, 3);
    assert_eq!(config.window, Duration::minutes(5));
    assert_eq!(config.storage_timeout, std::time::Duration::from_millis(250));
    assert!(!config.fail_open_on_storage_error);
    assert_eq!(config.key_prefix, "myapp:attempts:");
}

#[tokio::test]
async fn test_builder_rejects_invalid_config() {
    let result = SekishoBuilder::new()
        .with_memory()
        .with_threshold(0)
        .build()
        .await;

    assert!(matches!(
        result,
        Err(SekishoBuilderError::InvalidConfiguration(_))
    ));
}

#[tokio::test]
async fn test_builder_disabled() {
    let limiter = SekishoBuilder::new()
        .with_memory()
        .with_config(RateLimiterConfig::disabled())
        .build()
        .await
        .expect("Failed to build limiter");

    for _ in 0..10 {
        limiter.record_failure("192.0.2.1").await.unwrap();
    }
    assert!(limiter.check_allowed("192.0.2.1").await.unwrap().is_allowed());
    assert!(limiter.store().is_empty());
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_builder_with_sqlite() {
    let limiter = SekishoBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite")
        .build()
        .await
        .expect("Failed to build limiter");

    let status = limiter.record_failure("192.0.2.10").await.unwrap();
    assert_eq!(status.failed_attempts, 1);
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_builder_with_sqlite_pool() {
    // In-memory databases are per connection, so keep the pool to one.
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite");

    let limiter = SekishoBuilder::new()
        .with_sqlite_pool(pool)
        .await
        .expect("Failed to create schema")
        .build()
        .await
        .expect("Failed to build limiter");

    limiter.record_failure("192.0.2.11").await.unwrap();
    assert!(limiter.unlock("192.0.2.11").await.is_ok());
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_builder_with_bad_sqlite_url() {
    let result = SekishoBuilder::new()
        .with_sqlite("postgres://localhost/not-sqlite")
        .await;

    assert!(matches!(
        result,
        Err(SekishoBuilderError::StorageConnection(_))
    ));
}
