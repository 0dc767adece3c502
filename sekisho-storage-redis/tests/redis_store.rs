//! Tests against a real Redis server started with testcontainers.
//!
//! These need a Docker daemon and are ignored by default:
//! `cargo test -p sekisho-storage-redis -- --ignored`

use std::sync::Arc;

use chrono::{Duration, Utc};
use sekisho_core::{AttemptRecord, AttemptStore, Decision, RateLimiter, RateLimiterConfig};
use sekisho_storage_redis::{RedisAttemptStore, RedisConfig};
use testcontainers_modules::testcontainers::{ContainerAsync, runners::AsyncRunner};

async fn start_redis() -> (ContainerAsync<testcontainers_modules::redis::Redis>, RedisAttemptStore) {
    let container = testcontainers_modules::redis::Redis::default()
        .start()
        .await
        .unwrap();
    let host_port = container.get_host_port_ipv4(6379).await.unwrap();

    let config = RedisConfig::from_url(format!("redis://127.0.0.1:{host_port}/0"));
    let store = RedisAttemptStore::connect(&config).await.unwrap();
    store.health_check().await.unwrap();

    (container, store)
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_increment_and_expiry() {
    let (_container, store) = start_redis().await;
    let now = Utc::now();
    let window = Duration::minutes(15);

    let first = store.increment("k", window, now).await.unwrap();
    assert_eq!(first.failure_count, 1);
    assert_eq!(
        first.window_expires_at.timestamp_millis(),
        (now + window).timestamp_millis()
    );

    let second = store.increment("k", window, now).await.unwrap();
    assert_eq!(second.failure_count, 2);

    let fetched = store.get("k", now).await.unwrap().unwrap();
    assert_eq!(fetched.failure_count, 2);

    // Stale by the caller's clock even though Redis still holds the key.
    assert!(store.get("k", now + window).await.unwrap().is_none());
    let restarted = store.increment("k", window, now + window).await.unwrap();
    assert_eq!(restarted.failure_count, 1);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_set_and_delete() {
    let (_container, store) = start_redis().await;
    let now = Utc::now();

    let record = AttemptRecord {
        failure_count: 5,
        window_expires_at: now + Duration::hours(1),
    };
    store
        .set_with_expiry("k", &record, Duration::hours(1))
        .await
        .unwrap();

    let fetched = store.get("k", now).await.unwrap().unwrap();
    assert_eq!(fetched.failure_count, 5);

    // Counting continues from a record written by set_with_expiry.
    let next = store.increment("k", Duration::minutes(15), now).await.unwrap();
    assert_eq!(next.failure_count, 6);

    assert!(store.delete("k").await.unwrap());
    assert!(!store.delete("k").await.unwrap());
    assert_eq!(store.purge_expired(now).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_increment_keeps_longer_expiry() {
    let (_container, store) = start_redis().await;
    let now = Utc::now();
    let banned_until = now + Duration::hours(24);

    let record = AttemptRecord {
        failure_count: 5,
        window_expires_at: banned_until,
    };
    store
        .set_with_expiry("k", &record, Duration::hours(24))
        .await
        .unwrap();

    let next = store.increment("k", Duration::minutes(15), now).await.unwrap();
    assert_eq!(next.failure_count, 6);
    assert_eq!(
        next.window_expires_at.timestamp_millis(),
        banned_until.timestamp_millis()
    );

    // Still live after the failure window has passed.
    let fetched = store
        .get("k", now + Duration::hours(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.failure_count, 6);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_concurrent_failures() {
    let (_container, store) = start_redis().await;
    let config = RateLimiterConfig::default().with_threshold(10);
    let limiter = RateLimiter::new(Arc::new(store), config);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.record_failure("10.0.0.1").await.unwrap() })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    let status = limiter.status("10.0.0.1").await.unwrap();
    assert_eq!(status.failed_attempts, 10);
    assert!(!limiter.check_allowed("10.0.0.1").await.unwrap().is_allowed());

    limiter.record_success("10.0.0.1").await.unwrap();
    assert_eq!(
        limiter.check_allowed("10.0.0.1").await.unwrap(),
        Decision::Allow
    );
}
