//! In-process attempt store.
//!
//! Suitable for a single application instance and for tests. Counters are not
//! shared with other processes and are lost on restart.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::{DashMap, mapref::entry::Entry};

use crate::{AttemptRecord, Error, store::AttemptStore};

/// [`AttemptStore`] backed by a concurrent hash map.
///
/// `increment` runs under the map's per-shard entry lock, so concurrent
/// failures for the same key are never lost.
#[derive(Debug, Default)]
pub struct MemoryAttemptStore {
    records: DashMap<String, AttemptRecord>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held, including stale ones not yet purged.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<AttemptRecord>, Error> {
        Ok(self
            .records
            .get(key)
            .map(|entry| *entry.value())
            .filter(|record| record.is_live(now)))
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        record: &AttemptRecord,
        _ttl: Duration,
    ) -> Result<(), Error> {
        // Expiry is carried by the record itself and enforced on read.
        self.records.insert(key.to_string(), *record);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        Ok(self.records.remove(key).is_some())
    }

    async fn increment(
        &self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<AttemptRecord, Error> {
        let next = match self.records.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let next = AttemptRecord::next_failure(Some(*entry.get()), now, ttl)?;
                entry.insert(next);
                next
            }
            Entry::Vacant(entry) => *entry.insert(AttemptRecord::first_failure(now, ttl)?),
        };

        Ok(next)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let before = self.records.len();
        self.records.retain(|_, record| record.is_live(now));
        Ok(before.saturating_sub(self.records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_increment_creates_and_counts() {
        let store = MemoryAttemptStore::new();
        let now = Utc::now();
        let window = Duration::minutes(15);

        let first = store.increment("k", window, now).await.unwrap();
        assert_eq!(first.failure_count, 1);
        assert_eq!(first.window_expires_at, now + window);

        let later = now + Duration::minutes(1);
        let second = store.increment("k", window, later).await.unwrap();
        assert_eq!(second.failure_count, 2);
        assert_eq!(second.window_expires_at, later + window);
    }

    #[tokio::test]
    async fn test_increment_restarts_expired_record() {
        let store = MemoryAttemptStore::new();
        let now = Utc::now();
        let window = Duration::minutes(15);

        for _ in 0..4 {
            store.increment("k", window, now).await.unwrap();
        }

        let after_expiry = now + window;
        let record = store.increment("k", window, after_expiry).await.unwrap();
        assert_eq!(record.failure_count, 1);
    }

    #[tokio::test]
    async fn test_get_hides_expired_records() {
        let store = MemoryAttemptStore::new();
        let now = Utc::now();
        store
            .increment("k", Duration::minutes(15), now)
            .await
            .unwrap();

        assert!(store.get("k", now).await.unwrap().is_some());
        assert!(
            store
                .get("k", now + Duration::minutes(15))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_set_with_expiry_replaces() {
        let store = MemoryAttemptStore::new();
        let now = Utc::now();
        store
            .increment("k", Duration::minutes(15), now)
            .await
            .unwrap();

        let record = AttemptRecord {
            failure_count: 7,
            window_expires_at: now + Duration::hours(1),
        };
        store
            .set_with_expiry("k", &record, Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(store.get("k", now).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_increment_keeps_longer_expiry() {
        let store = MemoryAttemptStore::new();
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

        let next = store
            .increment("k", Duration::minutes(15), now)
            .await
            .unwrap();
        assert_eq!(next.failure_count, 6);
        assert_eq!(next.window_expires_at, banned_until);
    }

    #[tokio::test]
    async fn test_increment_rejects_out_of_range_window() {
        let store = MemoryAttemptStore::new();
        let result = store.increment("k", Duration::MAX, Utc::now()).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryAttemptStore::new();
        let now = Utc::now();
        store
            .increment("k", Duration::minutes(15), now)
            .await
            .unwrap();

        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(!store.delete("never-seen").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_records() {
        let store = MemoryAttemptStore::new();
        let now = Utc::now();
        store
            .increment("old", Duration::minutes(1), now)
            .await
            .unwrap();
        store
            .increment("fresh", Duration::minutes(30), now)
            .await
            .unwrap();

        let purged = store
            .purge_expired(now + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.len(), 1);
        assert!(
            store
                .get("fresh", now + Duration::minutes(5))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryAttemptStore::new());
        let now = Utc::now();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .increment("shared", Duration::minutes(15), now)
                        .await
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        let record = store.get("shared", now).await.unwrap().unwrap();
        assert_eq!(record.failure_count, 10);
    }
}
