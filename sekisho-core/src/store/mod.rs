//! Storage contract for attempt records
//!
//! The rate limiter keeps no state of its own: every counter lives in an
//! [`AttemptStore`]. Stores are expected to be shared between application
//! instances (a cache or a database), so that all instances throttle the same
//! identity together.
//!
//! Keys passed to a store are opaque strings already derived from the client
//! identity; stores never see raw identities.

pub mod memory;

pub use memory::MemoryAttemptStore;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::{AttemptRecord, Error};

/// Expiring key-value storage for [`AttemptRecord`]s.
///
/// # Atomicity
///
/// [`increment`](Self::increment) must be atomic per key: two concurrent calls
/// on a record holding four failures must leave six, never five. Backends get
/// this from their native primitives (a map entry lock, a single upsert
/// statement, a server-side script) rather than from a read followed by a write.
///
/// # Expiry
///
/// A record whose `window_expires_at` is not after `now` is stale. `get` must
/// report it as absent and `increment` must restart it from one, whether or not
/// the backend has physically removed it yet.
#[async_trait]
pub trait AttemptStore: Send + Sync + 'static {
    /// Fetch the live record under `key`, if any.
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<AttemptRecord>, Error>;

    /// Store `record` under `key`, replacing any existing one. The backend may
    /// drop the record once `ttl` has passed.
    async fn set_with_expiry(
        &self,
        key: &str,
        record: &AttemptRecord,
        ttl: Duration,
    ) -> Result<(), Error>;

    /// Remove the record under `key`.
    ///
    /// Returns whether a record was present. Deleting a missing key is not an
    /// error.
    async fn delete(&self, key: &str) -> Result<bool, Error>;

    /// Atomically count one more failure under `key` and return the new record.
    ///
    /// The resulting record expires at `now + ttl`, or later if a live record
    /// already expired later. A `now + ttl` outside the representable range is
    /// a validation error.
    async fn increment(
        &self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<AttemptRecord, Error>;

    /// Physically remove records that expired before `now`.
    ///
    /// Backends whose records expire on their own return `Ok(0)`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, Error>;

    /// Check that the backend is reachable.
    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
