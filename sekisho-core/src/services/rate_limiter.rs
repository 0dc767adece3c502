//! Login attempt rate limiting service.
//!
//! This module throttles authentication attempts per client identity. Failures
//! are counted over a sliding window: every failure restarts the window, and an
//! identity that reaches the configured threshold is denied until the window
//! runs out or it authenticates successfully.
//!
//! # Features
//!
//! - Per-identity failure counters held in a shared [`AttemptStore`]
//! - Atomic increments, so concurrent failures are never lost
//! - Bounded storage calls with a typed timeout error
//! - Fail-open or fail-closed handling of storage outages
//! - Administrative unlock and block
//! - Background purge of expired records
//!
//! # Example
//!
//! ```rust,ignore
//! use sekisho_core::{Decision, MemoryAttemptStore, RateLimiter, RateLimiterConfig};
//!
//! let limiter = RateLimiter::new(Arc::new(MemoryAttemptStore::new()), RateLimiterConfig::default());
//!
//! // Before verifying credentials
//! if let Decision::Deny { retry_after } = limiter.check_allowed("10.0.0.1").await? {
//!     // Reject without touching the credential store
//! }
//!
//! // After the authentication backend answered
//! if authenticated {
//!     limiter.record_success("10.0.0.1").await?;
//! } else {
//!     limiter.record_failure("10.0.0.1").await?;
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use chrono::Duration;

use crate::{
    AttemptRecord, AttemptStatus, ClientIdentity, Decision, Error, RateLimiterConfig,
    clock::{Clock, SystemClock},
    error::{StorageError, ValidationError},
    record::expiry_after,
    store::AttemptStore,
};

/// Result of [`RateLimiter::guard`].
#[derive(Debug)]
pub enum GuardOutcome<T, E> {
    /// The identity is throttled; the authentication backend was not called.
    Throttled { retry_after: Duration },
    /// The backend accepted the credentials.
    Authenticated(T),
    /// The backend rejected the credentials.
    Rejected(E),
}

impl<T, E> GuardOutcome<T, E> {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, GuardOutcome::Authenticated(_))
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, GuardOutcome::Throttled { .. })
    }
}

/// Service mediating authentication attempts.
///
/// # Thread Safety
///
/// The limiter holds no mutable state of its own and is cheap to clone. All
/// counters live in the store, which handles concurrent access.
pub struct RateLimiter<S: AttemptStore + ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: RateLimiterConfig,
}

impl<S: AttemptStore + ?Sized> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
        }
    }
}

impl<S: AttemptStore + ?Sized> RateLimiter<S> {
    /// Create a new RateLimiter using the system clock.
    ///
    /// # Arguments
    ///
    /// * `store` - The storage backend holding attempt records
    /// * `config` - Threshold, window and storage policy
    pub fn new(store: Arc<S>, config: RateLimiterConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Replace the clock, typically with a [`ManualClock`](crate::ManualClock) in tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Decide whether `identity` may attempt to authenticate now.
    ///
    /// Returns [`Decision::Deny`] when the identity has at least `threshold`
    /// failures in a window that has not yet expired, and [`Decision::Allow`]
    /// otherwise. This does not authenticate anything.
    ///
    /// # Errors
    ///
    /// `InvalidIdentity` for an empty or malformed identity, and a storage error
    /// if the backend fails or does not answer within `storage_timeout`.
    pub async fn check_allowed(&self, identity: &str) -> Result<Decision, Error> {
        let identity = ClientIdentity::parse(identity)?;
        self.check_identity(&identity).await
    }

    /// Like [`check_allowed`](Self::check_allowed), but storage failures are
    /// resolved with `fail_open_on_storage_error` instead of being returned.
    ///
    /// Fail-open allows the attempt; fail-closed denies it for one window. Both
    /// are logged as warnings. Only an invalid identity is still an error.
    pub async fn check_allowed_with_policy(&self, identity: &str) -> Result<Decision, Error> {
        let identity = ClientIdentity::parse(identity)?;
        Ok(self.decide(&identity).await)
    }

    /// Current throttling state of `identity`.
    pub async fn status(&self, identity: &str) -> Result<AttemptStatus, Error> {
        let identity = ClientIdentity::parse(identity)?;
        self.status_of(identity).await
    }

    /// Count a rejected authentication attempt.
    ///
    /// The first failure opens a window of `window` length. Each later failure
    /// inside the window increments the count and restarts the window from now.
    ///
    /// If protection is disabled, nothing is recorded and an unthrottled status
    /// is returned.
    ///
    /// # Returns
    ///
    /// The status after recording the failure.
    pub async fn record_failure(&self, identity: &str) -> Result<AttemptStatus, Error> {
        let identity = ClientIdentity::parse(identity)?;
        self.failure_for(identity).await
    }

    /// Forget all failures of `identity` after a successful authentication.
    ///
    /// Calling this for an identity without failures is a no-op.
    pub async fn record_success(&self, identity: &str) -> Result<(), Error> {
        let identity = ClientIdentity::parse(identity)?;
        self.success_for(&identity).await
    }

    /// Run `authenticate` under the limiter.
    ///
    /// Checks the identity (resolving storage failures by policy), calls the
    /// authentication backend only if allowed, and records the outcome. Failing
    /// to record the outcome is logged and does not change the returned result.
    pub async fn guard<F, Fut, T, E>(
        &self,
        identity: &str,
        authenticate: F,
    ) -> Result<GuardOutcome<T, E>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let identity = ClientIdentity::parse(identity)?;

        if let Decision::Deny { retry_after } = self.decide(&identity).await {
            return Ok(GuardOutcome::Throttled { retry_after });
        }

        let key = self.key(&identity);
        match authenticate().await {
            Ok(value) => {
                if let Err(e) = self.success_for(&identity).await {
                    tracing::warn!(key = %key, error = %e, "Failed to clear login attempts");
                }
                Ok(GuardOutcome::Authenticated(value))
            }
            Err(rejection) => {
                if let Err(e) = self.failure_for(identity).await {
                    tracing::warn!(key = %key, error = %e, "Failed to record failed login attempt");
                }
                Ok(GuardOutcome::Rejected(rejection))
            }
        }
    }

    /// Clear `identity` regardless of its state (e.g., by an administrator).
    ///
    /// # Returns
    ///
    /// `true` if the identity was throttled, `false` otherwise.
    pub async fn unlock(&self, identity: &str) -> Result<bool, Error> {
        let identity = ClientIdentity::parse(identity)?;
        let was_throttled = self.status_of(identity.clone()).await?.is_throttled();
        let key = self.key(&identity);
        self.bounded(self.store.delete(&key)).await?;

        if was_throttled {
            tracing::info!(key = %key, "Unlocked throttled identity");
        }
        Ok(was_throttled)
    }

    /// Throttle `identity` for `duration`, whatever its current count.
    ///
    /// Intended for bans coming from outside the login flow, such as an
    /// intrusion detection feed.
    pub async fn block(&self, identity: &str, duration: Duration) -> Result<AttemptStatus, Error> {
        let identity = ClientIdentity::parse(identity)?;
        if duration <= Duration::zero() {
            return Err(ValidationError::InvalidConfig(
                "block duration must be positive".to_string(),
            )
            .into());
        }

        let now = self.clock.now();
        let key = self.key(&identity);
        let record = AttemptRecord {
            failure_count: self.config.threshold,
            window_expires_at: expiry_after(now, duration)?,
        };
        self.bounded(self.store.set_with_expiry(&key, &record, duration))
            .await?;

        tracing::warn!(key = %key, until = %record.window_expires_at, "Blocked identity");
        Ok(AttemptStatus::new(
            identity,
            Some(&record),
            self.config.threshold,
            now,
        ))
    }

    /// Start the background cleanup task.
    ///
    /// This spawns a task that purges expired records from the store every
    /// `cleanup_interval`. Stores that expire records natively report nothing
    /// to purge.
    ///
    /// # Arguments
    ///
    /// * `shutdown` - A watch receiver that signals when to stop the task
    ///
    /// # Returns
    ///
    /// A `JoinHandle` for the spawned task.
    pub fn start_cleanup_task(
        &self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();

        tokio::spawn(async move {
            let mut period = limiter.config.cleanup_interval;
            if period.is_zero() {
                period = RateLimiterConfig::default().cleanup_interval;
                tracing::warn!(
                    period_secs = period.as_secs(),
                    "Cleanup interval is zero, using the default"
                );
            }
            let mut interval_timer = tokio::time::interval(period);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let now = limiter.clock.now();
                        match limiter.bounded(limiter.store.purge_expired(now)).await {
                            Ok(count) if count > 0 => {
                                tracing::info!(
                                    count = count,
                                    "Purged expired login attempt records"
                                );
                            }
                            Err(e) => {
                                tracing::warn!(
                                    error = %e,
                                    "Failed to purge expired login attempt records"
                                );
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down login attempt cleanup task");
                        break;
                    }
                }
            }
        })
    }

    async fn check_identity(&self, identity: &ClientIdentity) -> Result<Decision, Error> {
        if !self.config.enabled {
            return Ok(Decision::Allow);
        }

        let decision = self.status_of(identity.clone()).await?.decision();
        tracing::debug!(
            key = %self.key(identity),
            allowed = decision.is_allowed(),
            "Checked login attempt"
        );
        Ok(decision)
    }

    async fn decide(&self, identity: &ClientIdentity) -> Decision {
        match self.check_identity(identity).await {
            Ok(decision) => decision,
            Err(e) if self.config.fail_open_on_storage_error => {
                tracing::warn!(
                    key = %self.key(identity),
                    error = %e,
                    "Attempt store unavailable, failing open"
                );
                Decision::Allow
            }
            Err(e) => {
                tracing::warn!(
                    key = %self.key(identity),
                    error = %e,
                    "Attempt store unavailable, failing closed"
                );
                Decision::Deny {
                    retry_after: self.config.window,
                }
            }
        }
    }

    async fn status_of(&self, identity: ClientIdentity) -> Result<AttemptStatus, Error> {
        let now = self.clock.now();
        if !self.config.enabled {
            return Ok(AttemptStatus::unthrottled(identity, now));
        }

        let key = self.key(&identity);
        let record = self.bounded(self.store.get(&key, now)).await?;
        Ok(AttemptStatus::new(
            identity,
            record.as_ref(),
            self.config.threshold,
            now,
        ))
    }

    async fn failure_for(&self, identity: ClientIdentity) -> Result<AttemptStatus, Error> {
        let now = self.clock.now();
        if !self.config.enabled {
            return Ok(AttemptStatus::unthrottled(identity, now));
        }

        let key = self.key(&identity);
        let record = self
            .bounded(self.store.increment(&key, self.config.window, now))
            .await?;

        if record.failure_count == self.config.threshold {
            tracing::warn!(
                key = %key,
                failures = record.failure_count,
                until = %record.window_expires_at,
                "Login attempts throttled"
            );
        } else {
            tracing::debug!(
                key = %key,
                failures = record.failure_count,
                "Recorded failed login attempt"
            );
        }

        Ok(AttemptStatus::new(
            identity,
            Some(&record),
            self.config.threshold,
            now,
        ))
    }

    async fn success_for(&self, identity: &ClientIdentity) -> Result<(), Error> {
        if !self.config.enabled {
            return Ok(());
        }

        let key = self.key(identity);
        if self.bounded(self.store.delete(&key)).await? {
            tracing::debug!(key = %key, "Cleared login attempts");
        }
        Ok(())
    }

    fn key(&self, identity: &ClientIdentity) -> String {
        identity.storage_key(&self.config.key_prefix)
    }

    /// Run a storage call under `storage_timeout`.
    async fn bounded<T, F>(&self, operation: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        let limit = self.config.storage_timeout;
        match tokio::time::timeout(limit, operation).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(limit).into()),
        }
    }
}
