//! Builder pattern for constructing rate limiters
//!
//! This module provides a type-safe builder for creating [`RateLimiter`] instances
//! with compile-time validation of storage configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use sekisho::SekishoBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Build with SQLite; the schema is created on connect
//!     let limiter = SekishoBuilder::new()
//!         .with_sqlite("sqlite://attempts.db")
//!         .await?
//!         .build()
//!         .await?;
//!
//!     // Or keep counters in process memory
//!     let limiter = SekishoBuilder::new().with_memory().build().await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use chrono::Duration;
use sekisho_core::{AttemptStore, Clock, MemoryAttemptStore, RateLimiter, RateLimiterConfig};

#[cfg(feature = "sqlite")]
use sekisho_storage_sqlite::SqliteAttemptStore;

#[cfg(feature = "redis")]
use sekisho_storage_redis::{RedisAttemptStore, RedisConfig};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when building a rate limiter.
#[derive(Debug, thiserror::Error)]
pub enum SekishoBuilderError {
    /// Failed to connect to storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to create the storage schema
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

// ============================================================================
// Type-State Markers
// ============================================================================

/// Marker type indicating no storage has been configured yet.
///
/// This is the initial state of [`SekishoBuilder`].
pub struct NoStorage;

/// Marker type indicating storage has been configured.
pub struct WithStorage<S: AttemptStore + ?Sized> {
    store: Arc<S>,
}

// ============================================================================
// Builder Implementation
// ============================================================================

/// A type-safe builder for constructing [`RateLimiter`] instances.
///
/// # Type States
///
/// - [`NoStorage`]: Initial state, storage must be configured
/// - [`WithStorage<S>`]: Storage configured, ready to build or add more configuration
pub struct SekishoBuilder<Storage> {
    storage: Storage,
    config: RateLimiterConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl Default for SekishoBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl SekishoBuilder<NoStorage> {
    /// Create a new builder with the default configuration.
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            config: RateLimiterConfig::default(),
            clock: None,
        }
    }

    /// Keep counters in process memory.
    ///
    /// Counters are not shared between processes; use a database or cache
    /// backend when several instances serve logins.
    pub fn with_memory(self) -> SekishoBuilder<WithStorage<MemoryAttemptStore>> {
        self.with_store(Arc::new(MemoryAttemptStore::new()))
    }

    /// Use any [`AttemptStore`] implementation.
    pub fn with_store<S: AttemptStore + ?Sized>(
        self,
        store: Arc<S>,
    ) -> SekishoBuilder<WithStorage<S>> {
        SekishoBuilder {
            storage: WithStorage { store },
            config: self.config,
            clock: self.clock,
        }
    }
}

#[cfg(feature = "sqlite")]
impl SekishoBuilder<NoStorage> {
    /// Configure SQLite storage by connecting to the given URL.
    ///
    /// The database is created if missing and the `login_attempts` table is
    /// created if it does not exist yet.
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<SekishoBuilder<WithStorage<SqliteAttemptStore>>, SekishoBuilderError> {
        let store = SqliteAttemptStore::connect(url)
            .await
            .map_err(|e| SekishoBuilderError::StorageConnection(e.to_string()))?;

        store
            .migrate()
            .await
            .map_err(|e| SekishoBuilderError::Migration(e.to_string()))?;

        Ok(self.with_store(Arc::new(store)))
    }

    /// Configure SQLite storage with an existing connection pool.
    ///
    /// The schema is created if it does not exist yet.
    pub async fn with_sqlite_pool(
        self,
        pool: sqlx::SqlitePool,
    ) -> Result<SekishoBuilder<WithStorage<SqliteAttemptStore>>, SekishoBuilderError> {
        let store = SqliteAttemptStore::new(pool);
        store
            .migrate()
            .await
            .map_err(|e| SekishoBuilderError::Migration(e.to_string()))?;

        Ok(self.with_store(Arc::new(store)))
    }
}

#[cfg(feature = "redis")]
impl SekishoBuilder<NoStorage> {
    /// Configure Redis storage.
    pub async fn with_redis(
        self,
        config: &RedisConfig,
    ) -> Result<SekishoBuilder<WithStorage<RedisAttemptStore>>, SekishoBuilderError> {
        let store = RedisAttemptStore::connect(config)
            .await
            .map_err(|e| SekishoBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_store(Arc::new(store)))
    }

    /// Configure Redis storage from `REDIS_*` environment variables.
    pub async fn with_redis_from_env(
        self,
    ) -> Result<SekishoBuilder<WithStorage<RedisAttemptStore>>, SekishoBuilderError> {
        let config = RedisConfig::from_env()
            .map_err(|e| SekishoBuilderError::InvalidConfiguration(e.to_string()))?;
        self.with_redis(&config).await
    }
}

impl<Storage> SekishoBuilder<Storage> {
    /// Replace the whole rate limiter configuration.
    pub fn with_config(mut self, config: RateLimiterConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the configuration from `SEKISHO_*` environment variables.
    pub fn with_config_from_env(mut self) -> Result<Self, SekishoBuilderError> {
        self.config = RateLimiterConfig::from_env()
            .map_err(|e| SekishoBuilderError::InvalidConfiguration(e.to_string()))?;
        Ok(self)
    }

    /// Failures inside one window that throttle an identity.
    ///
    /// Default: 5
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.config.threshold = threshold;
        self
    }

    /// Length of the sliding failure window.
    ///
    /// Default: 15 minutes
    pub fn with_window(mut self, window: Duration) -> Self {
        self.config.window = window;
        self
    }

    /// Upper bound on each storage call.
    ///
    /// Default: 1 second
    pub fn with_storage_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.storage_timeout = timeout;
        self
    }

    /// Whether an unavailable store lets attempts through.
    ///
    /// Default: true
    pub fn fail_open(mut self, fail_open: bool) -> Self {
        self.config.fail_open_on_storage_error = fail_open;
        self
    }

    /// Prefix for every storage key.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    /// Use a custom time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Get a reference to the current configuration.
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }
}

impl<S: AttemptStore + ?Sized> SekishoBuilder<WithStorage<S>> {
    /// Validate the configuration, check the store answers and build the limiter.
    pub async fn build(self) -> Result<RateLimiter<S>, SekishoBuilderError> {
        self.config
            .validate()
            .map_err(|e| SekishoBuilderError::InvalidConfiguration(e.to_string()))?;

        self.storage
            .store
            .health_check()
            .await
            .map_err(|e| SekishoBuilderError::StorageConnection(e.to_string()))?;

        tracing::info!(
            enabled = self.config.enabled,
            threshold = self.config.threshold,
            window_secs = self.config.window.num_seconds(),
            fail_open = self.config.fail_open_on_storage_error,
            "Login rate limiter ready"
        );

        let limiter = RateLimiter::new(self.storage.store, self.config);
        Ok(match self.clock {
            Some(clock) => limiter.with_clock(clock),
            None => limiter,
        })
    }
}
