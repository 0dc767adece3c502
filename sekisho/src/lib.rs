//! # Sekisho
//!
//! Sekisho is an embeddable login attempt rate limiter for Rust authentication backends.
//! It counts failed logins per client identity (usually the remote IP address) inside a
//! sliding window, and throttles an identity once it reaches a threshold of failures.
//!
//! The limiter never decides whether credentials are correct. Your backend asks it
//! before each credential check and reports the outcome afterwards:
//!
//! - [`RateLimiter::check_allowed`] before verifying credentials
//! - [`RateLimiter::record_failure`] when the credentials are rejected
//! - [`RateLimiter::record_success`] when they are accepted
//!
//! or hands the whole exchange to [`RateLimiter::guard`].
//!
//! ## Storage Support
//!
//! - In-memory (single process)
//! - SQLite (`sqlite` feature, enabled by default)
//! - Redis (`redis` feature), for counters shared between instances
//!
//! ## Example
//!
//! ```rust,no_run
//! use sekisho::{Decision, SekishoBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let limiter = SekishoBuilder::new()
//!         .with_sqlite("sqlite://attempts.db")
//!         .await?
//!         .with_config_from_env()?
//!         .build()
//!         .await?;
//!
//!     let client_ip = "203.0.113.7";
//!     match limiter.check_allowed_with_policy(client_ip).await? {
//!         Decision::Deny { retry_after } => {
//!             println!("Too many failed attempts, retry in {}s", retry_after.num_seconds());
//!         }
//!         Decision::Allow => {
//!             let password_ok = false;
//!             if password_ok {
//!                 limiter.record_success(client_ip).await?;
//!             } else {
//!                 limiter.record_failure(client_ip).await?;
//!             }
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
mod builder;

pub use builder::{NoStorage, SekishoBuilder, SekishoBuilderError, WithStorage};

pub use sekisho_core::{
    AttemptRecord, AttemptStatus, AttemptStore, ClientIdentity, Clock, Decision, Error,
    GuardOutcome, ManualClock, MemoryAttemptStore, RateLimiter, RateLimiterConfig, SystemClock,
    ThrottleState,
};

pub use sekisho_core::error::{StorageError, ValidationError};

#[cfg(feature = "sqlite")]
pub use sekisho_storage_sqlite::SqliteAttemptStore;

#[cfg(feature = "redis")]
pub use sekisho_storage_redis::{RedisAttemptStore, RedisConfig};
