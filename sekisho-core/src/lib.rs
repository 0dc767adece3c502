//! Core functionality for the sekisho project
//!
//! This crate contains the building blocks of the login attempt rate limiter:
//!
//! - [`ClientIdentity`], the validated key under which attempts are throttled
//! - [`AttemptRecord`], the per-identity failure counter with its sliding window
//! - [`AttemptStore`], the contract every storage backend implements
//! - [`RateLimiter`], the service the authentication backend calls before and after
//!   each credential check
//!
//! Storage backends other than the in-memory [`MemoryAttemptStore`] live in their own
//! crates (`sekisho-storage-sqlite`, `sekisho-storage-redis`) and only depend on this one.
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod record;
pub mod services;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RateLimiterConfig;
pub use error::Error;
pub use identity::ClientIdentity;
pub use record::{AttemptRecord, AttemptStatus, Decision, ThrottleState};
pub use services::{GuardOutcome, RateLimiter};
pub use store::{AttemptStore, MemoryAttemptStore};
