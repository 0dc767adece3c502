//! Service layer for business logic
//!
//! Services combine a storage backend with configuration and expose the
//! operations the authentication backend calls.

pub mod rate_limiter;

pub use rate_limiter::{GuardOutcome, RateLimiter};
