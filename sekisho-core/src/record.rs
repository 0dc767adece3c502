//! Attempt records and the state derived from them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    ClientIdentity,
    error::{Error, StorageError, ValidationError},
};

/// Failure counter for one identity.
///
/// A record is only ever persisted with `failure_count >= 1`. Once `now` reaches
/// `window_expires_at` the record is stale and must be treated as absent,
/// whatever its stored count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub failure_count: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub window_expires_at: DateTime<Utc>,
}

impl AttemptRecord {
    /// The record written on the first failure of a window.
    pub fn first_failure(now: DateTime<Utc>, window: Duration) -> Result<Self, Error> {
        Ok(Self {
            failure_count: 1,
            window_expires_at: expiry_after(now, window)?,
        })
    }

    /// Whether the record still counts at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.window_expires_at
    }

    /// The record after one more failure at `now`.
    ///
    /// A stale record restarts from one. A live record is incremented and its
    /// window is pushed out to `now + window`, unless it already ends later
    /// (an administrative block), in which case the later end is kept.
    pub fn next_failure(
        current: Option<Self>,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Self, Error> {
        match current {
            Some(record) if record.is_live(now) => Ok(Self {
                failure_count: record.failure_count.saturating_add(1),
                window_expires_at: record.window_expires_at.max(expiry_after(now, window)?),
            }),
            _ => Self::first_failure(now, window),
        }
    }

    /// Encode as the JSON document stored by key-value backends.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self)
            .map_err(|e| Error::Storage(StorageError::Serialization(e.to_string())))
    }

    pub fn from_json(value: &str) -> Result<Self, Error> {
        serde_json::from_str(value)
            .map_err(|e| Error::Storage(StorageError::Serialization(e.to_string())))
    }
}

/// The answer to "may this identity attempt to authenticate now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Allow => None,
            Decision::Deny { retry_after } => Some(*retry_after),
        }
    }

    /// Seconds to put in a `Retry-After` header, rounded up.
    pub fn retry_after_seconds(&self) -> Option<i64> {
        self.retry_after().map(ceil_seconds)
    }
}

/// Where an identity sits in the throttling state machine.
///
/// `Unthrottled -> Accumulating -> Throttled -> (success | expiry) -> Unthrottled`.
/// Accumulating and Throttled share the same stored record; which one applies
/// depends only on the count against the configured threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    Unthrottled,
    Accumulating { failures: u32 },
    Throttled { failures: u32, until: DateTime<Utc> },
}

impl ThrottleState {
    /// Derive the state of a (possibly stale) record at `now`.
    pub fn derive(record: Option<&AttemptRecord>, threshold: u32, now: DateTime<Utc>) -> Self {
        match record {
            Some(record) if record.is_live(now) && record.failure_count > 0 => {
                if record.failure_count >= threshold {
                    ThrottleState::Throttled {
                        failures: record.failure_count,
                        until: record.window_expires_at,
                    }
                } else {
                    ThrottleState::Accumulating {
                        failures: record.failure_count,
                    }
                }
            }
            _ => ThrottleState::Unthrottled,
        }
    }

    pub fn failures(&self) -> u32 {
        match self {
            ThrottleState::Unthrottled => 0,
            ThrottleState::Accumulating { failures } => *failures,
            ThrottleState::Throttled { failures, .. } => *failures,
        }
    }
}

/// Snapshot of an identity's throttling state at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptStatus {
    pub identity: ClientIdentity,
    pub failed_attempts: u32,
    pub state: ThrottleState,
    pub window_expires_at: Option<DateTime<Utc>>,
    pub evaluated_at: DateTime<Utc>,
}

impl AttemptStatus {
    pub fn new(
        identity: ClientIdentity,
        record: Option<&AttemptRecord>,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let state = ThrottleState::derive(record, threshold, now);
        let window_expires_at = match state {
            ThrottleState::Unthrottled => None,
            _ => record.map(|r| r.window_expires_at),
        };

        Self {
            identity,
            failed_attempts: state.failures(),
            state,
            window_expires_at,
            evaluated_at: now,
        }
    }

    /// A status with no failures on record.
    pub fn unthrottled(identity: ClientIdentity, now: DateTime<Utc>) -> Self {
        Self::new(identity, None, 1, now)
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self.state, ThrottleState::Throttled { .. })
    }

    /// Time left until the identity may try again, if it is throttled.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.state {
            ThrottleState::Throttled { until, .. } => Some(until - self.evaluated_at),
            _ => None,
        }
    }

    pub fn retry_after_seconds(&self) -> Option<i64> {
        self.retry_after().map(ceil_seconds)
    }

    pub fn decision(&self) -> Decision {
        match self.retry_after() {
            Some(retry_after) => Decision::Deny { retry_after },
            None => Decision::Allow,
        }
    }
}

/// `now + span`, or an error when the result falls outside the representable range.
pub fn expiry_after(now: DateTime<Utc>, span: Duration) -> Result<DateTime<Utc>, Error> {
    now.checked_add_signed(span).ok_or_else(|| {
        ValidationError::InvalidConfig(format!("expiry {span} after {now} is out of range")).into()
    })
}

fn ceil_seconds(duration: Duration) -> i64 {
    let secs = duration.num_seconds();
    if duration > Duration::seconds(secs) {
        secs + 1
    } else {
        secs
    }
}
