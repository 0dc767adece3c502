//! Redis storage backend for sekisho.
//!
//! Each record is a JSON document under its storage key with a native Redis
//! expiry equal to the window, so stale counters disappear without a cleanup
//! job. Failures are counted by a server-side script, which Redis runs
//! atomically, so any number of application instances can share one server.

pub mod config;

pub use config::RedisConfig;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use redis::{AsyncCommands, Script, aio::ConnectionManager};
use sekisho_core::{
    AttemptRecord, AttemptStore, Error,
    error::{StorageError, StorageResultExt},
    record::expiry_after,
};

const INCREMENT_SCRIPT: &str = r#"
local key = KEYS[1]
local ttl_ms = tonumber(ARGV[1])
local now_ms = tonumber(ARGV[2])

local count = 0
local expires_at = now_ms + ttl_ms
local raw = redis.call('GET', key)
if raw then
  local record = cjson.decode(raw)
  local current_expiry = tonumber(record['window_expires_at'])
  if current_expiry > now_ms then
    count = tonumber(record['failure_count'])
    if current_expiry > expires_at then
      expires_at = current_expiry
    end
  end
end

count = count + 1
local encoded = string.format('{"failure_count":%d,"window_expires_at":%d}', count, expires_at)
redis.call('SET', key, encoded, 'PX', expires_at - now_ms)

return {count, expires_at}
"#;

/// [`AttemptStore`] backed by a Redis server.
#[derive(Clone)]
pub struct RedisAttemptStore {
    connection: ConnectionManager,
    increment_script: Script,
}

impl RedisAttemptStore {
    /// Creates a store over an established connection manager.
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            increment_script: Script::new(INCREMENT_SCRIPT),
        }
    }

    /// Connect to the server described by `config`.
    pub async fn connect(config: &RedisConfig) -> Result<Self, Error> {
        let url = config.connection_url()?;
        let client = redis::Client::open(url).map_connection_err("Invalid Redis configuration")?;
        let connection = ConnectionManager::new(client)
            .await
            .map_connection_err("Failed to connect to Redis")?;

        tracing::debug!("Connected to Redis");
        Ok(Self::new(connection))
    }
}

fn ttl_millis(ttl: Duration) -> Result<u64, Error> {
    u64::try_from(ttl.num_milliseconds())
        .ok()
        .filter(|ms| *ms > 0)
        .ok_or_else(|| StorageError::Database(format!("invalid record ttl: {ttl}")).into())
}

#[async_trait]
impl AttemptStore for RedisAttemptStore {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<AttemptRecord>, Error> {
        let mut connection = self.connection.clone();
        let encoded: Option<String> = connection
            .get(key)
            .await
            .map_db_err("Failed to get login attempts from Redis")?;

        let record = encoded
            .as_deref()
            .map(AttemptRecord::from_json)
            .transpose()?;

        Ok(record.filter(|record| record.is_live(now)))
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        record: &AttemptRecord,
        ttl: Duration,
    ) -> Result<(), Error> {
        let encoded = record.to_json()?;
        let ttl_ms = ttl_millis(ttl)?;

        let mut connection = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(encoded)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<()>(&mut connection)
            .await
            .map_db_err("Failed to store login attempts in Redis")
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        let mut connection = self.connection.clone();
        let removed: i64 = connection
            .del(key)
            .await
            .map_db_err("Failed to clear login attempts in Redis")?;

        Ok(removed > 0)
    }

    async fn increment(
        &self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<AttemptRecord, Error> {
        let ttl_ms = ttl_millis(ttl)?;
        expiry_after(now, ttl)?;

        let mut connection = self.connection.clone();
        let (failure_count, expires_at_ms): (i64, i64) = self
            .increment_script
            .key(key)
            .arg(ttl_ms)
            .arg(now.timestamp_millis())
            .invoke_async(&mut connection)
            .await
            .map_db_err("Failed to record failed login attempt in Redis")?;

        let failure_count = u32::try_from(failure_count).map_err(|_| {
            StorageError::Serialization(format!("invalid Redis attempt count: {failure_count}"))
        })?;
        let window_expires_at = Utc
            .timestamp_millis_opt(expires_at_ms)
            .single()
            .ok_or_else(|| {
                StorageError::Serialization(format!(
                    "invalid Redis window expiry: {expires_at_ms}"
                ))
            })?;

        Ok(AttemptRecord {
            failure_count,
            window_expires_at,
        })
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, Error> {
        // Redis keys expire automatically via TTL.
        Ok(0)
    }

    async fn health_check(&self) -> Result<(), Error> {
        let mut connection = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut connection)
            .await
            .map_connection_err("Redis health check failed")?;
        Ok(())
    }
}
