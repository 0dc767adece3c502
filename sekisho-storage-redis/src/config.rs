//! Connection settings for the Redis attempt store.

use sekisho_core::error::ValidationError;
use url::Url;

/// Where to find the Redis server.
///
/// Defaults match a containerized deployment with a `redis` service on the
/// standard port and no password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// Full connection URL. Takes precedence over the individual fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub database: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "redis".to_string(),
            port: 6379,
            password: None,
            database: 0,
        }
    }
}

impl RedisConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Read `REDIS_URL`, `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD` and
    /// `REDIS_DATABASE`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            url: lookup("REDIS_URL").filter(|url| !url.trim().is_empty()),
            ..Self::default()
        };

        if let Some(host) = lookup("REDIS_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("REDIS_PORT") {
            config.port = port.trim().parse().map_err(|_| {
                ValidationError::InvalidConfig(format!("REDIS_PORT={port:?} is not a valid port"))
            })?;
        }
        if let Some(password) = lookup("REDIS_PASSWORD") {
            config.password = Some(password).filter(|p| !p.is_empty());
        }
        if let Some(database) = lookup("REDIS_DATABASE") {
            config.database = database.trim().parse().map_err(|_| {
                ValidationError::InvalidConfig(format!(
                    "REDIS_DATABASE={database:?} is not a valid database index"
                ))
            })?;
        }

        Ok(config)
    }

    /// The `redis://` URL to connect with. The password is percent-encoded.
    pub fn connection_url(&self) -> Result<String, ValidationError> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }

        let mut url = Url::parse(&format!(
            "redis://{}:{}/{}",
            self.host, self.port, self.database
        ))
        .map_err(|e| ValidationError::InvalidConfig(format!("invalid Redis host: {e}")))?;

        if let Some(password) = &self.password {
            url.set_password(Some(password)).map_err(|_| {
                ValidationError::InvalidConfig("cannot set Redis password".to_string())
            })?;
        }

        Ok(url.into())
    }
}
