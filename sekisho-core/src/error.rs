use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// Failures of the storage backend.
///
/// These are recoverable: the caller decides whether an unavailable backend
/// lets the attempt through (fail-open) or rejects it (fail-closed).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Storage(StorageError::Timeout(_)))
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

/// Extension trait for mapping backend driver errors into [`StorageError`]s.
///
/// The driver error is logged with its full detail while the returned error
/// only carries the given context, so connection strings and query text never
/// travel back to the caller.
pub trait StorageResultExt<T> {
    fn map_db_err(self, context: &str) -> Result<T, Error>;

    fn map_connection_err(self, context: &str) -> Result<T, Error>;
}

impl<T, E: std::fmt::Display> StorageResultExt<T> for Result<T, E> {
    fn map_db_err(self, context: &str) -> Result<T, Error> {
        self.map_err(|e| {
            tracing::error!(error = %e, "{context}");
            Error::Storage(StorageError::Database(context.to_string()))
        })
    }

    fn map_connection_err(self, context: &str) -> Result<T, Error> {
        self.map_err(|e| {
            tracing::error!(error = %e, "{context}");
            Error::Storage(StorageError::Connection(context.to_string()))
        })
    }
}
