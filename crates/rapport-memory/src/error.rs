//! Error types for the memory crate.

use std::time::Duration;

use thiserror::Error;

pub use rapport_types::ValidationError;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend could not be reached or the connection dropped.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Backend rejected our credentials.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Backend layout does not match what the adapter needs.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A single call exceeded its time budget.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Backend asked us to slow down.
    #[error("Throttled: {0}")]
    Throttled(String),

    /// Backend is temporarily unavailable.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// SQLite operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored data could not be decoded.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl StorageError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Throttled(_) | Self::Unavailable(_)
        ) || self.is_busy()
    }

    /// SQLite refused the statement because another writer held the
    /// database. Nothing was written.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Database(rusqlite::Error::SqliteFailure(e, _))
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
        )
    }
}

/// Errors that can occur in the memory crate.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A record was rejected before any mutation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The storage backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A concurrent writer changed the record between our read and write,
    /// and the retry with fresh state lost again.
    #[error("Conflicting update on {0}")]
    Conflict(String),
}

impl MemoryError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_transient())
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_busy())
    }
}

impl From<rusqlite::Error> for MemoryError {
    fn from(err: rusqlite::Error) -> Self {
        MemoryError::Storage(StorageError::Database(err))
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        MemoryError::Storage(StorageError::Serialization(err))
    }
}

/// Result type alias for memory operations.
pub type Result<T> = std::result::Result<T, MemoryError>;
