//! Error types for composition and prompt compilation.

use thiserror::Error;

pub use rapport_types::ValidationError;

/// Error type for compose and cache operations.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// The prompt compiler failed; nothing was cached.
    #[error("Compile error: {0}")]
    Compile(String),

    /// The personality or a modifier reference is malformed.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A personality could not be serialized for hashing.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for compose and cache operations.
pub type Result<T> = std::result::Result<T, ComposeError>;
