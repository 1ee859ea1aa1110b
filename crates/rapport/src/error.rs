//! Top-level error type.

use std::path::PathBuf;

use thiserror::Error;

use rapport_compose::ComposeError;
use rapport_config::ConfigError;
use rapport_memory::MemoryError;
use rapport_types::ValidationError;

/// Result type alias for facade operations.
pub type Result<T> = std::result::Result<T, RapportError>;

/// Any failure surfaced by the engine.
#[derive(Debug, Error)]
pub enum RapportError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No personality with this name has been registered.
    #[error("personality '{0}' is not registered")]
    UnknownPersonality(String),

    /// A personality definition file could not be read or parsed.
    #[error("failed to load personality from '{path}': {reason}")]
    PersonalityFile { path: PathBuf, reason: String },

    /// Tracing could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}
