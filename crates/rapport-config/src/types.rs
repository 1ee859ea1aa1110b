//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [storage]       # backend selection, database path, retry policy
//! [memory]        # episode decay
//! [affinity]      # interaction deltas and bonuses
//! [cache]         # compiled-prompt cache
//! [logging]       # tracing filter and format
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. project-local
/// overrides) can be loaded and merged. Accessors fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RapportConfig {
    pub storage: Option<StorageConfig>,
    pub memory: Option<MemorySection>,
    pub affinity: Option<AffinitySection>,
    pub cache: Option<CacheSection>,
    pub logging: Option<LoggingConfig>,
}

impl RapportConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string and check values.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole; a section absent from `other` is kept.
    pub fn merge(&mut self, other: RapportConfig) {
        if other.storage.is_some() {
            self.storage = other.storage;
        }
        if other.memory.is_some() {
            self.memory = other.memory;
        }
        if other.affinity.is_some() {
            self.affinity = other.affinity;
        }
        if other.cache.is_some() {
            self.cache = other.cache;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Reject values no component could run with.
    pub fn validate(&self) -> Result<()> {
        let storage = self.storage();
        if storage.backend == StorageBackend::Sqlite
            && storage.path.as_ref().is_some_and(|p| p.as_os_str().is_empty())
        {
            return Err(invalid("storage.path", "must not be empty"));
        }
        if storage.retry.call_timeout_ms == 0 {
            return Err(invalid("storage.retry.call_timeout_ms", "must be positive"));
        }
        let half_life = self.memory().half_life_days;
        if !half_life.is_finite() || half_life < 0.0 {
            return Err(invalid("memory.half_life_days", "must be a non-negative number"));
        }
        if !self.affinity().sentiment_weight.is_finite() {
            return Err(invalid("affinity.sentiment_weight", "must be finite"));
        }
        Ok(())
    }

    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    pub fn memory(&self) -> MemorySection {
        self.memory.clone().unwrap_or_default()
    }

    pub fn affinity(&self) -> AffinitySection {
        self.affinity.clone().unwrap_or_default()
    }

    pub fn cache(&self) -> CacheSection {
        self.cache.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

/// Which storage backend to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Process memory; nothing survives a restart.
    #[default]
    Memory,
    Sqlite,
    /// In-process wide-column store.
    WideColumn,
}

/// Storage backend configuration.
///
/// ```toml
/// [storage]
/// backend = "sqlite"
/// path = "~/.local/share/rapport/rapport.db"
/// auto_create = true
///
/// [storage.retry]
/// max_retries = 3
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database file. `None` opens an in-memory database.
    pub path: Option<PathBuf>,
    /// Create missing tables instead of failing.
    pub auto_create: bool,
    pub retry: RetryConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
            auto_create: true,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry and timeout settings for backend calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Budget for a single attempt.
    pub call_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            call_timeout_ms: 5_000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory / Affinity / Cache
// ─────────────────────────────────────────────────────────────────────────────

/// Episodic memory settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// Days for an episode's importance to halve. Zero disables decay.
    pub half_life_days: f64,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
        }
    }
}

/// Point deltas applied per interaction type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinitySection {
    pub very_positive: i32,
    pub positive: i32,
    pub neutral: i32,
    pub negative: i32,
    pub very_negative: i32,
    pub long_message_chars: usize,
    pub long_message_bonus: i32,
    pub sentiment_weight: f64,
}

impl Default for AffinitySection {
    fn default() -> Self {
        Self {
            very_positive: 5,
            positive: 2,
            neutral: 0,
            negative: -2,
            very_negative: -5,
            long_message_chars: 200,
            long_message_bonus: 1,
            sentiment_weight: 2.0,
        }
    }
}

/// Compiled-prompt cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub capacity: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Tracing output settings.
///
/// `RUST_LOG`, when set, takes precedence over `filter`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive string.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Also write daily-rotated JSON logs into this directory.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
