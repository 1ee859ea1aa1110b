//! Configuration for the prompt cache.

use serde::{Deserialize, Serialize};

/// Default number of compiled prompts kept.
pub const DEFAULT_CAPACITY: usize = 256;

/// Configuration for the prompt cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries before the oldest-inserted one is evicted.
    /// Zero is treated as one.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of entries.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}
