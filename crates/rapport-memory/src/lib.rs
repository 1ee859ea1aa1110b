//! Fact, episode and affinity storage for Rapport.
//!
//! Everything here sits on the [`StorageAdapter`] trait, so the same stores run
//! against process memory, an existing SQLite database of unknown layout, or a
//! wide-column store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ ┌───────────────┐ ┌────────────────┐
//! │  FactStore   │ │ EpisodicStore │ │ AffinityEngine │
//! │  fingerprint │ │  decay/rank   │ │ levels, events │
//! └──────┬───────┘ └───────┬───────┘ └───────┬────────┘
//!        └─────────────────┼─────────────────┘
//!                 ┌────────┴────────┐
//!                 │ StorageAdapter  │  retry + per-call timeout
//!                 └────────┬────────┘
//!        ┌─────────────────┼──────────────────┐
//!   InMemoryAdapter   SqliteAdapter   WideColumnAdapter
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use rapport_memory::{FactStore, SqliteAdapter, SqliteConfig};
//! use rapport_types::Fact;
//!
//! # async fn run() -> rapport_memory::Result<()> {
//! let adapter = Arc::new(SqliteAdapter::open(SqliteConfig::new("rapport.db")).await?);
//! let facts = FactStore::new(adapter);
//!
//! facts.save(Fact::new("u1", "preference", "sport", "tennis")).await?;
//! let prefs = facts.get("u1", Some("preference")).await?;
//! # Ok(())
//! # }
//! ```

pub mod affinity;
pub mod backend;
pub mod backends;
pub mod episodes;
pub mod error;
pub mod facts;
pub mod keylock;
pub mod retry;

// Re-export adapter contract
pub use backend::{HealthStatus, StorageAdapter, UserStats, fact_matches};

// Re-export backends
pub use backends::{
    InMemoryAdapter, InMemoryWideColumn, SqliteAdapter, SqliteConfig, VersionedRow,
    WideColumnAdapter, WideColumnSession,
};

// Re-export error types
pub use error::{MemoryError, Result, StorageError, ValidationError};

// Re-export stores
pub use affinity::{
    AffinityConfig, AffinityEngine, AffinityUpdate, InteractionSignals, LevelChange, MAX_DELTA,
};
pub use episodes::{DecayConfig, EpisodicStore, RankedEpisode};
pub use facts::{FactStore, deduplicate, fingerprint, fingerprint_value, merge, normalize_field};

pub use keylock::KeyedLocks;
pub use retry::{RetryPolicy, retry_when, with_retry};
