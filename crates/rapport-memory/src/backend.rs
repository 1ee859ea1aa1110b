//! Storage adapter trait for pluggable persistence.
//!
//! This module defines the [`StorageAdapter`] trait that every backend
//! (in-memory, flexible-schema SQLite, wide-column) implements. The stores in
//! this crate only ever talk to a `dyn StorageAdapter`, so they behave the same
//! regardless of where records actually live.
//!
//! # Absence is not an error
//!
//! Reads for records that do not exist return `Ok(None)` or an empty `Vec`.
//! Errors are reserved for validation failures and backend trouble.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use rapport_types::{
    ActiveMood, AffinityState, Episode, Fact, InteractionRecord, InteractionType, LevelTable,
};

/// Per-user record counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub fact_count: usize,
    pub episode_count: usize,
    /// Number of personalities the user has affinity state with.
    pub affinity_count: usize,
    pub interaction_count: usize,
    /// Mean confidence across the user's facts (None when there are none).
    pub mean_confidence: Option<f64>,
}

/// Result of a successful health probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Backend name (e.g. "memory", "sqlite").
    pub backend: String,
    /// Round-trip time of the probe.
    pub latency: Duration,
    /// Backend-specific details (resolved table names, paths, ...).
    pub details: BTreeMap<String, String>,
}

impl HealthStatus {
    pub fn new(backend: impl Into<String>, latency: Duration) -> Self {
        Self {
            backend: backend.into(),
            latency,
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Uniform persistence contract for facts, episodes and affinity state.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` to allow sharing across tasks.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Short backend name used in logs and health reports.
    fn name(&self) -> &str;

    // ── Facts ────────────────────────────────────────────────────────────

    /// Insert or replace the fact identified by `(user_id, category, key)`.
    async fn save_fact(&self, fact: &Fact) -> Result<()>;

    /// Get a single fact by identity.
    async fn get_fact(&self, user_id: &str, category: &str, key: &str) -> Result<Option<Fact>>;

    /// Get a user's facts, optionally restricted to one category.
    ///
    /// Results are ordered by `updated_at` descending.
    async fn get_facts(&self, user_id: &str, category: Option<&str>) -> Result<Vec<Fact>>;

    /// Delete a fact. Returns `true` if it existed.
    async fn delete_fact(&self, user_id: &str, category: &str, key: &str) -> Result<bool>;

    /// Case-insensitive substring search over category, key and value.
    async fn search_facts(
        &self,
        user_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Fact>> {
        let mut facts: Vec<Fact> = self
            .get_facts(user_id, None)
            .await?
            .into_iter()
            .filter(|f| fact_matches(f, query))
            .collect();
        if let Some(limit) = limit {
            facts.truncate(limit);
        }
        Ok(facts)
    }

    // ── Episodes ─────────────────────────────────────────────────────────

    /// Append an episode. Saving an id that already exists is a no-op.
    async fn save_episode(&self, episode: &Episode) -> Result<()>;

    /// Get a user's episodes, newest first.
    ///
    /// `min_importance` filters on the stored base importance; decay is
    /// applied by the episodic store, not here.
    async fn get_episodes(
        &self,
        user_id: &str,
        min_importance: Option<f64>,
        limit: Option<usize>,
    ) -> Result<Vec<Episode>>;

    /// Case-insensitive substring search over title, summary and tags.
    async fn search_episodes(
        &self,
        user_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Episode>> {
        let mut episodes: Vec<Episode> = self
            .get_episodes(user_id, None, None)
            .await?
            .into_iter()
            .filter(|e| e.matches(query))
            .collect();
        if let Some(limit) = limit {
            episodes.truncate(limit);
        }
        Ok(episodes)
    }

    // ── Affinity ─────────────────────────────────────────────────────────

    /// Atomically apply `delta` to the pair's affinity and return the new state.
    ///
    /// Creates the zero state first when the pair has never interacted. Points
    /// are clamped to 0-100 and the level recomputed from `levels`. An entry is
    /// appended to the interaction log.
    async fn update_affinity(
        &self,
        user_id: &str,
        personality_name: &str,
        delta: i32,
        interaction_type: InteractionType,
        levels: &LevelTable,
    ) -> Result<AffinityState>;

    /// Stored affinity for a pair, if any.
    async fn get_affinity(
        &self,
        user_id: &str,
        personality_name: &str,
    ) -> Result<Option<AffinityState>>;

    /// All affinity records for a user, ordered by personality name.
    async fn get_all_affinities(&self, user_id: &str) -> Result<Vec<AffinityState>>;

    /// Remove a pair's affinity state. Returns `true` if it existed.
    async fn reset_affinity(&self, user_id: &str, personality_name: &str) -> Result<bool>;

    /// Most recent interaction log entries for a pair, newest first.
    async fn recent_interactions(
        &self,
        user_id: &str,
        personality_name: &str,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>>;

    // ── Moods ────────────────────────────────────────────────────────────

    /// Set (or replace) the active mood for a pair.
    async fn set_mood(&self, mood: &ActiveMood) -> Result<()>;

    /// The active mood for a pair, if any.
    async fn get_mood(&self, user_id: &str, personality_name: &str) -> Result<Option<ActiveMood>>;

    /// Clear the active mood. Returns `true` if one was set.
    async fn clear_mood(&self, user_id: &str, personality_name: &str) -> Result<bool>;

    // ── Maintenance ──────────────────────────────────────────────────────

    /// Per-user record counts.
    async fn user_stats(&self, user_id: &str) -> Result<UserStats> {
        let facts = self.get_facts(user_id, None).await?;
        let episodes = self.get_episodes(user_id, None, None).await?;
        let affinities = self.get_all_affinities(user_id).await?;
        let mean_confidence = if facts.is_empty() {
            None
        } else {
            Some(facts.iter().map(|f| f.confidence).sum::<f64>() / facts.len() as f64)
        };
        Ok(UserStats {
            fact_count: facts.len(),
            episode_count: episodes.len(),
            affinity_count: affinities.len(),
            interaction_count: affinities
                .iter()
                .map(|a| a.total_interactions as usize)
                .sum(),
            mean_confidence,
        })
    }

    /// Probe the backend. Unreachable backends return an error.
    async fn health_check(&self) -> Result<HealthStatus>;
}

/// Whether a fact's category, key or value contains `query` (case-insensitive).
pub fn fact_matches(fact: &Fact, query: &str) -> bool {
    let needle = query.to_lowercase();
    fact.category.to_lowercase().contains(&needle)
        || fact.key.to_lowercase().contains(&needle)
        || fact.value.to_lowercase().contains(&needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_matches() {
        let fact = Fact::new("u1", "preference", "sport", "Tennis");
        assert!(fact_matches(&fact, "tennis"));
        assert!(fact_matches(&fact, "PREF"));
        assert!(fact_matches(&fact, "spo"));
        assert!(!fact_matches(&fact, "golf"));
    }

    #[test]
    fn test_health_status_details() {
        let status = HealthStatus::new("memory", Duration::from_millis(1))
            .with_detail("facts", "12");
        assert_eq!(status.details.get("facts").map(String::as_str), Some("12"));
    }
}
