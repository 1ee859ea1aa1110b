//! Process-local storage adapter.
//!
//! Keeps every collection in ordinary maps behind a single `RwLock`. Nothing
//! survives the process, which makes it the reference backend for tests and
//! for embedding the engine without a database.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{HealthStatus, StorageAdapter};
use crate::error::Result;
use rapport_types::{
    ActiveMood, AffinityState, Episode, Fact, InteractionRecord, InteractionType, LevelTable,
};

/// Interaction log entries kept per (user, personality) pair by default.
pub const DEFAULT_INTERACTION_LOG_CAP: usize = 1_000;

type FactKey = (String, String, String);
type PairKey = (String, String);

fn pair(user_id: &str, personality_name: &str) -> PairKey {
    (user_id.to_string(), personality_name.to_string())
}

#[derive(Debug, Default)]
struct Collections {
    facts: HashMap<FactKey, Fact>,
    episodes: HashMap<Uuid, Episode>,
    affinity: HashMap<PairKey, AffinityState>,
    moods: HashMap<PairKey, ActiveMood>,
    interactions: HashMap<PairKey, VecDeque<InteractionRecord>>,
}

/// Storage adapter backed by in-process maps.
///
/// The interaction log keeps only the newest entries per pair; affinity
/// counters still reflect every interaction.
#[derive(Debug)]
pub struct InMemoryAdapter {
    inner: RwLock<Collections>,
    interaction_log_cap: usize,
}

impl Default for InMemoryAdapter {
    fn default() -> Self {
        Self::with_interaction_log_cap(DEFAULT_INTERACTION_LOG_CAP)
    }
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `cap` log entries per pair (minimum 1).
    pub fn with_interaction_log_cap(cap: usize) -> Self {
        Self {
            inner: RwLock::new(Collections::default()),
            interaction_log_cap: cap.max(1),
        }
    }

    /// Total number of stored facts across all users.
    pub fn fact_count(&self) -> usize {
        self.inner.read().facts.len()
    }

    /// Total number of stored episodes across all users.
    pub fn episode_count(&self) -> usize {
        self.inner.read().episodes.len()
    }
}

#[async_trait]
impl StorageAdapter for InMemoryAdapter {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save_fact(&self, fact: &Fact) -> Result<()> {
        let key = (fact.user_id.clone(), fact.category.clone(), fact.key.clone());
        self.inner.write().facts.insert(key, fact.clone());
        debug!(user_id = %fact.user_id, category = %fact.category, key = %fact.key, "Saved fact");
        Ok(())
    }

    async fn get_fact(&self, user_id: &str, category: &str, key: &str) -> Result<Option<Fact>> {
        let id = (user_id.to_string(), category.to_string(), key.to_string());
        Ok(self.inner.read().facts.get(&id).cloned())
    }

    async fn get_facts(&self, user_id: &str, category: Option<&str>) -> Result<Vec<Fact>> {
        let inner = self.inner.read();
        let mut facts: Vec<Fact> = inner
            .facts
            .values()
            .filter(|f| f.user_id == user_id)
            .filter(|f| category.is_none_or(|c| f.category == c))
            .cloned()
            .collect();
        facts.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.category.cmp(&b.category))
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(facts)
    }

    async fn delete_fact(&self, user_id: &str, category: &str, key: &str) -> Result<bool> {
        let id = (user_id.to_string(), category.to_string(), key.to_string());
        Ok(self.inner.write().facts.remove(&id).is_some())
    }

    async fn save_episode(&self, episode: &Episode) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.episodes.contains_key(&episode.id) {
            debug!(episode_id = %episode.id, "Episode already stored, keeping original");
            return Ok(());
        }
        inner.episodes.insert(episode.id, episode.clone());
        debug!(episode_id = %episode.id, user_id = %episode.user_id, "Saved episode");
        Ok(())
    }

    async fn get_episodes(
        &self,
        user_id: &str,
        min_importance: Option<f64>,
        limit: Option<usize>,
    ) -> Result<Vec<Episode>> {
        let inner = self.inner.read();
        let mut episodes: Vec<Episode> = inner
            .episodes
            .values()
            .filter(|e| e.user_id == user_id)
            .filter(|e| min_importance.is_none_or(|min| e.base_importance >= min))
            .cloned()
            .collect();
        episodes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = limit {
            episodes.truncate(limit);
        }
        Ok(episodes)
    }

    async fn update_affinity(
        &self,
        user_id: &str,
        personality_name: &str,
        delta: i32,
        interaction_type: InteractionType,
        levels: &LevelTable,
    ) -> Result<AffinityState> {
        let key = pair(user_id, personality_name);
        let mut inner = self.inner.write();

        let state = inner
            .affinity
            .entry(key.clone())
            .or_insert_with(|| AffinityState::initial(user_id, personality_name, levels));
        state.apply(delta, levels, Utc::now());
        let state = state.clone();

        let log = inner.interactions.entry(key).or_default();
        log.push_back(InteractionRecord::from_state(&state, interaction_type, delta));
        while log.len() > self.interaction_log_cap {
            log.pop_front();
        }

        Ok(state)
    }

    async fn get_affinity(
        &self,
        user_id: &str,
        personality_name: &str,
    ) -> Result<Option<AffinityState>> {
        let key = pair(user_id, personality_name);
        Ok(self.inner.read().affinity.get(&key).cloned())
    }

    async fn get_all_affinities(&self, user_id: &str) -> Result<Vec<AffinityState>> {
        let inner = self.inner.read();
        let mut states: Vec<AffinityState> = inner
            .affinity
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        states.sort_by(|a, b| a.personality_name.cmp(&b.personality_name));
        Ok(states)
    }

    async fn reset_affinity(&self, user_id: &str, personality_name: &str) -> Result<bool> {
        let key = pair(user_id, personality_name);
        let mut inner = self.inner.write();
        inner.interactions.remove(&key);
        Ok(inner.affinity.remove(&key).is_some())
    }

    async fn recent_interactions(
        &self,
        user_id: &str,
        personality_name: &str,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>> {
        let key = pair(user_id, personality_name);
        let inner = self.inner.read();
        Ok(inner
            .interactions
            .get(&key)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn set_mood(&self, mood: &ActiveMood) -> Result<()> {
        let key = pair(&mood.user_id, &mood.personality_name);
        self.inner.write().moods.insert(key, mood.clone());
        Ok(())
    }

    async fn get_mood(&self, user_id: &str, personality_name: &str) -> Result<Option<ActiveMood>> {
        let key = pair(user_id, personality_name);
        Ok(self.inner.read().moods.get(&key).cloned())
    }

    async fn clear_mood(&self, user_id: &str, personality_name: &str) -> Result<bool> {
        let key = pair(user_id, personality_name);
        Ok(self.inner.write().moods.remove(&key).is_some())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let started = Instant::now();
        let inner = self.inner.read();
        let (facts, episodes) = (inner.facts.len(), inner.episodes.len());
        drop(inner);
        Ok(HealthStatus::new(self.name(), started.elapsed())
            .with_detail("facts", facts.to_string())
            .with_detail("episodes", episodes.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapport_types::EpisodeType;

    #[tokio::test]
    async fn test_fact_upsert_replaces() {
        let adapter = InMemoryAdapter::new();
        adapter
            .save_fact(&Fact::new("u1", "pref", "sport", "tennis"))
            .await
            .unwrap();
        adapter
            .save_fact(&Fact::new("u1", "pref", "sport", "golf"))
            .await
            .unwrap();

        assert_eq!(adapter.fact_count(), 1);
        let fact = adapter.get_fact("u1", "pref", "sport").await.unwrap().unwrap();
        assert_eq!(fact.value, "golf");
    }

    #[tokio::test]
    async fn test_get_facts_filters_by_category() {
        let adapter = InMemoryAdapter::new();
        for (cat, key) in [("pref", "sport"), ("pref", "food"), ("profile", "age")] {
            adapter
                .save_fact(&Fact::new("u1", cat, key, "x"))
                .await
                .unwrap();
        }
        adapter
            .save_fact(&Fact::new("u2", "pref", "sport", "x"))
            .await
            .unwrap();

        assert_eq!(adapter.get_facts("u1", None).await.unwrap().len(), 3);
        assert_eq!(adapter.get_facts("u1", Some("pref")).await.unwrap().len(), 2);
        assert!(adapter.get_facts("nobody", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_episode_is_append_only() {
        let adapter = InMemoryAdapter::new();
        let episode = Episode::new("u1", EpisodeType::Milestone, "First chat", 5.0);
        adapter.save_episode(&episode).await.unwrap();

        let mut altered = episode.clone();
        altered.title = "Rewritten".to_string();
        adapter.save_episode(&altered).await.unwrap();

        let stored = adapter.get_episodes("u1", None, None).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "First chat");
    }

    #[tokio::test]
    async fn test_affinity_update_and_reset() {
        let adapter = InMemoryAdapter::new();
        let levels = LevelTable::default();

        assert!(adapter.get_affinity("u1", "aria").await.unwrap().is_none());

        let state = adapter
            .update_affinity("u1", "aria", 5, InteractionType::Positive, &levels)
            .await
            .unwrap();
        assert_eq!(state.points, 5);
        assert_eq!(
            adapter.recent_interactions("u1", "aria", 10).await.unwrap().len(),
            1
        );

        assert!(adapter.reset_affinity("u1", "aria").await.unwrap());
        assert!(!adapter.reset_affinity("u1", "aria").await.unwrap());
        assert!(
            adapter
                .recent_interactions("u1", "aria", 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_user_stats_default_impl() {
        let adapter = InMemoryAdapter::new();
        adapter
            .save_fact(&Fact::new("u1", "pref", "a", "x").with_confidence(0.4))
            .await
            .unwrap();
        adapter
            .save_fact(&Fact::new("u1", "pref", "b", "y").with_confidence(0.8))
            .await
            .unwrap();
        adapter
            .update_affinity("u1", "aria", 2, InteractionType::Positive, &LevelTable::default())
            .await
            .unwrap();

        let stats = adapter.user_stats("u1").await.unwrap();
        assert_eq!(stats.fact_count, 2);
        assert_eq!(stats.affinity_count, 1);
        assert_eq!(stats.interaction_count, 1);
        assert!((stats.mean_confidence.unwrap() - 0.6).abs() < 1e-9);

        let empty = adapter.user_stats("nobody").await.unwrap();
        assert_eq!(empty, Default::default());
    }

    #[tokio::test]
    async fn test_interaction_log_keeps_newest_entries() {
        let adapter = InMemoryAdapter::with_interaction_log_cap(3);
        let levels = LevelTable::default();
        for delta in 1..=5 {
            adapter
                .update_affinity("u1", "aria", delta, InteractionType::Positive, &levels)
                .await
                .unwrap();
        }

        let log = adapter.recent_interactions("u1", "aria", 10).await.unwrap();
        let deltas: Vec<i32> = log.iter().map(|r| r.delta).collect();
        assert_eq!(deltas, vec![5, 4, 3]);

        let state = adapter.get_affinity("u1", "aria").await.unwrap().unwrap();
        assert_eq!((state.points, state.total_interactions), (15, 5));
    }
}
