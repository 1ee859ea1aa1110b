//! Affinity state machine between users and personalities.
//!
//! Interactions move a pair's points within 0-100; the relationship level is
//! whichever range of the level table contains the points. Level crossings are
//! published on a broadcast channel for anyone who cares (logging, UI, ...);
//! nobody has to listen.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::backend::StorageAdapter;
use crate::error::{MemoryError, Result};
use crate::keylock::KeyedLocks;
use rapport_types::{
    ActiveMood, AffinityState, InteractionRecord, InteractionType, LevelTable,
    RelationshipLevelConfig,
};

/// Largest points change a single interaction can cause.
pub const MAX_DELTA: i32 = 10;

/// Attempts at an affinity update before a backend conflict is surfaced.
const UPDATE_ATTEMPTS: usize = 2;

const EVENT_CAPACITY: usize = 64;

/// Tunable weights for turning an interaction into a points delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AffinityConfig {
    pub very_positive: i32,
    pub positive: i32,
    pub neutral: i32,
    pub negative: i32,
    pub very_negative: i32,
    /// Messages at least this long earn the bonus on positive interactions.
    pub long_message_chars: usize,
    pub long_message_bonus: i32,
    /// Sentiment in [-1, 1] is scaled by this and rounded.
    pub sentiment_weight: f64,
}

impl Default for AffinityConfig {
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

impl AffinityConfig {
    pub fn base_delta(&self, interaction: InteractionType) -> i32 {
        match interaction {
            InteractionType::VeryPositive => self.very_positive,
            InteractionType::Positive => self.positive,
            InteractionType::Neutral => self.neutral,
            InteractionType::Negative => self.negative,
            InteractionType::VeryNegative => self.very_negative,
        }
    }

    /// Points delta for one interaction, bounded to ±[`MAX_DELTA`].
    pub fn compute_delta(&self, interaction: InteractionType, signals: &InteractionSignals) -> i32 {
        let mut delta = i64::from(self.base_delta(interaction));

        if interaction.is_positive()
            && signals
                .message_length
                .is_some_and(|len| len >= self.long_message_chars)
        {
            delta += i64::from(self.long_message_bonus);
        }
        if let Some(sentiment) = signals.sentiment.filter(|s| s.is_finite()) {
            delta += (sentiment.clamp(-1.0, 1.0) * self.sentiment_weight).round() as i64;
        }
        if let Some(raw) = signals.raw_delta {
            delta += i64::from(raw);
        }

        delta.clamp(-i64::from(MAX_DELTA), i64::from(MAX_DELTA)) as i32
    }
}

/// Optional signals that adjust an interaction's base delta.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionSignals {
    /// Length of the user's message in characters.
    pub message_length: Option<usize>,
    /// Sentiment score in [-1, 1].
    pub sentiment: Option<f64>,
    /// Extra points supplied by the caller.
    pub raw_delta: Option<i32>,
}

impl InteractionSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message_length = Some(message.chars().count());
        self
    }

    pub fn with_sentiment(mut self, sentiment: f64) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    pub fn with_raw_delta(mut self, raw_delta: i32) -> Self {
        self.raw_delta = Some(raw_delta);
        self
    }
}

/// Published when an update moves a pair into a different level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelChange {
    pub user_id: String,
    pub personality_name: String,
    pub from: String,
    pub to: String,
    pub points: i32,
    pub at: DateTime<Utc>,
}

/// Outcome of one affinity update.
#[derive(Debug, Clone, PartialEq)]
pub struct AffinityUpdate {
    pub state: AffinityState,
    /// Delta actually applied (before clamping points to 0-100).
    pub delta: i32,
    pub level_change: Option<LevelChange>,
}

/// Serialized, event-emitting front end to the affinity collection.
pub struct AffinityEngine {
    adapter: Arc<dyn StorageAdapter>,
    config: AffinityConfig,
    default_levels: LevelTable,
    levels: RwLock<HashMap<String, LevelTable>>,
    locks: KeyedLocks,
    events: broadcast::Sender<LevelChange>,
}

fn pair_key(user_id: &str, personality_name: &str) -> String {
    format!("{user_id}\u{1f}{personality_name}")
}

impl AffinityEngine {
    pub fn new(adapter: Arc<dyn StorageAdapter>, levels: LevelTable, config: AffinityConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            adapter,
            config,
            default_levels: levels,
            levels: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new(),
            events,
        }
    }

    pub fn config(&self) -> &AffinityConfig {
        &self.config
    }

    /// Use `levels` instead of the default table for one personality.
    pub fn register_levels(&self, personality_name: impl Into<String>, levels: LevelTable) {
        self.levels.write().insert(personality_name.into(), levels);
    }

    /// The level table in force for a personality.
    pub fn levels_for(&self, personality_name: &str) -> LevelTable {
        self.levels
            .read()
            .get(personality_name)
            .cloned()
            .unwrap_or_else(|| self.default_levels.clone())
    }

    /// Receive level-change events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LevelChange> {
        self.events.subscribe()
    }

    /// Apply one classified interaction.
    pub async fn update_affinity(
        &self,
        user_id: &str,
        personality_name: &str,
        interaction: InteractionType,
        signals: &InteractionSignals,
    ) -> Result<AffinityUpdate> {
        let delta = self.config.compute_delta(interaction, signals);
        self.apply(user_id, personality_name, delta, interaction).await
    }

    /// Move points by an explicit amount, bypassing the per-interaction bound.
    ///
    /// Points are still clamped to 0-100. Logged as a positive, neutral or
    /// negative interaction according to the sign of `delta`.
    pub async fn adjust_points(
        &self,
        user_id: &str,
        personality_name: &str,
        delta: i32,
    ) -> Result<AffinityUpdate> {
        let interaction = match delta.signum() {
            1 => InteractionType::Positive,
            -1 => InteractionType::Negative,
            _ => InteractionType::Neutral,
        };
        self.apply(user_id, personality_name, delta, interaction).await
    }

    async fn apply(
        &self,
        user_id: &str,
        personality_name: &str,
        delta: i32,
        interaction: InteractionType,
    ) -> Result<AffinityUpdate> {
        let levels = self.levels_for(personality_name);
        let _guard = self.locks.lock(&pair_key(user_id, personality_name)).await;

        let previous_level = self
            .adapter
            .get_affinity(user_id, personality_name)
            .await?
            .map(|state| levels.level_for(state.points).name.clone())
            .unwrap_or_else(|| levels.lowest().name.clone());

        let mut attempt = 0;
        let state = loop {
            attempt += 1;
            match self
                .adapter
                .update_affinity(user_id, personality_name, delta, interaction, &levels)
                .await
            {
                Err(MemoryError::Conflict(what)) if attempt < UPDATE_ATTEMPTS => {
                    warn!(%user_id, personality = %personality_name, %what, "Affinity update conflicted, retrying");
                }
                outcome => break outcome?,
            }
        };

        debug!(
            %user_id,
            personality = %personality_name,
            %interaction,
            delta,
            points = state.points,
            "Applied interaction"
        );

        let level_change = (state.level != previous_level).then(|| LevelChange {
            user_id: user_id.to_string(),
            personality_name: personality_name.to_string(),
            from: previous_level,
            to: state.level.clone(),
            points: state.points,
            at: state.last_interaction_at.unwrap_or_else(Utc::now),
        });
        if let Some(change) = &level_change {
            info!(
                %user_id,
                personality = %personality_name,
                from = %change.from,
                to = %change.to,
                points = change.points,
                "Relationship level changed"
            );
            // No subscribers is fine.
            let _ = self.events.send(change.clone());
        }

        Ok(AffinityUpdate {
            state,
            delta,
            level_change,
        })
    }

    /// Current state for a pair; the zero state if they have never interacted.
    ///
    /// The level is recomputed against the table in force, so a changed table
    /// takes effect without rewriting stored rows.
    pub async fn get_affinity(&self, user_id: &str, personality_name: &str) -> Result<AffinityState> {
        let levels = self.levels_for(personality_name);
        Ok(match self.adapter.get_affinity(user_id, personality_name).await? {
            Some(mut state) => {
                state.level = levels.level_for(state.points).name.clone();
                state
            }
            None => AffinityState::initial(user_id, personality_name, &levels),
        })
    }

    /// Every personality the user has interacted with, ordered by name.
    pub async fn get_all(&self, user_id: &str) -> Result<Vec<AffinityState>> {
        let mut states = self.adapter.get_all_affinities(user_id).await?;
        for state in &mut states {
            let levels = self.levels_for(&state.personality_name);
            state.level = levels.level_for(state.points).name.clone();
        }
        Ok(states)
    }

    /// Level configuration matching the pair's current points.
    pub async fn current_level_config(
        &self,
        user_id: &str,
        personality_name: &str,
    ) -> Result<RelationshipLevelConfig> {
        let state = self.get_affinity(user_id, personality_name).await?;
        Ok(self
            .levels_for(personality_name)
            .level_for(state.points)
            .clone())
    }

    /// Forget a pair's affinity and interaction log. Returns `true` if any existed.
    pub async fn reset(&self, user_id: &str, personality_name: &str) -> Result<bool> {
        let _guard = self.locks.lock(&pair_key(user_id, personality_name)).await;
        let removed = self.adapter.reset_affinity(user_id, personality_name).await?;
        if removed {
            info!(%user_id, personality = %personality_name, "Reset affinity");
        }
        Ok(removed)
    }

    pub async fn recent_interactions(
        &self,
        user_id: &str,
        personality_name: &str,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>> {
        self.adapter
            .recent_interactions(user_id, personality_name, limit)
            .await
    }

    /// Make `mood` the active mood for the pair.
    pub async fn set_mood(&self, user_id: &str, personality_name: &str, mood: &str) -> Result<ActiveMood> {
        let active = ActiveMood::new(user_id, personality_name, mood);
        self.adapter.set_mood(&active).await?;
        debug!(%user_id, personality = %personality_name, %mood, "Mood set");
        Ok(active)
    }

    pub async fn get_mood(&self, user_id: &str, personality_name: &str) -> Result<Option<ActiveMood>> {
        self.adapter.get_mood(user_id, personality_name).await
    }

    pub async fn clear_mood(&self, user_id: &str, personality_name: &str) -> Result<bool> {
        self.adapter.clear_mood(user_id, personality_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryAdapter;

    fn three_levels() -> LevelTable {
        LevelTable::new(vec![
            RelationshipLevelConfig::new("stranger", 0, 20),
            RelationshipLevelConfig::new("acquaintance", 21, 40),
            RelationshipLevelConfig::new("friend", 41, 100),
        ])
        .unwrap()
    }

    fn engine(levels: LevelTable) -> AffinityEngine {
        AffinityEngine::new(
            Arc::new(InMemoryAdapter::new()),
            levels,
            AffinityConfig::default(),
        )
    }

    #[test]
    fn test_compute_delta_base_values() {
        let config = AffinityConfig::default();
        let none = InteractionSignals::default();
        assert_eq!(config.compute_delta(InteractionType::VeryPositive, &none), 5);
        assert_eq!(config.compute_delta(InteractionType::Positive, &none), 2);
        assert_eq!(config.compute_delta(InteractionType::Neutral, &none), 0);
        assert_eq!(config.compute_delta(InteractionType::Negative, &none), -2);
        assert_eq!(config.compute_delta(InteractionType::VeryNegative, &none), -5);
    }

    #[test]
    fn test_compute_delta_signals() {
        let config = AffinityConfig::default();
        let long = "x".repeat(250);

        let signals = InteractionSignals::new().with_message(&long);
        assert_eq!(config.compute_delta(InteractionType::Positive, &signals), 3);
        // Long negative messages earn nothing extra.
        assert_eq!(config.compute_delta(InteractionType::Negative, &signals), -2);

        let signals = InteractionSignals::new().with_sentiment(0.8);
        assert_eq!(config.compute_delta(InteractionType::Positive, &signals), 4);
        let signals = InteractionSignals::new().with_sentiment(-0.2);
        assert_eq!(config.compute_delta(InteractionType::Neutral, &signals), 0);
    }

    #[test]
    fn test_compute_delta_is_bounded() {
        let config = AffinityConfig::default();
        let huge = InteractionSignals::new()
            .with_message(&"x".repeat(500))
            .with_sentiment(1.0)
            .with_raw_delta(50);
        assert_eq!(config.compute_delta(InteractionType::VeryPositive, &huge), MAX_DELTA);

        let awful = InteractionSignals::new().with_sentiment(-1.0).with_raw_delta(i32::MIN);
        assert_eq!(config.compute_delta(InteractionType::VeryNegative, &awful), -MAX_DELTA);
    }

    #[tokio::test]
    async fn test_threshold_walk() {
        let engine = engine(three_levels());

        let start = engine.get_affinity("u1", "aria").await.unwrap();
        assert_eq!((start.points, start.level.as_str()), (0, "stranger"));

        let update = engine.adjust_points("u1", "aria", 5).await.unwrap();
        assert_eq!((update.state.points, update.state.level.as_str()), (5, "stranger"));
        assert!(update.level_change.is_none());

        let update = engine.adjust_points("u1", "aria", 20).await.unwrap();
        assert_eq!(
            (update.state.points, update.state.level.as_str()),
            (25, "acquaintance")
        );
        let change = update.level_change.unwrap();
        assert_eq!((change.from.as_str(), change.to.as_str()), ("stranger", "acquaintance"));
    }

    #[tokio::test]
    async fn test_unseen_pair_is_zero_state() {
        let engine = engine(LevelTable::default());
        let state = engine.get_affinity("u1", "new_personality").await.unwrap();
        assert_eq!(state.points, 0);
        assert_eq!(state.level, "stranger");
        assert_eq!(state.total_interactions, 0);
        assert!(engine.get_all("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_points_stay_in_bounds() {
        let engine = engine(LevelTable::default());
        for _ in 0..30 {
            engine
                .update_affinity("u1", "aria", InteractionType::VeryPositive, &InteractionSignals::default())
                .await
                .unwrap();
        }
        let state = engine.get_affinity("u1", "aria").await.unwrap();
        assert_eq!(state.points, 100);
        assert_eq!(state.level, "confidant");
        assert_eq!(state.positive_count, 30);

        for _ in 0..30 {
            engine
                .update_affinity("u1", "aria", InteractionType::VeryNegative, &InteractionSignals::default())
                .await
                .unwrap();
        }
        let state = engine.get_affinity("u1", "aria").await.unwrap();
        assert_eq!(state.points, 0);
        assert_eq!(state.negative_count, 30);
        assert_eq!(state.total_interactions, 60);
    }

    #[tokio::test]
    async fn test_level_change_is_broadcast() {
        let engine = engine(three_levels());
        let mut events = engine.subscribe();

        engine.adjust_points("u1", "aria", 30).await.unwrap();
        let event = events.try_recv().unwrap();
        assert_eq!(event.to, "acquaintance");
        assert_eq!(event.points, 30);

        engine.adjust_points("u1", "aria", 1).await.unwrap();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let engine = Arc::new(engine(LevelTable::default()));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine
                    .update_affinity("u1", "aria", InteractionType::Positive, &InteractionSignals::default())
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let state = engine.get_affinity("u1", "aria").await.unwrap();
        assert_eq!(state.points, 40);
        assert_eq!(state.total_interactions, 20);
    }

    #[tokio::test]
    async fn test_per_personality_levels_and_current_config() {
        let engine = engine(LevelTable::default());
        engine.register_levels("aria", three_levels());

        engine.adjust_points("u1", "aria", 50).await.unwrap();
        engine.adjust_points("u1", "bob", 50).await.unwrap();

        assert_eq!(
            engine.current_level_config("u1", "aria").await.unwrap().name,
            "friend"
        );
        assert_eq!(
            engine.current_level_config("u1", "bob").await.unwrap().name,
            "friend"
        );
        assert_eq!(
            engine.current_level_config("u1", "nobody").await.unwrap().name,
            "stranger"
        );
    }

    #[tokio::test]
    async fn test_reset_and_log() {
        let engine = engine(LevelTable::default());
        engine
            .update_affinity("u1", "aria", InteractionType::Positive, &InteractionSignals::default())
            .await
            .unwrap();
        assert_eq!(engine.recent_interactions("u1", "aria", 5).await.unwrap().len(), 1);
        assert!(engine.reset("u1", "aria").await.unwrap());
        assert_eq!(engine.get_affinity("u1", "aria").await.unwrap().points, 0);
        assert!(engine.recent_interactions("u1", "aria", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_moods() {
        let engine = engine(LevelTable::default());
        assert!(engine.get_mood("u1", "aria").await.unwrap().is_none());
        engine.set_mood("u1", "aria", "playful").await.unwrap();
        assert_eq!(
            engine.get_mood("u1", "aria").await.unwrap().unwrap().mood,
            "playful"
        );
        assert!(engine.clear_mood("u1", "aria").await.unwrap());
    }
}
