//! The assembled engine: stores, affinity state machine and prompt pipeline
//! built from one [`RapportConfig`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

use rapport_compose::{
    CacheConfig, CompiledPrompt, PlainTextCompiler, PromptCache, PromptCompiler, PromptPipeline,
};
use rapport_config::{AffinitySection, RapportConfig, RetryConfig, StorageBackend};
use rapport_memory::{
    AffinityConfig, AffinityEngine, AffinityUpdate, DecayConfig, EpisodicStore, FactStore,
    HealthStatus, InMemoryAdapter, InMemoryWideColumn, InteractionSignals, RankedEpisode,
    RetryPolicy, SqliteAdapter, SqliteConfig, StorageAdapter, UserStats, WideColumnAdapter,
};
use rapport_types::{
    ActiveMood, AffinityState, Episode, Fact, InteractionType, LevelTable, Personality,
    ValidationError,
};

use crate::error::{RapportError, Result};

fn retry_policy(config: &RetryConfig) -> RetryPolicy {
    RetryPolicy {
        max_retries: config.max_retries,
        initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        max_backoff: Duration::from_millis(config.max_backoff_ms),
        call_timeout: Duration::from_millis(config.call_timeout_ms),
    }
}

fn affinity_config(section: &AffinitySection) -> AffinityConfig {
    AffinityConfig {
        very_positive: section.very_positive,
        positive: section.positive,
        neutral: section.neutral,
        negative: section.negative,
        very_negative: section.very_negative,
        long_message_chars: section.long_message_chars,
        long_message_bonus: section.long_message_bonus,
        sentiment_weight: section.sentiment_weight,
    }
}

/// Open the storage backend named by `[storage]`.
pub async fn open_adapter(config: &RapportConfig) -> Result<Arc<dyn StorageAdapter>> {
    let storage = config.storage();
    let retry = retry_policy(&storage.retry);
    let adapter: Arc<dyn StorageAdapter> = match storage.backend {
        StorageBackend::Memory => Arc::new(InMemoryAdapter::new()),
        StorageBackend::Sqlite => {
            let sqlite = SqliteConfig {
                path: storage.path.clone(),
                auto_create: storage.auto_create,
                retry,
            };
            Arc::new(SqliteAdapter::open(sqlite).await?)
        }
        StorageBackend::WideColumn => {
            Arc::new(WideColumnAdapter::new(Arc::new(InMemoryWideColumn::new()), retry))
        }
    };
    info!(backend = adapter.name(), "Storage backend ready");
    Ok(adapter)
}

/// Every Rapport component wired over one storage adapter.
pub struct Rapport {
    adapter: Arc<dyn StorageAdapter>,
    facts: FactStore,
    episodes: EpisodicStore,
    affinity: AffinityEngine,
    prompts: PromptPipeline,
    personalities: RwLock<HashMap<String, Arc<Personality>>>,
}

impl Rapport {
    /// Build the engine, opening the configured backend and compiling
    /// prompts with [`PlainTextCompiler`].
    pub async fn from_config(config: &RapportConfig) -> Result<Self> {
        Self::from_config_with_compiler(config, Arc::new(PlainTextCompiler)).await
    }

    /// Build the engine with a caller-supplied prompt compiler.
    pub async fn from_config_with_compiler(
        config: &RapportConfig,
        compiler: Arc<dyn PromptCompiler>,
    ) -> Result<Self> {
        config.validate()?;
        let adapter = open_adapter(config).await?;
        Ok(Self::with_adapter(adapter, config, compiler))
    }

    /// Build the engine over an already-open adapter.
    pub fn with_adapter(
        adapter: Arc<dyn StorageAdapter>,
        config: &RapportConfig,
        compiler: Arc<dyn PromptCompiler>,
    ) -> Self {
        let decay = DecayConfig::with_half_life_days(config.memory().half_life_days);
        let cache = PromptCache::new(CacheConfig::new().with_capacity(config.cache().capacity));

        Self {
            facts: FactStore::new(Arc::clone(&adapter)),
            episodes: EpisodicStore::new(Arc::clone(&adapter), decay),
            affinity: AffinityEngine::new(
                Arc::clone(&adapter),
                LevelTable::default(),
                affinity_config(&config.affinity()),
            ),
            prompts: PromptPipeline::new(cache, compiler),
            personalities: RwLock::new(HashMap::new()),
            adapter,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    pub fn facts(&self) -> &FactStore {
        &self.facts
    }

    pub fn episodes(&self) -> &EpisodicStore {
        &self.episodes
    }

    pub fn affinity(&self) -> &AffinityEngine {
        &self.affinity
    }

    pub fn prompts(&self) -> &PromptPipeline {
        &self.prompts
    }

    // ─────────────────────────────────────────────────────────────────────
    // Personalities
    // ─────────────────────────────────────────────────────────────────────

    /// Register (or replace) a personality and its level table.
    pub fn register_personality(&self, personality: Personality) -> Result<()> {
        if personality.name.trim().is_empty() {
            return Err(ValidationError::EmptyField("name".to_string()).into());
        }
        self.affinity
            .register_levels(personality.name.clone(), personality.level_table());
        info!(personality = %personality.name, "Registered personality");
        self.personalities
            .write()
            .insert(personality.name.clone(), Arc::new(personality));
        Ok(())
    }

    pub fn personality(&self, name: &str) -> Result<Arc<Personality>> {
        self.personalities
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RapportError::UnknownPersonality(name.to_string()))
    }

    /// Names of registered personalities, sorted.
    pub fn personality_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.personalities.read().keys().cloned().collect();
        names.sort();
        names
    }

    // ─────────────────────────────────────────────────────────────────────
    // Facts and episodes
    // ─────────────────────────────────────────────────────────────────────

    /// Save a fact, merging with any stored fact of the same identity.
    pub async fn remember_fact(&self, fact: Fact) -> Result<Fact> {
        Ok(self.facts.save(fact).await?)
    }

    /// Save facts given as loosely-shaped JSON objects.
    pub async fn remember_fact_values(&self, raw: &[Value]) -> Result<Vec<Fact>> {
        Ok(self.facts.save_values(raw).await?)
    }

    pub async fn facts_for(&self, user_id: &str, category: Option<&str>) -> Result<Vec<Fact>> {
        Ok(self.facts.get(user_id, category).await?)
    }

    pub async fn record_episode(&self, episode: &Episode) -> Result<()> {
        Ok(self.episodes.save(episode).await?)
    }

    pub async fn important_episodes(
        &self,
        user_id: &str,
        min_importance: f64,
        limit: Option<usize>,
    ) -> Result<Vec<RankedEpisode>> {
        Ok(self
            .episodes
            .get_by_importance(user_id, min_importance, limit)
            .await?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Affinity and moods
    // ─────────────────────────────────────────────────────────────────────

    /// Apply one classified interaction between a user and a registered
    /// personality.
    pub async fn record_interaction(
        &self,
        user_id: &str,
        personality_name: &str,
        interaction: InteractionType,
        signals: &InteractionSignals,
    ) -> Result<AffinityUpdate> {
        self.personality(personality_name)?;
        Ok(self
            .affinity
            .update_affinity(user_id, personality_name, interaction, signals)
            .await?)
    }

    pub async fn affinity_for(&self, user_id: &str, personality_name: &str) -> Result<AffinityState> {
        Ok(self.affinity.get_affinity(user_id, personality_name).await?)
    }

    /// Activate one of the personality's moods for this user.
    pub async fn set_mood(
        &self,
        user_id: &str,
        personality_name: &str,
        mood: &str,
    ) -> Result<ActiveMood> {
        self.personality(personality_name)?.mood(mood)?;
        Ok(self.affinity.set_mood(user_id, personality_name, mood).await?)
    }

    pub async fn clear_mood(&self, user_id: &str, personality_name: &str) -> Result<bool> {
        Ok(self.affinity.clear_mood(user_id, personality_name).await?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Prompts
    // ─────────────────────────────────────────────────────────────────────

    /// Compose the personality for this user's current relationship level
    /// and active mood, then compile it (cached).
    pub async fn compose_and_compile(
        &self,
        user_id: &str,
        personality_name: &str,
        max_tokens: u32,
    ) -> Result<CompiledPrompt> {
        let personality = self.personality(personality_name)?;
        let state = self.affinity.get_affinity(user_id, personality_name).await?;
        let mood = self.affinity.get_mood(user_id, personality_name).await?;
        debug!(
            %user_id,
            personality = %personality_name,
            level = %state.level,
            mood = mood.as_ref().map(|m| m.mood.as_str()).unwrap_or("none"),
            "Composing prompt"
        );

        let compiled = self
            .prompts
            .compile_for_state(
                &personality,
                &state,
                mood.as_ref().map(|m| m.mood.as_str()),
                max_tokens,
            )
            .await?;
        Ok(compiled)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Diagnostics
    // ─────────────────────────────────────────────────────────────────────

    pub async fn user_stats(&self, user_id: &str) -> Result<UserStats> {
        Ok(self.adapter.user_stats(user_id).await?)
    }

    pub async fn health_check(&self) -> Result<HealthStatus> {
        Ok(self.adapter.health_check().await?)
    }
}
