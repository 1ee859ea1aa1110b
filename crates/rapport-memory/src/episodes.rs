//! Episodic memory with time-decayed importance.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::StorageAdapter;
use crate::error::Result;
use rapport_types::Episode;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// How fast episode importance fades.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayConfig {
    /// Days for importance to halve.
    pub half_life_days: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            half_life_days: 30.0,
        }
    }
}

impl DecayConfig {
    pub fn with_half_life_days(half_life_days: f64) -> Self {
        Self { half_life_days }
    }

    /// Multiplier in (0, 1] for an episode of the given age.
    ///
    /// Negative ages (episodes stamped in the future) decay as if brand new.
    /// A non-positive half-life disables decay.
    pub fn factor(&self, age_days: f64) -> f64 {
        if self.half_life_days <= 0.0 || !self.half_life_days.is_finite() {
            return 1.0;
        }
        0.5_f64.powf(age_days.max(0.0) / self.half_life_days)
    }
}

/// An episode paired with its importance at query time.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedEpisode {
    pub episode: Episode,
    pub current_importance: f64,
}

/// Append-only episode store that ranks by decayed importance.
pub struct EpisodicStore {
    adapter: Arc<dyn StorageAdapter>,
    decay: DecayConfig,
}

impl EpisodicStore {
    pub fn new(adapter: Arc<dyn StorageAdapter>, decay: DecayConfig) -> Self {
        Self { adapter, decay }
    }

    pub fn decay(&self) -> &DecayConfig {
        &self.decay
    }

    /// Validate and append an episode. Re-saving an existing id changes nothing.
    pub async fn save(&self, episode: &Episode) -> Result<()> {
        episode.validate()?;
        self.adapter.save_episode(episode).await
    }

    /// Importance of `episode` as of `now`; never negative, never above base.
    pub fn current_importance(&self, episode: &Episode, now: DateTime<Utc>) -> f64 {
        let age_days = (now - episode.created_at).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY;
        (episode.base_importance * self.decay.factor(age_days)).max(0.0)
    }

    /// Episodes whose current importance is at least `min_importance`, most
    /// important first (ties broken by recency), truncated to `limit`.
    pub async fn get_by_importance(
        &self,
        user_id: &str,
        min_importance: f64,
        limit: Option<usize>,
    ) -> Result<Vec<RankedEpisode>> {
        self.get_by_importance_at(user_id, min_importance, limit, Utc::now())
            .await
    }

    /// [`get_by_importance`](Self::get_by_importance) evaluated at a fixed instant.
    pub async fn get_by_importance_at(
        &self,
        user_id: &str,
        min_importance: f64,
        limit: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<Vec<RankedEpisode>> {
        // Decay never raises importance, so the stored base is a safe pre-filter.
        let candidates = self
            .adapter
            .get_episodes(user_id, Some(min_importance), None)
            .await?;

        let mut ranked: Vec<RankedEpisode> = candidates
            .into_iter()
            .map(|episode| RankedEpisode {
                current_importance: self.current_importance(&episode, now),
                episode,
            })
            .filter(|r| r.current_importance >= min_importance)
            .collect();

        ranked.sort_by(|a, b| {
            b.current_importance
                .partial_cmp(&a.current_importance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.episode.created_at.cmp(&a.episode.created_at))
        });
        if let Some(limit) = limit {
            ranked.truncate(limit);
        }

        debug!(%user_id, min_importance, returned = ranked.len(), "Ranked episodes");
        Ok(ranked)
    }

    /// A user's episodes, newest first.
    pub async fn recent(&self, user_id: &str, limit: Option<usize>) -> Result<Vec<Episode>> {
        self.adapter.get_episodes(user_id, None, limit).await
    }

    /// Case-insensitive substring search over title, summary and tags.
    pub async fn search(&self, user_id: &str, query: &str, limit: Option<usize>) -> Result<Vec<Episode>> {
        self.adapter.search_episodes(user_id, query, limit).await
    }
}
