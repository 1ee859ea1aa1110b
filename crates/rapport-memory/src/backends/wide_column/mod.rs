//! Wide-column backend.
//!
//! Every collection is partitioned by user, so a user's records live together
//! and per-user reads are single-partition scans. Affinity is updated with
//! compare-and-set on the row version: a lost race is retried once against
//! fresh state and then surfaces as [`MemoryError::Conflict`].

mod session;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{HealthStatus, StorageAdapter};
use crate::error::{MemoryError, Result};
use crate::retry::{RetryPolicy, with_retry};
use rapport_types::{
    ActiveMood, AffinityState, Episode, Fact, InteractionRecord, InteractionType, LevelTable,
};

pub use session::{InMemoryWideColumn, VersionedRow, WideColumnSession};

const FACTS: &str = "facts";
const EPISODES: &str = "episodes";
const AFFINITY: &str = "affinity";
const MOODS: &str = "moods";
const MEMORIES: &str = "memories";

/// Separator for composite keys; cannot appear in normalized identifiers.
const SEP: char = '\u{1f}';

/// Attempts at an affinity compare-and-set before reporting a conflict.
const CAS_ATTEMPTS: usize = 2;

fn fact_key(category: &str, key: &str) -> String {
    format!("{category}{SEP}{key}")
}

fn pair_partition(user_id: &str, personality_name: &str) -> String {
    format!("{user_id}{SEP}{personality_name}")
}

fn decode<T: DeserializeOwned>(row: VersionedRow) -> Result<T> {
    Ok(serde_json::from_value(row.data)?)
}

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

/// Storage adapter over any [`WideColumnSession`].
pub struct WideColumnAdapter {
    session: Arc<dyn WideColumnSession>,
    retry: RetryPolicy,
    log_seq: AtomicU64,
}

impl std::fmt::Debug for WideColumnAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WideColumnAdapter")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl WideColumnAdapter {
    pub fn new(session: Arc<dyn WideColumnSession>, retry: RetryPolicy) -> Self {
        Self {
            session,
            retry,
            log_seq: AtomicU64::new(0),
        }
    }

    /// Adapter over a fresh in-process session.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryWideColumn::new()), RetryPolicy::default())
    }

    async fn scan_decoded<T: DeserializeOwned>(&self, table: &str, partition: &str) -> Result<Vec<T>> {
        let rows = with_retry(&self.retry, "scan", || self.session.scan(table, partition)).await?;
        rows.into_iter().map(|(_, row)| decode(row)).collect()
    }

    async fn get_decoded<T: DeserializeOwned>(
        &self,
        table: &str,
        partition: &str,
        clustering: &str,
    ) -> Result<Option<T>> {
        let row = with_retry(&self.retry, "get", || {
            self.session.get(table, partition, clustering)
        })
        .await?;
        row.map(decode).transpose()
    }

    async fn put_encoded<T: Serialize>(
        &self,
        table: &str,
        partition: &str,
        clustering: &str,
        value: &T,
    ) -> Result<()> {
        let data = encode(value)?;
        with_retry(&self.retry, "put", || {
            self.session.put(table, partition, clustering, data.clone())
        })
        .await?;
        Ok(())
    }

    async fn delete_row(&self, table: &str, partition: &str, clustering: &str) -> Result<bool> {
        with_retry(&self.retry, "delete", || {
            self.session.delete(table, partition, clustering)
        })
        .await
    }

    async fn log_interaction(&self, record: &InteractionRecord) -> Result<()> {
        // Timestamp first so clustering order is chronological; the sequence
        // orders same-instant entries and the uuid keeps writers distinct.
        let seq = self.log_seq.fetch_add(1, Ordering::Relaxed);
        let clustering = format!(
            "{}{SEP}{seq:020}{SEP}{}",
            record.recorded_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            Uuid::new_v4()
        );
        let partition = pair_partition(&record.user_id, &record.personality_name);
        self.put_encoded(MEMORIES, &partition, &clustering, record).await
    }
}

#[async_trait]
impl StorageAdapter for WideColumnAdapter {
    fn name(&self) -> &str {
        "wide_column"
    }

    async fn save_fact(&self, fact: &Fact) -> Result<()> {
        let clustering = fact_key(&fact.category, &fact.key);
        self.put_encoded(FACTS, &fact.user_id, &clustering, fact).await?;
        debug!(user_id = %fact.user_id, category = %fact.category, key = %fact.key, "Saved fact");
        Ok(())
    }

    async fn get_fact(&self, user_id: &str, category: &str, key: &str) -> Result<Option<Fact>> {
        self.get_decoded(FACTS, user_id, &fact_key(category, key)).await
    }

    async fn get_facts(&self, user_id: &str, category: Option<&str>) -> Result<Vec<Fact>> {
        let mut facts: Vec<Fact> = self
            .scan_decoded::<Fact>(FACTS, user_id)
            .await?
            .into_iter()
            .filter(|f| category.is_none_or(|c| f.category == c))
            .collect();
        facts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(facts)
    }

    async fn delete_fact(&self, user_id: &str, category: &str, key: &str) -> Result<bool> {
        self.delete_row(FACTS, user_id, &fact_key(category, key)).await
    }

    async fn save_episode(&self, episode: &Episode) -> Result<()> {
        let data = encode(episode)?;
        let id = episode.id.to_string();
        let inserted = with_retry(&self.retry, "save_episode", || {
            self.session
                .compare_and_set(EPISODES, &episode.user_id, &id, None, data.clone())
        })
        .await?;
        if inserted {
            debug!(episode_id = %id, user_id = %episode.user_id, "Saved episode");
        } else {
            debug!(episode_id = %id, "Episode already stored, keeping original");
        }
        Ok(())
    }

    async fn get_episodes(
        &self,
        user_id: &str,
        min_importance: Option<f64>,
        limit: Option<usize>,
    ) -> Result<Vec<Episode>> {
        let mut episodes: Vec<Episode> = self
            .scan_decoded::<Episode>(EPISODES, user_id)
            .await?
            .into_iter()
            .filter(|e| min_importance.is_none_or(|min| e.base_importance >= min))
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
        for attempt in 1..=CAS_ATTEMPTS {
            let current = with_retry(&self.retry, "get_affinity", || {
                self.session.get(AFFINITY, user_id, personality_name)
            })
            .await?;

            let (mut state, expected) = match current {
                Some(row) => {
                    let version = row.version;
                    (decode::<AffinityState>(row)?, Some(version))
                }
                None => (AffinityState::initial(user_id, personality_name, levels), None),
            };
            state.apply(delta, levels, Utc::now());

            let data = encode(&state)?;
            let applied = with_retry(&self.retry, "update_affinity", || {
                self.session
                    .compare_and_set(AFFINITY, user_id, personality_name, expected, data.clone())
            })
            .await?;

            if applied {
                self.log_interaction(&InteractionRecord::from_state(&state, interaction_type, delta))
                    .await?;
                return Ok(state);
            }
            warn!(%user_id, personality = %personality_name, attempt, "Affinity write lost a race");
        }

        Err(MemoryError::Conflict(format!(
            "affinity for {user_id}/{personality_name}"
        )))
    }

    async fn get_affinity(
        &self,
        user_id: &str,
        personality_name: &str,
    ) -> Result<Option<AffinityState>> {
        self.get_decoded(AFFINITY, user_id, personality_name).await
    }

    async fn get_all_affinities(&self, user_id: &str) -> Result<Vec<AffinityState>> {
        // Clustering key is the personality name, so scan order is already sorted.
        self.scan_decoded(AFFINITY, user_id).await
    }

    async fn reset_affinity(&self, user_id: &str, personality_name: &str) -> Result<bool> {
        let existed = self.delete_row(AFFINITY, user_id, personality_name).await?;
        let partition = pair_partition(user_id, personality_name);
        with_retry(&self.retry, "reset_affinity", || {
            self.session.delete_partition(MEMORIES, &partition)
        })
        .await?;
        Ok(existed)
    }

    async fn recent_interactions(
        &self,
        user_id: &str,
        personality_name: &str,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>> {
        let partition = pair_partition(user_id, personality_name);
        let mut log: Vec<InteractionRecord> = self.scan_decoded(MEMORIES, &partition).await?;
        log.reverse();
        log.truncate(limit);
        Ok(log)
    }

    async fn set_mood(&self, mood: &ActiveMood) -> Result<()> {
        self.put_encoded(MOODS, &mood.user_id, &mood.personality_name, mood)
            .await
    }

    async fn get_mood(&self, user_id: &str, personality_name: &str) -> Result<Option<ActiveMood>> {
        self.get_decoded(MOODS, user_id, personality_name).await
    }

    async fn clear_mood(&self, user_id: &str, personality_name: &str) -> Result<bool> {
        self.delete_row(MOODS, user_id, personality_name).await
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let started = Instant::now();
        with_retry(&self.retry, "ping", || self.session.ping()).await?;
        Ok(HealthStatus::new(self.name(), started.elapsed()))
    }
}
