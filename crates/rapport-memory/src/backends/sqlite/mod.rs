//! Flexible-schema SQLite backend.
//!
//! Works against databases whose tables were created by someone else. At open
//! time the adapter resolves which table and column names hold each logical
//! collection (see [`schema`]) and creates whatever is missing when
//! `auto_create` is set. Every call then runs on the blocking pool through the
//! shared retry policy.

mod affinity_ops;
mod codec;
mod episode_ops;
mod fact_ops;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use tracing::info;

use crate::backend::{HealthStatus, StorageAdapter, UserStats};
use crate::error::{MemoryError, Result, StorageError};
use crate::retry::{RetryPolicy, retry_when};
use rapport_types::{
    ActiveMood, AffinityState, Episode, Fact, InteractionRecord, InteractionType, LevelTable,
};

pub use schema::{Collection, ResolvedSchema, ResolvedTable};

/// How long SQLite waits on a locked database before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_millis(500);

/// Configuration for [`SqliteAdapter`].
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file. `None` opens a private in-memory database.
    pub path: Option<PathBuf>,
    /// Create missing tables instead of failing.
    pub auto_create: bool,
    /// Retry policy applied to every call.
    pub retry: RetryPolicy,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: None,
            auto_create: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl SqliteConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Storage adapter over a SQLite database with an arbitrary existing layout.
pub struct SqliteAdapter {
    conn: Arc<Mutex<Connection>>,
    schema: Arc<ResolvedSchema>,
    retry: RetryPolicy,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAdapter")
            .field("path", &self.path)
            .field("facts", &self.schema.facts.name)
            .field("episodes", &self.schema.episodes.name)
            .field("affinity", &self.schema.affinity.name)
            .finish_non_exhaustive()
    }
}

impl SqliteAdapter {
    /// Open (or create) the database and resolve its schema once.
    pub async fn open(config: SqliteConfig) -> Result<Self> {
        let SqliteConfig {
            path,
            auto_create,
            retry,
        } = config;

        let open_path = path.clone();
        let (conn, schema) = tokio::task::spawn_blocking(move || {
            let conn = match &open_path {
                Some(path) => open_file(path)?,
                None => Connection::open_in_memory()?,
            };
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            let schema = ResolvedSchema::resolve(&conn, auto_create)?;
            Ok::<_, crate::error::MemoryError>((conn, schema))
        })
        .await
        .map_err(|e| StorageError::Unavailable(format!("open task failed: {e}")))??;

        match &path {
            Some(path) => info!("SQLite storage opened at {:?}", path),
            None => info!("In-memory SQLite storage created"),
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            schema: Arc::new(schema),
            retry,
            path,
        })
    }

    /// Private in-memory database with auto-created tables (useful for testing).
    pub async fn open_in_memory() -> Result<Self> {
        Self::open(SqliteConfig::default()).await
    }

    /// The layout resolved at open time.
    pub fn schema(&self) -> &ResolvedSchema {
        &self.schema
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool, retrying any
    /// transient failure.
    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&mut Connection, &ResolvedSchema) -> Result<T> + Send + Sync + 'static,
    {
        self.run_with(operation, MemoryError::is_transient, f).await
    }

    /// Like [`run`](Self::run) for writes that must apply at most once.
    /// Only busy/locked failures are retried.
    async fn run_once<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&mut Connection, &ResolvedSchema) -> Result<T> + Send + Sync + 'static,
    {
        self.run_with(operation, MemoryError::is_busy, f).await
    }

    /// A blocking attempt cannot be cancelled, so the call budget is spent
    /// waiting for the connection: an attempt that cannot take the lock in
    /// time fails with [`StorageError::Timeout`] before touching the database.
    async fn run_with<T, F, P>(&self, operation: &'static str, should_retry: P, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&mut Connection, &ResolvedSchema) -> Result<T> + Send + Sync + 'static,
        P: Fn(&MemoryError) -> bool,
    {
        let f = Arc::new(f);
        let call_timeout = self.retry.call_timeout;
        retry_when(&self.retry, operation, should_retry, || {
            let conn = Arc::clone(&self.conn);
            let schema = Arc::clone(&self.schema);
            let f = Arc::clone(&f);
            let started = Instant::now();
            async move {
                tokio::task::spawn_blocking(move || {
                    let budget = call_timeout.saturating_sub(started.elapsed());
                    let Some(mut conn) = conn.try_lock_for(budget) else {
                        return Err(MemoryError::from(StorageError::Timeout(call_timeout)));
                    };
                    f(&mut conn, &schema)
                })
                .await
                .map_err(|e| StorageError::Unavailable(format!("{operation} task failed: {e}")))?
            }
        })
        .await
    }
}

fn open_file(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            StorageError::Connection(format!("cannot create {}: {e}", parent.display()))
        })?;
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
    )
    .map_err(|e| StorageError::Connection(format!("cannot open {}: {e}", path.display())))?;
    Ok(conn)
}

#[async_trait]
impl StorageAdapter for SqliteAdapter {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save_fact(&self, fact: &Fact) -> Result<()> {
        let fact = fact.clone();
        self.run("save_fact", move |conn, schema| {
            fact_ops::save_fact(conn, &schema.facts, &fact)
        })
        .await
    }

    async fn get_fact(&self, user_id: &str, category: &str, key: &str) -> Result<Option<Fact>> {
        let (user_id, category, key) = (user_id.to_string(), category.to_string(), key.to_string());
        self.run("get_fact", move |conn, schema| {
            fact_ops::get_fact(conn, &schema.facts, &user_id, &category, &key)
        })
        .await
    }

    async fn get_facts(&self, user_id: &str, category: Option<&str>) -> Result<Vec<Fact>> {
        let user_id = user_id.to_string();
        let category = category.map(str::to_string);
        self.run("get_facts", move |conn, schema| {
            fact_ops::get_facts(conn, &schema.facts, &user_id, category.as_deref())
        })
        .await
    }

    async fn delete_fact(&self, user_id: &str, category: &str, key: &str) -> Result<bool> {
        let (user_id, category, key) = (user_id.to_string(), category.to_string(), key.to_string());
        self.run("delete_fact", move |conn, schema| {
            fact_ops::delete_fact(conn, &schema.facts, &user_id, &category, &key)
        })
        .await
    }

    async fn search_facts(
        &self,
        user_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Fact>> {
        let (user_id, query) = (user_id.to_string(), query.to_string());
        self.run("search_facts", move |conn, schema| {
            fact_ops::search_facts(conn, &schema.facts, &user_id, &query, limit)
        })
        .await
    }

    async fn save_episode(&self, episode: &Episode) -> Result<()> {
        let episode = episode.clone();
        self.run("save_episode", move |conn, schema| {
            episode_ops::save_episode(conn, &schema.episodes, &episode)
        })
        .await
    }

    async fn get_episodes(
        &self,
        user_id: &str,
        min_importance: Option<f64>,
        limit: Option<usize>,
    ) -> Result<Vec<Episode>> {
        let user_id = user_id.to_string();
        self.run("get_episodes", move |conn, schema| {
            episode_ops::get_episodes(conn, &schema.episodes, &user_id, min_importance, limit)
        })
        .await
    }

    async fn search_episodes(
        &self,
        user_id: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Episode>> {
        let (user_id, query) = (user_id.to_string(), query.to_string());
        self.run("search_episodes", move |conn, schema| {
            episode_ops::search_episodes(conn, &schema.episodes, &user_id, &query, limit)
        })
        .await
    }

    async fn update_affinity(
        &self,
        user_id: &str,
        personality_name: &str,
        delta: i32,
        interaction_type: InteractionType,
        levels: &LevelTable,
    ) -> Result<AffinityState> {
        let (user_id, personality_name) = (user_id.to_string(), personality_name.to_string());
        let levels = levels.clone();
        self.run_once("update_affinity", move |conn, schema| {
            affinity_ops::update_affinity(
                conn,
                schema,
                &user_id,
                &personality_name,
                delta,
                interaction_type,
                &levels,
            )
        })
        .await
    }

    async fn get_affinity(
        &self,
        user_id: &str,
        personality_name: &str,
    ) -> Result<Option<AffinityState>> {
        let (user_id, personality_name) = (user_id.to_string(), personality_name.to_string());
        self.run("get_affinity", move |conn, schema| {
            affinity_ops::select_affinity(conn, &schema.affinity, &user_id, &personality_name)
        })
        .await
    }

    async fn get_all_affinities(&self, user_id: &str) -> Result<Vec<AffinityState>> {
        let user_id = user_id.to_string();
        self.run("get_all_affinities", move |conn, schema| {
            affinity_ops::all_affinities(conn, &schema.affinity, &user_id)
        })
        .await
    }

    async fn reset_affinity(&self, user_id: &str, personality_name: &str) -> Result<bool> {
        let (user_id, personality_name) = (user_id.to_string(), personality_name.to_string());
        self.run("reset_affinity", move |conn, schema| {
            affinity_ops::reset_affinity(conn, schema, &user_id, &personality_name)
        })
        .await
    }

    async fn recent_interactions(
        &self,
        user_id: &str,
        personality_name: &str,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>> {
        let (user_id, personality_name) = (user_id.to_string(), personality_name.to_string());
        self.run("recent_interactions", move |conn, schema| {
            affinity_ops::recent_interactions(
                conn,
                &schema.memories,
                &user_id,
                &personality_name,
                limit,
            )
        })
        .await
    }

    async fn set_mood(&self, mood: &ActiveMood) -> Result<()> {
        let mood = mood.clone();
        self.run("set_mood", move |conn, schema| {
            affinity_ops::set_mood(conn, &schema.moods, &mood)
        })
        .await
    }

    async fn get_mood(&self, user_id: &str, personality_name: &str) -> Result<Option<ActiveMood>> {
        let (user_id, personality_name) = (user_id.to_string(), personality_name.to_string());
        self.run("get_mood", move |conn, schema| {
            affinity_ops::get_mood(conn, &schema.moods, &user_id, &personality_name)
        })
        .await
    }

    async fn clear_mood(&self, user_id: &str, personality_name: &str) -> Result<bool> {
        let (user_id, personality_name) = (user_id.to_string(), personality_name.to_string());
        self.run("clear_mood", move |conn, schema| {
            affinity_ops::clear_mood(conn, &schema.moods, &user_id, &personality_name)
        })
        .await
    }

    async fn user_stats(&self, user_id: &str) -> Result<UserStats> {
        let user_id = user_id.to_string();
        self.run("user_stats", move |conn, schema| {
            let facts = fact_ops::get_facts(conn, &schema.facts, &user_id, None)?;
            let episodes = episode_ops::get_episodes(conn, &schema.episodes, &user_id, None, None)?;
            let affinities = affinity_ops::all_affinities(conn, &schema.affinity, &user_id)?;
            let interaction_count =
                affinity_ops::count_interactions(conn, &schema.memories, &user_id)?;
            let mean_confidence = (!facts.is_empty())
                .then(|| facts.iter().map(|f| f.confidence).sum::<f64>() / facts.len() as f64);
            Ok(UserStats {
                fact_count: facts.len(),
                episode_count: episodes.len(),
                affinity_count: affinities.len(),
                interaction_count,
                mean_confidence,
            })
        })
        .await
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let started = Instant::now();
        self.run("health_check", |conn, _| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await?;

        let mut status = HealthStatus::new(self.name(), started.elapsed());
        for collection in Collection::ALL {
            status = status.with_detail(
                collection.as_str(),
                self.schema.table(collection).name.clone(),
            );
        }
        if let Some(path) = &self.path {
            status = status.with_detail("path", path.display().to_string());
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use rapport_types::EpisodeType;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fact_crud() {
        let store = SqliteAdapter::open_in_memory().await.unwrap();
        let fact = Fact::new("u1", "preference", "sport", "tennis")
            .with_confidence(0.8)
            .with_tag("hobby")
            .with_source("chat:1");

        store.save_fact(&fact).await.unwrap();
        let loaded = store
            .get_fact("u1", "preference", "sport")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.value, "tennis");
        assert_eq!(loaded.confidence, 0.8);
        assert!(loaded.tags.contains("hobby"));
        assert!(loaded.sources.contains("chat:1"));

        let replaced = Fact::new("u1", "preference", "sport", "golf");
        store.save_fact(&replaced).await.unwrap();
        let all = store.get_facts("u1", None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].value, "golf");

        assert!(store.delete_fact("u1", "preference", "sport").await.unwrap());
        assert!(!store.delete_fact("u1", "preference", "sport").await.unwrap());
        assert!(store.get_facts("u1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_facts_filtered_and_ordered() {
        let store = SqliteAdapter::open_in_memory().await.unwrap();
        let now = Utc::now();
        store
            .save_fact(&Fact::new("u1", "preference", "food", "pizza").at(now - ChronoDuration::hours(2)))
            .await
            .unwrap();
        store
            .save_fact(&Fact::new("u1", "preference", "drink", "tea").at(now))
            .await
            .unwrap();
        store
            .save_fact(&Fact::new("u1", "personal", "city", "Lyon").at(now))
            .await
            .unwrap();

        let prefs = store.get_facts("u1", Some("preference")).await.unwrap();
        assert_eq!(prefs.len(), 2);
        assert_eq!(prefs[0].key, "drink");

        let hits = store.search_facts("u1", "PIZ", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "food");

        // Wildcards in the query are literal.
        assert!(store.search_facts("u1", "%", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_episodes_append_only() {
        let store = SqliteAdapter::open_in_memory().await.unwrap();
        let now = Utc::now();
        let first = Episode::new("u1", EpisodeType::Milestone, "First chat", 8.0)
            .at(now - ChronoDuration::days(1));
        let second = Episode::new("u1", EpisodeType::Conversation, "Talked about tennis", 3.0)
            .with_tag("sport")
            .at(now);

        store.save_episode(&first).await.unwrap();
        store.save_episode(&second).await.unwrap();

        let mut changed = first.clone();
        changed.title = "Rewritten".to_string();
        store.save_episode(&changed).await.unwrap();

        let episodes = store.get_episodes("u1", None, None).await.unwrap();
        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[0].id, second.id);
        assert_eq!(episodes[1].title, "First chat");

        let important = store.get_episodes("u1", Some(5.0), None).await.unwrap();
        assert_eq!(important.len(), 1);
        assert_eq!(important[0].id, first.id);

        let found = store.search_episodes("u1", "tennis", Some(5)).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_affinity_and_interactions() {
        let store = SqliteAdapter::open_in_memory().await.unwrap();
        let levels = LevelTable::default();

        let state = store
            .update_affinity("u1", "aria", 5, InteractionType::VeryPositive, &levels)
            .await
            .unwrap();
        assert_eq!(state.points, 5);
        assert_eq!(state.level, "stranger");

        for _ in 0..4 {
            store
                .update_affinity("u1", "aria", 5, InteractionType::VeryPositive, &levels)
                .await
                .unwrap();
        }
        let state = store
            .update_affinity("u1", "aria", -2, InteractionType::Negative, &levels)
            .await
            .unwrap();
        assert_eq!(state.points, 23);
        assert_eq!(state.level, "acquaintance");
        assert_eq!(state.total_interactions, 6);
        assert_eq!(state.positive_count, 5);
        assert_eq!(state.negative_count, 1);

        let stored = store.get_affinity("u1", "aria").await.unwrap().unwrap();
        assert_eq!(stored.points, state.points);
        assert_eq!(stored.level, state.level);
        assert_eq!(stored.total_interactions, 6);
        assert!(stored.last_interaction_at.is_some());

        let log = store.recent_interactions("u1", "aria", 2).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].interaction_type, InteractionType::Negative);
        assert_eq!(log[0].points_after, 23);

        assert!(store.reset_affinity("u1", "aria").await.unwrap());
        assert!(store.get_affinity("u1", "aria").await.unwrap().is_none());
        assert!(store.recent_interactions("u1", "aria", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_moods() {
        let store = SqliteAdapter::open_in_memory().await.unwrap();
        store
            .set_mood(&ActiveMood::new("u1", "aria", "playful"))
            .await
            .unwrap();
        store
            .set_mood(&ActiveMood::new("u1", "aria", "calm"))
            .await
            .unwrap();
        let mood = store.get_mood("u1", "aria").await.unwrap().unwrap();
        assert_eq!(mood.mood, "calm");
        assert!(store.clear_mood("u1", "aria").await.unwrap());
        assert!(store.get_mood("u1", "aria").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_foreign_schema_is_used_as_is() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                r#"
                CREATE TABLE knowledge (uid TEXT, cat TEXT, attribute TEXT, content TEXT, score REAL);
                INSERT INTO knowledge VALUES ('u1', 'personal', 'city', 'Lyon', 0.9);
                CREATE TABLE relationships (userId TEXT, persona TEXT, affinity INTEGER, stage TEXT);
                INSERT INTO relationships VALUES ('u1', 'aria', 42, 'friend');
                "#,
            )
            .unwrap();
        }

        let store = SqliteAdapter::open(SqliteConfig::new(&path)).await.unwrap();
        assert_eq!(store.schema().facts.name, "knowledge");
        assert!(!store.schema().facts.created);
        assert!(store.schema().episodes.created);

        let fact = store.get_fact("u1", "personal", "city").await.unwrap().unwrap();
        assert_eq!(fact.value, "Lyon");
        assert_eq!(fact.confidence, 0.9);
        assert!(fact.tags.is_empty());

        // Writes only touch columns the table has.
        store
            .save_fact(&Fact::new("u1", "personal", "pet", "cat").with_tag("ignored"))
            .await
            .unwrap();
        assert_eq!(store.get_facts("u1", None).await.unwrap().len(), 2);

        let affinity = store.get_affinity("u1", "aria").await.unwrap().unwrap();
        assert_eq!(affinity.points, 42);
        assert_eq!(affinity.level, "friend");
        assert_eq!(affinity.total_interactions, 0);

        let updated = store
            .update_affinity("u1", "aria", 2, InteractionType::Positive, &LevelTable::default())
            .await
            .unwrap();
        assert_eq!(updated.points, 44);
    }

    #[tokio::test]
    async fn test_missing_tables_without_auto_create() {
        let dir = TempDir::new().unwrap();
        let config = SqliteConfig::new(dir.path().join("empty.db")).with_auto_create(false);
        let err = SqliteAdapter::open(config).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::MemoryError::Storage(StorageError::Schema(_))
        ));
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("rapport.db");
        {
            let store = SqliteAdapter::open(SqliteConfig::new(&path)).await.unwrap();
            store
                .save_fact(&Fact::new("u1", "personal", "name", "Sam"))
                .await
                .unwrap();
        }
        let store = SqliteAdapter::open(SqliteConfig::new(&path)).await.unwrap();
        assert!(!store.schema().facts.created);
        assert_eq!(store.get_facts("u1", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_health_check_reports_tables() {
        let store = SqliteAdapter::open_in_memory().await.unwrap();
        let health = store.health_check().await.unwrap();
        assert_eq!(health.backend, "sqlite");
        assert_eq!(health.details.get("facts").map(String::as_str), Some("user_facts"));
    }

    #[tokio::test]
    async fn test_user_stats() {
        let store = SqliteAdapter::open_in_memory().await.unwrap();
        store
            .save_fact(&Fact::new("u1", "a", "x", "1").with_confidence(0.4))
            .await
            .unwrap();
        store
            .save_fact(&Fact::new("u1", "a", "y", "2").with_confidence(0.8))
            .await
            .unwrap();
        store
            .update_affinity("u1", "aria", 2, InteractionType::Positive, &LevelTable::default())
            .await
            .unwrap();

        let stats = store.user_stats("u1").await.unwrap();
        assert_eq!(stats.fact_count, 2);
        assert_eq!(stats.affinity_count, 1);
        assert_eq!(stats.interaction_count, 1);
        assert!((stats.mean_confidence.unwrap() - 0.6).abs() < 1e-9);
    }

    /// Hold the connection lock from another thread for `held`.
    fn hold_connection(store: &SqliteAdapter, held: Duration) -> std::thread::JoinHandle<()> {
        let conn = Arc::clone(&store.conn);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = conn.lock();
            locked_tx.send(()).unwrap();
            std::thread::sleep(held);
        });
        locked_rx.recv().unwrap();
        holder
    }

    #[tokio::test]
    async fn test_timed_out_affinity_update_writes_nothing() {
        let retry = RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            call_timeout: Duration::from_millis(20),
        };
        let store = SqliteAdapter::open(SqliteConfig::default().with_retry(retry))
            .await
            .unwrap();
        let levels = LevelTable::default();

        let holder = hold_connection(&store, Duration::from_millis(200));
        let result = store
            .update_affinity("u1", "aria", 5, InteractionType::Positive, &levels)
            .await;
        assert!(matches!(
            result,
            Err(MemoryError::Storage(StorageError::Timeout(_)))
        ));
        holder.join().unwrap();

        assert!(store.get_affinity("u1", "aria").await.unwrap().is_none());
        assert!(store.recent_interactions("u1", "aria", 10).await.unwrap().is_empty());

        let state = store
            .update_affinity("u1", "aria", 5, InteractionType::Positive, &levels)
            .await
            .unwrap();
        assert_eq!((state.points, state.total_interactions), (5, 1));
        assert_eq!(store.recent_interactions("u1", "aria", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_read_retries_past_lock_contention() {
        let retry = RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(150),
            max_backoff: Duration::from_millis(300),
            call_timeout: Duration::from_millis(20),
        };
        let store = SqliteAdapter::open(SqliteConfig::default().with_retry(retry))
            .await
            .unwrap();
        store.save_fact(&Fact::new("u1", "pref", "drink", "tea")).await.unwrap();

        let holder = hold_connection(&store, Duration::from_millis(50));
        let facts = store.get_facts("u1", None).await.unwrap();
        holder.join().unwrap();
        assert_eq!(facts.len(), 1);
    }
}
