//! Bounded prompt cache with insertion-order eviction.
//!
//! When full, the entry inserted longest ago is evicted. Reads do not refresh
//! an entry's position, and re-putting an existing key replaces its payload in
//! place without moving it, so a frequently read entry still ages out once
//! enough new keys arrive.

use std::future::Future;
use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::error::Result;

/// Entry stored in the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub value: V,
    /// When the key was first inserted.
    pub created_at: DateTime<Utc>,
}

/// Counters for cache behaviour since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
    pub capacity: usize,
}

struct CacheInner<V> {
    // Used strictly as an insertion-ordered map: only `peek`, `peek_mut` and
    // `push` are called, none of which reorder existing entries.
    entries: LruCache<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Content-addressed cache of compiled prompts.
pub struct PromptCache<V = String> {
    inner: Mutex<CacheInner<V>>,
    config: CacheConfig,
}

impl<V: Clone> PromptCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        let cap = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(cap),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().entries.cap().get()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.inner.lock().entries.contains(fingerprint)
    }

    /// Look up a compiled prompt.
    pub fn get(&self, fingerprint: &str) -> Option<V> {
        let mut inner = self.inner.lock();
        match inner.entries.peek(fingerprint).map(|e| e.value.clone()) {
            Some(value) => {
                inner.hits += 1;
                trace!(%fingerprint, "Prompt cache hit");
                Some(value)
            }
            None => {
                inner.misses += 1;
                trace!(%fingerprint, "Prompt cache miss");
                None
            }
        }
    }

    /// Store a compiled prompt, evicting the oldest entry if over capacity.
    pub fn put(&self, fingerprint: &str, value: V) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.peek_mut(fingerprint) {
            entry.value = value;
            return;
        }
        let entry = CacheEntry {
            value,
            created_at: Utc::now(),
        };
        if let Some((evicted, _)) = inner.entries.push(fingerprint.to_string(), entry) {
            inner.evictions += 1;
            debug!(fingerprint = %evicted, "Evicting oldest prompt to make room");
        }
    }

    /// Return the cached prompt or compute, store and return it.
    ///
    /// `compute` runs outside the lock; two callers missing on the same key
    /// may both compute, and the first stored result stays.
    pub async fn get_or_compute<F, Fut>(&self, fingerprint: &str, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(fingerprint) {
            return Ok(value);
        }
        let value = compute().await?;

        let mut inner = self.inner.lock();
        if let Some(existing) = inner.entries.peek(fingerprint) {
            return Ok(existing.value.clone());
        }
        let entry = CacheEntry {
            value: value.clone(),
            created_at: Utc::now(),
        };
        if let Some((evicted, _)) = inner.entries.push(fingerprint.to_string(), entry) {
            inner.evictions += 1;
            debug!(fingerprint = %evicted, "Evicting oldest prompt to make room");
        }
        Ok(value)
    }

    /// Remove an entry. Returns whether it was present.
    pub fn invalidate(&self, fingerprint: &str) -> bool {
        self.inner.lock().entries.pop(fingerprint).is_some()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            len: inner.entries.len(),
            capacity: inner.entries.cap().get(),
        }
    }
}

impl<V: Clone> Default for PromptCache<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComposeError;

    fn cache(capacity: usize) -> PromptCache<String> {
        PromptCache::new(CacheConfig::new().with_capacity(capacity))
    }

    #[test]
    fn test_evicts_oldest_inserted() {
        let cache = cache(2);
        cache.put("A", "a".into());
        cache.put("B", "b".into());
        cache.put("C", "c".into());

        assert_eq!(cache.len(), 2);
        assert!(cache.get("A").is_none());
        assert_eq!(cache.get("B").as_deref(), Some("b"));
        assert_eq!(cache.get("C").as_deref(), Some("c"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_reads_do_not_refresh_position() {
        let cache = cache(2);
        cache.put("A", "a".into());
        cache.put("B", "b".into());
        assert!(cache.get("A").is_some());
        cache.put("C", "c".into());
        assert!(!cache.contains("A"));
        assert!(cache.contains("B"));
    }

    #[test]
    fn test_reput_replaces_without_refreshing() {
        let cache = cache(2);
        cache.put("A", "a".into());
        cache.put("B", "b".into());
        cache.put("A", "a2".into());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("A").as_deref(), Some("a2"));

        cache.put("C", "c".into());
        assert!(!cache.contains("A"));
        assert!(cache.contains("B"));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let cache = cache(0);
        cache.put("A", "a".into());
        cache.put("B", "b".into());
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("B"));
    }

    #[test]
    fn test_stats_count_hits_and_misses() {
        let cache = cache(4);
        cache.put("A", "a".into());
        cache.get("A");
        cache.get("A");
        cache.get("Z");
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.len, stats.capacity), (2, 1, 1, 4));
    }

    #[tokio::test]
    async fn test_get_or_compute_computes_once() {
        let cache = cache(4);
        let first = cache
            .get_or_compute("K", || async { Ok("compiled".to_string()) })
            .await
            .unwrap();
        let second = cache
            .get_or_compute("K", || async {
                Err(ComposeError::Compile("should not run".into()))
            })
            .await
            .unwrap();
        assert_eq!(first, "compiled");
        assert_eq!(second, "compiled");
    }

    #[tokio::test]
    async fn test_failed_compute_is_not_cached() {
        let cache = cache(4);
        let err = cache
            .get_or_compute("K", || async { Err(ComposeError::Compile("boom".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, ComposeError::Compile(_)));
        assert!(cache.is_empty());
    }
}
