//! Content-addressed fact storage.
//!
//! Facts are identified by a fingerprint of their `(user_id, category, key)`
//! triple. Saving a fact whose fingerprint already exists merges the two
//! instead of writing a second record.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::StorageAdapter;
use crate::error::{MemoryError, Result};
use crate::keylock::KeyedLocks;
use rapport_types::{Fact, identity_of};

/// Attempts at a merge-and-save before a backend conflict is surfaced.
const SAVE_ATTEMPTS: usize = 2;

/// Trim and collapse internal whitespace runs to one space.
pub fn normalize_field(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn digest_identity(user_id: &str, category: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    for field in [user_id, category, key] {
        let field = normalize_field(field);
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Fingerprint of a fact's identity triple: 64 lowercase hex characters.
///
/// Only `user_id`, `category` and `key` contribute, after whitespace
/// normalization. Value, confidence, tags and timestamps never do.
pub fn fingerprint(fact: &Fact) -> String {
    digest_identity(&fact.user_id, &fact.category, &fact.key)
}

/// Fingerprint of a raw JSON fact, accepting abbreviated field names.
pub fn fingerprint_value(raw: &Value) -> Result<String> {
    match identity_of(raw) {
        Some((user_id, category, key)) => Ok(digest_identity(&user_id, &category, &key)),
        // Let the full parser explain what is missing.
        None => Ok(fingerprint(&Fact::from_value(raw)?)),
    }
}

/// Merge facts that share a fingerprint into one.
///
/// - `confidence`: maximum across the group
/// - `value`, `updated_at` and identity fields: from the most recently updated
///   fact (on a tie the later one in the slice wins)
/// - `created_at`: earliest
/// - `tags`, `sources`: union
///
/// A singleton is returned unchanged; an empty group yields [`Fact::default`].
pub fn merge(group: &[Fact]) -> Fact {
    let Some(first) = group.first() else {
        return Fact::default();
    };
    if group.len() == 1 {
        return first.clone();
    }

    let mut latest = first;
    for fact in &group[1..] {
        if fact.updated_at >= latest.updated_at {
            latest = fact;
        }
    }

    let mut merged = latest.clone();
    for fact in group {
        merged.confidence = merged.confidence.max(fact.confidence);
        merged.created_at = merged.created_at.min(fact.created_at);
        merged.tags.extend(fact.tags.iter().cloned());
        merged.sources.extend(fact.sources.iter().cloned());
    }
    merged
}

/// Group a batch by fingerprint and merge each group.
///
/// Output order follows the first occurrence of each fingerprint.
pub fn deduplicate(facts: &[Fact]) -> Vec<Fact> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<Fact>> = Vec::new();
    for fact in facts {
        let slot = *index.entry(fingerprint(fact)).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(fact.clone());
    }
    groups.iter().map(|group| merge(group)).collect()
}

fn normalized(mut fact: Fact) -> Fact {
    fact.user_id = normalize_field(&fact.user_id);
    fact.category = normalize_field(&fact.category);
    fact.key = normalize_field(&fact.key);
    fact
}

/// Deduplicating fact store over any [`StorageAdapter`].
pub struct FactStore {
    adapter: Arc<dyn StorageAdapter>,
    locks: KeyedLocks,
}

impl FactStore {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            adapter,
            locks: KeyedLocks::new(),
        }
    }

    /// Save a fact, merging it into any stored fact with the same fingerprint.
    ///
    /// Identity fields are stored in normalized form. Returns what was stored.
    pub async fn save(&self, fact: Fact) -> Result<Fact> {
        fact.validate()?;
        let fact = normalized(fact);
        let fp = fingerprint(&fact);
        let _guard = self.locks.lock(&fp).await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.merge_and_save(&fact).await {
                Err(MemoryError::Conflict(what)) if attempt < SAVE_ATTEMPTS => {
                    warn!(fingerprint = %fp, %what, "Fact save conflicted, retrying with fresh state");
                }
                outcome => return outcome,
            }
        }
    }

    async fn merge_and_save(&self, incoming: &Fact) -> Result<Fact> {
        let existing = self
            .adapter
            .get_fact(&incoming.user_id, &incoming.category, &incoming.key)
            .await?;
        let stored = match existing {
            Some(existing) => {
                debug!(
                    user_id = %incoming.user_id,
                    category = %incoming.category,
                    key = %incoming.key,
                    "Merging fact into existing record"
                );
                merge(&[existing, incoming.clone()])
            }
            None => incoming.clone(),
        };
        self.adapter.save_fact(&stored).await?;
        Ok(stored)
    }

    /// Validate a batch, collapse duplicates within it, then save each result.
    ///
    /// Nothing is written if any fact in the batch is invalid.
    pub async fn save_batch(&self, facts: &[Fact]) -> Result<Vec<Fact>> {
        for fact in facts {
            fact.validate()?;
        }
        let normalized: Vec<Fact> = facts.iter().cloned().map(normalized).collect();
        let unique = deduplicate(&normalized);
        debug!(incoming = facts.len(), unique = unique.len(), "Saving fact batch");

        let mut saved = Vec::with_capacity(unique.len());
        for fact in unique {
            saved.push(self.save(fact).await?);
        }
        Ok(saved)
    }

    /// Parse raw JSON facts (abbreviated field names allowed) and save them as a batch.
    pub async fn save_values(&self, raw: &[Value]) -> Result<Vec<Fact>> {
        let facts = raw
            .iter()
            .map(Fact::from_value)
            .collect::<rapport_types::Result<Vec<_>>>()?;
        self.save_batch(&facts).await
    }

    /// A user's facts, optionally restricted to one category, newest first.
    pub async fn get(&self, user_id: &str, category: Option<&str>) -> Result<Vec<Fact>> {
        let category = category.map(normalize_field);
        self.adapter
            .get_facts(&normalize_field(user_id), category.as_deref())
            .await
    }

    /// A single fact by identity.
    pub async fn get_one(&self, user_id: &str, category: &str, key: &str) -> Result<Option<Fact>> {
        self.adapter
            .get_fact(
                &normalize_field(user_id),
                &normalize_field(category),
                &normalize_field(key),
            )
            .await
    }

    /// Delete a fact. Returns `true` if it existed.
    pub async fn delete(&self, user_id: &str, category: &str, key: &str) -> Result<bool> {
        let (user_id, category, key) = (
            normalize_field(user_id),
            normalize_field(category),
            normalize_field(key),
        );
        let _guard = self
            .locks
            .lock(&digest_identity(&user_id, &category, &key))
            .await;
        self.adapter.delete_fact(&user_id, &category, &key).await
    }

    /// Case-insensitive substring search over category, key and value.
    pub async fn search(&self, user_id: &str, query: &str, limit: Option<usize>) -> Result<Vec<Fact>> {
        self.adapter
            .search_facts(&normalize_field(user_id), query, limit)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryAdapter;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn store() -> FactStore {
        FactStore::new(Arc::new(InMemoryAdapter::new()))
    }

    #[test]
    fn test_fingerprint_ignores_payload() {
        let a = Fact::new("u1", "pref", "sport", "tennis").with_confidence(0.6);
        let b = Fact::new("u1", "pref", "sport", "golf")
            .with_confidence(0.9)
            .with_tag("x");
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 64);

        let c = Fact::new("u1", "pref", "food", "tennis");
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn test_fingerprint_normalizes_whitespace_not_case() {
        let a = Fact::new("u1", "pref", "favorite sport", "x");
        let b = Fact::new(" u1 ", "pref\t", "favorite   sport", "x");
        assert_eq!(fingerprint(&a), fingerprint(&b));

        let c = Fact::new("u1", "Pref", "favorite sport", "x");
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn test_fingerprint_is_unambiguous_across_fields() {
        let a = Fact::new("u1", "ab", "c", "x");
        let b = Fact::new("u1", "a", "bc", "x");
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_value_accepts_aliases() {
        let canonical = json!({"user_id": "u1", "category": "pref", "key": "sport", "value": "tennis"});
        let abbreviated = json!({"key": "sport", "v": "golf", "uid": "u1", "cat": "pref"});
        assert_eq!(
            fingerprint_value(&canonical).unwrap(),
            fingerprint_value(&abbreviated).unwrap()
        );
        assert_eq!(
            fingerprint_value(&canonical).unwrap(),
            fingerprint(&Fact::new("u1", "pref", "sport", "other"))
        );

        let missing = json!({"user": "u1", "category": "pref"});
        assert!(matches!(
            fingerprint_value(&missing),
            Err(MemoryError::Validation(_))
        ));
    }

    #[test]
    fn test_merge_rules() {
        let now = Utc::now();
        let group = vec![
            Fact::new("u1", "pref", "sport", "tennis")
                .with_confidence(0.5)
                .with_tag("sport")
                .with_tag("hobby")
                .with_source("chat:1")
                .at(now - Duration::days(2)),
            Fact::new("u1", "pref", "sport", "squash")
                .with_confidence(0.9)
                .with_tag("sport")
                .with_tag("rec")
                .at(now),
            Fact::new("u1", "pref", "sport", "golf")
                .with_confidence(0.7)
                .with_source("chat:2")
                .at(now - Duration::days(1)),
        ];

        let merged = merge(&group);
        assert_eq!(merged.confidence, 0.9);
        assert_eq!(merged.value, "squash");
        assert_eq!(merged.updated_at, now);
        assert_eq!(merged.created_at, now - Duration::days(2));
        assert_eq!(merged.tags.len(), 3);
        assert_eq!(merged.joined_sources(), "chat:1,chat:2");
    }

    #[test]
    fn test_merge_tie_prefers_later_entry() {
        let now = Utc::now();
        let group = vec![
            Fact::new("u1", "pref", "sport", "tennis").at(now),
            Fact::new("u1", "pref", "sport", "golf").at(now),
        ];
        assert_eq!(merge(&group).value, "golf");
    }

    #[test]
    fn test_merge_edge_cases() {
        assert!(merge(&[]).is_empty());
        let single = Fact::new("u1", "pref", "sport", "tennis").with_confidence(0.3);
        assert_eq!(merge(std::slice::from_ref(&single)), single);
    }

    #[test]
    fn test_deduplicate_scenario() {
        let facts = vec![
            Fact::from_value(&json!({
                "user": "u1", "category": "pref", "key": "sport",
                "value": "tennis", "confidence": 0.6
            }))
            .unwrap(),
            Fact::new("u1", "pref", "food", "pizza"),
            Fact::from_value(&json!({
                "user": "u1", "category": "pref", "key": "sport",
                "value": "tennis", "confidence": 0.9
            }))
            .unwrap(),
        ];

        let unique = deduplicate(&facts);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].key, "sport");
        assert_eq!(unique[0].confidence, 0.9);
        assert_eq!(unique[1].key, "food");
    }

    #[tokio::test]
    async fn test_save_merges_with_existing() {
        let store = store();
        store
            .save(Fact::new("u1", "pref", "sport", "tennis").with_confidence(0.8).with_tag("a"))
            .await
            .unwrap();
        let stored = store
            .save(Fact::new("u1", "pref", "sport", "golf").with_confidence(0.4).with_tag("b"))
            .await
            .unwrap();

        assert_eq!(stored.value, "golf");
        assert_eq!(stored.confidence, 0.8);
        assert_eq!(stored.tags.len(), 2);
        assert_eq!(store.get("u1", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let store = store();
        let fact = Fact::new("u1", "pref", "sport", "tennis")
            .with_confidence(0.7)
            .with_tag("hobby");
        let first = store.save(fact.clone()).await.unwrap();
        let second = store.save(fact).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.get("u1", Some("pref")).await.unwrap(), vec![first]);
    }

    #[tokio::test]
    async fn test_save_normalizes_identity() {
        let store = store();
        store
            .save(Fact::new(" u1", "pref", "favorite  sport", "tennis"))
            .await
            .unwrap();
        let fact = store
            .get_one("u1", "pref", "favorite sport")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fact.key, "favorite sport");
        assert!(store.delete("u1 ", "pref", "favorite sport").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_fact_is_rejected_before_write() {
        let store = store();
        let err = store
            .save(Fact::new("u1", "pref", "sport", "tennis").with_confidence(1.5))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));

        let batch = vec![
            Fact::new("u1", "pref", "food", "pizza"),
            Fact::new("u1", "", "sport", "tennis"),
        ];
        assert!(store.save_batch(&batch).await.is_err());
        assert!(store.get("u1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_values_with_aliases() {
        let store = store();
        let saved = store
            .save_values(&[
                json!({"uid": "u1", "cat": "pref", "k": "sport", "v": "tennis", "conf": 0.6}),
                json!({"user": "u1", "type": "pref", "name": "sport", "val": "tennis", "score": 0.9}),
            ])
            .await
            .unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].confidence, 0.9);
    }

    #[tokio::test]
    async fn test_concurrent_saves_on_one_fingerprint_all_merge() {
        let store = Arc::new(store());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .save(Fact::new("u1", "pref", "sport", "tennis").with_tag(format!("t{i}")))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let stored = store.get_one("u1", "pref", "sport").await.unwrap().unwrap();
        assert_eq!(stored.tags.len(), 16);
    }

    #[tokio::test]
    async fn test_search() {
        let store = store();
        store
            .save(Fact::new("u1", "pref", "sport", "Tennis"))
            .await
            .unwrap();
        store
            .save(Fact::new("u1", "pref", "food", "pizza"))
            .await
            .unwrap();
        let hits = store.search("u1", "tenn", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "sport");
    }
}
