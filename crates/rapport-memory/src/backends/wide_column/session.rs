//! Minimal wide-column session contract and an in-process implementation.
//!
//! Rows are addressed by `(table, partition key, clustering key)` and carry a
//! JSON document plus a monotonically increasing version used for
//! compare-and-set. Within a partition, rows are returned in clustering-key
//! order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Result, StorageError};

/// A stored row and the version it was written at.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedRow {
    pub version: u64,
    pub data: Value,
}

/// Operations a wide-column driver must provide.
#[async_trait]
pub trait WideColumnSession: Send + Sync {
    async fn get(&self, table: &str, partition: &str, clustering: &str)
    -> Result<Option<VersionedRow>>;

    /// Every row in a partition, ordered by clustering key.
    async fn scan(&self, table: &str, partition: &str) -> Result<Vec<(String, VersionedRow)>>;

    /// Unconditional write. Returns the new version.
    async fn put(&self, table: &str, partition: &str, clustering: &str, data: Value) -> Result<u64>;

    /// Write only if the row's current version equals `expected`
    /// (`None` = the row must not exist). Returns whether the write applied.
    async fn compare_and_set(
        &self,
        table: &str,
        partition: &str,
        clustering: &str,
        expected: Option<u64>,
        data: Value,
    ) -> Result<bool>;

    /// Returns whether a row was removed.
    async fn delete(&self, table: &str, partition: &str, clustering: &str) -> Result<bool>;

    /// Remove a whole partition. Returns the number of rows removed.
    async fn delete_partition(&self, table: &str, partition: &str) -> Result<usize>;

    async fn ping(&self) -> Result<()>;
}

type PartitionKey = (String, String);

/// In-process wide-column store.
///
/// Supports fault injection for exercising the retry and conflict paths:
/// [`throttle_next`](Self::throttle_next) makes the next `n` calls fail with a
/// transient [`StorageError::Throttled`], and
/// [`conflict_next`](Self::conflict_next) makes the next `n` compare-and-set
/// calls report a lost race.
#[derive(Debug, Default)]
pub struct InMemoryWideColumn {
    partitions: RwLock<BTreeMap<PartitionKey, BTreeMap<String, VersionedRow>>>,
    next_version: AtomicU64,
    pending_throttles: AtomicU32,
    pending_conflicts: AtomicU32,
}

impl InMemoryWideColumn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn throttle_next(&self, n: u32) {
        self.pending_throttles.store(n, Ordering::SeqCst);
    }

    pub fn conflict_next(&self, n: u32) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_faults(&self) -> Result<()> {
        if Self::take(&self.pending_throttles) {
            return Err(StorageError::Throttled("injected throttle".to_string()).into());
        }
        Ok(())
    }

    fn bump(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn key(table: &str, partition: &str) -> PartitionKey {
    (table.to_string(), partition.to_string())
}

#[async_trait]
impl WideColumnSession for InMemoryWideColumn {
    async fn get(
        &self,
        table: &str,
        partition: &str,
        clustering: &str,
    ) -> Result<Option<VersionedRow>> {
        self.check_faults()?;
        Ok(self
            .partitions
            .read()
            .get(&key(table, partition))
            .and_then(|rows| rows.get(clustering))
            .cloned())
    }

    async fn scan(&self, table: &str, partition: &str) -> Result<Vec<(String, VersionedRow)>> {
        self.check_faults()?;
        Ok(self
            .partitions
            .read()
            .get(&key(table, partition))
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn put(&self, table: &str, partition: &str, clustering: &str, data: Value) -> Result<u64> {
        self.check_faults()?;
        let version = self.bump();
        self.partitions
            .write()
            .entry(key(table, partition))
            .or_default()
            .insert(clustering.to_string(), VersionedRow { version, data });
        Ok(version)
    }

    async fn compare_and_set(
        &self,
        table: &str,
        partition: &str,
        clustering: &str,
        expected: Option<u64>,
        data: Value,
    ) -> Result<bool> {
        self.check_faults()?;
        if Self::take(&self.pending_conflicts) {
            return Ok(false);
        }
        let mut partitions = self.partitions.write();
        let rows = partitions.entry(key(table, partition)).or_default();
        let current = rows.get(clustering).map(|row| row.version);
        if current != expected {
            return Ok(false);
        }
        let version = self.bump();
        rows.insert(clustering.to_string(), VersionedRow { version, data });
        Ok(true)
    }

    async fn delete(&self, table: &str, partition: &str, clustering: &str) -> Result<bool> {
        self.check_faults()?;
        let mut partitions = self.partitions.write();
        Ok(partitions
            .get_mut(&key(table, partition))
            .and_then(|rows| rows.remove(clustering))
            .is_some())
    }

    async fn delete_partition(&self, table: &str, partition: &str) -> Result<usize> {
        self.check_faults()?;
        Ok(self
            .partitions
            .write()
            .remove(&key(table, partition))
            .map(|rows| rows.len())
            .unwrap_or(0))
    }

    async fn ping(&self) -> Result<()> {
        self.check_faults()
    }
}
