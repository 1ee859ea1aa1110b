//! Per-key async mutual exclusion.
//!
//! Writers to the same key queue behind one another; writers to different
//! keys never contend. Idle entries are pruned when their last guard drops,
//! so the map only holds keys with an active or waiting writer.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A set of named async locks created on demand.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Cancel-safe: dropping the future while it waits still prunes the key.
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        // Built before the slot so it drops after the pending acquisition.
        let mut pending = KeyGuard {
            owner: self,
            key: key.to_string(),
            guard: None,
        };
        let slot = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        pending.guard = Some(slot.lock_owned().await);
        pending
    }

    /// Number of keys currently held or waited on.
    pub fn active_keys(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Exclusive access to one key; released on drop.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.owner.locks.lock();
        // Only the map's own reference left: nobody holds or awaits this key.
        if locks
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            locks.remove(&self.key);
        }
    }
}
