use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OwnedRwLockReadGuard;
use tokio::sync::OwnedRwLockWriteGuard;
use tokio::sync::RwLock;

/// One reader/writer lock per resource key, created on first use.
///
/// Reads of a key share its lock, a write holds it alone, and different keys
/// never contend. Locks are kept until [`prune_idle`](Self::prune_idle), so
/// without pruning the table grows with the number of distinct keys seen.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read(&self, key: &str) -> OwnedRwLockReadGuard<()> {
        self.lock_for(key).read_owned().await
    }

    pub async fn write(&self, key: &str) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(key).write_owned().await
    }

    /// Drops every lock nobody holds or waits on. Returns how many went.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        // Handing out a lock clones it under the same shard lock `retain`
        // takes, so a count of one means no guard or waiter exists.
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn lock_for(&self, key: &str) -> Arc<RwLock<()>> {
        if let Some(lock) = self.locks.get(key) {
            return Arc::clone(&lock);
        }
        Arc::clone(&self.locks.entry(key.to_owned()).or_default())
    }
}
