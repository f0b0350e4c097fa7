use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockMap = DashMap<Uuid, Arc<Mutex<()>>>;

/// Per-item async mutexes serializing item-scoped critical sections in this process.
///
/// The database row lock covers other processes; this keeps same-process callers from
/// piling onto the same row and burning retries. Entries only live while someone holds
/// or waits for them, so ids that never resolve to an item leave nothing behind.
#[derive(Debug, Clone, Default)]
pub struct ItemLocks {
    locks: Arc<LockMap>,
}

/// Exclusive access to one item. Releasing the last interest in the item removes its
/// mutex from the registry.
#[derive(Debug)]
pub struct ItemGuard {
    guard: Option<OwnedMutexGuard<()>>,
    item_id: Uuid,
    locks: Arc<LockMap>,
}

impl Drop for ItemGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The map holds one reference; any other belongs to a waiter.
        self.locks
            .remove_if(&self.item_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl ItemLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `item_id`. The guard releases on drop.
    pub async fn acquire(&self, item_id: Uuid) -> ItemGuard {
        let lock = self
            .locks
            .entry(item_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        ItemGuard {
            guard: Some(guard),
            item_id,
            locks: self.locks.clone(),
        }
    }

    /// Number of items currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
