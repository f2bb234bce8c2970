//! Per-instance serialization.
//!
//! Every call that reads and then mutates an instance (or its bindings)
//! holds that instance's lock across the read and the write. Calls on
//! different instances never contend.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Map size below which [`InstanceLocks::acquire`] never prunes.
const PRUNE_FLOOR: usize = 256;

/// Map of instance ID to its lock.
///
/// Entries for IDs that turn out to be unknown are not removed by the
/// caller. `acquire` sweeps idle entries whenever the map has doubled since
/// the last sweep.
pub struct InstanceLocks {
    table: Mutex<LockTable>,
}

struct LockTable {
    locks: HashMap<Uuid, Arc<Mutex<()>>>,
    prune_at: usize,
}

impl LockTable {
    fn prune(&mut self) -> usize {
        let before = self.locks.len();
        // The map's own reference is the only one left for idle entries.
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        self.prune_at = (self.locks.len() * 2).max(PRUNE_FLOOR);
        before - self.locks.len()
    }
}

impl Default for InstanceLocks {
    fn default() -> Self {
        Self {
            table: Mutex::new(LockTable {
                locks: HashMap::new(),
                prune_at: PRUNE_FLOOR,
            }),
        }
    }
}

/// Held lock on one instance. Released on drop.
pub struct InstanceGuard {
    instance_id: Uuid,
    _held: OwnedMutexGuard<()>,
}

impl InstanceGuard {
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock on `instance_id`.
    pub async fn acquire(&self, instance_id: Uuid) -> InstanceGuard {
        let lock = {
            let mut table = self.table.lock().await;
            if table.locks.len() >= table.prune_at {
                let removed = table.prune();
                debug!(removed, held = table.locks.len(), "instance lock map swept");
            }
            table
                .locks
                .entry(instance_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        InstanceGuard {
            instance_id,
            _held: lock.lock_owned().await,
        }
    }

    /// Drop map entries nobody holds or waits on. Returns the number removed.
    pub async fn prune(&self) -> usize {
        let removed = self.table.lock().await.prune();
        if removed > 0 {
            debug!(removed, "idle instance locks pruned");
        }
        removed
    }

    /// Number of instances with a lock entry.
    pub async fn len(&self) -> usize {
        self.table.lock().await.locks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_instance_is_serialized() {
        let locks = Arc::new(InstanceLocks::new());
        let id = Uuid::new_v4();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(id).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_instances_do_not_contend() {
        let locks = InstanceLocks::new();
        let a = locks.acquire(Uuid::new_v4()).await;
        // Would hang if instances shared a lock.
        let b = tokio::time::timeout(Duration::from_secs(1), locks.acquire(Uuid::new_v4()))
            .await
            .unwrap();
        assert_ne!(a.instance_id(), b.instance_id());
    }

    #[tokio::test]
    async fn unknown_ids_do_not_accumulate() {
        let locks = InstanceLocks::new();
        let held = locks.acquire(Uuid::new_v4()).await;
        for _ in 0..10 * PRUNE_FLOOR {
            drop(locks.acquire(Uuid::new_v4()).await);
        }
        assert!(locks.len().await <= PRUNE_FLOOR);

        // Sweeps never drop a held lock.
        let again = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(held.instance_id()),
        )
        .await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let locks = InstanceLocks::new();
        let held = locks.acquire(Uuid::new_v4()).await;
        drop(locks.acquire(Uuid::new_v4()).await);
        assert_eq!(locks.len().await, 2);

        assert_eq!(locks.prune().await, 1);
        assert_eq!(locks.len().await, 1);

        drop(held);
        assert_eq!(locks.prune().await, 1);
        assert!(locks.is_empty().await);
    }
}
