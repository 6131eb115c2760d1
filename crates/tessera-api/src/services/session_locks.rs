//! Per-session async locks
//!
//! Every mutating session operation runs under the session's lock. Finalize keeps it for the
//! whole assembly, so chunk uploads and cancellation for that session queue behind it while
//! other sessions proceed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

type LockMap = HashMap<Uuid, Arc<AsyncMutex<()>>>;

#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn acquire(&self, session_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.map().entry(session_id).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry of a session that reached a terminal state. Kept while other callers
    /// are still waiting on it.
    pub fn forget(&self, session_id: Uuid) {
        let mut map = self.map();
        // One reference in the map, one in the caller's guard.
        if map
            .get(&session_id)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            map.remove(&session_id);
        }
    }

    /// Drop every entry that no caller holds or waits on. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut map = self.map();
        let before = map.len();
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - map.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_session_is_serialized() {
        let locks = SessionLocks::new();
        let id = Uuid::new_v4();

        let guard = locks.acquire(id).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_other_sessions_do_not_block() {
        let locks = SessionLocks::new();
        let _first = locks.acquire(Uuid::new_v4()).await;
        tokio::time::timeout(Duration::from_millis(100), locks.acquire(Uuid::new_v4()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_forget_removes_idle_entry() {
        let locks = SessionLocks::new();
        let id = Uuid::new_v4();
        let guard = locks.acquire(id).await;
        locks.forget(id);
        drop(guard);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_prune_keeps_held_and_awaited_locks() {
        let locks = SessionLocks::new();
        let held = Uuid::new_v4();
        let abandoned = Uuid::new_v4();

        drop(locks.acquire(abandoned).await);
        let guard = locks.acquire(held).await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(held).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 1);

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.prune(), 1);
        assert_eq!(locks.len(), 0);
    }
}
