//! Idle upload session expiry
//!
//! Runs on its own interval. Each sweep is one conditional update in the repository, so a
//! session that entered `finalizing` is never expired underneath finalize.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tessera_core::AppError;
use tessera_db::UploadSessionRepository;
use tessera_storage::ChunkStore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::services::session_locks::SessionLocks;

#[derive(Clone)]
pub struct ExpirySweeper {
    sessions: Arc<dyn UploadSessionRepository>,
    chunks: ChunkStore,
    locks: SessionLocks,
    idle_timeout: chrono::Duration,
    interval: Duration,
    shutdown: CancellationToken,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ExpirySweeper {
    pub fn new(
        sessions: Arc<dyn UploadSessionRepository>,
        chunks: ChunkStore,
        locks: SessionLocks,
        idle_timeout: chrono::Duration,
        interval: Duration,
    ) -> Self {
        Self {
            sessions,
            chunks,
            locks,
            idle_timeout,
            interval,
            shutdown: CancellationToken::new(),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Expire every session idle for longer than the timeout and release its chunks, then drop
    /// lock entries nobody holds. Returns how many sessions were expired.
    pub async fn sweep_once(&self) -> Result<usize, AppError> {
        let cutoff = Utc::now() - self.idle_timeout;
        let expired = self.sessions.expire_idle(cutoff).await?;

        for session in &expired {
            self.chunks
                .release(session.id, session.expected_chunk_count.max(0) as u32)
                .await;
            tracing::info!(
                session_id = %session.id,
                last_activity_at = %session.last_activity_at,
                "Upload session expired"
            );
        }

        let pruned = self.locks.prune();
        if pruned > 0 {
            tracing::debug!(pruned, "Dropped unused upload session locks");
        }

        Ok(expired.len())
    }

    /// Spawn the periodic sweep. A zero interval disables it.
    pub fn start(&self) {
        if self.interval.is_zero() {
            tracing::info!("Upload session expiry sweep disabled");
            return;
        }

        let mut slot = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }

        let sweeper = self.clone();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweeper.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = sweeper.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        match sweeper.sweep_once().await {
                            Ok(0) => {}
                            Ok(count) => tracing::info!(count, "Expired idle upload sessions"),
                            Err(e) => tracing::error!(error = %e, "Upload session expiry sweep failed"),
                        }
                    }
                }
            }
            tracing::debug!("Upload session expiry sweep stopped");
        }));

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            idle_timeout_secs = self.idle_timeout.num_seconds(),
            "Upload session expiry sweep started"
        );
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Upload session expiry sweep panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tessera_core::models::{UploadSession, UploadSessionStatus};
    use tessera_db::InMemoryUploadSessionRepository;
    use tessera_storage::{LocalStorage, Storage};
    use uuid::Uuid;

    async fn sweeper(
        dir: &std::path::Path,
    ) -> (
        ExpirySweeper,
        Arc<InMemoryUploadSessionRepository>,
        ChunkStore,
        SessionLocks,
    ) {
        let storage: Arc<dyn Storage> = Arc::new(
            LocalStorage::new(dir, "http://localhost/chunks".to_string())
                .await
                .unwrap(),
        );
        let chunks = ChunkStore::new(storage);
        let repo = Arc::new(InMemoryUploadSessionRepository::new());
        let locks = SessionLocks::new();
        let sweeper = ExpirySweeper::new(
            repo.clone(),
            chunks.clone(),
            locks.clone(),
            chrono::Duration::seconds(60),
            Duration::from_secs(3600),
        );
        (sweeper, repo, chunks, locks)
    }

    fn session(last_activity_secs_ago: i64) -> UploadSession {
        let then = Utc::now() - chrono::Duration::seconds(last_activity_secs_ago);
        UploadSession::new(
            "/a/b.bin".to_string(),
            "b.bin".to_string(),
            8,
            4,
            1,
            false,
            then,
        )
    }

    #[tokio::test]
    async fn test_sweep_expires_idle_sessions_and_releases_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let (sweeper, repo, chunks, _) = sweeper(dir.path()).await;

        let idle = session(120);
        let fresh = session(5);
        repo.create(&idle).await.unwrap();
        repo.create(&fresh).await.unwrap();
        chunks
            .put(idle.id, 0, Bytes::from_static(b"abcd"))
            .await
            .unwrap();

        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);

        let idle = repo.get(idle.id).await.unwrap().unwrap();
        assert_eq!(idle.status, UploadSessionStatus::Expired);
        assert!(chunks.size(idle.id, 0).await.is_err());

        let fresh = repo.get(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, UploadSessionStatus::Created);

        // Already expired sessions are not reported twice.
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_drops_locks_of_abandoned_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let (sweeper, repo, _, locks) = sweeper(dir.path()).await;

        let abandoned = session(120);
        repo.create(&abandoned).await.unwrap();
        drop(locks.acquire(abandoned.id).await);
        let active = Uuid::new_v4();
        let _guard = locks.acquire(active).await;
        assert_eq!(locks.len(), 2);

        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_finalizing_session_is_never_expired() {
        let dir = tempfile::tempdir().unwrap();
        let (sweeper, repo, _, _) = sweeper(dir.path()).await;

        let mut finalizing = session(600);
        finalizing.status = UploadSessionStatus::Finalizing;
        repo.create(&finalizing).await.unwrap();

        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        assert_eq!(
            repo.get(finalizing.id).await.unwrap().unwrap().status,
            UploadSessionStatus::Finalizing
        );
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (sweeper, _, _, _) = sweeper(dir.path()).await;
        sweeper.start();
        tokio::time::timeout(Duration::from_secs(1), sweeper.shutdown())
            .await
            .unwrap();
    }
}
