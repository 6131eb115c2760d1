//! Application state shared by every handler

use std::sync::Arc;
use tessera_core::{Config, SettingsProvider};
use tessera_db::{FileRepository, ProcessingJobRepository, UploadSessionRepository};
use tessera_worker::ProcessingQueue;

use crate::services::{ExpirySweeper, UploadManager};

/// Repositories behind the service. Postgres-backed in production, in-memory otherwise.
#[derive(Clone)]
pub struct Repositories {
    pub sessions: Arc<dyn UploadSessionRepository>,
    pub files: Arc<dyn FileRepository>,
    pub jobs: Arc<dyn ProcessingJobRepository>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub settings: Arc<dyn SettingsProvider>,
    pub repositories: Repositories,
    pub uploads: UploadManager,
    pub queue: ProcessingQueue,
    pub sweeper: ExpirySweeper,
}

impl AppState {
    /// Stop background work: the expiry sweep first, then the worker pool, which drains
    /// in-flight jobs.
    pub async fn shutdown(&self) {
        self.sweeper.shutdown().await;
        self.queue.shutdown().await;
        tracing::info!("Background services stopped");
    }
}
