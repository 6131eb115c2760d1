//! Service initialization and application state setup

use std::sync::Arc;
use std::time::Duration;
use tessera_core::{Config, SettingsProvider};
use tessera_processing::MediaPipeline;
use tessera_storage::ChunkStore;
use tessera_worker::ProcessingQueue;

use crate::services::{ExpirySweeper, MediaJobHandler, StorageResolver, UploadLimits, UploadManager};
use crate::state::{AppState, Repositories};

/// Wire the services over the given repositories and storage, then start the worker pool and
/// the expiry sweep.
pub fn initialize_services(
    config: &Config,
    settings: Arc<dyn SettingsProvider>,
    repositories: Repositories,
    storage: StorageResolver,
    chunks: ChunkStore,
) -> Arc<AppState> {
    let processing = settings.processing();
    let queue = ProcessingQueue::new(repositories.jobs.clone(), processing.queue.clone());

    let handler = Arc::new(MediaJobHandler::new(
        repositories.files.clone(),
        settings.clone(),
        storage.clone(),
        MediaPipeline::from_settings(processing),
    ));
    tracing::info!(
        generators = processing.generators.iter().filter(|g| g.enabled).count(),
        extractors = processing.extractors.iter().filter(|e| e.enabled).count(),
        "Media pipeline configured"
    );

    let uploads = UploadManager::new(
        repositories.sessions.clone(),
        repositories.files.clone(),
        settings.clone(),
        storage,
        chunks.clone(),
        queue.clone(),
        UploadLimits {
            idle_timeout: config.upload_session_idle_timeout(),
            max_chunk_count: config.upload_max_chunk_count,
        },
    );

    let sweeper = ExpirySweeper::new(
        repositories.sessions.clone(),
        chunks,
        uploads.locks().clone(),
        config.upload_session_idle_timeout(),
        Duration::from_secs(config.upload_expiry_sweep_interval_secs),
    );

    queue.start(handler);
    sweeper.start();

    Arc::new(AppState {
        config: config.clone(),
        settings,
        repositories,
        uploads,
        queue,
        sweeper,
    })
}
