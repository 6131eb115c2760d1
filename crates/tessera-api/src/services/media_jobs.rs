//! Processing job handler for stored files
//!
//! Resolves the file's source bytes (in place for local backends, a temporary download for
//! remote ones), runs the media pipeline and records the thumbnail and metadata on the file.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tessera_core::models::{ProcessingJob, StoredFile};
use tessera_core::{AppError, JobError, JobResultExt, SettingsProvider};
use tessera_db::FileRepository;
use tessera_processing::{MediaPipeline, PipelineOutcome, SourceFile, Thumbnail};
use tessera_storage::keys::thumbnail_key;
use tessera_storage::Storage;
use tessera_worker::{JobHandler, JobOutcome};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::services::storage_resolver::StorageResolver;

pub struct MediaJobHandler {
    files: Arc<dyn FileRepository>,
    settings: Arc<dyn SettingsProvider>,
    storage: StorageResolver,
    pipeline: MediaPipeline,
}

impl MediaJobHandler {
    pub fn new(
        files: Arc<dyn FileRepository>,
        settings: Arc<dyn SettingsProvider>,
        storage: StorageResolver,
        pipeline: MediaPipeline,
    ) -> Self {
        Self {
            files,
            settings,
            storage,
            pipeline,
        }
    }

    async fn load_file(&self, job: &ProcessingJob) -> Result<(StoredFile, Arc<dyn Storage>), JobError> {
        let file = self
            .files
            .get(job.source_file_id)
            .await?
            .ok_or_else(|| {
                JobError::unrecoverable(anyhow::anyhow!(
                    "Stored file {} no longer exists",
                    job.source_file_id
                ))
            })?;
        let policy = self.settings.policy(file.policy_id).ok_or_else(|| {
            JobError::unrecoverable(anyhow::anyhow!(
                "Storage policy {} not found",
                file.policy_id
            ))
        })?;
        let storage = self.storage.for_policy(&policy).unrecoverable()?;
        Ok((file, storage))
    }

    async fn store_result(
        &self,
        file: &StoredFile,
        storage: &dyn Storage,
        outcome: PipelineOutcome,
    ) -> Result<JobOutcome, JobError> {
        let metadata = outcome.metadata().to_json();

        match outcome {
            PipelineOutcome::Generated {
                generator,
                thumbnail,
                ..
            } => {
                let key = thumbnail_key(file.id);
                storage
                    .upload_with_key(&key, thumbnail.data.clone(), Thumbnail::CONTENT_TYPE)
                    .await
                    .map_err(AppError::from)?;
                self.files
                    .update_processing_result(file.id, Some(&key), metadata.clone())
                    .await?;

                tracing::info!(
                    file_id = %file.id,
                    generator = %generator,
                    width = thumbnail.width,
                    height = thumbnail.height,
                    "Thumbnail stored"
                );

                Ok(JobOutcome::Succeeded(json!({
                    "generator": generator,
                    "thumbnail_key": key,
                    "width": thumbnail.width,
                    "height": thumbnail.height,
                    "metadata": metadata,
                })))
            }
            PipelineOutcome::Skipped { reason, .. } => {
                if metadata.is_some() {
                    self.files
                        .update_processing_result(file.id, None, metadata.clone())
                        .await?;
                }
                tracing::info!(file_id = %file.id, reason = %reason, "Thumbnail skipped");

                Ok(JobOutcome::Skipped {
                    reason,
                    result: metadata.map(|m| json!({ "metadata": m })),
                })
            }
        }
    }
}

#[async_trait]
impl JobHandler for MediaJobHandler {
    #[tracing::instrument(skip(self, job, cancel), fields(job_id = %job.id, file_id = %job.source_file_id, attempt = job.attempt))]
    async fn handle(
        self: Arc<Self>,
        job: &ProcessingJob,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, JobError> {
        let (file, storage) = self.load_file(job).await?;
        let extension = file.extension();
        let size = file.size.max(0) as u64;

        // The temporary download must outlive the pipeline run.
        let (source, _download) = match storage.local_path(&file.storage_key) {
            Some(path) => (
                SourceFile {
                    path,
                    extension,
                    size,
                    is_local: true,
                },
                None,
            ),
            None => {
                let temp = download_to_temp(storage.as_ref(), &file).await?;
                let source = SourceFile {
                    path: temp.path().to_path_buf(),
                    extension,
                    size,
                    is_local: false,
                };
                (source, Some(temp))
            }
        };

        let outcome = self.pipeline.run(&source, &cancel).await?;
        self.store_result(&file, storage.as_ref(), outcome).await
    }
}

async fn download_to_temp(
    storage: &dyn Storage,
    file: &StoredFile,
) -> Result<NamedTempFile, JobError> {
    let temp = tempfile::Builder::new()
        .prefix("tessera-")
        .suffix(&format!(".{}", file.extension()))
        .tempfile()
        .recoverable()?;

    let mut stream = storage
        .download_stream(&file.storage_key)
        .await
        .map_err(AppError::from)?;
    let mut out = tokio::fs::File::from_std(temp.reopen().recoverable()?);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(AppError::from)?;
        out.write_all(&chunk).await.recoverable()?;
    }
    out.flush().await.recoverable()?;

    tracing::debug!(file_id = %file.id, path = %temp.path().display(), "Downloaded source for processing");
    Ok(temp)
}
