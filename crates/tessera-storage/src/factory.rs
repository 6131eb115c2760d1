use crate::{LocalStorage, S3Storage, Storage, StorageBackend, StorageError, StorageResult};
use std::sync::Arc;
use tessera_core::Config;

/// Create the blob backend selected by `STORAGE_BACKEND`
pub async fn create_storage(config: &Config) -> StorageResult<Arc<dyn Storage>> {
    match config.storage_backend {
        StorageBackend::S3 => {
            let bucket = config
                .s3_bucket
                .clone()
                .ok_or_else(|| StorageError::ConfigError("S3_BUCKET not configured".to_string()))?;
            let region = config
                .s3_region
                .clone()
                .ok_or_else(|| StorageError::ConfigError("S3_REGION not configured".to_string()))?;

            let storage = S3Storage::new(bucket, region, config.s3_endpoint.clone()).await?;
            Ok(Arc::new(storage))
        }
        StorageBackend::Local => {
            let storage = LocalStorage::new(
                config.local_storage_path.clone(),
                config.local_storage_base_url.clone(),
            )
            .await?;
            Ok(Arc::new(storage))
        }
    }
}

/// Chunk staging always lives on local disk, whatever the policy backend.
pub async fn create_chunk_storage(config: &Config) -> StorageResult<Arc<dyn Storage>> {
    let storage = LocalStorage::new(
        config.chunk_staging_path.clone(),
        format!(
            "{}/.chunks",
            config.local_storage_base_url.trim_end_matches('/')
        ),
    )
    .await?;
    Ok(Arc::new(storage))
}
