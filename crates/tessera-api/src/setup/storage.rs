//! Blob storage setup

use anyhow::{Context, Result};
use tessera_core::Config;
use tessera_storage::{create_chunk_storage, create_storage, ChunkStore};

use crate::services::StorageResolver;

/// Policy backends and the chunk staging area
pub async fn setup_storage(config: &Config) -> Result<(StorageResolver, ChunkStore)> {
    let storage = create_storage(config)
        .await
        .context("Failed to initialize storage backend")?;
    tracing::info!(backend = %storage.backend_type(), "Storage backend initialized");

    let staging = create_chunk_storage(config)
        .await
        .context("Failed to initialize chunk staging")?;
    tracing::info!(path = %config.chunk_staging_path, "Chunk staging initialized");

    Ok((
        StorageResolver::new().with_backend(storage),
        ChunkStore::new(staging),
    ))
}
