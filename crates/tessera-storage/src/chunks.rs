//! Staging area for upload chunks
//!
//! Chunks live under `uploads/chunked/{session_id}/` until the session is assembled, cancelled
//! or expired. Assembly reads them back in index order as one continuous byte stream.

use crate::keys::chunk_key;
use crate::traits::{ByteReader, Storage, StorageResult};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio_util::io::StreamReader;
use uuid::Uuid;

#[derive(Clone)]
pub struct ChunkStore {
    storage: Arc<dyn Storage>,
}

impl ChunkStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Store (or replace) the bytes of one chunk. Returns the chunk's storage key.
    pub async fn put(&self, session_id: Uuid, index: u32, data: Bytes) -> StorageResult<String> {
        let key = chunk_key(session_id, index);
        self.storage
            .upload_with_key(&key, data, "application/octet-stream")
            .await?;
        Ok(key)
    }

    pub async fn size(&self, session_id: Uuid, index: u32) -> StorageResult<u64> {
        self.storage
            .content_length(&chunk_key(session_id, index))
            .await
    }

    /// Chunks `0..count` concatenated in index order. A missing chunk surfaces as a read error.
    pub fn assembled_reader(&self, session_id: Uuid, count: u32) -> ByteReader {
        let storage = self.storage.clone();
        let stream = futures::stream::iter(0..count)
            .then(move |index| {
                let storage = storage.clone();
                async move { storage.download_stream(&chunk_key(session_id, index)).await }
            })
            .try_flatten()
            .map_err(std::io::Error::other);

        Box::pin(StreamReader::new(Box::pin(stream)))
    }

    /// Best-effort removal of chunks `0..count`; failures are logged, not returned.
    pub async fn release(&self, session_id: Uuid, count: u32) {
        for index in 0..count {
            let key = chunk_key(session_id, index);
            if let Err(e) = self.storage.delete(&key).await {
                tracing::warn!(
                    session_id = %session_id,
                    key = %key,
                    error = %e,
                    "Failed to release upload chunk"
                );
            }
        }
        tracing::debug!(session_id = %session_id, chunks = count, "Released upload chunks");
    }
}
