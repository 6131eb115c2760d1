//! Storage abstraction trait
//!
//! Every blob backend used by a storage policy implements [`Storage`]. Keys are relative,
//! `/`-separated paths; see [`crate::keys`] for the layout.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::path::PathBuf;
use std::pin::Pin;
use tessera_core::AppError;
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

pub type ByteReader = Pin<Box<dyn AsyncRead + Send + Unpin>>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("Object not found: {}", key)),
            StorageError::InvalidKey(msg) => AppError::InvalidInput(msg),
            other => AppError::Storage(other.to_string()),
        }
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Store `data` under `storage_key`, replacing any previous object. Returns the object URL.
    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Bytes,
        content_type: &str,
    ) -> StorageResult<String>;

    /// Store everything `reader` yields under `storage_key` without buffering the whole object.
    ///
    /// Returns the number of bytes written.
    async fn upload_stream_with_key(
        &self,
        storage_key: &str,
        content_type: &str,
        content_length: Option<u64>,
        reader: ByteReader,
    ) -> StorageResult<u64>;

    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>>;

    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream>;

    /// Deleting a missing object is not an error.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;

    async fn content_length(&self, storage_key: &str) -> StorageResult<u64>;

    fn backend_type(&self) -> StorageBackend;

    /// Filesystem path of the object when the backend keeps it on local disk.
    fn local_path(&self, _storage_key: &str) -> Option<PathBuf> {
        None
    }
}
