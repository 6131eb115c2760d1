//! Tessera Storage Library
//!
//! Blob storage abstraction with local filesystem and S3 implementations, plus the chunk
//! staging area used by resumable uploads.
//!
//! Keys are relative `/`-separated paths and must not contain `..` or a leading `/`. Key
//! layout is centralized in [`keys`] so all backends stay consistent.

pub mod chunks;
pub mod factory;
pub mod keys;
pub mod local;
pub mod s3;
pub mod traits;

pub use chunks::ChunkStore;
pub use factory::{create_chunk_storage, create_storage};
pub use local::LocalStorage;
pub use s3::S3Storage;
pub use tessera_core::StorageBackend;
pub use traits::{ByteReader, ByteStream, Storage, StorageError, StorageResult};
