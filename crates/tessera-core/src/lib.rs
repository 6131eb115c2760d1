//! Tessera Core Library
//!
//! Domain models, error types, configuration and settings shared by every Tessera crate.

pub mod config;
pub mod error;
pub mod job_error;
pub mod models;
pub mod settings;
pub mod storage_types;

pub use config::Config;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use job_error::{JobError, JobResultExt};
pub use settings::{
    ProcessingSettings, QueueSettings, SettingsProvider, StaticSettings, ThumbnailSettings,
};
pub use storage_types::StorageBackend;
