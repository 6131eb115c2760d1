//! Thumbnail generators
//!
//! Each generator turns a locally readable source file into a JPEG thumbnail. External-process
//! generators (vips, ffmpeg, libraw, music cover) run their tool with `kill_on_drop`, so a
//! cancelled or timed-out attempt never leaves the child behind.

mod builtin;
mod ffmpeg;
mod libraw;
mod music_cover;
mod process;
mod resize;
mod vips;

pub use builtin::BuiltinGenerator;
pub use ffmpeg::FfmpegGenerator;
pub use libraw::LibrawGenerator;
pub use music_cover::MusicCoverGenerator;
pub use resize::encode_thumbnail;
pub use vips::VipsGenerator;

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tessera_core::models::{generator_names, GeneratorDescriptor};
use tessera_core::{JobError, ThumbnailSettings};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The tool ran and failed; worth another attempt.
    #[error("{tool} failed: {message}")]
    ProcessFailed { tool: String, message: String },

    #[error("Generator executable unavailable: {0}")]
    ExecutableUnavailable(String),

    /// The source could not be decoded. Retrying will not help.
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Generator not applicable: {0}")]
    NotApplicable(String),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GeneratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GeneratorError::ProcessFailed { .. } | GeneratorError::Io(_))
    }
}

impl From<GeneratorError> for JobError {
    fn from(err: GeneratorError) -> Self {
        if err.is_retryable() {
            JobError::recoverable(anyhow::Error::new(err))
        } else {
            JobError::unrecoverable(anyhow::Error::new(err))
        }
    }
}

/// A source file available on the local filesystem
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Lowercase, without the dot
    pub extension: String,
    pub size: u64,
    /// `false` when the file was fetched from a remote backend for this attempt
    pub is_local: bool,
}

#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

impl Thumbnail {
    pub const CONTENT_TYPE: &'static str = "image/jpeg";
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        source: &SourceFile,
        settings: &ThumbnailSettings,
        cancel: &CancellationToken,
    ) -> Result<Thumbnail, GeneratorError>;
}

/// Generator implementations keyed by descriptor name
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    generators: HashMap<String, Arc<dyn Generator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate the shipped generator for every known descriptor name. Unknown names are
    /// skipped with a warning; the chain will still select them and the attempt then fails as
    /// not applicable.
    pub fn from_descriptors(descriptors: &[GeneratorDescriptor]) -> Self {
        let mut registry = Self::new();
        for descriptor in descriptors {
            let executable = |fallback: &str| {
                descriptor
                    .executable_path
                    .clone()
                    .unwrap_or_else(|| fallback.to_string())
            };
            let generator: Arc<dyn Generator> = match descriptor.name.as_str() {
                generator_names::VIPS => Arc::new(VipsGenerator::new(executable("vipsthumbnail"))),
                generator_names::FFMPEG => Arc::new(FfmpegGenerator::new(executable("ffmpeg"))),
                generator_names::LIBRAW => {
                    Arc::new(LibrawGenerator::new(executable("simple_dcraw")))
                }
                generator_names::MUSIC_COVER => {
                    Arc::new(MusicCoverGenerator::new(executable("ffmpeg")))
                }
                generator_names::BUILTIN => Arc::new(BuiltinGenerator),
                other => {
                    tracing::warn!(generator = %other, "No implementation for configured generator");
                    continue;
                }
            };
            registry.register(&descriptor.name, generator);
        }
        registry
    }

    pub fn register(&mut self, name: &str, generator: Arc<dyn Generator>) {
        self.generators.insert(name.to_string(), generator);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Generator>> {
        self.generators.get(name).cloned()
    }
}
