//! Tessera media processing
//!
//! Generator selection, thumbnail generators, metadata extractors and the per-attempt pipeline
//! that ties them together. Nothing here touches storage or the database.

pub mod chain;
pub mod extractors;
pub mod generators;
pub mod pipeline;
pub mod validator;

pub use chain::{GeneratorChain, Selection};
pub use extractors::{ExtractedMetadata, ExifMetadata, MusicMetadata};
pub use generators::{Generator, GeneratorError, GeneratorRegistry, SourceFile, Thumbnail};
pub use pipeline::{MediaPipeline, PipelineOutcome};
pub use validator::{validate_target_uri, UploadValidator, ValidationError};
