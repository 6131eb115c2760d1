pub mod descriptors;
pub mod policy;
pub mod processing_job;
pub mod stored_file;
pub mod upload_session;

pub use descriptors::{generator_names, ExtractorDescriptor, ExtractorKind, GeneratorDescriptor};
pub use policy::StoragePolicy;
pub use processing_job::{
    JobPolicy, JobStatus, ProcessingJob, RegenerateThumbnailResponse, SkipReason,
};
pub use stored_file::StoredFile;
pub use upload_session::{
    CancelUploadSessionResponse, CreateUploadSessionRequest, CreateUploadSessionResponse,
    FinalizeUploadRequest, FinalizeUploadResponse, UploadChunk, UploadChunkResponse,
    UploadSession, UploadSessionProgress, UploadSessionStatus,
};

/// Lowercase extension of a file name, without the dot. Empty when there is none.
pub fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}
