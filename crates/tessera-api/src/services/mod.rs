mod expiry_sweeper;
mod media_jobs;
pub mod session_locks;
mod storage_resolver;
pub mod upload_manager;

pub use expiry_sweeper::ExpirySweeper;
pub use media_jobs::MediaJobHandler;
pub use storage_resolver::StorageResolver;
pub use upload_manager::{UploadLimits, UploadManager};
