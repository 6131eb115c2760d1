pub mod files;
pub mod jobs;
pub mod upload_sessions;
