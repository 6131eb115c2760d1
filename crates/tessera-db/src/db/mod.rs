//! Repositories for upload sessions, stored files and processing jobs
//!
//! Each repository is a trait with a Postgres implementation and an in-memory one. The in-memory
//! variants back single-node deployments without `DATABASE_URL` and every test in the workspace.

pub mod processing_job;
pub mod stored_file;
pub mod upload_session;

pub use processing_job::{
    InMemoryProcessingJobRepository, PostgresProcessingJobRepository, ProcessingJobRepository,
};
pub use stored_file::{FileRepository, InMemoryFileRepository, PostgresFileRepository};
pub use upload_session::{
    InMemoryUploadSessionRepository, PostgresUploadSessionRepository, UploadSessionRepository,
};
