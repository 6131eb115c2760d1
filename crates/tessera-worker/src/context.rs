//! Job handler trait
//!
//! The API implements this for its media processing. The queue calls `handle` once per attempt
//! and records the outcome on the job.

use async_trait::async_trait;
use std::sync::Arc;
use tessera_core::models::{ProcessingJob, SkipReason};
use tessera_core::JobError;
use tokio_util::sync::CancellationToken;

/// Result of a successful attempt
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded(serde_json::Value),
    /// Terminal without a result and without retries
    Skipped {
        reason: SkipReason,
        result: Option<serde_json::Value>,
    },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one attempt. `cancel` fires when the job is cancelled while running; handlers should
    /// stop promptly and may return any error at that point.
    async fn handle(
        self: Arc<Self>,
        job: &ProcessingJob,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, JobError>;
}
