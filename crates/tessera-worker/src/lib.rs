//! Tessera worker
//!
//! [`ProcessingQueue`] runs processing jobs on a bounded worker pool with per-attempt timeouts,
//! exponential backoff between retries, cooperative cancellation and a stale-job reaper.

pub mod context;
pub mod queue;

pub use context::{JobHandler, JobOutcome};
pub use queue::ProcessingQueue;
