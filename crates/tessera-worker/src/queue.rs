//! Processing queue: worker pool, polling, retry with backoff and cancellation.
//!
//! Shutdown: [`ProcessingQueue::shutdown`] stops claiming new jobs and waits for in-flight
//! attempts, each of which is bounded by its job's `max_exec_seconds`. Jobs interrupted by a
//! crash are picked up again by the stale-job reaper of a surviving process.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tessera_core::models::ProcessingJob;
use tessera_core::{AppError, QueueSettings};
use tessera_db::ProcessingJobRepository;

use crate::context::{JobHandler, JobOutcome};

struct QueueInner {
    repository: Arc<dyn ProcessingJobRepository>,
    settings: QueueSettings,
    wakeup: Notify,
    running: Mutex<HashMap<Uuid, CancellationToken>>,
    shutdown: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl QueueInner {
    fn running(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Bounded-concurrency queue of processing jobs
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct ProcessingQueue {
    inner: Arc<QueueInner>,
}

impl ProcessingQueue {
    /// Create the queue without starting workers. Jobs enqueued before [`start`](Self::start)
    /// wait in the repository.
    pub fn new(repository: Arc<dyn ProcessingJobRepository>, settings: QueueSettings) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                repository,
                settings,
                wakeup: Notify::new(),
                running: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawn the worker pool and the stale-job reaper. Calling it twice is a no-op.
    pub fn start(&self, handler: Arc<dyn JobHandler>) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Processing queue already started");
            return;
        }

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(Self::worker_pool(self.inner.clone(), handler)));
        if self.inner.settings.stale_reap_interval_secs > 0 {
            tasks.push(tokio::spawn(Self::stale_reaper(self.inner.clone())));
        }
        self.inner.tasks().extend(tasks);
    }

    /// Stop claiming jobs and wait for the pool to drain
    pub async fn shutdown(&self) {
        tracing::info!("Initiating processing queue shutdown");
        self.inner.shutdown.cancel();

        let tasks: Vec<_> = self.inner.tasks().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Processing queue task panicked");
            }
        }
        tracing::info!("Processing queue stopped");
    }

    /// Queue a thumbnail/metadata job for a stored file. The job snapshots the current retry and
    /// timeout policy.
    #[tracing::instrument(skip(self))]
    pub async fn enqueue(&self, source_file_id: Uuid) -> Result<ProcessingJob, AppError> {
        let job = ProcessingJob::new(
            source_file_id,
            &self.inner.settings.job_policy(),
            Utc::now(),
        );
        self.inner.repository.insert(&job).await?;
        self.inner.wakeup.notify_one();

        tracing::info!(
            job_id = %job.id,
            file_id = %source_file_id,
            max_retries = job.max_retries,
            "Processing job enqueued"
        );

        Ok(job)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<ProcessingJob>, AppError> {
        self.inner.repository.get(job_id).await
    }

    /// Cancel a job. Queued jobs are cancelled immediately; a running attempt is signalled and
    /// the job becomes `cancelled` once the attempt stops. Returns the job as stored.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, job_id: Uuid) -> Result<Option<ProcessingJob>, AppError> {
        let job = self.inner.repository.request_cancel(job_id).await?;

        if let Some(token) = self.inner.running().get(&job_id) {
            tracing::info!(job_id = %job_id, "Signalling running job to stop");
            token.cancel();
        }

        Ok(job)
    }

    async fn worker_pool(inner: Arc<QueueInner>, handler: Arc<dyn JobHandler>) {
        let concurrency = inner.settings.concurrency.max(1);
        let poll_interval = inner.settings.poll_interval();
        tracing::info!(
            concurrency = concurrency,
            poll_interval_ms = inner.settings.poll_interval_ms,
            "Processing queue worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));

        loop {
            let permit = tokio::select! {
                biased;
                _ = inner.shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match inner.repository.claim_next(Utc::now()).await {
                Ok(Some(job)) => {
                    let inner = inner.clone();
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        Self::run_attempt(&inner, handler, job).await;
                    });
                    continue;
                }
                Ok(None) => {
                    drop(permit);
                    tracing::trace!("No jobs available");
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "Failed to claim processing job");
                }
            }

            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = inner.wakeup.notified() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        tracing::info!("Processing queue worker pool draining");
        let _ = semaphore.acquire_many(concurrency as u32).await;
    }

    async fn stale_reaper(inner: Arc<QueueInner>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(inner.settings.stale_reap_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let grace = inner.settings.stale_grace_secs as f64;

        loop {
            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match inner.repository.requeue_stale(Utc::now(), grace).await {
                        Ok(0) => {}
                        Ok(count) => {
                            tracing::warn!(count = count, "Resolved stale processing jobs");
                            inner.wakeup.notify_one();
                        }
                        Err(e) => tracing::error!(error = %e, "Stale job reaper failed"),
                    }
                }
            }
        }
    }

    #[tracing::instrument(skip(inner, handler, job), fields(job_id = %job.id, attempt = job.attempt))]
    async fn run_attempt(inner: &Arc<QueueInner>, handler: Arc<dyn JobHandler>, job: ProcessingJob) {
        let token = CancellationToken::new();
        inner.running().insert(job.id, token.clone());

        // A cancel that landed between the claim and the registration above
        if let Ok(Some(current)) = inner.repository.get(job.id).await {
            if current.cancel_requested {
                token.cancel();
            }
        }

        let max_exec = job.max_exec();
        let attempt = tokio::time::timeout(max_exec, handler.handle(&job, token.clone()));
        let result = tokio::select! {
            result = attempt => Some(result),
            _ = token.cancelled() => None,
        };

        inner.running().remove(&job.id);

        let recorded = match result {
            _ if token.is_cancelled() => {
                tracing::info!("Processing job cancelled");
                inner.repository.mark_cancelled(job.id).await
            }
            None => inner.repository.mark_cancelled(job.id).await,
            Some(Ok(Ok(JobOutcome::Succeeded(value)))) => {
                tracing::info!("Processing job succeeded");
                inner.repository.mark_succeeded(job.id, value).await
            }
            Some(Ok(Ok(JobOutcome::Skipped { reason, result }))) => {
                tracing::info!(reason = %reason, "Processing job skipped");
                inner.repository.mark_skipped(job.id, reason, result).await
            }
            Some(Ok(Err(e))) if !e.is_recoverable() => {
                tracing::error!(error = %e, "Processing job failed with unrecoverable error");
                inner
                    .repository
                    .mark_failed(job.id, job.attempt, &e.to_string())
                    .await
            }
            Some(Ok(Err(e))) => {
                tracing::warn!(error = %e, "Processing attempt failed");
                Self::retry_or_fail(inner, &job, &e.to_string()).await
            }
            Some(Err(_)) => {
                let message = format!(
                    "Job execution timed out after {:.1}s",
                    max_exec.as_secs_f64()
                );
                tracing::warn!("{}", message);
                Self::retry_or_fail(inner, &job, &message).await
            }
        };

        match recorded {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Job state changed underneath the worker, outcome dropped"),
            Err(e) => tracing::error!(error = %e, "Failed to record processing job outcome"),
        }
    }

    async fn retry_or_fail(
        inner: &Arc<QueueInner>,
        job: &ProcessingJob,
        error: &str,
    ) -> Result<bool, AppError> {
        if !job.can_retry() {
            tracing::error!(
                attempt = job.attempt,
                max_retries = job.max_retries,
                "Processing job failed after maximum retries"
            );
            return inner
                .repository
                .mark_failed(job.id, job.attempt, error)
                .await;
        }

        let next_attempt = job.attempt + 1;
        let delay = job.policy().retry_backoff(next_attempt);
        let next_run_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

        tracing::info!(
            next_attempt = next_attempt,
            backoff_ms = delay.as_millis() as u64,
            "Scheduling processing job retry"
        );

        let scheduled = inner
            .repository
            .schedule_retry(job.id, next_attempt, next_run_at, error)
            .await?;

        if scheduled {
            let inner = inner.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => {}
                    _ = tokio::time::sleep(delay) => inner.wakeup.notify_one(),
                }
            });
        }

        Ok(scheduled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tessera_core::models::{JobStatus, SkipReason};
    use tessera_core::{JobError, JobResultExt};
    use tessera_db::InMemoryProcessingJobRepository;

    enum Script {
        FailTimes(usize),
        AlwaysFail,
        Unrecoverable,
        Hang,
        WaitForCancel,
        Skip,
    }

    struct ScriptedHandler {
        script: Script,
        calls: AtomicUsize,
        started: Notify,
    }

    impl ScriptedHandler {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: AtomicUsize::new(0),
                started: Notify::new(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        async fn handle(
            self: Arc<Self>,
            _job: &ProcessingJob,
            cancel: CancellationToken,
        ) -> Result<JobOutcome, JobError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            match self.script {
                Script::FailTimes(n) if call < n => {
                    Err(JobError::recoverable(anyhow::anyhow!("transient failure")))
                }
                Script::FailTimes(_) => Ok(JobOutcome::Succeeded(serde_json::json!({"ok": true}))),
                Script::AlwaysFail => Err(JobError::recoverable(anyhow::anyhow!("still broken"))),
                Script::Unrecoverable => {
                    Err::<JobOutcome, _>(anyhow::anyhow!("executable missing")).unrecoverable()
                }
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(JobOutcome::Succeeded(serde_json::Value::Null))
                }
                Script::WaitForCancel => {
                    cancel.cancelled().await;
                    Err(JobError::recoverable(anyhow::anyhow!("interrupted")))
                }
                Script::Skip => Ok(JobOutcome::Skipped {
                    reason: SkipReason::NoGeneratorApplicable,
                    result: None,
                }),
            }
        }
    }

    fn settings(max_retries: i32) -> QueueSettings {
        QueueSettings {
            concurrency: 2,
            max_exec_seconds: 5.0,
            backoff_factor: 2.0,
            max_backoff_seconds: 0.05,
            max_retries,
            retry_delay_seconds: 0.01,
            poll_interval_ms: 10,
            stale_reap_interval_secs: 0,
            stale_grace_secs: 0,
        }
    }

    fn queue(settings: QueueSettings) -> (ProcessingQueue, InMemoryProcessingJobRepository) {
        let repo = InMemoryProcessingJobRepository::new();
        (ProcessingQueue::new(Arc::new(repo.clone()), settings), repo)
    }

    async fn wait_for_terminal(queue: &ProcessingQueue, id: Uuid) -> ProcessingJob {
        for _ in 0..500 {
            let job = queue.get(id).await.unwrap().unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not reach a terminal state", id);
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let (queue, _) = queue(settings(3));
        let handler = ScriptedHandler::new(Script::FailTimes(2));
        queue.start(handler.clone());

        let job = queue.enqueue(Uuid::new_v4()).await.unwrap();
        let done = wait_for_terminal(&queue, job.id).await;

        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.attempt, 2);
        assert_eq!(handler.calls(), 3);
        assert_eq!(done.result, Some(serde_json::json!({"ok": true})));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_retries_exhausted_fails_permanently() {
        let (queue, repo) = queue(settings(2));
        let handler = ScriptedHandler::new(Script::AlwaysFail);
        queue.start(handler.clone());

        let job = queue.enqueue(Uuid::new_v4()).await.unwrap();
        let done = wait_for_terminal(&queue, job.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.attempt, 2);
        assert!(done.attempt <= done.max_retries);
        assert_eq!(handler.calls(), 3);
        assert!(done.last_error.unwrap().contains("still broken"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.calls(), 3);
        assert!(repo.claim_next(Utc::now()).await.unwrap().is_none());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_unrecoverable_error_is_not_retried() {
        let (queue, _) = queue(settings(3));
        let handler = ScriptedHandler::new(Script::Unrecoverable);
        queue.start(handler.clone());

        let job = queue.enqueue(Uuid::new_v4()).await.unwrap();
        let done = wait_for_terminal(&queue, job.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.attempt, 0);
        assert_eq!(handler.calls(), 1);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let (queue, _) = queue(QueueSettings {
            max_exec_seconds: 0.05,
            ..settings(1)
        });
        let handler = ScriptedHandler::new(Script::Hang);
        queue.start(handler.clone());

        let job = queue.enqueue(Uuid::new_v4()).await.unwrap();
        let done = wait_for_terminal(&queue, job.id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(done.attempt, 1);
        assert_eq!(handler.calls(), 2);
        assert!(done.last_error.unwrap().contains("timed out"));
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_skipped_outcome_is_terminal() {
        let (queue, _) = queue(settings(3));
        let handler = ScriptedHandler::new(Script::Skip);
        queue.start(handler.clone());

        let job = queue.enqueue(Uuid::new_v4()).await.unwrap();
        let done = wait_for_terminal(&queue, job.id).await;

        assert_eq!(done.status, JobStatus::Skipped);
        assert_eq!(done.skip_reason, Some(SkipReason::NoGeneratorApplicable));
        assert_eq!(handler.calls(), 1);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_queued_job_never_runs() {
        let (queue, _) = queue(settings(3));
        let handler = ScriptedHandler::new(Script::Skip);

        let job = queue.enqueue(Uuid::new_v4()).await.unwrap();
        let cancelled = queue.cancel(job.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        queue.start(handler.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(handler.calls(), 0);
        assert_eq!(
            queue.get(job.id).await.unwrap().unwrap().status,
            JobStatus::Cancelled
        );
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let (queue, _) = queue(settings(3));
        let handler = ScriptedHandler::new(Script::WaitForCancel);
        queue.start(handler.clone());

        let job = queue.enqueue(Uuid::new_v4()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handler.started.notified())
            .await
            .unwrap();

        let requested = queue.cancel(job.id).await.unwrap().unwrap();
        assert!(requested.cancel_requested);

        let done = wait_for_terminal(&queue, job.id).await;
        assert_eq!(done.status, JobStatus::Cancelled);
        assert_eq!(handler.calls(), 1);
        queue.shutdown().await;
    }
}
