use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tessera_core::models::{JobStatus, ProcessingJob, SkipReason};
use tessera_core::AppError;
use uuid::Uuid;

const JOB_COLUMNS: &str = r#"
    id, source_file_id, status, attempt, max_retries, retry_delay_seconds, backoff_factor,
    max_backoff_seconds, max_exec_seconds, next_run_at, cancel_requested, skip_reason,
    last_error, result, started_at, finished_at, created_at, updated_at
"#;

const STALE_ERROR: &str = "Worker stopped responding before the job finished";

const NON_TERMINAL: &str = "status NOT IN ('succeeded', 'failed', 'cancelled', 'skipped')";

/// Persistence for processing jobs
///
/// Outcome writes only apply to a `running` job and return `false` otherwise, so a job that
/// reached a terminal state (or was reclaimed) is never overwritten by a late worker.
#[async_trait]
pub trait ProcessingJobRepository: Send + Sync {
    async fn insert(&self, job: &ProcessingJob) -> Result<(), AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<ProcessingJob>, AppError>;

    /// Atomically claim the oldest due job and mark it `running`. Each job is handed to
    /// exactly one caller.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<ProcessingJob>, AppError>;

    async fn mark_succeeded(&self, id: Uuid, result: serde_json::Value) -> Result<bool, AppError>;

    async fn mark_skipped(
        &self,
        id: Uuid,
        reason: SkipReason,
        result: Option<serde_json::Value>,
    ) -> Result<bool, AppError>;

    async fn mark_failed(&self, id: Uuid, attempt: i32, error: &str) -> Result<bool, AppError>;

    /// `running -> retrying` with the new attempt counter and due time
    async fn schedule_retry(
        &self,
        id: Uuid,
        attempt: i32,
        next_run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, AppError>;

    async fn mark_cancelled(&self, id: Uuid) -> Result<bool, AppError>;

    /// Pending jobs are cancelled on the spot; running jobs get `cancel_requested` set and are
    /// expected to stop cooperatively. Terminal jobs are returned unchanged.
    async fn request_cancel(&self, id: Uuid) -> Result<Option<ProcessingJob>, AppError>;

    /// Resolve `running` jobs whose worker has been silent longer than their `max_exec_seconds`
    /// plus `grace_seconds`. The lost run counts as a failed attempt: the job is scheduled for
    /// retry with backoff, or marked `failed` once `max_retries` is used up. Jobs with a pending
    /// cancel request become `cancelled`.
    async fn requeue_stale(&self, now: DateTime<Utc>, grace_seconds: f64)
        -> Result<u64, AppError>;
}

#[derive(Clone)]
pub struct PostgresProcessingJobRepository {
    pool: PgPool,
}

impl PostgresProcessingJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessingJobRepository for PostgresProcessingJobRepository {
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id))]
    async fn insert(&self, job: &ProcessingJob) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO processing_jobs (
                id, source_file_id, status, attempt, max_retries, retry_delay_seconds,
                backoff_factor, max_backoff_seconds, max_exec_seconds, next_run_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(job.id)
        .bind(job.source_file_id)
        .bind(job.status.as_str())
        .bind(job.attempt)
        .bind(job.max_retries)
        .bind(job.retry_delay_seconds)
        .bind(job.backoff_factor)
        .bind(job.max_backoff_seconds)
        .bind(job.max_exec_seconds)
        .bind(job.next_run_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ProcessingJob>, AppError> {
        let query = format!("SELECT {} FROM processing_jobs WHERE id = $1", JOB_COLUMNS);
        let job = sqlx::query_as::<_, ProcessingJob>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    #[tracing::instrument(skip(self))]
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<ProcessingJob>, AppError> {
        let query = format!(
            r#"
            UPDATE processing_jobs
            SET status = 'running', started_at = $1, updated_at = $1
            WHERE id = (
                SELECT id FROM processing_jobs
                WHERE status IN ('queued', 'retrying')
                    AND cancel_requested = FALSE
                    AND next_run_at <= $1
                ORDER BY next_run_at ASC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        );
        let job = sqlx::query_as::<Postgres, ProcessingJob>(&query)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(ref job) = job {
            tracing::debug!(job_id = %job.id, attempt = job.attempt, "Job claimed");
        }

        Ok(job)
    }

    async fn mark_succeeded(&self, id: Uuid, result: serde_json::Value) -> Result<bool, AppError> {
        let outcome = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET status = 'succeeded', result = $2, last_error = NULL,
                finished_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(result)
        .execute(&self.pool)
        .await?;

        Ok(outcome.rows_affected() == 1)
    }

    async fn mark_skipped(
        &self,
        id: Uuid,
        reason: SkipReason,
        result: Option<serde_json::Value>,
    ) -> Result<bool, AppError> {
        let outcome = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET status = 'skipped', skip_reason = $2, result = $3,
                finished_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(reason.as_str())
        .bind(result)
        .execute(&self.pool)
        .await?;

        Ok(outcome.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: Uuid, attempt: i32, error: &str) -> Result<bool, AppError> {
        let outcome = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET status = 'failed', attempt = $2, last_error = $3,
                finished_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(attempt)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(outcome.rows_affected() == 1)
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        attempt: i32,
        next_run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, AppError> {
        let outcome = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET status = 'retrying', attempt = $2, next_run_at = $3, last_error = $4,
                started_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'running' AND $2 <= max_retries
            "#,
        )
        .bind(id)
        .bind(attempt)
        .bind(next_run_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(outcome.rows_affected() == 1)
    }

    async fn mark_cancelled(&self, id: Uuid) -> Result<bool, AppError> {
        let query = format!(
            r#"
            UPDATE processing_jobs
            SET status = 'cancelled', finished_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND {}
            "#,
            NON_TERMINAL
        );
        let outcome = sqlx::query(&query).bind(id).execute(&self.pool).await?;

        Ok(outcome.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn request_cancel(&self, id: Uuid) -> Result<Option<ProcessingJob>, AppError> {
        let query = format!(
            r#"
            UPDATE processing_jobs
            SET status = CASE WHEN status IN ('queued', 'retrying') THEN 'cancelled' ELSE status END,
                finished_at = CASE WHEN status IN ('queued', 'retrying') THEN NOW() ELSE finished_at END,
                cancel_requested = TRUE,
                updated_at = NOW()
            WHERE id = $1 AND {}
            RETURNING {}
            "#,
            NON_TERMINAL, JOB_COLUMNS
        );
        let updated = sqlx::query_as::<_, ProcessingJob>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(job) => Ok(Some(job)),
            None => self.get(id).await,
        }
    }

    #[tracing::instrument(skip(self))]
    async fn requeue_stale(
        &self,
        now: DateTime<Utc>,
        grace_seconds: f64,
    ) -> Result<u64, AppError> {
        let cancelled = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET status = 'cancelled', finished_at = $1, updated_at = $1
            WHERE status = 'running' AND cancel_requested = TRUE
                AND started_at + make_interval(secs => max_exec_seconds + $2) < $1
            "#,
        )
        .bind(now)
        .bind(grace_seconds)
        .execute(&self.pool)
        .await?;

        let requeued = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET status = CASE WHEN attempt < max_retries THEN 'retrying' ELSE 'failed' END,
                attempt = CASE WHEN attempt < max_retries THEN attempt + 1 ELSE attempt END,
                next_run_at = CASE
                    WHEN attempt < max_retries THEN $1 + make_interval(secs => LEAST(
                        max_backoff_seconds,
                        retry_delay_seconds * POWER(backoff_factor, (attempt + 1)::DOUBLE PRECISION)
                    ))
                    ELSE next_run_at
                END,
                finished_at = CASE WHEN attempt < max_retries THEN NULL ELSE $1 END,
                last_error = $3,
                started_at = NULL,
                updated_at = $1
            WHERE status = 'running' AND cancel_requested = FALSE
                AND started_at + make_interval(secs => max_exec_seconds + $2) < $1
            "#,
        )
        .bind(now)
        .bind(grace_seconds)
        .bind(STALE_ERROR)
        .execute(&self.pool)
        .await?;

        Ok(cancelled.rows_affected() + requeued.rows_affected())
    }
}

/// Single-process repository used when no database is configured, and in tests.
///
/// All reads and writes go through one mutex, which also makes `claim_next` dequeue-once.
#[derive(Clone, Default)]
pub struct InMemoryProcessingJobRepository {
    jobs: Arc<Mutex<HashMap<Uuid, ProcessingJob>>>,
}

impl InMemoryProcessingJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ProcessingJob>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update_running(&self, id: Uuid, apply: impl FnOnce(&mut ProcessingJob)) -> bool {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running => {
                apply(job);
                job.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl ProcessingJobRepository for InMemoryProcessingJobRepository {
    async fn insert(&self, job: &ProcessingJob) -> Result<(), AppError> {
        let mut jobs = self.lock();
        if jobs.contains_key(&job.id) {
            return Err(AppError::Conflict(format!("Job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ProcessingJob>, AppError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<ProcessingJob>, AppError> {
        let mut jobs = self.lock();
        let next_id = jobs
            .values()
            .filter(|job| job.is_claimable(now))
            .min_by_key(|job| (job.next_run_at, job.created_at))
            .map(|job| job.id);

        Ok(next_id.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.status = JobStatus::Running;
                job.started_at = Some(now);
                job.updated_at = now;
                job.clone()
            })
        }))
    }

    async fn mark_succeeded(&self, id: Uuid, result: serde_json::Value) -> Result<bool, AppError> {
        Ok(self.update_running(id, |job| {
            job.status = JobStatus::Succeeded;
            job.result = Some(result);
            job.last_error = None;
            job.finished_at = Some(Utc::now());
        }))
    }

    async fn mark_skipped(
        &self,
        id: Uuid,
        reason: SkipReason,
        result: Option<serde_json::Value>,
    ) -> Result<bool, AppError> {
        Ok(self.update_running(id, |job| {
            job.status = JobStatus::Skipped;
            job.skip_reason = Some(reason);
            job.result = result;
            job.finished_at = Some(Utc::now());
        }))
    }

    async fn mark_failed(&self, id: Uuid, attempt: i32, error: &str) -> Result<bool, AppError> {
        Ok(self.update_running(id, |job| {
            job.status = JobStatus::Failed;
            job.attempt = attempt;
            job.last_error = Some(error.to_string());
            job.finished_at = Some(Utc::now());
        }))
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        attempt: i32,
        next_run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, AppError> {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running && attempt <= job.max_retries => {
                job.status = JobStatus::Retrying;
                job.attempt = attempt;
                job.next_run_at = next_run_at;
                job.last_error = Some(error.to_string());
                job.started_at = None;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_cancelled(&self, id: Uuid) -> Result<bool, AppError> {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                let now = Utc::now();
                job.status = JobStatus::Cancelled;
                job.finished_at = Some(now);
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn request_cancel(&self, id: Uuid) -> Result<Option<ProcessingJob>, AppError> {
        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        if !job.status.is_terminal() {
            let now = Utc::now();
            if job.status.is_pending() {
                job.status = JobStatus::Cancelled;
                job.finished_at = Some(now);
            }
            job.cancel_requested = true;
            job.updated_at = now;
        }
        Ok(Some(job.clone()))
    }

    async fn requeue_stale(
        &self,
        now: DateTime<Utc>,
        grace_seconds: f64,
    ) -> Result<u64, AppError> {
        let mut jobs = self.lock();
        let mut touched = 0;
        for job in jobs.values_mut() {
            if job.status != JobStatus::Running {
                continue;
            }
            let Some(started_at) = job.started_at else {
                continue;
            };
            let allowed_ms = ((job.max_exec_seconds + grace_seconds).max(0.0) * 1000.0) as i64;
            if started_at + chrono::Duration::milliseconds(allowed_ms) >= now {
                continue;
            }
            if job.cancel_requested {
                job.status = JobStatus::Cancelled;
                job.finished_at = Some(now);
            } else if job.can_retry() {
                job.attempt += 1;
                let delay = job.policy().retry_backoff(job.attempt);
                job.status = JobStatus::Retrying;
                job.started_at = None;
                job.next_run_at =
                    now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                job.last_error = Some(STALE_ERROR.to_string());
            } else {
                job.status = JobStatus::Failed;
                job.started_at = None;
                job.finished_at = Some(now);
                job.last_error = Some(STALE_ERROR.to_string());
            }
            job.updated_at = now;
            touched += 1;
        }
        Ok(touched)
    }
}
