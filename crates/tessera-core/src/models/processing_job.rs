use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Retrying,
    Succeeded,
    Failed,
    Cancelled,
    /// Terminal, non-error outcome; see [`SkipReason`].
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Retrying => "retrying",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Skipped
        )
    }

    /// Waiting for a worker (first run or scheduled retry).
    pub fn is_pending(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Retrying)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "retrying" => Ok(JobStatus::Retrying),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "skipped" => Ok(JobStatus::Skipped),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// Why a job ended without producing a thumbnail and without being retried.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoGeneratorApplicable,
    DirectServe,
    InvalidSource,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoGeneratorApplicable => "no_generator_applicable",
            SkipReason::DirectServe => "direct_serve",
            SkipReason::InvalidSource => "invalid_source",
        }
    }
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for SkipReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_generator_applicable" => Ok(SkipReason::NoGeneratorApplicable),
            "direct_serve" => Ok(SkipReason::DirectServe),
            "invalid_source" => Ok(SkipReason::InvalidSource),
            _ => Err(anyhow::anyhow!("Invalid skip reason: {}", s)),
        }
    }
}

/// Retry and timeout policy copied onto each job when it is enqueued.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobPolicy {
    pub max_retries: i32,
    pub retry_delay_seconds: f64,
    pub backoff_factor: f64,
    pub max_backoff_seconds: f64,
    pub max_exec_seconds: f64,
}

impl JobPolicy {
    /// Delay before re-running a job whose attempt counter was just raised to `attempt`:
    /// `min(max_backoff, retry_delay * backoff_factor ^ attempt)`.
    pub fn retry_backoff(&self, attempt: i32) -> Duration {
        let raw = self.retry_delay_seconds * self.backoff_factor.powi(attempt.max(0));
        let seconds = raw.min(self.max_backoff_seconds).max(0.0);
        if seconds.is_finite() {
            Duration::from_secs_f64(seconds)
        } else if self.max_backoff_seconds.is_finite() {
            Duration::from_secs_f64(self.max_backoff_seconds.max(0.0))
        } else {
            Duration::ZERO
        }
    }
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_seconds: 5.0,
            backoff_factor: 2.0,
            max_backoff_seconds: 300.0,
            max_exec_seconds: 300.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProcessingJob {
    pub id: Uuid,
    pub source_file_id: Uuid,
    pub status: JobStatus,
    /// Zero-based attempt counter; never exceeds `max_retries`.
    pub attempt: i32,
    pub max_retries: i32,
    pub retry_delay_seconds: f64,
    pub backoff_factor: f64,
    pub max_backoff_seconds: f64,
    pub max_exec_seconds: f64,
    pub next_run_at: DateTime<Utc>,
    pub cancel_requested: bool,
    pub skip_reason: Option<SkipReason>,
    pub last_error: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub result: Option<serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingJob {
    pub fn new(source_file_id: Uuid, policy: &JobPolicy, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_file_id,
            status: JobStatus::Queued,
            attempt: 0,
            max_retries: policy.max_retries,
            retry_delay_seconds: policy.retry_delay_seconds,
            backoff_factor: policy.backoff_factor,
            max_backoff_seconds: policy.max_backoff_seconds,
            max_exec_seconds: policy.max_exec_seconds,
            next_run_at: now,
            cancel_requested: false,
            skip_reason: None,
            last_error: None,
            result: None,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn policy(&self) -> JobPolicy {
        JobPolicy {
            max_retries: self.max_retries,
            retry_delay_seconds: self.retry_delay_seconds,
            backoff_factor: self.backoff_factor,
            max_backoff_seconds: self.max_backoff_seconds,
            max_exec_seconds: self.max_exec_seconds,
        }
    }

    /// Whether a failed attempt may be followed by another one.
    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_retries
    }

    pub fn max_exec(&self) -> Duration {
        if self.max_exec_seconds.is_finite() {
            Duration::from_secs_f64(self.max_exec_seconds.max(0.0))
        } else {
            Duration::MAX
        }
    }

    /// Whether a worker may claim this job at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status.is_pending() && !self.cancel_requested && self.next_run_at <= now
    }
}

#[cfg(feature = "sqlx")]
impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ProcessingJob {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let status: String = row.try_get("status")?;
        let status = status
            .parse::<JobStatus>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        let skip_reason: Option<String> = row.try_get("skip_reason")?;
        let skip_reason = skip_reason
            .map(|s| s.parse::<SkipReason>())
            .transpose()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;

        Ok(ProcessingJob {
            id: row.try_get("id")?,
            source_file_id: row.try_get("source_file_id")?,
            status,
            attempt: row.try_get("attempt")?,
            max_retries: row.try_get("max_retries")?,
            retry_delay_seconds: row.try_get("retry_delay_seconds")?,
            backoff_factor: row.try_get("backoff_factor")?,
            max_backoff_seconds: row.try_get("max_backoff_seconds")?,
            max_exec_seconds: row.try_get("max_exec_seconds")?,
            next_run_at: row.try_get("next_run_at")?,
            cancel_requested: row.try_get("cancel_requested")?,
            skip_reason,
            last_error: row.try_get("last_error")?,
            result: row.try_get("result")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegenerateThumbnailResponse {
    pub status: JobStatus,
    pub job_id: Uuid,
}
