use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Lifecycle of a resumable upload session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UploadSessionStatus {
    Created,
    Uploading,
    ReadyToFinalize,
    Finalizing,
    Completed,
    Expired,
    Cancelled,
    Failed,
}

impl UploadSessionStatus {
    /// Statuses the idle-expiry sweep may move to `expired`. A `finalizing` session never expires.
    pub const EXPIRABLE: [UploadSessionStatus; 3] = [
        UploadSessionStatus::Created,
        UploadSessionStatus::Uploading,
        UploadSessionStatus::ReadyToFinalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadSessionStatus::Created => "created",
            UploadSessionStatus::Uploading => "uploading",
            UploadSessionStatus::ReadyToFinalize => "ready_to_finalize",
            UploadSessionStatus::Finalizing => "finalizing",
            UploadSessionStatus::Completed => "completed",
            UploadSessionStatus::Expired => "expired",
            UploadSessionStatus::Cancelled => "cancelled",
            UploadSessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadSessionStatus::Completed
                | UploadSessionStatus::Expired
                | UploadSessionStatus::Cancelled
                | UploadSessionStatus::Failed
        )
    }

    pub fn accepts_chunks(&self) -> bool {
        Self::EXPIRABLE.contains(self)
    }
}

impl Display for UploadSessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadSessionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(UploadSessionStatus::Created),
            "uploading" => Ok(UploadSessionStatus::Uploading),
            "ready_to_finalize" => Ok(UploadSessionStatus::ReadyToFinalize),
            "finalizing" => Ok(UploadSessionStatus::Finalizing),
            "completed" => Ok(UploadSessionStatus::Completed),
            "expired" => Ok(UploadSessionStatus::Expired),
            "cancelled" => Ok(UploadSessionStatus::Cancelled),
            "failed" => Ok(UploadSessionStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid upload session status: {}", s)),
        }
    }
}

/// Upload session record
#[derive(Debug, Clone, Serialize)]
pub struct UploadSession {
    pub id: Uuid,
    pub target_uri: String,
    pub file_name: String,
    pub total_size: i64,
    pub chunk_size: i64,
    pub expected_chunk_count: i32,
    pub policy_id: i32,
    pub overwrite: bool,
    pub status: UploadSessionStatus,
    pub file_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(
        target_uri: String,
        file_name: String,
        total_size: i64,
        chunk_size: i64,
        policy_id: i32,
        overwrite: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let expected_chunk_count = Self::chunk_count_for(total_size, chunk_size) as i32;
        // An empty file has nothing to upload and can be finalized right away.
        let status = if expected_chunk_count == 0 {
            UploadSessionStatus::ReadyToFinalize
        } else {
            UploadSessionStatus::Created
        };

        Self {
            id: Uuid::new_v4(),
            target_uri,
            file_name,
            total_size,
            chunk_size,
            expected_chunk_count,
            policy_id,
            overwrite,
            status,
            file_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
        }
    }

    /// `ceil(total_size / chunk_size)`; zero for empty files or a non-positive chunk size.
    pub fn chunk_count_for(total_size: i64, chunk_size: i64) -> u64 {
        if total_size <= 0 || chunk_size <= 0 {
            return 0;
        }
        (total_size as u64).div_ceil(chunk_size as u64)
    }

    /// Exact byte length the chunk at `index` must have, or `None` when the index is out of range.
    pub fn expected_chunk_len(&self, index: i32) -> Option<i64> {
        if index < 0 || index >= self.expected_chunk_count {
            return None;
        }
        let last = self.expected_chunk_count - 1;
        if index == last {
            Some(self.total_size - self.chunk_size * i64::from(last))
        } else {
            Some(self.chunk_size)
        }
    }

    pub fn is_idle_expired(&self, now: DateTime<Utc>, idle_timeout: chrono::Duration) -> bool {
        self.status.accepts_chunks() && self.last_activity_at < now - idle_timeout
    }
}

#[cfg(feature = "sqlx")]
impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for UploadSession {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let status: String = row.try_get("status")?;
        let status = status
            .parse::<UploadSessionStatus>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;

        Ok(UploadSession {
            id: row.try_get("id")?,
            target_uri: row.try_get("target_uri")?,
            file_name: row.try_get("file_name")?,
            total_size: row.try_get("total_size")?,
            chunk_size: row.try_get("chunk_size")?,
            expected_chunk_count: row.try_get("expected_chunk_count")?,
            policy_id: row.try_get("policy_id")?,
            overwrite: row.try_get("overwrite")?,
            status,
            file_id: row.try_get("file_id")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_activity_at: row.try_get("last_activity_at")?,
        })
    }
}

/// A chunk that has been stored for a session
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct UploadChunk {
    pub session_id: Uuid,
    pub chunk_index: i32,
    pub size_bytes: i64,
    pub storage_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateUploadSessionRequest {
    /// Logical destination path, e.g. `/photos/2024/beach.jpg`
    #[validate(length(min = 2, max = 4096))]
    pub uri: String,
    #[validate(range(min = 0))]
    pub size: i64,
    pub policy_id: i32,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateUploadSessionResponse {
    pub session_id: Uuid,
    pub chunk_size: i64,
    pub expected_chunk_count: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadChunkResponse {
    pub received: bool,
}

/// Resume information for a session
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadSessionProgress {
    pub session_id: Uuid,
    pub status: UploadSessionStatus,
    pub received_chunks: Vec<i32>,
    pub expected_chunk_count: i32,
    pub chunk_size: i64,
    pub total_size: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FinalizeUploadRequest {
    pub policy_id: i32,
    pub size: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FinalizeUploadResponse {
    pub file_id: Uuid,
    pub name: String,
    pub size: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CancelUploadSessionResponse {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: i64 = 1024 * 1024;

    fn session(total: i64, chunk: i64) -> UploadSession {
        UploadSession::new(
            "/a/b.bin".to_string(),
            "b.bin".to_string(),
            total,
            chunk,
            1,
            false,
            Utc::now(),
        )
    }

    #[test]
    fn test_chunk_count_rounds_up() {
        assert_eq!(UploadSession::chunk_count_for(10 * MB, 4 * MB), 3);
        assert_eq!(UploadSession::chunk_count_for(8 * MB, 4 * MB), 2);
        assert_eq!(UploadSession::chunk_count_for(1, 4 * MB), 1);
        assert_eq!(UploadSession::chunk_count_for(0, 4 * MB), 0);
    }

    #[test]
    fn test_expected_chunk_len_last_chunk_is_remainder() {
        let s = session(10 * MB, 4 * MB);
        assert_eq!(s.expected_chunk_len(0), Some(4 * MB));
        assert_eq!(s.expected_chunk_len(1), Some(4 * MB));
        assert_eq!(s.expected_chunk_len(2), Some(2 * MB));
        assert_eq!(s.expected_chunk_len(3), None);
        assert_eq!(s.expected_chunk_len(-1), None);
    }

    #[test]
    fn test_empty_upload_is_ready_immediately() {
        let s = session(0, 4 * MB);
        assert_eq!(s.expected_chunk_count, 0);
        assert_eq!(s.status, UploadSessionStatus::ReadyToFinalize);
    }

    #[test]
    fn test_status_round_trip_and_classification() {
        for status in [
            UploadSessionStatus::Created,
            UploadSessionStatus::Uploading,
            UploadSessionStatus::ReadyToFinalize,
            UploadSessionStatus::Finalizing,
            UploadSessionStatus::Completed,
            UploadSessionStatus::Expired,
            UploadSessionStatus::Cancelled,
            UploadSessionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<UploadSessionStatus>().unwrap(), status);
        }
        assert!(!UploadSessionStatus::Finalizing.accepts_chunks());
        assert!(!UploadSessionStatus::Finalizing.is_terminal());
        assert!(UploadSessionStatus::Expired.is_terminal());
        assert!("bogus".parse::<UploadSessionStatus>().is_err());
    }

    #[test]
    fn test_idle_expiry_ignores_finalizing() {
        let mut s = session(10 * MB, 4 * MB);
        let later = s.last_activity_at + chrono::Duration::seconds(120);
        assert!(s.is_idle_expired(later, chrono::Duration::seconds(60)));
        s.status = UploadSessionStatus::Finalizing;
        assert!(!s.is_idle_expired(later, chrono::Duration::seconds(60)));
    }
}
