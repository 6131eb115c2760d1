use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tessera_core::models::{UploadChunk, UploadSession, UploadSessionStatus};
use tessera_core::AppError;
use uuid::Uuid;

const SESSION_COLUMNS: &str = r#"
    id, target_uri, file_name, total_size, chunk_size, expected_chunk_count, policy_id,
    overwrite, status, file_id, error_message, created_at, updated_at, last_activity_at
"#;

/// Persistence for upload sessions and their received chunks
///
/// Every status change is conditional on the current status, so concurrent writers (chunk
/// uploads, finalize, cancel, the expiry sweep) can never move a session out of a terminal state.
#[async_trait]
pub trait UploadSessionRepository: Send + Sync {
    async fn create(&self, session: &UploadSession) -> Result<(), AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<UploadSession>, AppError>;

    /// Insert-if-absent. Returns `false` when the index was already recorded.
    async fn record_chunk(&self, chunk: &UploadChunk) -> Result<bool, AppError>;

    async fn get_chunk(&self, session_id: Uuid, index: i32)
        -> Result<Option<UploadChunk>, AppError>;

    /// Received chunks ordered by index
    async fn list_chunks(&self, session_id: Uuid) -> Result<Vec<UploadChunk>, AppError>;

    async fn delete_chunks(&self, session_id: Uuid) -> Result<(), AppError>;

    /// Set `status` and bump `last_activity_at`, provided the session still accepts chunks.
    async fn record_activity(
        &self,
        id: Uuid,
        status: UploadSessionStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Compare-and-set on the status column.
    async fn transition(
        &self,
        id: Uuid,
        from: UploadSessionStatus,
        to: UploadSessionStatus,
    ) -> Result<bool, AppError>;

    /// `finalizing -> completed`
    async fn mark_completed(&self, id: Uuid, file_id: Uuid) -> Result<bool, AppError>;

    /// Any non-terminal status -> `failed`
    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<bool, AppError>;

    /// Any non-terminal status -> `cancelled`
    async fn cancel(&self, id: Uuid) -> Result<bool, AppError>;

    /// Move every chunk-accepting session idle since before `cutoff` to `expired`.
    /// Returns the sessions that were expired.
    async fn expire_idle(&self, cutoff: DateTime<Utc>) -> Result<Vec<UploadSession>, AppError>;
}

#[derive(Clone)]
pub struct PostgresUploadSessionRepository {
    pool: PgPool,
}

impl PostgresUploadSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_list(statuses: &[UploadSessionStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl UploadSessionRepository for PostgresUploadSessionRepository {
    #[tracing::instrument(skip(self, session), fields(session_id = %session.id))]
    async fn create(&self, session: &UploadSession) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO upload_sessions (
                id, target_uri, file_name, total_size, chunk_size, expected_chunk_count,
                policy_id, overwrite, status, created_at, updated_at, last_activity_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(session.id)
        .bind(&session.target_uri)
        .bind(&session.file_name)
        .bind(session.total_size)
        .bind(session.chunk_size)
        .bind(session.expected_chunk_count)
        .bind(session.policy_id)
        .bind(session.overwrite)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.last_activity_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<UploadSession>, AppError> {
        let query = format!("SELECT {} FROM upload_sessions WHERE id = $1", SESSION_COLUMNS);
        let session = sqlx::query_as::<_, UploadSession>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    async fn record_chunk(&self, chunk: &UploadChunk) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO upload_chunks (session_id, chunk_index, size_bytes, storage_key, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (session_id, chunk_index) DO NOTHING
            "#,
        )
        .bind(chunk.session_id)
        .bind(chunk.chunk_index)
        .bind(chunk.size_bytes)
        .bind(&chunk.storage_key)
        .bind(chunk.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_chunk(
        &self,
        session_id: Uuid,
        index: i32,
    ) -> Result<Option<UploadChunk>, AppError> {
        let chunk = sqlx::query_as::<_, UploadChunk>(
            r#"
            SELECT session_id, chunk_index, size_bytes, storage_key, created_at
            FROM upload_chunks
            WHERE session_id = $1 AND chunk_index = $2
            "#,
        )
        .bind(session_id)
        .bind(index)
        .fetch_optional(&self.pool)
        .await?;

        Ok(chunk)
    }

    async fn list_chunks(&self, session_id: Uuid) -> Result<Vec<UploadChunk>, AppError> {
        let chunks = sqlx::query_as::<_, UploadChunk>(
            r#"
            SELECT session_id, chunk_index, size_bytes, storage_key, created_at
            FROM upload_chunks
            WHERE session_id = $1
            ORDER BY chunk_index
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(chunks)
    }

    async fn delete_chunks(&self, session_id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM upload_chunks WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn record_activity(
        &self,
        id: Uuid,
        status: UploadSessionStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = $2, last_activity_at = $3, updated_at = $3
            WHERE id = $1 AND status = ANY($4)
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(now)
        .bind(status_list(&UploadSessionStatus::EXPIRABLE))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: UploadSessionStatus,
        to: UploadSessionStatus,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(&self, id: Uuid, file_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = 'completed', file_id = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'finalizing'
            "#,
        )
        .bind(id)
        .bind(file_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = 'failed', error_message = $2, updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'expired', 'cancelled', 'failed')
            "#,
        )
        .bind(id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = 'cancelled', updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('completed', 'expired', 'cancelled', 'failed')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn expire_idle(&self, cutoff: DateTime<Utc>) -> Result<Vec<UploadSession>, AppError> {
        let query = format!(
            r#"
            UPDATE upload_sessions
            SET status = 'expired', updated_at = NOW()
            WHERE status = ANY($1) AND last_activity_at < $2
            RETURNING {}
            "#,
            SESSION_COLUMNS
        );
        let sessions = sqlx::query_as::<_, UploadSession>(&query)
            .bind(status_list(&UploadSessionStatus::EXPIRABLE))
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        Ok(sessions)
    }
}

#[derive(Default)]
struct SessionTables {
    sessions: HashMap<Uuid, UploadSession>,
    chunks: HashMap<Uuid, BTreeMap<i32, UploadChunk>>,
}

/// Single-process repository used when no database is configured, and in tests
#[derive(Clone, Default)]
pub struct InMemoryUploadSessionRepository {
    tables: Arc<Mutex<SessionTables>>,
}

impl InMemoryUploadSessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionTables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update_where<F>(&self, id: Uuid, allowed: F, apply: impl FnOnce(&mut UploadSession)) -> bool
    where
        F: Fn(UploadSessionStatus) -> bool,
    {
        let mut tables = self.lock();
        match tables.sessions.get_mut(&id) {
            Some(session) if allowed(session.status) => {
                apply(session);
                session.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl UploadSessionRepository for InMemoryUploadSessionRepository {
    async fn create(&self, session: &UploadSession) -> Result<(), AppError> {
        let mut tables = self.lock();
        if tables.sessions.contains_key(&session.id) {
            return Err(AppError::Conflict(format!(
                "Upload session {} already exists",
                session.id
            )));
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<UploadSession>, AppError> {
        Ok(self.lock().sessions.get(&id).cloned())
    }

    async fn record_chunk(&self, chunk: &UploadChunk) -> Result<bool, AppError> {
        let mut tables = self.lock();
        let chunks = tables.chunks.entry(chunk.session_id).or_default();
        if chunks.contains_key(&chunk.chunk_index) {
            return Ok(false);
        }
        chunks.insert(chunk.chunk_index, chunk.clone());
        Ok(true)
    }

    async fn get_chunk(
        &self,
        session_id: Uuid,
        index: i32,
    ) -> Result<Option<UploadChunk>, AppError> {
        Ok(self
            .lock()
            .chunks
            .get(&session_id)
            .and_then(|c| c.get(&index))
            .cloned())
    }

    async fn list_chunks(&self, session_id: Uuid) -> Result<Vec<UploadChunk>, AppError> {
        Ok(self
            .lock()
            .chunks
            .get(&session_id)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_chunks(&self, session_id: Uuid) -> Result<(), AppError> {
        self.lock().chunks.remove(&session_id);
        Ok(())
    }

    async fn record_activity(
        &self,
        id: Uuid,
        status: UploadSessionStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        Ok(self.update_where(
            id,
            |s| s.accepts_chunks(),
            |session| {
                session.status = status;
                session.last_activity_at = now;
            },
        ))
    }

    async fn transition(
        &self,
        id: Uuid,
        from: UploadSessionStatus,
        to: UploadSessionStatus,
    ) -> Result<bool, AppError> {
        Ok(self.update_where(id, |s| s == from, |session| session.status = to))
    }

    async fn mark_completed(&self, id: Uuid, file_id: Uuid) -> Result<bool, AppError> {
        Ok(self.update_where(
            id,
            |s| s == UploadSessionStatus::Finalizing,
            |session| {
                session.status = UploadSessionStatus::Completed;
                session.file_id = Some(file_id);
            },
        ))
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<bool, AppError> {
        Ok(self.update_where(
            id,
            |s| !s.is_terminal(),
            |session| {
                session.status = UploadSessionStatus::Failed;
                session.error_message = Some(error_message.to_string());
            },
        ))
    }

    async fn cancel(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.update_where(
            id,
            |s| !s.is_terminal(),
            |session| session.status = UploadSessionStatus::Cancelled,
        ))
    }

    async fn expire_idle(&self, cutoff: DateTime<Utc>) -> Result<Vec<UploadSession>, AppError> {
        let mut tables = self.lock();
        let now = Utc::now();
        let mut expired = Vec::new();
        for session in tables.sessions.values_mut() {
            if session.status.accepts_chunks() && session.last_activity_at < cutoff {
                session.status = UploadSessionStatus::Expired;
                session.updated_at = now;
                expired.push(session.clone());
            }
        }
        Ok(expired)
    }
}
