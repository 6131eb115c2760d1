//! Upload session manager
//!
//! Owns the resumable upload protocol: session creation against a storage policy, chunk
//! bookkeeping, read-only progress, finalize (streaming assembly into the policy backend) and
//! cancellation. Assembled files are handed to the processing queue.

use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tessera_core::models::{
    CreateUploadSessionRequest, FinalizeUploadRequest, StoredFile, UploadChunk, UploadSession,
    UploadSessionProgress, UploadSessionStatus,
};
use tessera_core::{AppError, SettingsProvider};
use tessera_db::{FileRepository, UploadSessionRepository};
use tessera_processing::{validate_target_uri, UploadValidator};
use tessera_storage::keys::file_key;
use tessera_storage::{ChunkStore, Storage};
use tessera_worker::ProcessingQueue;
use uuid::Uuid;
use validator::Validate;

use crate::constants::UPLOAD_CONTENT_TYPE;
use crate::services::session_locks::SessionLocks;
use crate::services::storage_resolver::StorageResolver;

/// Limits the manager enforces on top of the storage policy
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub idle_timeout: chrono::Duration,
    pub max_chunk_count: u64,
}

#[derive(Clone)]
pub struct UploadManager {
    sessions: Arc<dyn UploadSessionRepository>,
    files: Arc<dyn FileRepository>,
    settings: Arc<dyn SettingsProvider>,
    storage: StorageResolver,
    chunks: ChunkStore,
    queue: ProcessingQueue,
    locks: SessionLocks,
    limits: UploadLimits,
}

impl UploadManager {
    pub fn new(
        sessions: Arc<dyn UploadSessionRepository>,
        files: Arc<dyn FileRepository>,
        settings: Arc<dyn SettingsProvider>,
        storage: StorageResolver,
        chunks: ChunkStore,
        queue: ProcessingQueue,
        limits: UploadLimits,
    ) -> Self {
        Self {
            sessions,
            files,
            settings,
            storage,
            chunks,
            queue,
            locks: SessionLocks::new(),
            limits,
        }
    }

    /// Lock map shared with the expiry sweep
    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    #[tracing::instrument(skip(self, request), fields(uri = %request.uri, size_bytes = request.size))]
    pub async fn create_session(
        &self,
        request: CreateUploadSessionRequest,
    ) -> Result<UploadSession, AppError> {
        request.validate()?;

        let policy = self
            .settings
            .policy(request.policy_id)
            .ok_or_else(|| {
                AppError::NotFound(format!("Storage policy {} not found", request.policy_id))
            })?;

        let file_name = validate_target_uri(&request.uri)?;
        let size = u64::try_from(request.size)
            .map_err(|_| AppError::InvalidInput("size cannot be negative".to_string()))?;

        let rules = UploadValidator::new(&policy, self.limits.max_chunk_count);
        rules.validate_file_size(size)?;
        rules.validate_extension(&file_name)?;

        let chunk_size = i64::try_from(policy.chunk_size)
            .ok()
            .filter(|c| *c > 0)
            .ok_or_else(|| {
                AppError::Internal(format!("Policy '{}' has an invalid chunk size", policy.name))
            })?;
        rules.validate_chunk_count(UploadSession::chunk_count_for(request.size, chunk_size))?;

        if !request.overwrite && self.files.find_by_uri(&request.uri).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "A file already exists at {}",
                request.uri
            )));
        }

        let session = UploadSession::new(
            request.uri,
            file_name,
            request.size,
            chunk_size,
            policy.id,
            request.overwrite,
            Utc::now(),
        );
        self.sessions.create(&session).await?;

        tracing::info!(
            session_id = %session.id,
            chunk_size = session.chunk_size,
            expected_chunk_count = session.expected_chunk_count,
            "Upload session created"
        );

        Ok(session)
    }

    /// Store one chunk. Re-sending an already received chunk with the same length is a no-op.
    #[tracing::instrument(skip(self, data), fields(size_bytes = data.len()))]
    pub async fn upload_chunk(
        &self,
        session_id: Uuid,
        index: u32,
        data: Bytes,
    ) -> Result<(), AppError> {
        let _guard = self.locks.acquire(session_id).await;
        let session = self.load(session_id).await?;

        if self.expire_if_idle(&session).await? {
            return Err(AppError::InvalidChunk(format!(
                "Upload session {} expired after inactivity",
                session_id
            )));
        }
        if !session.status.accepts_chunks() {
            return Err(AppError::InvalidChunk(format!(
                "Upload session is {} and no longer accepts chunks",
                session.status
            )));
        }

        let index = i32::try_from(index)
            .map_err(|_| AppError::InvalidChunk(format!("Chunk index {} out of range", index)))?;
        let expected_len = session.expected_chunk_len(index).ok_or_else(|| {
            AppError::InvalidChunk(format!(
                "Chunk index {} out of range (expected {} chunks)",
                index, session.expected_chunk_count
            ))
        })?;
        let len = data.len() as i64;
        if len != expected_len {
            return Err(AppError::InvalidChunk(format!(
                "Chunk {} has {} bytes, expected {}",
                index, len, expected_len
            )));
        }

        let now = Utc::now();
        if let Some(existing) = self.sessions.get_chunk(session_id, index).await? {
            if existing.size_bytes != len {
                return Err(AppError::InvalidChunk(format!(
                    "Chunk {} was already received with a different length",
                    index
                )));
            }
            self.sessions
                .record_activity(session_id, session.status, now)
                .await?;
            tracing::debug!(session_id = %session_id, chunk_index = index, "Chunk already received");
            return Ok(());
        }

        let storage_key = self.chunks.put(session_id, index as u32, data).await?;
        self.sessions
            .record_chunk(&UploadChunk {
                session_id,
                chunk_index: index,
                size_bytes: len,
                storage_key,
                created_at: now,
            })
            .await?;

        let received = self.sessions.list_chunks(session_id).await?.len();
        let status = if received as i32 >= session.expected_chunk_count {
            UploadSessionStatus::ReadyToFinalize
        } else {
            UploadSessionStatus::Uploading
        };
        if !self
            .sessions
            .record_activity(session_id, status, now)
            .await?
        {
            return Err(AppError::InvalidChunk(format!(
                "Upload session {} no longer accepts chunks",
                session_id
            )));
        }

        tracing::debug!(
            session_id = %session_id,
            chunk_index = index,
            received_chunks = received,
            status = %status,
            "Chunk stored"
        );

        Ok(())
    }

    /// Read-only progress report used by clients to resume
    pub async fn validate_session(
        &self,
        session_id: Uuid,
    ) -> Result<UploadSessionProgress, AppError> {
        let session = self.load(session_id).await?;
        let received_chunks = self
            .sessions
            .list_chunks(session_id)
            .await?
            .into_iter()
            .map(|c| c.chunk_index)
            .collect();

        Ok(UploadSessionProgress {
            session_id,
            status: session.status,
            received_chunks,
            expected_chunk_count: session.expected_chunk_count,
            chunk_size: session.chunk_size,
            total_size: session.total_size,
        })
    }

    /// Assemble the received chunks into the policy backend and record the stored file.
    ///
    /// Any error after the session entered `finalizing` fails the session, removes whatever was
    /// stored and is returned as-is; finalize is never retried.
    #[tracing::instrument(skip(self, request))]
    pub async fn finalize(
        &self,
        session_id: Uuid,
        request: FinalizeUploadRequest,
    ) -> Result<StoredFile, AppError> {
        let started = Instant::now();
        let _guard = self.locks.acquire(session_id).await;
        let session = self.load(session_id).await?;

        if request.policy_id != session.policy_id || request.size != session.total_size {
            return Err(AppError::InvalidInput(format!(
                "Finalize request (policy {}, size {}) does not match the session (policy {}, size {})",
                request.policy_id, request.size, session.policy_id, session.total_size
            )));
        }
        if self.expire_if_idle(&session).await? {
            return Err(AppError::Conflict(format!(
                "Upload session {} expired after inactivity",
                session_id
            )));
        }
        if session.status != UploadSessionStatus::ReadyToFinalize {
            return Err(AppError::Conflict(format!(
                "Upload session is {}, expected {}",
                session.status,
                UploadSessionStatus::ReadyToFinalize
            )));
        }

        let received = self.sessions.list_chunks(session_id).await?;
        let complete = received.len() as i32 == session.expected_chunk_count
            && received
                .iter()
                .enumerate()
                .all(|(i, c)| c.chunk_index == i as i32);
        if !complete {
            return Err(AppError::Conflict(format!(
                "Upload session has {} of {} chunks",
                received.len(),
                session.expected_chunk_count
            )));
        }

        let policy = self.settings.policy(session.policy_id).ok_or_else(|| {
            AppError::NotFound(format!("Storage policy {} not found", session.policy_id))
        })?;
        let storage = self.storage.for_policy(&policy)?;

        if !self
            .sessions
            .transition(
                session_id,
                UploadSessionStatus::ReadyToFinalize,
                UploadSessionStatus::Finalizing,
            )
            .await?
        {
            return Err(AppError::Conflict(format!(
                "Upload session {} changed state during finalize",
                session_id
            )));
        }

        let file = match self.assemble(&session, storage.as_ref()).await {
            Ok(file) => file,
            Err(e) => {
                self.fail_finalize(&session, &e).await;
                return Err(e);
            }
        };

        let completed = match self.sessions.mark_completed(session_id, file.id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::Conflict(format!(
                "Upload session {} left finalizing before it completed",
                session_id
            ))),
            Err(e) => Err(e),
        };
        if let Err(e) = completed {
            self.discard_file(storage.as_ref(), &file).await;
            self.fail_finalize(&session, &e).await;
            return Err(e);
        }

        self.chunks
            .release(session_id, session.expected_chunk_count as u32)
            .await;
        self.locks.forget(session_id);

        if let Err(e) = self.queue.enqueue(file.id).await {
            tracing::error!(
                file_id = %file.id,
                error = %e,
                "Failed to enqueue processing job; the thumbnail can be regenerated later"
            );
        }

        tracing::info!(
            session_id = %session_id,
            file_id = %file.id,
            size_bytes = file.size,
            duration_ms = started.elapsed().as_millis() as u64,
            "Upload finalized"
        );

        Ok(file)
    }

    /// Finalize could not complete: the session becomes `failed`, its staged chunks are released
    /// and its lock entry is dropped.
    async fn fail_finalize(&self, session: &UploadSession, error: &AppError) {
        tracing::error!(session_id = %session.id, error = %error, "Finalize failed");
        if let Err(mark_err) = self.sessions.mark_failed(session.id, &error.to_string()).await {
            tracing::error!(
                session_id = %session.id,
                error = %mark_err,
                "Failed to mark upload session as failed"
            );
        }
        self.chunks
            .release(session.id, session.expected_chunk_count as u32)
            .await;
        self.locks.forget(session.id);
    }

    /// Remove a file that was stored by a finalize that did not complete.
    async fn discard_file(&self, storage: &dyn Storage, file: &StoredFile) {
        if let Err(e) = self.files.delete(file.id).await {
            tracing::error!(file_id = %file.id, error = %e, "Failed to delete file record");
        }
        discard_blob(storage, &file.storage_key).await;
    }

    /// Stream the chunks into the backend, then swap the file record at the target URI.
    async fn assemble(
        &self,
        session: &UploadSession,
        storage: &dyn Storage,
    ) -> Result<StoredFile, AppError> {
        let file_id = Uuid::new_v4();
        let storage_key = file_key(file_id, &session.file_name);

        let reader = self
            .chunks
            .assembled_reader(session.id, session.expected_chunk_count as u32);
        let written = storage
            .upload_stream_with_key(
                &storage_key,
                UPLOAD_CONTENT_TYPE,
                Some(session.total_size as u64),
                reader,
            )
            .await?;

        if written != session.total_size as u64 {
            discard_blob(storage, &storage_key).await;
            return Err(AppError::Storage(format!(
                "Assembled {} bytes, expected {}",
                written, session.total_size
            )));
        }

        if let Err(e) = self.replace_previous(session).await {
            discard_blob(storage, &storage_key).await;
            return Err(e);
        }

        let now = Utc::now();
        let file = StoredFile {
            id: file_id,
            uri: session.target_uri.clone(),
            name: session.file_name.clone(),
            size: session.total_size,
            policy_id: session.policy_id,
            storage_key: storage_key.clone(),
            thumbnail_key: None,
            metadata: None,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.files.insert(&file).await {
            discard_blob(storage, &storage_key).await;
            return Err(e);
        }

        Ok(file)
    }

    /// Remove the file currently stored at the session's URI, if overwriting is allowed.
    async fn replace_previous(&self, session: &UploadSession) -> Result<(), AppError> {
        let Some(previous) = self.files.find_by_uri(&session.target_uri).await? else {
            return Ok(());
        };
        if !session.overwrite {
            return Err(AppError::Conflict(format!(
                "A file already exists at {}",
                session.target_uri
            )));
        }

        self.files.delete(previous.id).await?;

        match self
            .settings
            .policy(previous.policy_id)
            .map(|p| self.storage.for_policy(&p))
        {
            Some(Ok(storage)) => {
                discard_blob(storage.as_ref(), &previous.storage_key).await;
                if let Some(thumbnail_key) = &previous.thumbnail_key {
                    discard_blob(storage.as_ref(), thumbnail_key).await;
                }
            }
            _ => tracing::warn!(
                file_id = %previous.id,
                "Backend of the overwritten file is unavailable; its blob is left in place"
            ),
        }

        tracing::info!(
            session_id = %session.id,
            previous_file_id = %previous.id,
            uri = %session.target_uri,
            "Overwrote existing file"
        );
        Ok(())
    }

    /// Cancel a session and release its chunks. Terminal sessions keep their status.
    ///
    /// `uri`, when given, must name the session's target.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, session_id: Uuid, uri: Option<&str>) -> Result<(), AppError> {
        let _guard = self.locks.acquire(session_id).await;

        let Some(session) = self.sessions.get(session_id).await? else {
            tracing::debug!(session_id = %session_id, "Cancel for unknown session ignored");
            return Ok(());
        };
        if let Some(uri) = uri {
            if uri != session.target_uri {
                return Err(AppError::InvalidInput(format!(
                    "Upload session {} does not target {}",
                    session_id, uri
                )));
            }
        }

        if self.sessions.cancel(session_id).await? {
            self.chunks
                .release(session_id, session.expected_chunk_count as u32)
                .await;
            self.sessions.delete_chunks(session_id).await?;
            tracing::info!(session_id = %session_id, "Upload session cancelled");
        } else {
            tracing::debug!(
                session_id = %session_id,
                status = %session.status,
                "Cancel left terminal session unchanged"
            );
        }
        self.locks.forget(session_id);

        Ok(())
    }

    async fn load(&self, session_id: Uuid) -> Result<UploadSession, AppError> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Upload session {} not found", session_id)))
    }

    /// Expire a session whose idle deadline passed before the sweep got to it.
    async fn expire_if_idle(&self, session: &UploadSession) -> Result<bool, AppError> {
        if !session.is_idle_expired(Utc::now(), self.limits.idle_timeout) {
            return Ok(false);
        }
        if self
            .sessions
            .transition(session.id, session.status, UploadSessionStatus::Expired)
            .await?
        {
            self.chunks
                .release(session.id, session.expected_chunk_count as u32)
                .await;
            tracing::info!(session_id = %session.id, "Upload session expired on access");
        }
        self.locks.forget(session.id);
        Ok(true)
    }
}

async fn discard_blob(storage: &dyn Storage, key: &str) {
    if let Err(e) = storage.delete(key).await {
        tracing::warn!(key = %key, error = %e, "Failed to delete blob");
    }
}
