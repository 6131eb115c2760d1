//! Resumable upload session handlers
//!
//! Clients create a session, PUT chunks in any order (retrying any of them), query progress to
//! resume after a disconnect, then finalize. Chunk bodies are raw bytes.

use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tessera_core::models::{
    CancelUploadSessionResponse, CreateUploadSessionRequest, CreateUploadSessionResponse,
    FinalizeUploadRequest, FinalizeUploadResponse, UploadChunkResponse, UploadSessionProgress,
};
use utoipa::IntoParams;
use uuid::Uuid;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CancelUploadSessionQuery {
    /// Target URI the session was created for. Rejected when it does not match.
    pub uri: Option<String>,
}

/// Create an upload session
#[utoipa::path(
    post,
    path = "/api/v0/uploads/sessions",
    tag = "uploads",
    request_body = CreateUploadSessionRequest,
    responses(
        (status = 201, description = "Upload session created", body = CreateUploadSessionResponse),
        (status = 400, description = "Invalid input or policy violation", body = ErrorResponse),
        (status = 404, description = "Storage policy not found", body = ErrorResponse),
        (status = 409, description = "A file already exists at the target URI", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request), fields(uri = %request.uri))]
pub async fn create_upload_session(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<CreateUploadSessionRequest>,
) -> Result<(StatusCode, Json<CreateUploadSessionResponse>), HttpAppError> {
    let session = state.uploads.create_session(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateUploadSessionResponse {
            session_id: session.id,
            chunk_size: session.chunk_size,
            expected_chunk_count: session.expected_chunk_count,
        }),
    ))
}

/// Upload one chunk
#[utoipa::path(
    put,
    path = "/api/v0/uploads/sessions/{session_id}/chunks/{index}",
    tag = "uploads",
    params(
        ("session_id" = Uuid, Path, description = "Upload session ID"),
        ("index" = u32, Path, description = "Zero-based chunk index")
    ),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Chunk stored", body = UploadChunkResponse),
        (status = 400, description = "Chunk rejected", body = ErrorResponse),
        (status = 404, description = "Upload session not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, body), fields(size_bytes = body.len()))]
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    Path((session_id, index)): Path<(Uuid, u32)>,
    body: Bytes,
) -> Result<Json<UploadChunkResponse>, HttpAppError> {
    state.uploads.upload_chunk(session_id, index, body).await?;
    Ok(Json(UploadChunkResponse { received: true }))
}

/// Report which chunks a session has received
#[utoipa::path(
    get,
    path = "/api/v0/uploads/sessions/{session_id}",
    tag = "uploads",
    params(("session_id" = Uuid, Path, description = "Upload session ID")),
    responses(
        (status = 200, description = "Session progress", body = UploadSessionProgress),
        (status = 404, description = "Upload session not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn get_upload_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<UploadSessionProgress>, HttpAppError> {
    let progress = state.uploads.validate_session(session_id).await?;
    Ok(Json(progress))
}

/// Assemble the received chunks into a stored file
#[utoipa::path(
    post,
    path = "/api/v0/uploads/sessions/{session_id}/finalize",
    tag = "uploads",
    params(("session_id" = Uuid, Path, description = "Upload session ID")),
    request_body = FinalizeUploadRequest,
    responses(
        (status = 200, description = "File stored", body = FinalizeUploadResponse),
        (status = 400, description = "Request does not match the session", body = ErrorResponse),
        (status = 404, description = "Upload session not found", body = ErrorResponse),
        (status = 409, description = "Session is not ready to finalize", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request))]
pub async fn finalize_upload_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<FinalizeUploadRequest>,
) -> Result<Json<FinalizeUploadResponse>, HttpAppError> {
    let file = state.uploads.finalize(session_id, request).await?;

    Ok(Json(FinalizeUploadResponse {
        file_id: file.id,
        name: file.name,
        size: file.size,
    }))
}

/// Cancel a session and discard its chunks
#[utoipa::path(
    delete,
    path = "/api/v0/uploads/sessions/{session_id}",
    tag = "uploads",
    params(
        ("session_id" = Uuid, Path, description = "Upload session ID"),
        CancelUploadSessionQuery
    ),
    responses(
        (status = 200, description = "Session cancelled", body = CancelUploadSessionResponse),
        (status = 400, description = "URI does not match the session", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, query))]
pub async fn cancel_upload_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<CancelUploadSessionQuery>,
) -> Result<Json<CancelUploadSessionResponse>, HttpAppError> {
    state
        .uploads
        .cancel(session_id, query.uri.as_deref())
        .await?;
    Ok(Json(CancelUploadSessionResponse { ok: true }))
}
