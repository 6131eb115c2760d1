use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tessera_core::models::RegenerateThumbnailResponse;
use tessera_core::AppError;
use uuid::Uuid;

/// Queue thumbnail and metadata generation for a stored file
#[utoipa::path(
    post,
    path = "/api/v0/files/{file_id}/thumbnail",
    tag = "files",
    params(("file_id" = Uuid, Path, description = "Stored file ID")),
    responses(
        (status = 202, description = "Processing job queued", body = RegenerateThumbnailResponse),
        (status = 404, description = "File not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn regenerate_thumbnail(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RegenerateThumbnailResponse>), HttpAppError> {
    if state.repositories.files.get(file_id).await?.is_none() {
        return Err(AppError::NotFound(format!("File {} not found", file_id)).into());
    }

    let job = state.queue.enqueue(file_id).await?;
    tracing::info!(job_id = %job.id, "Thumbnail regeneration queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(RegenerateThumbnailResponse {
            status: job.status,
            job_id: job.id,
        }),
    ))
}
