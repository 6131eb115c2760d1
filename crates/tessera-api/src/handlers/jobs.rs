use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use tessera_core::models::ProcessingJob;
use tessera_core::AppError;
use uuid::Uuid;

/// Get a processing job
#[utoipa::path(
    get,
    path = "/api/v0/jobs/{job_id}",
    tag = "jobs",
    params(("job_id" = Uuid, Path, description = "Processing job ID")),
    responses(
        (status = 200, description = "Job state", body = ProcessingJob),
        (status = 404, description = "Job not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ProcessingJob>, HttpAppError> {
    match state.queue.get(job_id).await? {
        Some(job) => Ok(Json(job)),
        None => Err(AppError::NotFound(format!("Job {} not found", job_id)).into()),
    }
}

/// Cancel a processing job
///
/// Queued jobs are cancelled immediately. A running job is signalled and stops at its next
/// cancellation point. Finished jobs are returned unchanged.
#[utoipa::path(
    delete,
    path = "/api/v0/jobs/{job_id}",
    tag = "jobs",
    params(("job_id" = Uuid, Path, description = "Processing job ID")),
    responses(
        (status = 200, description = "Job after the cancellation request", body = ProcessingJob),
        (status = 404, description = "Job not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ProcessingJob>, HttpAppError> {
    tracing::info!(job_id = %job_id, "Cancelling job");

    match state.queue.cancel(job_id).await? {
        Some(job) => Ok(Json(job)),
        None => Err(AppError::NotFound(format!("Job {} not found", job_id)).into()),
    }
}
