//! OpenAPI documentation.
//! Handler annotations use the literal `/api/v0` prefix; the served document is rewritten to
//! `crate::constants::API_VERSION`.

use utoipa::OpenApi;

use crate::constants::API_VERSION;
use crate::error;
use crate::handlers;
use tessera_core::models;

/// Prefix used in handler path annotations (utoipa requires literals).
const OPENAPI_PATH_PLACEHOLDER: &str = "/api/v0";

fn transform_openapi_paths(spec: &mut utoipa::openapi::OpenApi, version: &str) {
    let replacement = format!("/api/{}", version);
    if OPENAPI_PATH_PLACEHOLDER == replacement {
        return;
    }
    let path_map = std::mem::take(&mut spec.paths.paths);
    for (key, item) in path_map {
        let new_key = key.replacen(OPENAPI_PATH_PLACEHOLDER, &replacement, 1);
        spec.paths.paths.insert(new_key, item);
    }
}

pub fn get_openapi_spec() -> utoipa::openapi::OpenApi {
    let mut spec = ApiDoc::openapi();
    transform_openapi_paths(&mut spec, API_VERSION);
    spec
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tessera API",
        version = "0.1.0",
        description = "Resumable chunked uploads into policy-selected storage, with background thumbnail generation and metadata extraction. All endpoints are versioned under /api/v0/."
    ),
    paths(
        handlers::upload_sessions::create_upload_session,
        handlers::upload_sessions::upload_chunk,
        handlers::upload_sessions::get_upload_session,
        handlers::upload_sessions::finalize_upload_session,
        handlers::upload_sessions::cancel_upload_session,
        handlers::files::regenerate_thumbnail,
        handlers::jobs::get_job,
        handlers::jobs::cancel_job,
    ),
    components(schemas(
        models::CreateUploadSessionRequest,
        models::CreateUploadSessionResponse,
        models::UploadChunkResponse,
        models::UploadSessionProgress,
        models::UploadSessionStatus,
        models::FinalizeUploadRequest,
        models::FinalizeUploadResponse,
        models::CancelUploadSessionResponse,
        models::RegenerateThumbnailResponse,
        models::ProcessingJob,
        models::JobStatus,
        models::SkipReason,
        error::ErrorResponse,
    )),
    tags(
        (name = "uploads", description = "Resumable upload sessions"),
        (name = "files", description = "Stored files"),
        (name = "jobs", description = "Processing jobs"),
    )
)]
pub struct ApiDoc;
