//! Domain route groups

use crate::constants::API_PREFIX;
use crate::handlers;
use crate::state::AppState;
use axum::routing::{get, post, put};
use axum::Router;
use std::sync::Arc;

pub fn upload_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            &format!("{}/uploads/sessions", API_PREFIX),
            post(handlers::upload_sessions::create_upload_session),
        )
        .route(
            &format!("{}/uploads/sessions/{{session_id}}", API_PREFIX),
            get(handlers::upload_sessions::get_upload_session)
                .delete(handlers::upload_sessions::cancel_upload_session),
        )
        .route(
            &format!("{}/uploads/sessions/{{session_id}}/chunks/{{index}}", API_PREFIX),
            put(handlers::upload_sessions::upload_chunk),
        )
        .route(
            &format!("{}/uploads/sessions/{{session_id}}/finalize", API_PREFIX),
            post(handlers::upload_sessions::finalize_upload_session),
        )
        .with_state(state)
}

pub fn file_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            &format!("{}/files/{{file_id}}/thumbnail", API_PREFIX),
            post(handlers::files::regenerate_thumbnail),
        )
        .with_state(state)
}

pub fn job_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            &format!("{}/jobs/{{job_id}}", API_PREFIX),
            get(handlers::jobs::get_job).delete(handlers::jobs::cancel_job),
        )
        .with_state(state)
}
