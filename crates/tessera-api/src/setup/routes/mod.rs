//! Route configuration and setup.
//!
//! Domain route groups live in [domains](domains); the health check in [health](health).

mod domains;
mod health;

use crate::constants::API_PREFIX;
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tessera_core::Config;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Setup all application routes
pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Result<Router<()>, anyhow::Error> {
    let cors = setup_cors(config)?;

    let app = Router::new()
        .route("/health", get(health::health_check))
        .route(
            &format!("{}/openapi.json", API_PREFIX),
            get(|| async { Json(crate::api_doc::get_openapi_spec()) }),
        )
        .merge(domains::upload_routes(state.clone()))
        .merge(domains::file_routes(state.clone()))
        .merge(domains::job_routes(state.clone()))
        .layer(ConcurrencyLimitLayer::new(config.http_concurrency_limit.max(1)))
        .layer(RequestBodyLimitLayer::new(config.max_request_body_bytes))
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!(
        max_request_body_bytes = config.max_request_body_bytes,
        http_concurrency_limit = config.http_concurrency_limit,
        "Routes configured"
    );

    Ok(app)
}

fn setup_cors(config: &Config) -> Result<CorsLayer, anyhow::Error> {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];

    let cors = if config.cors_origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow all origins - not recommended for production");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        let origins = config
            .cors_origins
            .iter()
            .map(|o| o.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Invalid CORS origin: {}", e))?;
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(Any)
    };
    Ok(cors)
}
