//! Application setup and initialization

pub mod database;
pub mod routes;
pub mod server;
pub mod services;
pub mod storage;

use crate::state::AppState;
use anyhow::{Context, Result};
use std::sync::Arc;
use tessera_core::{Config, StaticSettings};

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    crate::telemetry::init_tracing(config.log_json);

    config.validate().context("Configuration validation failed")?;
    tracing::info!(
        environment = %config.environment,
        "Configuration loaded and validated successfully"
    );

    let repositories = database::setup_repositories(&config).await?;
    let (storage, chunks) = storage::setup_storage(&config).await?;
    let settings = Arc::new(StaticSettings::from_config(&config));

    let state = services::initialize_services(&config, settings, repositories, storage, chunks);
    let router = routes::setup_routes(&config, state.clone())?;

    Ok((state, router))
}
