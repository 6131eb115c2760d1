//! Database setup and repository selection

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::Config;
use tessera_db::{
    InMemoryFileRepository, InMemoryProcessingJobRepository, InMemoryUploadSessionRepository,
    PostgresFileRepository, PostgresProcessingJobRepository, PostgresUploadSessionRepository,
};

use crate::state::Repositories;

/// Connect to Postgres and run pending migrations
pub async fn setup_database(database_url: &str, config: &Config) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connected successfully"
    );

    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("Failed to load migrations")?;
    migrator
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// Postgres repositories when `DATABASE_URL` is set, in-memory ones otherwise
pub async fn setup_repositories(config: &Config) -> Result<Repositories> {
    match config.database_url.as_deref() {
        Some(url) => {
            let pool = setup_database(url, config).await?;
            Ok(Repositories {
                sessions: Arc::new(PostgresUploadSessionRepository::new(pool.clone())),
                files: Arc::new(PostgresFileRepository::new(pool.clone())),
                jobs: Arc::new(PostgresProcessingJobRepository::new(pool)),
            })
        }
        None => {
            tracing::warn!(
                "DATABASE_URL not set; using in-memory repositories. State is lost on restart \
                 and cannot be shared between instances"
            );
            Ok(in_memory_repositories())
        }
    }
}

pub fn in_memory_repositories() -> Repositories {
    Repositories {
        sessions: Arc::new(InMemoryUploadSessionRepository::new()),
        files: Arc::new(InMemoryFileRepository::new()),
        jobs: Arc::new(InMemoryProcessingJobRepository::new()),
    }
}
