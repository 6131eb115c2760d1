//! Test helpers: build AppState and router for integration tests.
//!
//! Everything runs on in-memory repositories and local storage in a temp dir, so no database
//! or external tools are needed: `cargo test -p tessera-api`.

pub mod fixtures;

use axum_test::TestServer;
use std::sync::Arc;
use tempfile::TempDir;
use tessera_api::constants;
use tessera_api::setup::{database, routes, services, storage};
use tessera_api::state::{AppState, Repositories};
use tessera_core::models::{generator_names, GeneratorDescriptor};
use tessera_core::{
    Config, ProcessingSettings, QueueSettings, StaticSettings, StorageBackend, ThumbnailSettings,
};

pub const MB: i64 = 1024 * 1024;

/// API path prefix for tests (e.g. `/api/v0`).
pub fn api_path(path: &str) -> String {
    format!("{}{}", constants::API_PREFIX, path)
}

/// Test application: server, state, and owned resources.
pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub _temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(|_| {}).await
}

/// Setup a test app, letting the caller adjust the config first.
pub async fn setup_test_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    setup_test_app_with_repositories(configure, database::in_memory_repositories()).await
}

/// Setup a test app over caller-provided repositories.
pub async fn setup_test_app_with_repositories(
    configure: impl FnOnce(&mut Config),
    repositories: Repositories,
) -> TestApp {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let mut config = create_test_config(&temp_dir);
    configure(&mut config);

    let (resolver, chunks) = storage::setup_storage(&config)
        .await
        .expect("Failed to setup storage");
    let settings = Arc::new(StaticSettings::from_config(&config));
    let state = services::initialize_services(
        &config,
        settings,
        repositories,
        resolver,
        chunks,
    );

    let app = routes::setup_routes(&config, state.clone()).expect("Failed to setup routes");
    let server = TestServer::new(app).expect("Failed to create test server");

    TestApp {
        server,
        state,
        _temp_dir: temp_dir,
    }
}

fn create_test_config(temp_dir: &TempDir) -> Config {
    let root = temp_dir.path().display().to_string();
    Config {
        server_port: 3000,
        environment: "test".to_string(),
        log_json: false,
        cors_origins: vec!["*".to_string()],
        max_request_body_bytes: 16 * MB as usize,
        http_concurrency_limit: 64,
        database_url: None,
        db_max_connections: 5,
        db_timeout_seconds: 30,
        storage_backend: StorageBackend::Local,
        local_storage_path: format!("{}/storage", root),
        local_storage_base_url: "http://localhost:3000/media".to_string(),
        s3_bucket: None,
        s3_region: None,
        s3_endpoint: None,
        chunk_staging_path: format!("{}/chunks", root),
        policy_max_size_bytes: 0,
        policy_allowed_extensions: vec![],
        upload_chunk_size_bytes: 4 * MB as u64,
        upload_session_idle_timeout_secs: 3600,
        upload_expiry_sweep_interval_secs: 0,
        upload_max_chunk_count: 10_000,
        processing: ProcessingSettings {
            generators: vec![GeneratorDescriptor {
                name: generator_names::BUILTIN.to_string(),
                enabled: true,
                executable_path: None,
                max_file_size_bytes: 10 * MB as u64,
                supported_extensions: vec!["png".to_string(), "jpg".to_string()],
                direct_serve_extensions: vec!["svg".to_string()],
                priority: 1000,
            }],
            extractors: vec![],
            thumbnail: ThumbnailSettings::default(),
            queue: QueueSettings {
                concurrency: 2,
                poll_interval_ms: 20,
                retry_delay_seconds: 0.05,
                max_backoff_seconds: 0.2,
                stale_reap_interval_secs: 0,
                ..QueueSettings::default()
            },
        },
    }
}
