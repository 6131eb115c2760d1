//! Configuration module
//!
//! All settings come from the environment (optionally seeded from a `.env` file). Unset or
//! unparsable values fall back to the defaults below.

use std::env;
use std::str::FromStr;

use crate::models::{generator_names, ExtractorDescriptor, ExtractorKind, GeneratorDescriptor};
use crate::settings::{ProcessingSettings, QueueSettings, ThumbnailSettings};
use crate::storage_types::StorageBackend;

const SERVER_PORT: u16 = 3000;
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024 * 1024;
const UPLOAD_CHUNK_SIZE_BYTES: u64 = 8 * 1024 * 1024;
const UPLOAD_SESSION_IDLE_TIMEOUT_SECS: i64 = 24 * 60 * 60;
const UPLOAD_EXPIRY_SWEEP_INTERVAL_SECS: u64 = 60;
const UPLOAD_MAX_CHUNK_COUNT: u64 = 10_000;
const HTTP_CONCURRENCY_LIMIT: usize = 10_000;

const MB: u64 = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Config {
    pub server_port: u16,
    pub environment: String,
    /// `LOG_FORMAT=json` switches log output to JSON lines
    pub log_json: bool,
    pub cors_origins: Vec<String>,
    pub max_request_body_bytes: usize,
    pub http_concurrency_limit: usize,
    /// Unset means in-memory repositories
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub storage_backend: StorageBackend,
    pub local_storage_path: String,
    pub local_storage_base_url: String,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    /// Staging directory for chunks that have not been assembled yet
    pub chunk_staging_path: String,
    pub policy_max_size_bytes: u64,
    pub policy_allowed_extensions: Vec<String>,
    pub upload_chunk_size_bytes: u64,
    pub upload_session_idle_timeout_secs: i64,
    pub upload_expiry_sweep_interval_secs: u64,
    pub upload_max_chunk_count: u64,
    pub processing: ProcessingSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins_str = env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());
        if is_production_name(&environment) && cors_origins_str.trim() == "*" {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }
        let cors_origins = split_list(&cors_origins_str, false);

        let storage_backend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .parse::<StorageBackend>()?;

        let local_storage_path =
            env::var("LOCAL_STORAGE_PATH").unwrap_or_else(|_| "./data/storage".to_string());
        let chunk_staging_path = env::var("CHUNK_STAGING_PATH")
            .unwrap_or_else(|_| format!("{}/.chunks", local_storage_path.trim_end_matches('/')));

        Ok(Config {
            server_port: env_parse("SERVER_PORT", SERVER_PORT),
            environment,
            log_json: env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            cors_origins,
            max_request_body_bytes: env_parse("MAX_REQUEST_BODY_BYTES", MAX_REQUEST_BODY_BYTES),
            http_concurrency_limit: env_parse("HTTP_CONCURRENCY_LIMIT", HTTP_CONCURRENCY_LIMIT),
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
            db_timeout_seconds: env_parse("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            storage_backend,
            local_storage_path,
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000/media".to_string()),
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION").ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            chunk_staging_path,
            policy_max_size_bytes: env_parse("POLICY_MAX_SIZE_BYTES", 0),
            policy_allowed_extensions: env::var("POLICY_ALLOWED_EXTENSIONS")
                .map(|s| split_list(&s, true))
                .unwrap_or_default(),
            upload_chunk_size_bytes: env_parse("UPLOAD_CHUNK_SIZE_BYTES", UPLOAD_CHUNK_SIZE_BYTES),
            upload_session_idle_timeout_secs: env_parse(
                "UPLOAD_SESSION_IDLE_TIMEOUT_SECS",
                UPLOAD_SESSION_IDLE_TIMEOUT_SECS,
            ),
            upload_expiry_sweep_interval_secs: env_parse(
                "UPLOAD_EXPIRY_SWEEP_INTERVAL_SECS",
                UPLOAD_EXPIRY_SWEEP_INTERVAL_SECS,
            ),
            upload_max_chunk_count: env_parse("UPLOAD_MAX_CHUNK_COUNT", UPLOAD_MAX_CHUNK_COUNT),
            processing: processing_from_env(),
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
        }

        if self.storage_backend == StorageBackend::S3 && self.s3_bucket.is_none() {
            return Err(anyhow::anyhow!("STORAGE_BACKEND=s3 requires S3_BUCKET"));
        }

        if self.http_concurrency_limit == 0 {
            return Err(anyhow::anyhow!("HTTP_CONCURRENCY_LIMIT must be at least 1"));
        }

        if self.upload_chunk_size_bytes == 0 {
            return Err(anyhow::anyhow!("UPLOAD_CHUNK_SIZE_BYTES must be greater than 0"));
        }

        if self.upload_chunk_size_bytes > self.max_request_body_bytes as u64 {
            return Err(anyhow::anyhow!(
                "UPLOAD_CHUNK_SIZE_BYTES ({}) cannot exceed MAX_REQUEST_BODY_BYTES ({})",
                self.upload_chunk_size_bytes,
                self.max_request_body_bytes
            ));
        }

        if self.upload_max_chunk_count == 0 {
            return Err(anyhow::anyhow!("UPLOAD_MAX_CHUNK_COUNT must be greater than 0"));
        }

        let queue = &self.processing.queue;
        if queue.concurrency == 0 {
            return Err(anyhow::anyhow!("MEDIA_QUEUE_CONCURRENCY must be at least 1"));
        }
        if !(queue.backoff_factor.is_finite() && queue.backoff_factor >= 1.0) {
            return Err(anyhow::anyhow!("MEDIA_QUEUE_BACKOFF_FACTOR must be a finite number >= 1.0"));
        }
        if queue.max_retries < 0 {
            return Err(anyhow::anyhow!("MEDIA_QUEUE_MAX_RETRIES cannot be negative"));
        }
        if !(queue.max_exec_seconds.is_finite() && queue.max_exec_seconds > 0.0) {
            return Err(anyhow::anyhow!(
                "MEDIA_QUEUE_MAX_EXEC_SECONDS must be a finite positive number"
            ));
        }
        for (name, value) in [
            ("MEDIA_QUEUE_RETRY_DELAY_SECONDS", queue.retry_delay_seconds),
            ("MEDIA_QUEUE_MAX_BACKOFF_SECONDS", queue.max_backoff_seconds),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(anyhow::anyhow!("{} must be a finite number >= 0", name));
            }
        }

        let thumb = &self.processing.thumbnail;
        if thumb.width == 0 || thumb.height == 0 {
            return Err(anyhow::anyhow!("THUMB_WIDTH and THUMB_HEIGHT must be positive"));
        }
        if !(1..=100).contains(&thumb.quality) {
            return Err(anyhow::anyhow!("THUMB_QUALITY must be between 1 and 100"));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        is_production_name(&self.environment)
    }

    pub fn upload_session_idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.upload_session_idle_timeout_secs)
    }
}

fn is_production_name(environment: &str) -> bool {
    let env = environment.to_lowercase();
    env == "production" || env == "prod"
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn split_list(value: &str, lowercase: bool) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            if lowercase {
                s.to_lowercase()
            } else {
                s.to_string()
            }
        })
        .collect()
}

struct GeneratorDefaults {
    name: &'static str,
    env_prefix: &'static str,
    enabled: bool,
    executable: Option<&'static str>,
    max_size: u64,
    extensions: &'static str,
    priority: i32,
}

const GENERATOR_DEFAULTS: [GeneratorDefaults; 5] = [
    GeneratorDefaults {
        name: generator_names::VIPS,
        env_prefix: "THUMB_VIPS",
        enabled: false,
        executable: Some("vipsthumbnail"),
        max_size: 256 * MB,
        extensions: "jpg,jpeg,png,webp,tif,tiff,heic,heif,avif,jp2,jxl",
        priority: 100,
    },
    GeneratorDefaults {
        name: generator_names::FFMPEG,
        env_prefix: "THUMB_FFMPEG",
        enabled: false,
        executable: Some("ffmpeg"),
        max_size: 4096 * MB,
        extensions: "mp4,mkv,mov,avi,webm,flv,wmv,m4v,3gp,ts,mpg,mpeg",
        priority: 200,
    },
    GeneratorDefaults {
        name: generator_names::LIBRAW,
        env_prefix: "THUMB_LIBRAW",
        enabled: false,
        executable: Some("simple_dcraw"),
        max_size: 256 * MB,
        extensions: "arw,cr2,cr3,nef,nrw,orf,raf,rw2,dng,pef,srw",
        priority: 300,
    },
    GeneratorDefaults {
        name: generator_names::MUSIC_COVER,
        env_prefix: "THUMB_MUSIC_COVER",
        enabled: false,
        executable: Some("ffmpeg"),
        max_size: 1024 * MB,
        extensions: "mp3,flac,m4a,ogg,opus,wav,aac,wma",
        priority: 400,
    },
    GeneratorDefaults {
        name: generator_names::BUILTIN,
        env_prefix: "THUMB_BUILTIN",
        enabled: true,
        executable: None,
        max_size: 64 * MB,
        extensions: "jpg,jpeg,png,gif,webp,bmp,tif,tiff,ico",
        priority: 1000,
    },
];

fn generator_from_env(defaults: &GeneratorDefaults) -> GeneratorDescriptor {
    let key = |suffix: &str| format!("{}_{}", defaults.env_prefix, suffix);

    let executable_path = env::var(key("PATH"))
        .ok()
        .or_else(|| defaults.executable.map(str::to_string));
    let supported_extensions = split_list(
        &env::var(key("EXTS")).unwrap_or_else(|_| defaults.extensions.to_string()),
        true,
    );
    let direct_serve_extensions = if defaults.name == generator_names::BUILTIN {
        split_list(
            &env::var("THUMB_BUILTIN_DIRECT_SERVE_EXTS").unwrap_or_else(|_| "svg".to_string()),
            true,
        )
    } else {
        Vec::new()
    };

    GeneratorDescriptor {
        name: defaults.name.to_string(),
        enabled: env_parse(&key("ENABLED"), defaults.enabled),
        executable_path,
        max_file_size_bytes: env_parse(&key("MAX_SIZE"), defaults.max_size),
        supported_extensions,
        direct_serve_extensions,
        priority: env_parse(&key("PRIORITY"), defaults.priority),
    }
}

fn extractors_from_env() -> Vec<ExtractorDescriptor> {
    let exif = ExtractorDescriptor {
        kind: ExtractorKind::Exif,
        enabled: env_parse("MEDIA_META_EXIF_ENABLED", true),
        max_size_local_bytes: env_parse("MEDIA_META_EXIF_MAX_SIZE_LOCAL", 1024 * MB),
        max_size_remote_bytes: env_parse("MEDIA_META_EXIF_MAX_SIZE_REMOTE", 100 * MB),
        use_brute_force: env_parse("MEDIA_META_EXIF_BRUTE_FORCE", true),
        executable_path: None,
        supported_extensions: split_list(
            "jpg,jpeg,tif,tiff,heic,heif,webp,png,avif,dng,cr2,nef,arw,orf,rw2",
            true,
        ),
    };
    let music = ExtractorDescriptor {
        kind: ExtractorKind::Music,
        enabled: env_parse("MEDIA_META_MUSIC_ENABLED", false),
        max_size_local_bytes: env_parse("MEDIA_META_MUSIC_MAX_SIZE_LOCAL", 1024 * MB),
        max_size_remote_bytes: env_parse("MEDIA_META_MUSIC_MAX_SIZE_REMOTE", 100 * MB),
        use_brute_force: false,
        executable_path: Some(
            env::var("MEDIA_META_MUSIC_FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
        ),
        supported_extensions: split_list("mp3,flac,m4a,ogg,opus,wav,aac,wma", true),
    };
    vec![exif, music]
}

fn processing_from_env() -> ProcessingSettings {
    let thumb_defaults = ThumbnailSettings::default();
    let queue_defaults = QueueSettings::default();

    ProcessingSettings {
        generators: GENERATOR_DEFAULTS.iter().map(generator_from_env).collect(),
        extractors: extractors_from_env(),
        thumbnail: ThumbnailSettings {
            width: env_parse("THUMB_WIDTH", thumb_defaults.width),
            height: env_parse("THUMB_HEIGHT", thumb_defaults.height),
            quality: env_parse("THUMB_QUALITY", thumb_defaults.quality),
            ffmpeg_capture_time_seconds: env_parse(
                "THUMB_FFMPEG_CAPTURE_TIME",
                thumb_defaults.ffmpeg_capture_time_seconds,
            ),
        },
        queue: QueueSettings {
            concurrency: env_parse("MEDIA_QUEUE_CONCURRENCY", queue_defaults.concurrency),
            max_exec_seconds: env_parse(
                "MEDIA_QUEUE_MAX_EXEC_SECONDS",
                queue_defaults.max_exec_seconds,
            ),
            backoff_factor: env_parse("MEDIA_QUEUE_BACKOFF_FACTOR", queue_defaults.backoff_factor),
            max_backoff_seconds: env_parse(
                "MEDIA_QUEUE_MAX_BACKOFF_SECONDS",
                queue_defaults.max_backoff_seconds,
            ),
            max_retries: env_parse("MEDIA_QUEUE_MAX_RETRIES", queue_defaults.max_retries),
            retry_delay_seconds: env_parse(
                "MEDIA_QUEUE_RETRY_DELAY_SECONDS",
                queue_defaults.retry_delay_seconds,
            ),
            poll_interval_ms: env_parse(
                "MEDIA_QUEUE_POLL_INTERVAL_MS",
                queue_defaults.poll_interval_ms,
            ),
            stale_reap_interval_secs: env_parse(
                "MEDIA_QUEUE_STALE_REAP_INTERVAL_SECS",
                queue_defaults.stale_reap_interval_secs,
            ),
            stale_grace_secs: env_parse("MEDIA_QUEUE_STALE_GRACE_SECS", queue_defaults.stale_grace_secs),
        },
    }
}
