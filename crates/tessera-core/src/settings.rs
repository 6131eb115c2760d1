//! Runtime tunables for processing and storage policies
//!
//! Everything the upload manager and the processing pipeline read at runtime goes through
//! [`SettingsProvider`]. [`StaticSettings`] is the provider built once from [`Config`].

use std::collections::HashMap;
use std::time::Duration;

use crate::config::Config;
use crate::models::{ExtractorDescriptor, GeneratorDescriptor, JobPolicy, StoragePolicy};

/// Output bounds shared by every generator
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailSettings {
    pub width: u32,
    pub height: u32,
    /// JPEG quality, 1..=100
    pub quality: u8,
    /// Seek position for video frame capture, in seconds
    pub ffmpeg_capture_time_seconds: f64,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            width: 400,
            height: 300,
            quality: 85,
            ffmpeg_capture_time_seconds: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    pub concurrency: usize,
    pub max_exec_seconds: f64,
    pub backoff_factor: f64,
    pub max_backoff_seconds: f64,
    pub max_retries: i32,
    pub retry_delay_seconds: f64,
    pub poll_interval_ms: u64,
    /// 0 disables the stale job reaper.
    pub stale_reap_interval_secs: u64,
    pub stale_grace_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        let policy = JobPolicy::default();
        Self {
            concurrency: 2,
            max_exec_seconds: policy.max_exec_seconds,
            backoff_factor: policy.backoff_factor,
            max_backoff_seconds: policy.max_backoff_seconds,
            max_retries: policy.max_retries,
            retry_delay_seconds: policy.retry_delay_seconds,
            poll_interval_ms: 1000,
            stale_reap_interval_secs: 60,
            stale_grace_secs: 60,
        }
    }
}

impl QueueSettings {
    /// Policy snapshot stored on each newly enqueued job
    pub fn job_policy(&self) -> JobPolicy {
        JobPolicy {
            max_retries: self.max_retries,
            retry_delay_seconds: self.retry_delay_seconds,
            backoff_factor: self.backoff_factor,
            max_backoff_seconds: self.max_backoff_seconds,
            max_exec_seconds: self.max_exec_seconds,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingSettings {
    pub generators: Vec<GeneratorDescriptor>,
    pub extractors: Vec<ExtractorDescriptor>,
    pub thumbnail: ThumbnailSettings,
    pub queue: QueueSettings,
}

impl ProcessingSettings {
    pub fn extractor(&self, kind: crate::models::ExtractorKind) -> Option<&ExtractorDescriptor> {
        self.extractors.iter().find(|e| e.kind == kind)
    }
}

/// Read-only source of runtime tunables
pub trait SettingsProvider: Send + Sync {
    fn processing(&self) -> &ProcessingSettings;

    fn policy(&self, id: i32) -> Option<StoragePolicy>;
}

/// Settings fixed at startup
#[derive(Debug, Clone)]
pub struct StaticSettings {
    processing: ProcessingSettings,
    policies: HashMap<i32, StoragePolicy>,
}

impl StaticSettings {
    pub fn new(processing: ProcessingSettings, policies: Vec<StoragePolicy>) -> Self {
        Self {
            processing,
            policies: policies.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    /// One default policy (id 1) over the configured backend
    pub fn from_config(config: &Config) -> Self {
        let policy = StoragePolicy {
            id: 1,
            name: "default".to_string(),
            backend: config.storage_backend,
            max_size: config.policy_max_size_bytes,
            allowed_extensions: config.policy_allowed_extensions.clone(),
            chunk_size: config.upload_chunk_size_bytes,
        };
        Self::new(config.processing.clone(), vec![policy])
    }
}

impl SettingsProvider for StaticSettings {
    fn processing(&self) -> &ProcessingSettings {
        &self.processing
    }

    fn policy(&self, id: i32) -> Option<StoragePolicy> {
        self.policies.get(&id).cloned()
    }
}
