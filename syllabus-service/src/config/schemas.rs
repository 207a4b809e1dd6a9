//! Configuration struct definitions for each section.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::retry::RetryPolicy;

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "super::defaults::default_host")]
    pub host: String,

    #[serde(default = "super::defaults::default_port")]
    pub port: u16,
}

/// SQLite storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "super::defaults::default_database_path")]
    pub path: PathBuf,
}

/// OpenAI-compatible inference endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "super::defaults::default_inference_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "super::defaults::default_model")]
    pub model: String,

    #[serde(default = "super::defaults::default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "super::defaults::default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Idle connections kept per host. Raised to the extraction concurrency if lower.
    #[serde(default = "super::defaults::default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Chunk text beyond this many characters is cut before sending.
    #[serde(default = "super::defaults::default_max_chunk_chars")]
    pub max_chunk_chars: usize,
}

impl InferenceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Chunked extraction run settings
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "super::defaults::default_pages_per_chunk")]
    pub pages_per_chunk: usize,

    #[serde(default = "super::defaults::default_overlap_pages")]
    pub overlap_pages: usize,

    #[serde(default = "super::defaults::default_max_concurrent")]
    pub max_concurrent: usize,

    /// Total attempts per chunk, including the first.
    #[serde(default = "super::defaults::default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "super::defaults::default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "super::defaults::default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "super::defaults::default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,

    #[serde(default = "super::defaults::default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Capacity of the progress event channel.
    #[serde(default = "super::defaults::default_event_buffer")]
    pub event_buffer: usize,
}

impl ExtractionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Batch ingest job settings
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "super::defaults::default_batch_concurrency")]
    pub concurrency: usize,

    #[serde(default = "super::defaults::default_batch_max_retries")]
    pub max_retries: u32,

    #[serde(default = "super::defaults::default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "super::defaults::default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "super::defaults::default_item_timeout_secs")]
    pub item_timeout_secs: u64,

    #[serde(default = "super::defaults::default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Pause before the first item so pollers can attach to the new job.
    #[serde(default = "super::defaults::default_start_delay_ms")]
    pub start_delay_ms: u64,

    /// Budget for the whole job; items still running when it elapses fail as timeouts.
    #[serde(default = "super::defaults::default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

impl BatchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Rows per multi-row INSERT, per entity
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "super::defaults::default_syllabus_batch_size")]
    pub syllabus_batch_size: usize,

    #[serde(default = "super::defaults::default_unit_batch_size")]
    pub unit_batch_size: usize,

    #[serde(default = "super::defaults::default_topic_batch_size")]
    pub topic_batch_size: usize,

    #[serde(default = "super::defaults::default_book_batch_size")]
    pub book_batch_size: usize,
}

/// External knowledge-base indexing service
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeBaseConfig {
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    pub knowledge_base_uuid: String,

    #[serde(default = "super::defaults::default_kb_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "super::defaults::default_kb_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl KnowledgeBaseConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}
