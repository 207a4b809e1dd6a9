//! Default value functions for ServiceConfig.

use std::path::PathBuf;

use super::schemas::{
    BatchConfig, DatabaseConfig, ExtractionConfig, InferenceConfig, PersistenceConfig,
    ServerConfig,
};

// ==================== Top-level Section Defaults ====================

pub(crate) fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

pub(crate) fn default_database() -> DatabaseConfig {
    DatabaseConfig {
        path: default_database_path(),
    }
}

pub(crate) fn default_inference() -> InferenceConfig {
    InferenceConfig {
        base_url: default_inference_url(),
        api_key: String::new(),
        model: default_model(),
        max_tokens: default_max_tokens(),
        request_timeout_secs: default_request_timeout_secs(),
        pool_max_idle_per_host: default_pool_max_idle_per_host(),
        max_chunk_chars: default_max_chunk_chars(),
    }
}

pub(crate) fn default_extraction() -> ExtractionConfig {
    ExtractionConfig {
        pages_per_chunk: default_pages_per_chunk(),
        overlap_pages: default_overlap_pages(),
        max_concurrent: default_max_concurrent(),
        max_retries: default_max_retries(),
        base_delay_ms: default_base_delay_ms(),
        max_delay_ms: default_max_delay_ms(),
        chunk_timeout_secs: default_chunk_timeout_secs(),
        run_timeout_secs: default_run_timeout_secs(),
        event_buffer: default_event_buffer(),
    }
}

pub(crate) fn default_batch() -> BatchConfig {
    BatchConfig {
        concurrency: default_batch_concurrency(),
        max_retries: default_batch_max_retries(),
        base_delay_ms: default_base_delay_ms(),
        max_delay_ms: default_max_delay_ms(),
        item_timeout_secs: default_item_timeout_secs(),
        download_timeout_secs: default_download_timeout_secs(),
        start_delay_ms: default_start_delay_ms(),
        run_timeout_secs: default_run_timeout_secs(),
    }
}

pub(crate) fn default_persistence() -> PersistenceConfig {
    PersistenceConfig {
        syllabus_batch_size: default_syllabus_batch_size(),
        unit_batch_size: default_unit_batch_size(),
        topic_batch_size: default_topic_batch_size(),
        book_batch_size: default_book_batch_size(),
    }
}

// ==================== Server ====================

pub(crate) fn default_host() -> String {
    "0.0.0.0".to_string()
}

pub(crate) fn default_port() -> u16 {
    8080
}

pub(crate) fn default_database_path() -> PathBuf {
    PathBuf::from("data/syllabus.db")
}

// ==================== Inference ====================

pub(crate) fn default_inference_url() -> String {
    "http://localhost:11434/v1".to_string()
}

pub(crate) fn default_model() -> String {
    "llama3.3-70b-instruct".to_string()
}

pub(crate) fn default_max_tokens() -> u32 {
    8192
}

pub(crate) fn default_request_timeout_secs() -> u64 {
    120
}

pub(crate) fn default_pool_max_idle_per_host() -> usize {
    10
}

pub(crate) fn default_max_chunk_chars() -> usize {
    60_000
}

// ==================== Extraction ====================

pub(crate) fn default_pages_per_chunk() -> usize {
    4
}

pub(crate) fn default_overlap_pages() -> usize {
    1
}

pub(crate) fn default_max_concurrent() -> usize {
    5
}

pub(crate) fn default_max_retries() -> u32 {
    3
}

pub(crate) fn default_base_delay_ms() -> u64 {
    1_000
}

pub(crate) fn default_max_delay_ms() -> u64 {
    30_000
}

pub(crate) fn default_chunk_timeout_secs() -> u64 {
    90
}

pub(crate) fn default_run_timeout_secs() -> u64 {
    30 * 60
}

pub(crate) fn default_event_buffer() -> usize {
    64
}

// ==================== Batch ====================

pub(crate) fn default_batch_concurrency() -> usize {
    1
}

pub(crate) fn default_batch_max_retries() -> u32 {
    2
}

pub(crate) fn default_item_timeout_secs() -> u64 {
    180
}

pub(crate) fn default_download_timeout_secs() -> u64 {
    120
}

pub(crate) fn default_start_delay_ms() -> u64 {
    500
}

// ==================== Persistence ====================

pub(crate) fn default_syllabus_batch_size() -> usize {
    20
}

pub(crate) fn default_unit_batch_size() -> usize {
    50
}

pub(crate) fn default_topic_batch_size() -> usize {
    200
}

pub(crate) fn default_book_batch_size() -> usize {
    100
}

// ==================== Knowledge base ====================

pub(crate) fn default_kb_poll_interval_secs() -> u64 {
    15
}

pub(crate) fn default_kb_poll_timeout_secs() -> u64 {
    15 * 60
}
