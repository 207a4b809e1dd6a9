//! Service configuration.
//!
//! Values are layered: serde defaults, then an optional `config.toml`, then
//! `SYLLABUS__SECTION__KEY` environment variables.

mod defaults;
mod loader;
mod schemas;

use serde::Deserialize;

pub use loader::load_config;
pub use schemas::{
    BatchConfig, DatabaseConfig, ExtractionConfig, InferenceConfig, KnowledgeBaseConfig,
    PersistenceConfig, ServerConfig,
};

use defaults::{
    default_batch, default_database, default_extraction, default_inference, default_persistence,
    default_server,
};

/// Complete service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_database")]
    pub database: DatabaseConfig,

    #[serde(default = "default_inference")]
    pub inference: InferenceConfig,

    #[serde(default = "default_extraction")]
    pub extraction: ExtractionConfig,

    #[serde(default = "default_batch")]
    pub batch: BatchConfig,

    #[serde(default = "default_persistence")]
    pub persistence: PersistenceConfig,

    /// Knowledge-base indexing is disabled when this section is absent.
    #[serde(default)]
    pub knowledge_base: Option<KnowledgeBaseConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            database: default_database(),
            inference: default_inference(),
            extraction: default_extraction(),
            batch: default_batch(),
            persistence: default_persistence(),
            knowledge_base: None,
        }
    }
}
