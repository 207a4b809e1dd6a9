//! Configuration loading from files and environment variables.

use config::{Config, Environment, File};

use crate::error::{ServiceError, ServiceResult};

use super::ServiceConfig;

/// Load configuration from `config.toml` (optional) and `SYLLABUS__*` env vars
pub fn load_config() -> ServiceResult<ServiceConfig> {
    let config: ServiceConfig = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("SYLLABUS")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize config: {}", e),
        })?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &ServiceConfig) -> ServiceResult<()> {
    let extraction = &config.extraction;
    if extraction.pages_per_chunk == 0 {
        return Err(ServiceError::Config {
            message: "extraction.pages_per_chunk must be at least 1".to_string(),
        });
    }
    if extraction.max_concurrent == 0 || config.batch.concurrency == 0 {
        return Err(ServiceError::Config {
            message: "worker concurrency must be at least 1".to_string(),
        });
    }
    if extraction.max_retries == 0 || config.batch.max_retries == 0 {
        return Err(ServiceError::Config {
            message: "max_retries counts total attempts and must be at least 1".to_string(),
        });
    }
    Ok(())
}
