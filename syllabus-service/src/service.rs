//! Service coordinator for extraction runs and batch ingestion jobs.
//!
//! This module wires together:
//! - Chunked syllabus extraction with live progress
//! - Batch paper ingestion with job and notification tracking
//! - Optional knowledge-base indexing
//! - Cancellation management

mod batch_ingest;
mod cancellation;
mod extraction;
mod knowledge_base;
mod paper_ingestor;

pub use batch_ingest::{BatchItemRequest, BatchSubmission, BatchSubmitted, ItemOutput, ItemProcessor};
pub use extraction::{ExtractionRequest, ExtractionStarted};
pub use knowledge_base::{HttpKnowledgeBase, IndexingState, KnowledgeBaseClient};
pub use paper_ingestor::PaperIngestor;

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::db::Database;
use crate::error::{ServiceError, ServiceResult};
use crate::inference::{ChunkExtractor, InferenceClient};

/// Main service coordinator
pub struct SyllabusService {
    pub config: Arc<ServiceConfig>,
    pub db: Arc<Database>,
    extractor: Arc<dyn ChunkExtractor>,
    item_processor: Arc<dyn ItemProcessor>,
    knowledge_base: Option<Arc<dyn KnowledgeBaseClient>>,
    /// Client for document downloads
    http: reqwest::Client,
    /// Cancellation tokens for running jobs, keyed by job id
    cancellation_tokens: Arc<DashMap<String, CancellationToken>>,
}

impl SyllabusService {
    /// Create the service with its production clients.
    pub async fn new(config: Arc<ServiceConfig>, db: Arc<Database>) -> ServiceResult<Self> {
        info!("Initializing syllabus service");

        let inference = InferenceClient::new(
            config.inference.clone(),
            config.extraction.max_concurrent,
        )?;
        if inference.health_check().await {
            info!(url = %config.inference.base_url, "Inference service is available");
        } else {
            warn!(url = %config.inference.base_url, "Inference service is not available");
        }

        let http = build_http_client(config.batch.download_timeout())?;

        let knowledge_base: Option<Arc<dyn KnowledgeBaseClient>> = match &config.knowledge_base {
            Some(kb) => {
                info!(url = %kb.base_url, "Knowledge-base indexing enabled");
                Some(Arc::new(HttpKnowledgeBase::new(kb.clone())?))
            }
            None => None,
        };

        let item_processor = Arc::new(PaperIngestor::new(
            db.clone(),
            http.clone(),
            config.batch.download_timeout(),
            knowledge_base.clone(),
        ));

        Ok(Self::with_components(
            config,
            db,
            Arc::new(inference),
            item_processor,
            knowledge_base,
        )
        .with_http_client(http))
    }

    /// Create the service around caller-supplied components.
    pub fn with_components(
        config: Arc<ServiceConfig>,
        db: Arc<Database>,
        extractor: Arc<dyn ChunkExtractor>,
        item_processor: Arc<dyn ItemProcessor>,
        knowledge_base: Option<Arc<dyn KnowledgeBaseClient>>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            db,
            extractor,
            item_processor,
            knowledge_base,
            cancellation_tokens: Arc::new(DashMap::new()),
        }
    }

    /// Use `http` for document downloads instead of a default client.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Close jobs a previous process left running so nobody waits on them forever.
    pub fn recover_interrupted_jobs(&self) -> ServiceResult<()> {
        let extractions = self.db.sweep_interrupted_extractions()?;
        let batches = self.db.sweep_interrupted_batches()?;
        if extractions + batches > 0 {
            warn!(extractions, batches, "Closed jobs interrupted by restart");
        }
        Ok(())
    }
}

fn build_http_client(timeout: Duration) -> ServiceResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build HTTP client: {}", e),
        })
}
