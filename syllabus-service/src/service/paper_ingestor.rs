//! Download-and-store processing for one batch item.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::db::{Database, ItemStatus, JobItem, JobStore, PaperRecord};
use crate::error::{ExtractionError, ServiceError, format_error_chain_ref};
use crate::ingestion::{compute_content_hash, fetch_source, split_pages};

use super::batch_ingest::{ItemOutput, ItemProcessor};
use super::knowledge_base::KnowledgeBaseClient;

/// Stores exam papers: fetch, hash, split into pages, optionally register with the
/// knowledge base, then insert the `papers` row.
pub struct PaperIngestor {
    db: Arc<Database>,
    http: reqwest::Client,
    download_timeout: Duration,
    knowledge_base: Option<Arc<dyn KnowledgeBaseClient>>,
}

impl PaperIngestor {
    pub fn new(
        db: Arc<Database>,
        http: reqwest::Client,
        download_timeout: Duration,
        knowledge_base: Option<Arc<dyn KnowledgeBaseClient>>,
    ) -> Self {
        Self {
            db,
            http,
            download_timeout,
            knowledge_base,
        }
    }

    fn set_status(&self, item: &JobItem, status: ItemStatus) -> Result<(), ExtractionError> {
        self.db
            .set_item_status(&item.id, status, None)
            .map_err(store_error)
    }
}

fn store_error(err: ServiceError) -> ExtractionError {
    ExtractionError::Database {
        message: format_error_chain_ref(&err),
    }
}

#[async_trait]
impl ItemProcessor for PaperIngestor {
    async fn process(&self, target_key: &str, item: &JobItem) -> Result<ItemOutput, ExtractionError> {
        self.set_status(item, ItemStatus::Downloading)?;
        let fetched = fetch_source(&self.http, &item.source_ref, self.download_timeout).await?;
        let content_hash = compute_content_hash(&fetched.bytes);

        self.set_status(item, ItemStatus::Processing)?;
        let pages = split_pages(&fetched).await?;
        if pages.iter().all(|p| p.trim().is_empty()) {
            return Err(ExtractionError::Pdf {
                message: format!("No text could be extracted from {}", item.source_ref),
            });
        }

        let data_source_id = match &self.knowledge_base {
            Some(kb) => Some(kb.create_data_source(&item.source_ref).await?),
            None => None,
        };

        let paper = PaperRecord {
            target_key: target_key.to_string(),
            year: item.year,
            month: item.month.clone(),
            exam_type: item.exam_type.clone(),
            title: item
                .title
                .clone()
                .unwrap_or_else(|| format!("{} {} paper", item.month.trim(), item.year)),
            source_ref: item.source_ref.clone(),
            content_hash,
            page_count: pages.len(),
            data_source_id: data_source_id.clone(),
        };
        let paper_id = self.db.insert_paper(&paper).map_err(store_error)?;

        debug!(
            item = %item.natural_key,
            paper_id,
            pages = pages.len(),
            "Paper stored"
        );
        Ok(ItemOutput {
            paper_id,
            data_source_id,
        })
    }
}
