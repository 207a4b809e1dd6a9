//! Batch paper ingestion jobs.
//!
//! A submission is de-duplicated against stored papers, recorded as a job with one
//! row per item plus a notification, and then processed in the background through
//! the worker pool. Every finished item bumps the job counters and the notification
//! in one transaction.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{
    BatchJob, ItemStatus, JobItem, JobStatus, JobStore, Notification, natural_key,
};
use crate::error::{ExtractionError, ServiceError, ServiceResult};
use crate::pipeline::pool::{PoolObserver, WorkerPool};
use crate::service::SyllabusService;

use super::knowledge_base::IndexingState;

#[derive(Debug, Clone, Deserialize)]
pub struct BatchItemRequest {
    pub source_ref: String,
    pub year: i32,
    pub month: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub exam_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchSubmission {
    pub target_key: String,
    pub items: Vec<BatchItemRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSubmitted {
    pub job_id: String,
    pub status: JobStatus,
    pub total_items: usize,
    /// Items dropped because their natural key was already stored or repeated
    pub skipped_duplicates: usize,
}

/// Result of processing one item.
#[derive(Debug, Clone)]
pub struct ItemOutput {
    pub paper_id: i64,
    pub data_source_id: Option<String>,
}

/// Processes one batch item to completion.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, target_key: &str, item: &JobItem) -> Result<ItemOutput, ExtractionError>;
}

/// Mirrors each finished item into the job counters and notification.
struct BatchObserver {
    store: Arc<dyn JobStore>,
    job_id: String,
    /// Item ids in submission order
    item_ids: Vec<String>,
}

#[async_trait]
impl PoolObserver for BatchObserver {
    async fn on_retry(&self, number: usize, attempt: u32, max_retries: u32, error: &ExtractionError) {
        if let Some(item_id) = self.item_ids.get(number - 1) {
            let note = format!("attempt {}/{} failed: {}", attempt, max_retries, error);
            if let Err(e) = self
                .store
                .set_item_status(item_id, ItemStatus::Pending, Some(&note))
            {
                warn!(job_id = %self.job_id, item_id, error = %e, "Failed to record retry");
            }
        }
    }

    async fn on_finished(&self, number: usize, _attempts: u32, error: Option<&ExtractionError>) {
        let Some(item_id) = self.item_ids.get(number - 1) else {
            return;
        };
        let message = error.map(ToString::to_string);
        match self
            .store
            .record_item_outcome(&self.job_id, item_id, message.as_deref())
        {
            Ok(job) => info!(
                job_id = %self.job_id,
                item = number,
                completed = job.completed_items,
                failed = job.failed_items,
                total = job.total_items,
                "Batch item finished"
            ),
            Err(e) => warn!(job_id = %self.job_id, item_id, error = %e, "Failed to record item outcome"),
        }
    }
}

impl BatchSubmission {
    fn validate(&self) -> ServiceResult<()> {
        if self.target_key.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "target_key must not be empty".to_string(),
            });
        }
        if self.items.is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "items must not be empty".to_string(),
            });
        }
        for (index, item) in self.items.iter().enumerate() {
            if item.source_ref.trim().is_empty() || item.month.trim().is_empty() || item.year <= 0 {
                return Err(ServiceError::InvalidRequest {
                    message: format!("item {} needs source_ref, year and month", index),
                });
            }
        }
        Ok(())
    }
}

/// Terminal status from the final item counts.
impl SyllabusService {
    /// Record a batch job for the non-duplicate items and start processing it.
    pub fn submit_batch(self: &Arc<Self>, submission: BatchSubmission) -> ServiceResult<BatchSubmitted> {
        submission.validate()?;
        let target_key = submission.target_key.trim().to_string();

        let mut seen = self.db.existing_paper_keys(&target_key)?;
        let submitted = submission.items.len();
        let remaining: Vec<BatchItemRequest> = submission
            .items
            .into_iter()
            .filter(|item| seen.insert(natural_key(item.year, &item.month)))
            .collect();
        let skipped_duplicates = submitted - remaining.len();

        if remaining.is_empty() {
            info!(target_key = %target_key, submitted, "Every submitted paper already exists");
            return Err(ServiceError::AlreadyExists { target_key });
        }

        let job_id = Uuid::new_v4().to_string();
        let job = BatchJob::new(&job_id, &target_key, remaining.len());
        let now = Utc::now();
        let items: Vec<JobItem> = remaining
            .into_iter()
            .enumerate()
            .map(|(index, item)| JobItem {
                id: Uuid::new_v4().to_string(),
                job_id: job_id.clone(),
                item_index: index,
                natural_key: natural_key(item.year, &item.month),
                source_ref: item.source_ref.trim().to_string(),
                year: item.year,
                month: item.month.trim().to_string(),
                title: item.title,
                exam_type: item.exam_type,
                status: ItemStatus::Pending,
                error: None,
                updated_at: now,
            })
            .collect();

        let token = self.register_job_token(&job_id);
        if let Err(e) = self
            .db
            .create_batch_job(&job, &items, &Notification::for_new_job(&job))
        {
            self.unregister_job_token(&job_id);
            return Err(e);
        }
        info!(
            job_id = %job_id,
            target_key = %target_key,
            items = items.len(),
            skipped_duplicates,
            "Batch job created"
        );

        let service = Arc::clone(self);
        let spawned = job.clone();
        tokio::spawn(async move {
            service.run_batch(spawned, items, token).await;
        });

        Ok(BatchSubmitted {
            job_id,
            status: job.status,
            total_items: job.total_items,
            skipped_duplicates,
        })
    }

    pub fn batch_status(&self, job_id: &str) -> ServiceResult<BatchJob> {
        self.db
            .get_batch_job(job_id)?
            .ok_or_else(|| ServiceError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    pub fn batch_items(&self, job_id: &str) -> ServiceResult<Vec<JobItem>> {
        self.batch_status(job_id)?;
        self.db.list_job_items(job_id)
    }

    pub fn notification_for_job(&self, job_id: &str) -> ServiceResult<Notification> {
        self.db
            .get_notification_for_job(job_id)?
            .ok_or_else(|| ServiceError::NotificationNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Stop a batch. Items already in progress finish; the rest are skipped.
    pub fn cancel_batch(&self, job_id: &str) -> ServiceResult<()> {
        let job = self.batch_status(job_id)?;
        if job.status.is_terminal() {
            return Err(ServiceError::JobFinished {
                job_id: job_id.to_string(),
            });
        }

        if !self.cancel_job(job_id) {
            warn!(job_id, "No running batch for active job, marking cancelled");
            self.db.skip_pending_items(job_id)?;
            self.db
                .finish_batch_job(job_id, JobStatus::Cancelled, Some("Cancelled"))?;
        }
        Ok(())
    }

    async fn run_batch(self: Arc<Self>, job: BatchJob, items: Vec<JobItem>, token: CancellationToken) {
        let settings = &self.config.batch;

        // Give pollers a moment to attach before the first item moves the counters
        tokio::select! {
            _ = tokio::time::sleep(settings.start_delay()) => {}
            _ = token.cancelled() => {}
        }

        let pool = WorkerPool::new(
            "item",
            settings.concurrency,
            settings.retry_policy(),
            settings.item_timeout(),
        )
        .with_run_budget(settings.run_timeout());
        let observer = Arc::new(BatchObserver {
            store: self.db.clone(),
            job_id: job.job_id.clone(),
            item_ids: items.iter().map(|item| item.id.clone()).collect(),
        });

        let processor = self.item_processor.clone();
        let target_key = job.target_key.clone();
        let reports = pool
            .run(
                items,
                move |item: Arc<JobItem>, _attempt| {
                    let processor = processor.clone();
                    let target_key = target_key.clone();
                    async move { processor.process(&target_key, &item).await }
                },
                observer,
                token.clone(),
            )
            .await;

        let skipped = match self.db.skip_pending_items(&job.job_id) {
            Ok(skipped) => skipped,
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "Failed to mark unstarted items skipped");
                0
            }
        };

        let current = match self.db.get_batch_job(&job.job_id) {
            Ok(Some(current)) => current,
            Ok(None) => {
                warn!(job_id = %job.job_id, "Batch job disappeared before finishing");
                self.unregister_job_token(&job.job_id);
                return;
            }
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "Failed to load batch job");
                job.clone()
            }
        };
        let (completed, failed) = (current.completed_items, current.failed_items);

        let (status, message) = if token.is_cancelled() {
            (
                JobStatus::Cancelled,
                format!(
                    "Cancelled: {} ingested, {} failed, {} skipped",
                    completed, failed, skipped
                ),
            )
        } else {
            let mut message = format!(
                "{} of {} papers ingested, {} failed",
                completed, current.total_items, failed
            );
            let data_sources: Vec<String> = reports
                .iter()
                .filter_map(|r| r.outcome.as_ref().ok())
                .filter_map(|output| output.data_source_id.clone())
                .collect();
            if let Some(note) = self.index_knowledge_base(&job.job_id, &data_sources).await {
                message.push_str("; ");
                message.push_str(&note);
            }
            (JobStatus::from_counts(completed, failed), message)
        };

        match self.db.finish_batch_job(&job.job_id, status, Some(&message)) {
            Ok(true) => {
                info!(
                    job_id = %job.job_id,
                    status = status.as_str(),
                    completed,
                    failed,
                    skipped,
                    "Batch job finished"
                );
                metrics::counter!("batch_jobs_total", "status" => status.as_str()).increment(1);
            }
            Ok(false) => warn!(job_id = %job.job_id, "Batch job was already finished"),
            Err(e) => warn!(job_id = %job.job_id, error = %e, "Failed to finish batch job"),
        }

        self.unregister_job_token(&job.job_id);
    }

    /// Index newly created data sources. Returns a note for the job message, or
    /// `None` when no indexing was attempted.
    async fn index_knowledge_base(&self, job_id: &str, data_source_ids: &[String]) -> Option<String> {
        let (Some(kb), Some(settings)) = (&self.knowledge_base, &self.config.knowledge_base) else {
            return None;
        };
        if data_source_ids.is_empty() {
            return None;
        }

        if let Err(e) = self
            .db
            .set_batch_phase(job_id, "kb_indexing", Some("Indexing ingested papers"))
        {
            warn!(job_id, error = %e, "Failed to record indexing phase");
        }

        let result = match kb.start_indexing(data_source_ids).await {
            Ok(indexing_job) => {
                kb.wait_for_indexing(&indexing_job, settings.poll_interval(), settings.poll_timeout())
                    .await
            }
            Err(e) => Err(e),
        };

        let note = match result {
            Ok(IndexingState::Completed) => {
                info!(job_id, data_sources = data_source_ids.len(), "Knowledge-base indexing completed");
                "knowledge base indexing completed".to_string()
            }
            Ok(state) => {
                warn!(job_id, state = %state, "Knowledge-base indexing did not complete");
                format!("knowledge base indexing ended as {}", state)
            }
            Err(e) => {
                warn!(job_id, error = %e, "Knowledge-base indexing failed");
                format!("knowledge base indexing failed: {}", e)
            }
        };
        Some(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KnowledgeBaseConfig, ServiceConfig};
    use crate::db::{Database, NotificationType, PaperRecord};
    use crate::inference::ChunkExtractor;
    use crate::ingestion::Chunk;
    use crate::service::KnowledgeBaseClient;
    use crate::syllabus::SyllabusExtraction;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct UnusedExtractor;

    #[async_trait]
    impl ChunkExtractor for UnusedExtractor {
        async fn extract(
            &self,
            _chunk: &Chunk,
            _text: &str,
            _total_pages: usize,
        ) -> Result<SyllabusExtraction, ExtractionError> {
            unreachable!("batch tests never extract chunks")
        }
    }

    /// Fails items whose source contains "unreachable"; optionally holds the first item.
    #[derive(Default)]
    struct FakeProcessor {
        calls: Mutex<Vec<String>>,
        hold_first: Option<Arc<Notify>>,
        with_data_source: bool,
    }

    #[async_trait]
    impl ItemProcessor for FakeProcessor {
        async fn process(&self, _target_key: &str, item: &JobItem) -> Result<ItemOutput, ExtractionError> {
            let first = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(item.natural_key.clone());
                calls.len() == 1
            };
            if let (true, Some(started)) = (first, &self.hold_first) {
                started.notify_one();
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            if item.source_ref.contains("stalled") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if item.source_ref.contains("unreachable") {
                return Err(ExtractionError::Network {
                    message: "connection refused".into(),
                    recoverable: true,
                });
            }
            Ok(ItemOutput {
                paper_id: item.item_index as i64 + 1,
                data_source_id: self
                    .with_data_source
                    .then(|| format!("ds-{}", item.natural_key)),
            })
        }
    }

    #[derive(Default)]
    struct FakeKnowledgeBase {
        indexed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl KnowledgeBaseClient for FakeKnowledgeBase {
        async fn create_data_source(&self, item_path: &str) -> Result<String, ExtractionError> {
            Ok(format!("ds-{item_path}"))
        }

        async fn start_indexing(&self, data_source_ids: &[String]) -> Result<String, ExtractionError> {
            self.indexed.lock().unwrap().extend_from_slice(data_source_ids);
            Ok("ij-1".into())
        }

        async fn indexing_status(&self, _indexing_job_id: &str) -> Result<IndexingState, ExtractionError> {
            Ok(IndexingState::Completed)
        }
    }

    fn test_config() -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.batch.concurrency = 1;
        config.batch.max_retries = 2;
        config.batch.base_delay_ms = 1;
        config.batch.max_delay_ms = 5;
        config.batch.start_delay_ms = 0;
        config
    }

    fn service_with(
        config: ServiceConfig,
        processor: FakeProcessor,
        knowledge_base: Option<Arc<dyn KnowledgeBaseClient>>,
    ) -> Arc<SyllabusService> {
        Arc::new(SyllabusService::with_components(
            Arc::new(config),
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(UnusedExtractor),
            Arc::new(processor),
            knowledge_base,
        ))
    }

    fn paper(source_ref: &str, year: i32, month: &str) -> BatchItemRequest {
        BatchItemRequest {
            source_ref: source_ref.into(),
            year,
            month: month.into(),
            title: None,
            exam_type: None,
        }
    }

    async fn wait_until_finished(service: &SyllabusService, job_id: &str) -> BatchJob {
        for _ in 0..500 {
            let job = service.batch_status(job_id).unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("batch job {job_id} did not finish");
    }

    #[tokio::test]
    async fn test_mixed_outcomes_partially_complete() {
        let service = service_with(test_config(), FakeProcessor::default(), None);
        let submitted = service
            .submit_batch(BatchSubmission {
                target_key: "mca-sem3".into(),
                items: vec![
                    paper("https://papers.test/2022-dec.pdf", 2022, "Dec"),
                    paper("https://unreachable.test/2023-may.pdf", 2023, "May"),
                    paper("https://papers.test/2023-dec.pdf", 2023, "Dec"),
                ],
            })
            .unwrap();
        assert_eq!(submitted.total_items, 3);
        assert_eq!(submitted.status, JobStatus::Processing);

        let job = wait_until_finished(&service, &submitted.job_id).await;
        assert_eq!(job.status, JobStatus::PartiallyCompleted);
        assert_eq!(job.completed_items + job.failed_items, job.total_items);
        assert_eq!(job.progress, 100);

        let notification = service.notification_for_job(&submitted.job_id).unwrap();
        assert_eq!(notification.notification_type, NotificationType::Warning);
        assert_eq!(notification.metadata.completed_items, 2);
        assert_eq!(notification.metadata.failed_items, 1);
        assert_eq!(notification.metadata.progress, 100);
        assert!(!notification.read);

        let items = service.batch_items(&submitted.job_id).unwrap();
        let failed: Vec<_> = items
            .iter()
            .filter(|i| i.status == ItemStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].natural_key, "2023-May");
        assert!(failed[0].error.as_deref().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_all_items_failing_fails_the_job() {
        let processor = FakeProcessor::default();
        let service = service_with(test_config(), processor, None);
        let submitted = service
            .submit_batch(BatchSubmission {
                target_key: "mca-sem3".into(),
                items: vec![
                    paper("https://unreachable.test/a.pdf", 2021, "Dec"),
                    paper("https://unreachable.test/b.pdf", 2022, "May"),
                ],
            })
            .unwrap();

        let job = wait_until_finished(&service, &submitted.job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.completed_items, 0);
        assert_eq!(job.failed_items, 2);

        let notification = service.notification_for_job(&submitted.job_id).unwrap();
        assert_eq!(notification.notification_type, NotificationType::Error);
        assert_eq!(notification.metadata.completed_items, 0);
    }

    #[tokio::test]
    async fn test_failed_item_is_retried_up_to_budget() {
        let processor = Arc::new(FakeProcessor::default());
        let service = Arc::new(SyllabusService::with_components(
            Arc::new(test_config()),
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(UnusedExtractor),
            processor.clone(),
            None,
        ));
        let submitted = service
            .submit_batch(BatchSubmission {
                target_key: "t".into(),
                items: vec![paper("https://unreachable.test/a.pdf", 2021, "Dec")],
            })
            .unwrap();

        wait_until_finished(&service, &submitted.job_id).await;
        assert_eq!(processor.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicates_are_filtered() {
        let service = service_with(test_config(), FakeProcessor::default(), None);
        service
            .db
            .insert_paper(&PaperRecord {
                target_key: "mca-sem3".into(),
                year: 2023,
                month: "Dec".into(),
                exam_type: None,
                title: "Dec 2023".into(),
                source_ref: "old.pdf".into(),
                content_hash: "abc".into(),
                page_count: 2,
                data_source_id: None,
            })
            .unwrap();

        let submitted = service
            .submit_batch(BatchSubmission {
                target_key: "mca-sem3".into(),
                items: vec![
                    paper("https://papers.test/2023-dec.pdf", 2023, "Dec"),
                    paper("https://papers.test/2024-may.pdf", 2024, "May"),
                    paper("https://papers.test/2024-may-copy.pdf", 2024, " May "),
                ],
            })
            .unwrap();
        assert_eq!(submitted.total_items, 1);
        assert_eq!(submitted.skipped_duplicates, 2);

        let items = service.batch_items(&submitted.job_id).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].natural_key, "2024-May");
        wait_until_finished(&service, &submitted.job_id).await;

        let err = service
            .submit_batch(BatchSubmission {
                target_key: "mca-sem3".into(),
                items: vec![paper("https://papers.test/2023-dec.pdf", 2023, "Dec")],
            })
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_cancel_keeps_finished_items_and_skips_the_rest() {
        let started = Arc::new(Notify::new());
        let service = service_with(
            test_config(),
            FakeProcessor {
                hold_first: Some(started.clone()),
                ..Default::default()
            },
            None,
        );
        let submitted = service
            .submit_batch(BatchSubmission {
                target_key: "mca-sem3".into(),
                items: vec![
                    paper("https://papers.test/a.pdf", 2021, "Dec"),
                    paper("https://papers.test/b.pdf", 2022, "May"),
                    paper("https://papers.test/c.pdf", 2022, "Dec"),
                ],
            })
            .unwrap();

        started.notified().await;
        service.cancel_batch(&submitted.job_id).unwrap();

        let job = wait_until_finished(&service, &submitted.job_id).await;
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.completed_items, 1);
        assert_eq!(job.failed_items, 0);

        let items = service.batch_items(&submitted.job_id).unwrap();
        let skipped = items
            .iter()
            .filter(|i| i.status == ItemStatus::Skipped)
            .count();
        assert_eq!(skipped, 2);

        // Nothing failed, so the notification reports success for what ran
        let notification = service.notification_for_job(&submitted.job_id).unwrap();
        assert_eq!(notification.notification_type, NotificationType::Success);
        assert_eq!(notification.metadata.completed_items, 1);
        assert_eq!(notification.metadata.failed_items, 0);

        assert!(matches!(
            service.cancel_batch(&submitted.job_id).unwrap_err(),
            ServiceError::JobFinished { .. }
        ));
    }

    #[tokio::test]
    async fn test_cancel_right_after_submit_reaches_the_run() {
        let processor = Arc::new(FakeProcessor::default());
        let service = Arc::new(SyllabusService::with_components(
            Arc::new(test_config()),
            Arc::new(Database::open_in_memory().unwrap()),
            Arc::new(UnusedExtractor),
            processor.clone(),
            None,
        ));
        let submitted = service
            .submit_batch(BatchSubmission {
                target_key: "mca-sem3".into(),
                items: vec![
                    paper("https://papers.test/a.pdf", 2021, "Dec"),
                    paper("https://papers.test/b.pdf", 2022, "May"),
                ],
            })
            .unwrap();

        // The run has not been polled yet, so this must go through its token
        service.cancel_batch(&submitted.job_id).unwrap();
        service.cancel_batch(&submitted.job_id).unwrap();

        let job = wait_until_finished(&service, &submitted.job_id).await;
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.message.as_deref(), Some("Cancelled: 0 ingested, 0 failed, 2 skipped"));
        assert!(processor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_budget_fails_stalled_items() {
        let mut config = test_config();
        config.batch.max_retries = 1;
        config.batch.run_timeout_secs = 1;
        let service = service_with(config, FakeProcessor::default(), None);
        let submitted = service
            .submit_batch(BatchSubmission {
                target_key: "mca-sem3".into(),
                items: vec![
                    paper("https://papers.test/a.pdf", 2021, "Dec"),
                    paper("https://stalled.test/b.pdf", 2022, "May"),
                ],
            })
            .unwrap();

        let job = wait_until_finished(&service, &submitted.job_id).await;
        assert_eq!(job.status, JobStatus::PartiallyCompleted);
        assert_eq!((job.completed_items, job.failed_items), (1, 1));

        let items = service.batch_items(&submitted.job_id).unwrap();
        assert_eq!(items[1].status, ItemStatus::Failed);
        let notification = service.notification_for_job(&submitted.job_id).unwrap();
        assert_eq!(notification.notification_type, NotificationType::Warning);
    }

    #[tokio::test]
    async fn test_knowledge_base_indexing_after_items() {
        let mut config = test_config();
        config.knowledge_base = Some(KnowledgeBaseConfig {
            base_url: "http://kb.test".into(),
            api_key: String::new(),
            knowledge_base_uuid: "kb-1".into(),
            poll_interval_secs: 0,
            poll_timeout_secs: 1,
        });
        let kb = Arc::new(FakeKnowledgeBase::default());
        let service = service_with(
            config,
            FakeProcessor {
                with_data_source: true,
                ..Default::default()
            },
            Some(kb.clone()),
        );

        let submitted = service
            .submit_batch(BatchSubmission {
                target_key: "t".into(),
                items: vec![
                    paper("https://papers.test/a.pdf", 2021, "Dec"),
                    paper("https://papers.test/b.pdf", 2022, "May"),
                ],
            })
            .unwrap();

        let job = wait_until_finished(&service, &submitted.job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.message.unwrap().contains("indexing completed"));
        assert_eq!(
            kb.indexed.lock().unwrap().as_slice(),
            &["ds-2021-Dec".to_string(), "ds-2022-May".to_string()]
        );
    }

    #[test]
    fn test_submission_validation() {
        let empty = BatchSubmission {
            target_key: "t".into(),
            items: Vec::new(),
        };
        assert!(empty.validate().is_err());

        let bad_year = BatchSubmission {
            target_key: "t".into(),
            items: vec![paper("a.pdf", 0, "Dec")],
        };
        assert!(bad_year.validate().is_err());
    }

    #[test]
    fn test_status_from_counts() {
        assert_eq!(JobStatus::from_counts(3, 0), JobStatus::Completed);
        assert_eq!(JobStatus::from_counts(2, 1), JobStatus::PartiallyCompleted);
        assert_eq!(JobStatus::from_counts(0, 2), JobStatus::Failed);
    }
}
