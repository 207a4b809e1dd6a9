//! Single-document extraction runs.
//!
//! A run downloads the document, plans chunks, extracts them through the worker
//! pool, merges and sanitizes the partial trees, and replaces the target's stored
//! syllabi. Every step is reported through a [`ProgressEmitter`].

use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{ExtractionJob, JobStore};
use crate::error::{ErrorKind, ExtractionError, ServiceError, ServiceResult, format_error_chain_ref};
use crate::ingestion::{Chunk, Document, load_document, plan_chunks};
use crate::pipeline::ChunkResult;
use crate::pipeline::events::{EventType, ExtractionEvent, Phase};
use crate::pipeline::merge::merge_chunk_results;
use crate::pipeline::pool::WorkerPool;
use crate::pipeline::progress::{ProgressEmitter, snapshot_event};
use crate::pipeline::sanitize::sanitize;
use crate::service::SyllabusService;

/// Chunks with less page text than this are not worth an inference call.
const MIN_CHUNK_TEXT_CHARS: usize = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionRequest {
    pub target_key: String,
    pub document_ref: String,
    #[serde(default)]
    pub pages_per_chunk: Option<usize>,
    #[serde(default)]
    pub overlap_pages: Option<usize>,
}

/// A run that has been accepted and spawned.
pub struct ExtractionStarted {
    pub job_id: String,
    pub events: mpsc::Receiver<ExtractionEvent>,
}

/// What a successful run produced.
struct RunSummary {
    result_ids: Vec<i64>,
    subjects: usize,
    succeeded_chunks: usize,
    total_chunks: usize,
}

/// Why a run ended without a result.
struct RunFailure {
    kind: ErrorKind,
    message: String,
}

impl From<ExtractionError> for RunFailure {
    fn from(err: ExtractionError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<ServiceError> for RunFailure {
    fn from(err: ServiceError) -> Self {
        let kind = match &err {
            ServiceError::Extraction(e) => e.kind(),
            ServiceError::Database(_) => ErrorKind::Database,
            _ => ErrorKind::Validation,
        };
        Self {
            kind,
            message: format_error_chain_ref(&err),
        }
    }
}

impl ExtractionRequest {
    fn validate(&self, default_pages_per_chunk: usize) -> ServiceResult<()> {
        if self.target_key.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "target_key must not be empty".to_string(),
            });
        }
        if self.document_ref.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "document_ref must not be empty".to_string(),
            });
        }
        let pages_per_chunk = self.pages_per_chunk.unwrap_or(default_pages_per_chunk);
        if pages_per_chunk == 0 {
            return Err(ServiceError::InvalidRequest {
                message: "pages_per_chunk must be at least 1".to_string(),
            });
        }
        if self.overlap_pages.is_some_and(|overlap| overlap >= pages_per_chunk) {
            return Err(ServiceError::InvalidRequest {
                message: "overlap_pages must be smaller than pages_per_chunk".to_string(),
            });
        }
        Ok(())
    }
}

impl SyllabusService {
    /// Accept an extraction request and start it in the background.
    ///
    /// Fails with [`ServiceError::Conflict`] while another run for the same target is
    /// active. The returned receiver yields the run's events; dropping it does not stop
    /// the run.
    pub fn start_extraction(
        self: &Arc<Self>,
        request: ExtractionRequest,
    ) -> ServiceResult<ExtractionStarted> {
        request.validate(self.config.extraction.pages_per_chunk)?;

        let job_id = Uuid::new_v4().to_string();
        let job = ExtractionJob::new(&job_id, request.target_key.trim(), request.document_ref.trim());
        let token = self.register_job_token(&job_id);
        if let Err(e) = self.db.create_extraction_job(&job) {
            self.unregister_job_token(&job_id);
            return Err(e);
        }

        let store: Arc<dyn JobStore> = self.db.clone();
        let (emitter, events) =
            ProgressEmitter::new(&job_id, store, self.config.extraction.event_buffer);

        info!(
            job_id = %job_id,
            target_key = %job.target_key,
            document_ref = %job.document_ref,
            "Extraction job accepted"
        );

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service
                .run_extraction(job, request, Arc::new(emitter), token)
                .await;
        });

        Ok(ExtractionStarted { job_id, events })
    }

    pub fn extraction_status(&self, job_id: &str) -> ServiceResult<ExtractionJob> {
        self.db
            .get_extraction_job(job_id)?
            .ok_or_else(|| ServiceError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// The job's current state as one event, served to reconnecting clients.
    pub fn extraction_snapshot(&self, job_id: &str) -> ServiceResult<ExtractionEvent> {
        Ok(snapshot_event(&self.extraction_status(job_id)?))
    }

    /// Stop a running extraction. Chunks already in flight finish; no new chunk starts.
    pub fn cancel_extraction(&self, job_id: &str) -> ServiceResult<()> {
        let job = self.extraction_status(job_id)?;
        if job.status.is_terminal() {
            return Err(ServiceError::JobFinished {
                job_id: job_id.to_string(),
            });
        }

        if !self.cancel_job(job_id) {
            // Active in the store but not running here; close it out directly
            warn!(job_id, "No running extraction for active job, marking cancelled");
            let phase = job
                .phase
                .as_deref()
                .and_then(|p| p.parse::<Phase>().ok())
                .unwrap_or(Phase::Download);
            let event = ExtractionEvent::new(
                EventType::Error,
                job_id,
                job.progress,
                phase,
                "Extraction cancelled",
            )
            .with_failure(ErrorKind::Cancelled, "Extraction cancelled");
            self.db.record_extraction_event(&event, None)?;
        }
        Ok(())
    }

    async fn run_extraction(
        self: Arc<Self>,
        job: ExtractionJob,
        request: ExtractionRequest,
        emitter: Arc<ProgressEmitter>,
        token: CancellationToken,
    ) {
        let started = Instant::now();
        emitter
            .started(&format!("Starting extraction of {}", job.document_ref))
            .await;

        let outcome = self.drive_extraction(&job, &request, &emitter, &token).await;

        let status = match outcome {
            Ok(summary) => {
                let message = format!(
                    "Extracted {} subjects ({}/{} chunks succeeded)",
                    summary.subjects, summary.succeeded_chunks, summary.total_chunks
                );
                info!(
                    job_id = %job.job_id,
                    subjects = summary.subjects,
                    syllabi = summary.result_ids.len(),
                    elapsed_ms = emitter.elapsed_ms(),
                    "Extraction completed"
                );
                emitter.complete(summary.result_ids, &message).await;
                "completed"
            }
            Err(failure) if failure.kind == ErrorKind::Cancelled => {
                info!(job_id = %job.job_id, "Extraction cancelled");
                emitter.cancelled().await;
                "cancelled"
            }
            Err(failure) => {
                warn!(
                    job_id = %job.job_id,
                    error_type = %failure.kind,
                    error = %failure.message,
                    "Extraction failed"
                );
                emitter.error(failure.kind, &failure.message).await;
                "failed"
            }
        };

        metrics::counter!("extraction_runs_total", "status" => status).increment(1);
        metrics::histogram!("extraction_run_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        self.unregister_job_token(&job.job_id);
    }

    async fn drive_extraction(
        &self,
        job: &ExtractionJob,
        request: &ExtractionRequest,
        emitter: &Arc<ProgressEmitter>,
        token: &CancellationToken,
    ) -> Result<RunSummary, RunFailure> {
        let settings = &self.config.extraction;

        let document = load_document(
            &self.http,
            &job.document_ref,
            self.config.batch.download_timeout(),
        )
        .await?;
        ensure_not_cancelled(token)?;

        emitter
            .phase(
                Phase::Chunking,
                &format!("Splitting {} pages into chunks", document.page_count()),
            )
            .await;
        let chunks = plan_chunks(
            document.page_count(),
            request.pages_per_chunk.unwrap_or(settings.pages_per_chunk),
            request.overlap_pages.unwrap_or(settings.overlap_pages),
        );
        if chunks.is_empty() {
            return Err(ExtractionError::Pdf {
                message: "Document has no pages to extract".to_string(),
            }
            .into());
        }
        let total_chunks = chunks.len();
        ensure_not_cancelled(token)?;

        emitter.extraction_started(total_chunks).await;
        let results = self
            .extract_chunks(chunks, Arc::new(document), emitter, token)
            .await;
        ensure_not_cancelled(token)?;

        let succeeded_chunks = results.iter().filter(|r| r.error.is_none()).count();
        if succeeded_chunks == 0 {
            let kind = results
                .iter()
                .find_map(|r| r.error.as_ref().map(ExtractionError::kind))
                .unwrap_or(ErrorKind::Llm);
            return Err(RunFailure {
                kind,
                message: format!("All {} chunks failed", total_chunks),
            });
        }

        emitter.phase(Phase::Merge, "Merging chunk results").await;
        let mut merged = merge_chunk_results(&results);
        sanitize(&mut merged);
        if merged.subjects.is_empty() {
            return Err(ExtractionError::Validation {
                message: "No subjects found in the document".to_string(),
            }
            .into());
        }

        emitter
            .phase(
                Phase::Save,
                &format!("Saving {} subjects", merged.subjects.len()),
            )
            .await;
        let result_ids = self
            .db
            .replace_syllabi(&job.target_key, &merged, &self.config.persistence)?;

        emitter.phase(Phase::Finalize, "Finalizing").await;

        Ok(RunSummary {
            result_ids,
            subjects: merged.subjects.len(),
            succeeded_chunks,
            total_chunks,
        })
    }

    async fn extract_chunks(
        &self,
        chunks: Vec<Chunk>,
        document: Arc<Document>,
        emitter: &Arc<ProgressEmitter>,
        token: &CancellationToken,
    ) -> Vec<ChunkResult> {
        let settings = &self.config.extraction;
        let pool = WorkerPool::new(
            "chunk",
            settings.max_concurrent,
            settings.retry_policy(),
            settings.chunk_timeout(),
        )
        .with_run_budget(settings.run_timeout());

        let extractor = self.extractor.clone();
        let max_chars = self.config.inference.max_chunk_chars;

        let reports = pool
            .run(
                chunks,
                move |chunk: Arc<Chunk>, _attempt| {
                    let extractor = extractor.clone();
                    let document = document.clone();
                    async move {
                        let page_chars: usize = chunk
                            .pages()
                            .filter_map(|page| document.pages.get(page - 1))
                            .map(|text| text.trim().chars().count())
                            .sum();
                        if page_chars < MIN_CHUNK_TEXT_CHARS {
                            return Err(ExtractionError::Pdf {
                                message: format!(
                                    "Chunk {} has too little text ({} chars)",
                                    chunk.number, page_chars
                                ),
                            });
                        }

                        let text = document.chunk_text(&chunk, max_chars);
                        extractor
                            .extract(&chunk, &text, document.page_count())
                            .await
                    }
                },
                emitter.clone(),
                token.clone(),
            )
            .await;

        reports.into_iter().map(ChunkResult::from).collect()
    }
}

fn ensure_not_cancelled(token: &CancellationToken) -> Result<(), RunFailure> {
    if token.is_cancelled() {
        Err(ExtractionError::Cancelled.into())
    } else {
        Ok(())
    }
}
