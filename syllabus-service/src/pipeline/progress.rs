//! Progress emitter for one extraction run.
//!
//! Events go out on a bounded channel to whoever is streaming the run, and every event
//! is mirrored into the persisted job snapshot so pollers and reconnecting clients see
//! the same state. Emission is serialized and progress is clamped to never decrease.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::db::{ExtractionJob, JobStatus, JobStore};
use crate::error::{ErrorKind, ExtractionError};

use super::events::{EventType, ExtractionEvent, Phase, extraction_progress};
use super::pool::PoolObserver;

struct EmitterState {
    progress: u8,
    phase: Phase,
    total_chunks: usize,
    completed_chunks: usize,
    failed_chunks: usize,
    /// Cleared once the receiver has gone away
    live: bool,
    finished: bool,
}

pub struct ProgressEmitter {
    job_id: String,
    sender: mpsc::Sender<ExtractionEvent>,
    store: Arc<dyn JobStore>,
    state: Mutex<EmitterState>,
    started_at: Instant,
}

impl ProgressEmitter {
    /// Create an emitter and the receiving end of its event channel.
    pub fn new(
        job_id: impl Into<String>,
        store: Arc<dyn JobStore>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<ExtractionEvent>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let emitter = Self {
            job_id: job_id.into(),
            sender,
            store,
            state: Mutex::new(EmitterState {
                progress: 0,
                phase: Phase::Download,
                total_chunks: 0,
                completed_chunks: 0,
                failed_chunks: 0,
                live: true,
                finished: false,
            }),
            started_at: Instant::now(),
        };
        (emitter, receiver)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub async fn started(&self, message: &str) {
        self.emit(|state| {
            state.phase = Phase::Download;
            ExtractionEvent::new(EventType::Started, &self.job_id, 0, Phase::Download, message)
        })
        .await;
    }

    /// Enter `phase`, reporting its range start.
    pub async fn phase(&self, phase: Phase, message: &str) {
        self.emit(|state| {
            state.phase = phase;
            state.progress = state.progress.max(phase.start());
            ExtractionEvent::new(EventType::Progress, &self.job_id, state.progress, phase, message)
        })
        .await;
    }

    /// Enter the extraction phase with a known chunk count.
    pub async fn extraction_started(&self, total_chunks: usize) {
        self.emit(|state| {
            state.phase = Phase::Extraction;
            state.total_chunks = total_chunks;
            state.progress = state.progress.max(Phase::Extraction.start());
            ExtractionEvent::new(
                EventType::Progress,
                &self.job_id,
                state.progress,
                Phase::Extraction,
                format!("Extracting {} chunks", total_chunks),
            )
            .with_chunks(0, total_chunks, None)
        })
        .await;
    }

    /// A chunk reached its final outcome.
    pub async fn chunk_finished(&self, chunk: usize, failed: bool) {
        self.emit(|state| {
            state.completed_chunks = (state.completed_chunks + 1).min(state.total_chunks);
            if failed {
                state.failed_chunks += 1;
            }
            state.progress = state
                .progress
                .max(extraction_progress(state.completed_chunks, state.total_chunks));
            let message = if failed {
                format!("Chunk {} failed", chunk)
            } else {
                format!("Processed chunk {}/{}", state.completed_chunks, state.total_chunks)
            };
            ExtractionEvent::new(
                EventType::Progress,
                &self.job_id,
                state.progress,
                Phase::Extraction,
                message,
            )
            .with_chunks(state.completed_chunks, state.total_chunks, Some(chunk))
        })
        .await;
    }

    /// A recoverable chunk failure that will be retried. Progress is unchanged.
    pub async fn warning(&self, chunk: usize, error: &ExtractionError, retry_count: u32, max_retries: u32) {
        self.emit(|state| {
            ExtractionEvent::new(
                EventType::Warning,
                &self.job_id,
                state.progress,
                state.phase,
                format!(
                    "Chunk {} failed ({}), retrying ({}/{})",
                    chunk,
                    error.kind(),
                    retry_count,
                    max_retries
                ),
            )
            .with_chunks(state.completed_chunks, state.total_chunks, Some(chunk))
            .with_retry(error, retry_count, max_retries)
        })
        .await;
    }

    pub async fn complete(&self, result_ids: Vec<i64>, message: &str) {
        let elapsed_ms = self.elapsed_ms();
        self.emit(|state| {
            state.progress = 100;
            state.phase = Phase::Finalize;
            ExtractionEvent::new(EventType::Complete, &self.job_id, 100, Phase::Finalize, message)
                .with_chunks(state.completed_chunks, state.total_chunks, None)
                .with_result(result_ids, elapsed_ms)
        })
        .await;
    }

    /// Terminal failure. Progress stays where it was.
    pub async fn error(&self, kind: ErrorKind, message: &str) {
        self.emit(|state| {
            ExtractionEvent::new(EventType::Error, &self.job_id, state.progress, state.phase, message)
                .with_chunks(state.completed_chunks, state.total_chunks, None)
                .with_failure(kind, message)
        })
        .await;
    }

    pub async fn cancelled(&self) {
        self.error(ErrorKind::Cancelled, "Extraction cancelled").await;
    }

    async fn emit<F>(&self, build: F)
    where
        F: FnOnce(&mut EmitterState) -> ExtractionEvent,
    {
        let mut state = self.state.lock().await;
        if state.finished {
            debug!(job_id = %self.job_id, "Ignoring event after terminal event");
            return;
        }

        let event = build(&mut state);
        if event.is_terminal() {
            state.finished = true;
        }

        if let Err(e) = self
            .store
            .record_extraction_event(&event, Some(state.failed_chunks))
        {
            warn!(job_id = %self.job_id, error = %e, "Failed to persist progress snapshot");
        }

        if state.live && self.sender.send(event).await.is_err() {
            debug!(job_id = %self.job_id, "Event consumer disconnected, continuing without live stream");
            state.live = false;
        }
    }
}

#[async_trait]
impl PoolObserver for ProgressEmitter {
    async fn on_retry(&self, number: usize, attempt: u32, max_retries: u32, error: &ExtractionError) {
        self.warning(number, error, attempt, max_retries).await;
    }

    async fn on_finished(&self, number: usize, _attempts: u32, error: Option<&ExtractionError>) {
        self.chunk_finished(number, error.is_some()).await;
    }
}

/// Re-express a stored snapshot as the single event served on reconnect.
pub fn snapshot_event(job: &ExtractionJob) -> ExtractionEvent {
    let phase = job
        .phase
        .as_deref()
        .and_then(|p| p.parse::<Phase>().ok())
        .unwrap_or(Phase::Download);
    let message = job.message.clone().unwrap_or_default();

    let event_type = match job.status {
        JobStatus::Completed => EventType::Complete,
        JobStatus::Failed | JobStatus::Cancelled => EventType::Error,
        _ => EventType::Progress,
    };

    let mut event = ExtractionEvent::new(event_type, &job.job_id, job.progress, phase, message)
        .with_chunks(job.completed_chunks, job.total_chunks, None);
    event.timestamp = job.updated_at;

    match job.status {
        JobStatus::Completed => {
            let elapsed_ms = job
                .completed_at
                .map(|done| (done - job.started_at).num_milliseconds().max(0) as u64)
                .unwrap_or_default();
            event.with_result(job.result_ids.clone(), elapsed_ms)
        }
        JobStatus::Failed | JobStatus::Cancelled => {
            let kind = job
                .error_type
                .as_deref()
                .and_then(|k| k.parse::<ErrorKind>().ok())
                .unwrap_or(if job.status == JobStatus::Cancelled {
                    ErrorKind::Cancelled
                } else {
                    ErrorKind::Validation
                });
            let message = job
                .error_message
                .clone()
                .or_else(|| job.message.clone())
                .unwrap_or_default();
            event.with_failure(kind, message)
        }
        _ => event,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use std::time::Duration;

    fn setup(buffer: usize) -> (Arc<Database>, ProgressEmitter, mpsc::Receiver<ExtractionEvent>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.create_extraction_job(&ExtractionJob::new("job-1", "mca-sem3", "a.pdf"))
            .unwrap();
        let (emitter, rx) = ProgressEmitter::new("job-1", db.clone(), buffer);
        (db, emitter, rx)
    }

    async fn drain(mut rx: mpsc::Receiver<ExtractionEvent>) -> Vec<ExtractionEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_event_sequence_and_monotonic_progress() {
        let (db, emitter, rx) = setup(64);

        emitter.started("Starting").await;
        emitter.phase(Phase::Download, "Downloading").await;
        emitter.phase(Phase::Chunking, "Chunking").await;
        emitter.extraction_started(4).await;
        emitter.chunk_finished(2, false).await;
        emitter
            .warning(1, &ExtractionError::timeout(Duration::from_secs(90)), 1, 3)
            .await;
        emitter.chunk_finished(1, false).await;
        emitter.chunk_finished(3, true).await;
        emitter.chunk_finished(4, false).await;
        emitter.phase(Phase::Merge, "Merging").await;
        emitter.phase(Phase::Save, "Saving").await;
        emitter.phase(Phase::Finalize, "Finalizing").await;
        emitter.complete(vec![7], "Done").await;
        drop(emitter);

        let events = drain(rx).await;
        assert_eq!(events.first().unwrap().event_type, EventType::Started);
        assert_eq!(events.last().unwrap().event_type, EventType::Complete);
        assert_eq!(events.last().unwrap().progress, 100);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        for pair in events.windows(2) {
            assert!(pair[0].progress <= pair[1].progress);
        }

        let warning = events
            .iter()
            .find(|e| e.event_type == EventType::Warning)
            .unwrap();
        assert_eq!(warning.progress, 25);
        assert_eq!(warning.error_type, Some(ErrorKind::Timeout));

        let job = db.get_extraction_job("job-1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.failed_chunks, 1);
        assert_eq!(job.completed_chunks, 4);
    }

    #[tokio::test]
    async fn test_error_keeps_last_progress_and_ends_stream() {
        let (db, emitter, rx) = setup(8);
        emitter.started("Starting").await;
        emitter.extraction_started(2).await;
        emitter.chunk_finished(1, true).await;
        emitter.error(ErrorKind::Llm, "all chunks failed").await;
        emitter.complete(vec![], "late").await;
        drop(emitter);

        let events = drain(rx).await;
        let last = events.last().unwrap();
        assert_eq!(last.event_type, EventType::Error);
        assert_eq!(last.progress, 40);
        assert_eq!(last.recoverable, Some(false));

        let job = db.get_extraction_job("job-1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let snapshot = snapshot_event(&job);
        assert_eq!(snapshot.event_type, EventType::Error);
        assert_eq!(snapshot.error_type, Some(ErrorKind::Llm));
        assert_eq!(snapshot.progress, 40);
    }

    #[tokio::test]
    async fn test_dropped_consumer_does_not_stop_snapshot_updates() {
        let (db, emitter, rx) = setup(1);
        drop(rx);

        emitter.started("Starting").await;
        emitter.extraction_started(1).await;
        emitter.chunk_finished(1, false).await;
        emitter.complete(vec![1], "Done").await;

        let job = db.get_extraction_job("job-1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
    }

    #[tokio::test]
    async fn test_snapshot_of_running_job_is_progress() {
        let (db, emitter, _rx) = setup(64);
        emitter.started("Starting").await;
        emitter.phase(Phase::Chunking, "Chunking").await;

        let job = db.get_extraction_job("job-1").unwrap().unwrap();
        let snapshot = snapshot_event(&job);
        assert_eq!(snapshot.event_type, EventType::Progress);
        assert_eq!(snapshot.phase, Phase::Chunking);
        assert_eq!(snapshot.progress, 5);
    }
}
