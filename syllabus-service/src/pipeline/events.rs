//! Progress event protocol for extraction runs.
//!
//! One JSON object per event, tagged by `type`. The same shape is used for the live
//! stream and for the single snapshot event served on reconnect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ExtractionError};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    Started,
    Progress,
    Warning,
    Complete,
    Error,
}

impl EventType {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventType::Complete | EventType::Error)
    }
}

/// Pipeline phase, each owning a fixed slice of the 0..=100 progress range.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Download,
    Chunking,
    Extraction,
    Merge,
    Save,
    Finalize,
}

impl Phase {
    /// Progress reported when the phase is entered
    pub fn start(self) -> u8 {
        match self {
            Phase::Download => 0,
            Phase::Chunking => 5,
            Phase::Extraction => 10,
            Phase::Merge => 70,
            Phase::Save => 75,
            Phase::Finalize => 95,
        }
    }

    pub fn end(self) -> u8 {
        match self {
            Phase::Download => 5,
            Phase::Chunking => 10,
            Phase::Extraction => 70,
            Phase::Merge => 75,
            Phase::Save => 95,
            Phase::Finalize => 100,
        }
    }
}

/// Extraction progress: `10 + 60 * completed / total`.
pub fn extraction_progress(completed: usize, total: usize) -> u8 {
    let (start, end) = (Phase::Extraction.start(), Phase::Extraction.end());
    if total == 0 {
        return start;
    }
    let span = (end - start) as usize;
    start + (span * completed.min(total) / total) as u8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub job_id: String,
    pub progress: u8,
    pub phase: Phase,
    pub message: String,
    pub timestamp: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_chunks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_chunk: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recoverable: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ids: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

impl ExtractionEvent {
    pub fn new(
        event_type: EventType,
        job_id: impl Into<String>,
        progress: u8,
        phase: Phase,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            job_id: job_id.into(),
            progress,
            phase,
            message: message.into(),
            timestamp: Utc::now(),
            total_chunks: None,
            completed_chunks: None,
            current_chunk: None,
            error_type: None,
            error_message: None,
            retry_count: None,
            max_retries: None,
            recoverable: None,
            result_ids: None,
            elapsed_ms: None,
        }
    }

    pub fn with_chunks(mut self, completed: usize, total: usize, current: Option<usize>) -> Self {
        self.completed_chunks = Some(completed);
        self.total_chunks = Some(total);
        self.current_chunk = current;
        self
    }

    /// Attach a recoverable failure about to be retried.
    pub fn with_retry(mut self, error: &ExtractionError, retry_count: u32, max_retries: u32) -> Self {
        self.error_type = Some(error.kind());
        self.error_message = Some(error.to_string());
        self.retry_count = Some(retry_count);
        self.max_retries = Some(max_retries);
        self.recoverable = Some(true);
        self
    }

    /// Attach the failure that ended the run.
    pub fn with_failure(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.error_type = Some(kind);
        self.error_message = Some(message.into());
        self.recoverable = Some(false);
        self
    }

    pub fn with_result(mut self, result_ids: Vec<i64>, elapsed_ms: u64) -> Self {
        self.result_ids = Some(result_ids);
        self.elapsed_ms = Some(elapsed_ms);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.event_type.is_terminal()
    }

    /// JSON payload for an SSE `data:` line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
