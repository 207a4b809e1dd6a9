//! Chunked extraction pipeline building blocks.
//!
//! Chunks are processed by the [`pool::WorkerPool`], merged by [`merge`], cleaned
//! by [`sanitize`], and observed throughout by [`progress::ProgressEmitter`].

pub mod events;
pub mod merge;
pub mod pool;
pub mod progress;
pub mod retry;
pub mod sanitize;

use serde::Serialize;

use crate::error::ExtractionError;
use crate::syllabus::SyllabusExtraction;

use pool::UnitReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Success,
    Failed,
}

/// Outcome of extracting one chunk. Written once by a worker task.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub chunk_number: usize,
    pub status: ChunkStatus,
    pub partial: Option<SyllabusExtraction>,
    /// Attempts beyond the first
    pub retry_count: u32,
    pub error: Option<ExtractionError>,
}

impl From<UnitReport<SyllabusExtraction>> for ChunkResult {
    fn from(report: UnitReport<SyllabusExtraction>) -> Self {
        let retry_count = report.attempts.saturating_sub(1);
        match report.outcome {
            Ok(partial) => ChunkResult {
                chunk_number: report.number,
                status: ChunkStatus::Success,
                partial: Some(partial),
                retry_count,
                error: None,
            },
            Err(error) => ChunkResult {
                chunk_number: report.number,
                status: ChunkStatus::Failed,
                partial: None,
                retry_count,
                error: Some(error),
            },
        }
    }
}
