//! Database model structs.
//!
//! This module contains the data structures for job, item, notification and paper records.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Lifecycle status shared by extraction and batch jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    /// Batch finished with both successes and failures
    PartiallyCompleted,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::PartiallyCompleted => "partially_completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => JobStatus::Pending,
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "partially_completed" => JobStatus::PartiallyCompleted,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    /// Terminal status of a batch whose every item ran.
    pub fn from_counts(completed: usize, failed: usize) -> Self {
        if failed == 0 {
            JobStatus::Completed
        } else if completed == 0 {
            JobStatus::Failed
        } else {
            JobStatus::PartiallyCompleted
        }
    }
}

/// Status of one item inside a batch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Downloading,
    Processing,
    Completed,
    Failed,
    /// Never started because the job was cancelled
    Skipped,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Downloading => "downloading",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "downloading" => ItemStatus::Downloading,
            "processing" => ItemStatus::Processing,
            "completed" => ItemStatus::Completed,
            "failed" => ItemStatus::Failed,
            "skipped" => ItemStatus::Skipped,
            _ => ItemStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    InProgress,
    Success,
    Warning,
    Error,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::InProgress => "in_progress",
            NotificationType::Success => "success",
            NotificationType::Warning => "warning",
            NotificationType::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "success" => NotificationType::Success,
            "warning" => NotificationType::Warning,
            "error" => NotificationType::Error,
            _ => NotificationType::InProgress,
        }
    }

    /// Final type for a batch, from its counters alone. Holds for cancelled and swept
    /// jobs too.
    pub fn for_outcome(completed: usize, failed: usize) -> Self {
        if failed == 0 {
            NotificationType::Success
        } else if completed > 0 {
            NotificationType::Warning
        } else {
            NotificationType::Error
        }
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Persisted snapshot of a single-document extraction run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub job_id: String,
    pub target_key: String,
    pub document_ref: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub failed_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub result_ids: Vec<i64>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExtractionJob {
    pub fn new(job_id: impl Into<String>, target_key: impl Into<String>, document_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            target_key: target_key.into(),
            document_ref: document_ref.into(),
            status: JobStatus::Pending,
            progress: 0,
            phase: None,
            message: None,
            total_chunks: 0,
            completed_chunks: 0,
            failed_chunks: 0,
            error_type: None,
            error_message: None,
            result_ids: Vec::new(),
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub(crate) const COLUMNS: &'static str = "job_id, target_key, document_ref, status, progress, phase, message, \
         total_chunks, completed_chunks, failed_chunks, error_type, error_message, result_ids, \
         started_at, updated_at, completed_at";

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status_str: String = row.get(3)?;
        let progress: i64 = row.get(4)?;
        let total_chunks: i64 = row.get(7)?;
        let completed_chunks: i64 = row.get(8)?;
        let failed_chunks: i64 = row.get(9)?;
        let result_ids_str: Option<String> = row.get(12)?;
        let started_at_str: String = row.get(13)?;
        let updated_at_str: String = row.get(14)?;
        let completed_at_str: Option<String> = row.get(15)?;

        Ok(Self {
            job_id: row.get(0)?,
            target_key: row.get(1)?,
            document_ref: row.get(2)?,
            status: JobStatus::from_str(&status_str),
            progress: progress.clamp(0, 100) as u8,
            phase: row.get(5)?,
            message: row.get(6)?,
            total_chunks: total_chunks as usize,
            completed_chunks: completed_chunks as usize,
            failed_chunks: failed_chunks as usize,
            error_type: row.get(10)?,
            error_message: row.get(11)?,
            result_ids: result_ids_str
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            started_at: parse_timestamp(&started_at_str),
            updated_at: parse_timestamp(&updated_at_str),
            completed_at: completed_at_str.as_deref().map(parse_timestamp),
        })
    }
}

/// Batch ingestion job record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub job_id: String,
    pub target_key: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub total_items: usize,
    pub completed_items: usize,
    pub failed_items: usize,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn new(job_id: impl Into<String>, target_key: impl Into<String>, total_items: usize) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            target_key: target_key.into(),
            status: JobStatus::Processing,
            progress: 0,
            current_phase: Some("processing".to_string()),
            message: None,
            total_items,
            completed_items: 0,
            failed_items: 0,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub(crate) const COLUMNS: &'static str = "job_id, target_key, status, progress, current_phase, message, \
         total_items, completed_items, failed_items, started_at, updated_at, completed_at";

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status_str: String = row.get(2)?;
        let progress: i64 = row.get(3)?;
        let total_items: i64 = row.get(6)?;
        let completed_items: i64 = row.get(7)?;
        let failed_items: i64 = row.get(8)?;
        let started_at_str: String = row.get(9)?;
        let updated_at_str: String = row.get(10)?;
        let completed_at_str: Option<String> = row.get(11)?;

        Ok(Self {
            job_id: row.get(0)?,
            target_key: row.get(1)?,
            status: JobStatus::from_str(&status_str),
            progress: progress.clamp(0, 100) as u8,
            current_phase: row.get(4)?,
            message: row.get(5)?,
            total_items: total_items as usize,
            completed_items: completed_items as usize,
            failed_items: failed_items as usize,
            started_at: parse_timestamp(&started_at_str),
            updated_at: parse_timestamp(&updated_at_str),
            completed_at: completed_at_str.as_deref().map(parse_timestamp),
        })
    }
}

/// One submitted item of a batch job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobItem {
    pub id: String,
    pub job_id: String,
    pub item_index: usize,
    pub natural_key: String,
    pub source_ref: String,
    pub year: i32,
    pub month: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam_type: Option<String>,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobItem {
    pub(crate) const COLUMNS: &'static str = "id, job_id, item_index, natural_key, source_ref, year, month, \
         title, exam_type, status, error, updated_at";

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let item_index: i64 = row.get(2)?;
        let status_str: String = row.get(9)?;
        let updated_at_str: String = row.get(11)?;

        Ok(Self {
            id: row.get(0)?,
            job_id: row.get(1)?,
            item_index: item_index as usize,
            natural_key: row.get(3)?,
            source_ref: row.get(4)?,
            year: row.get(5)?,
            month: row.get(6)?,
            title: row.get(7)?,
            exam_type: row.get(8)?,
            status: ItemStatus::from_str(&status_str),
            error: row.get(10)?,
            updated_at: parse_timestamp(&updated_at_str),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMetadata {
    pub progress: u8,
    pub completed_items: usize,
    pub failed_items: usize,
    pub total_items: usize,
}

/// User-facing record mirroring a batch job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub category: String,
    pub job_id: String,
    pub title: String,
    pub message: String,
    pub metadata: NotificationMetadata,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    pub(crate) const COLUMNS: &'static str =
        "id, type, category, job_id, title, message, metadata, read, created_at, updated_at";

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let type_str: String = row.get(1)?;
        let metadata_str: String = row.get(6)?;
        let read: i64 = row.get(7)?;
        let created_at_str: String = row.get(8)?;
        let updated_at_str: String = row.get(9)?;

        Ok(Self {
            id: row.get(0)?,
            notification_type: NotificationType::from_str(&type_str),
            category: row.get(2)?,
            job_id: row.get(3)?,
            title: row.get(4)?,
            message: row.get(5)?,
            metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
            read: read != 0,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }
}

/// An ingested exam paper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperRecord {
    pub target_key: String,
    pub year: i32,
    pub month: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam_type: Option<String>,
    pub title: String,
    pub source_ref: String,
    pub content_hash: String,
    pub page_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_source_id: Option<String>,
}

impl PaperRecord {
    pub fn natural_key(&self) -> String {
        natural_key(self.year, &self.month)
    }
}

/// Duplicate-detection key for a paper: `"{year}-{month}"`.
pub fn natural_key(year: i32, month: &str) -> String {
    format!("{}-{}", year, month.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::PartiallyCompleted,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()), status);
        }
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_notification_type_for_outcome() {
        use NotificationType::*;
        assert_eq!(NotificationType::for_outcome(3, 0), Success);
        assert_eq!(NotificationType::for_outcome(2, 1), Warning);
        assert_eq!(NotificationType::for_outcome(0, 3), Error);
        // A cancelled batch is judged on what ran
        assert_eq!(NotificationType::for_outcome(1, 0), Success);
        assert_eq!(NotificationType::for_outcome(0, 0), Success);
        assert_eq!(NotificationType::for_outcome(0, 2), Error);
    }

    #[test]
    fn test_natural_key() {
        assert_eq!(natural_key(2023, " December "), "2023-December");
    }
}
