//! Extraction job snapshots.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};

use super::Database;
use super::models::{ExtractionJob, JobStatus};
use crate::error::{DatabaseError, ErrorKind, ServiceError, ServiceResult};
use crate::pipeline::events::{EventType, ExtractionEvent};

const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

impl Database {
    /// Insert a new job. The active-job check and the insert share one transaction.
    pub(super) fn insert_extraction_job(&self, job: &ExtractionJob) -> ServiceResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let active: Option<String> = tx
            .query_row(
                "SELECT job_id FROM extraction_jobs WHERE target_key = ?1 AND status IN ('pending', 'processing') LIMIT 1",
                params![job.target_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        if let Some(job_id) = active {
            return Err(ServiceError::Conflict {
                target_key: job.target_key.clone(),
                job_id,
            });
        }

        tx.execute(
            r#"
            INSERT INTO extraction_jobs (job_id, target_key, document_ref, status, progress, phase, message, total_chunks, completed_chunks, failed_chunks, started_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                job.job_id,
                job.target_key,
                job.document_ref,
                job.status.as_str(),
                job.progress as i64,
                job.phase,
                job.message,
                job.total_chunks as i64,
                job.completed_chunks as i64,
                job.failed_chunks as i64,
                job.started_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(())
    }

    pub(super) fn find_extraction_job(&self, job_id: &str) -> ServiceResult<Option<ExtractionJob>> {
        let conn = self.conn();
        let job = conn
            .query_row(
                &format!(
                    "SELECT {} FROM extraction_jobs WHERE job_id = ?1",
                    ExtractionJob::COLUMNS
                ),
                params![job_id],
                ExtractionJob::from_row,
            )
            .optional()
            .map_err(DatabaseError::Query)?;
        Ok(job)
    }

    /// Fold one event into the snapshot. Finished jobs are left untouched and progress
    /// never moves backwards.
    pub(super) fn update_extraction_snapshot(
        &self,
        event: &ExtractionEvent,
        failed_chunks: Option<usize>,
    ) -> ServiceResult<()> {
        let status = match event.event_type {
            EventType::Started | EventType::Progress | EventType::Warning => JobStatus::Processing,
            EventType::Complete => JobStatus::Completed,
            EventType::Error if event.error_type == Some(ErrorKind::Cancelled) => {
                JobStatus::Cancelled
            }
            EventType::Error => JobStatus::Failed,
        };

        let (error_type, error_message) = if event.event_type == EventType::Error {
            (
                event.error_type.map(|k| k.to_string()),
                event.error_message.clone(),
            )
        } else {
            (None, None)
        };

        let result_ids = event
            .result_ids
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(DatabaseError::Serialization)?;

        let now = Utc::now().to_rfc3339();
        let completed_at = status.is_terminal().then(|| now.clone());

        let conn = self.conn();
        conn.execute(
            r#"
            UPDATE extraction_jobs SET
                status = ?1,
                progress = MAX(progress, ?2),
                phase = ?3,
                message = ?4,
                total_chunks = COALESCE(?5, total_chunks),
                completed_chunks = MAX(completed_chunks, COALESCE(?6, completed_chunks)),
                failed_chunks = MAX(failed_chunks, COALESCE(?7, failed_chunks)),
                error_type = COALESCE(?8, error_type),
                error_message = COALESCE(?9, error_message),
                result_ids = COALESCE(?10, result_ids),
                updated_at = ?11,
                completed_at = COALESCE(?12, completed_at)
            WHERE job_id = ?13 AND status IN ('pending', 'processing')
            "#,
            params![
                status.as_str(),
                event.progress as i64,
                event.phase.to_string(),
                event.message,
                event.total_chunks.map(|n| n as i64),
                event.completed_chunks.map(|n| n as i64),
                failed_chunks.map(|n| n as i64),
                error_type,
                error_message,
                result_ids,
                now,
                completed_at,
                event.job_id,
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Fail every extraction job left active by a previous process.
    pub fn sweep_interrupted_extractions(&self) -> ServiceResult<usize> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        let swept = conn
            .execute(
                r#"
                UPDATE extraction_jobs SET
                    status = 'failed',
                    message = ?1,
                    error_message = COALESCE(error_message, ?1),
                    updated_at = ?2,
                    completed_at = ?2
                WHERE status IN ('pending', 'processing')
                "#,
                params![INTERRUPTED_MESSAGE, now],
            )
            .map_err(DatabaseError::Query)?;
        Ok(swept)
    }
}
