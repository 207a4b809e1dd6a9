//! Batch job and item tracking.
//!
//! Counters are only ever incremented and progress only ever raised, so concurrent
//! item workers cannot make an observer see the job go backwards.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use super::Database;
use super::models::{BatchJob, ItemStatus, JobItem, JobStatus, Notification, NotificationType};
use super::notifications;
use crate::error::{DatabaseError, ServiceError, ServiceResult};

const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

fn load_batch_job(conn: &Connection, job_id: &str) -> ServiceResult<Option<BatchJob>> {
    let job = conn
        .query_row(
            &format!("SELECT {} FROM batch_jobs WHERE job_id = ?1", BatchJob::COLUMNS),
            params![job_id],
            BatchJob::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)?;
    Ok(job)
}

fn require_batch_job(conn: &Connection, job_id: &str) -> ServiceResult<BatchJob> {
    load_batch_job(conn, job_id)?.ok_or_else(|| ServiceError::JobNotFound {
        job_id: job_id.to_string(),
    })
}

impl Database {
    pub(super) fn insert_batch_job(
        &self,
        job: &BatchJob,
        items: &[JobItem],
        notification: &Notification,
    ) -> ServiceResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        tx.execute(
            r#"
            INSERT INTO batch_jobs (job_id, target_key, status, progress, current_phase, message, total_items, completed_items, failed_items, started_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                job.job_id,
                job.target_key,
                job.status.as_str(),
                job.progress as i64,
                job.current_phase,
                job.message,
                job.total_items as i64,
                job.completed_items as i64,
                job.failed_items as i64,
                job.started_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO job_items (id, job_id, item_index, natural_key, source_ref, year, month, title, exam_type, status, error, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                    "#,
                )
                .map_err(DatabaseError::Query)?;
            for item in items {
                stmt.execute(params![
                    item.id,
                    item.job_id,
                    item.item_index as i64,
                    item.natural_key,
                    item.source_ref,
                    item.year,
                    item.month,
                    item.title,
                    item.exam_type,
                    item.status.as_str(),
                    item.error,
                    item.updated_at.to_rfc3339(),
                ])
                .map_err(DatabaseError::Query)?;
            }
        }

        notifications::insert_notification(&tx, notification)?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(())
    }

    pub(super) fn find_batch_job(&self, job_id: &str) -> ServiceResult<Option<BatchJob>> {
        load_batch_job(&self.conn(), job_id)
    }

    pub(super) fn find_job_items(&self, job_id: &str) -> ServiceResult<Vec<JobItem>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM job_items WHERE job_id = ?1 ORDER BY item_index",
                JobItem::COLUMNS
            ))
            .map_err(DatabaseError::Query)?;
        let items = stmt
            .query_map(params![job_id], JobItem::from_row)
            .map_err(DatabaseError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)?;
        Ok(items)
    }

    pub(super) fn update_item_status(
        &self,
        item_id: &str,
        status: ItemStatus,
        error: Option<&str>,
    ) -> ServiceResult<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE job_items SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), error, Utc::now().to_rfc3339(), item_id],
        )
        .map_err(DatabaseError::Query)?;
        Ok(())
    }

    pub(super) fn apply_item_outcome(
        &self,
        job_id: &str,
        item_id: &str,
        error: Option<&str>,
    ) -> ServiceResult<BatchJob> {
        let (status, completed, failed) = match error {
            None => (ItemStatus::Completed, 1, 0),
            Some(_) => (ItemStatus::Failed, 0, 1),
        };
        let now = Utc::now().to_rfc3339();

        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        tx.execute(
            "UPDATE job_items SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4 AND job_id = ?5",
            params![status.as_str(), error, now, item_id, job_id],
        )
        .map_err(DatabaseError::Query)?;

        tx.execute(
            r#"
            UPDATE batch_jobs SET
                completed_items = completed_items + ?1,
                failed_items = failed_items + ?2,
                progress = MAX(progress, (100 * (completed_items + failed_items + ?1 + ?2)) / total_items),
                updated_at = ?3
            WHERE job_id = ?4 AND status IN ('pending', 'processing')
            "#,
            params![completed, failed, now, job_id],
        )
        .map_err(DatabaseError::Query)?;

        let job = require_batch_job(&tx, job_id)?;
        notifications::sync_progress(&tx, &job)?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(job)
    }

    pub(super) fn update_batch_phase(
        &self,
        job_id: &str,
        phase: &str,
        message: Option<&str>,
    ) -> ServiceResult<()> {
        let conn = self.conn();
        conn.execute(
            r#"
            UPDATE batch_jobs SET current_phase = ?1, message = COALESCE(?2, message), updated_at = ?3
            WHERE job_id = ?4 AND status IN ('pending', 'processing')
            "#,
            params![phase, message, Utc::now().to_rfc3339(), job_id],
        )
        .map_err(DatabaseError::Query)?;
        Ok(())
    }

    pub(super) fn finalize_batch_job(
        &self,
        job_id: &str,
        status: JobStatus,
        message: Option<&str>,
    ) -> ServiceResult<bool> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let updated = tx
            .execute(
                r#"
                UPDATE batch_jobs SET
                    status = ?1,
                    current_phase = 'finished',
                    message = COALESCE(?2, message),
                    progress = CASE WHEN ?1 = 'cancelled' THEN progress ELSE 100 END,
                    updated_at = ?3,
                    completed_at = ?3
                WHERE job_id = ?4 AND status IN ('pending', 'processing')
                "#,
                params![status.as_str(), message, now, job_id],
            )
            .map_err(DatabaseError::Query)?;

        if updated == 0 {
            return Ok(false);
        }

        let job = require_batch_job(&tx, job_id)?;
        let notification_type =
            NotificationType::for_outcome(job.completed_items, job.failed_items);
        notifications::finalize(&tx, &job, notification_type)?;

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(true)
    }

    pub(super) fn mark_pending_items_skipped(&self, job_id: &str) -> ServiceResult<usize> {
        let conn = self.conn();
        let skipped = conn
            .execute(
                "UPDATE job_items SET status = 'skipped', updated_at = ?1 WHERE job_id = ?2 AND status = 'pending'",
                params![Utc::now().to_rfc3339(), job_id],
            )
            .map_err(DatabaseError::Query)?;
        Ok(skipped)
    }

    /// Close every batch job left active by a previous process, along with its
    /// notification. A job whose items did not all run counts as cancelled.
    pub fn sweep_interrupted_batches(&self) -> ServiceResult<usize> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let job_ids: Vec<String> = {
            let mut stmt = tx
                .prepare("SELECT job_id FROM batch_jobs WHERE status IN ('pending', 'processing')")
                .map_err(DatabaseError::Query)?;
            stmt.query_map([], |row| row.get(0))
                .map_err(DatabaseError::Query)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(DatabaseError::Query)?
        };

        for job_id in &job_ids {
            let job = require_batch_job(&tx, job_id)?;
            let status = if job.completed_items + job.failed_items < job.total_items {
                JobStatus::Cancelled
            } else {
                JobStatus::from_counts(job.completed_items, job.failed_items)
            };

            tx.execute(
                r#"
                UPDATE batch_jobs SET status = ?1, current_phase = 'finished', message = ?2,
                    updated_at = ?3, completed_at = ?3
                WHERE job_id = ?4
                "#,
                params![status.as_str(), INTERRUPTED_MESSAGE, now, job_id],
            )
            .map_err(DatabaseError::Query)?;
            tx.execute(
                "UPDATE job_items SET status = 'skipped', updated_at = ?1 WHERE job_id = ?2 AND status IN ('pending', 'downloading', 'processing')",
                params![now, job_id],
            )
            .map_err(DatabaseError::Query)?;

            let job = require_batch_job(&tx, job_id)?;
            let notification_type = NotificationType::for_outcome(job.completed_items, job.failed_items);
            notifications::finalize(&tx, &job, notification_type)?;
        }

        tx.commit().map_err(DatabaseError::Query)?;
        Ok(job_ids.len())
    }
}
