//! Notification records mirroring batch jobs.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use super::Database;
use super::models::{BatchJob, Notification, NotificationMetadata, NotificationType};
use crate::error::{DatabaseError, ServiceResult};

pub const INGEST_CATEGORY: &str = "pyq_ingest";

impl Notification {
    /// The in-progress notification created alongside a new batch job.
    pub fn for_new_job(job: &BatchJob) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            notification_type: NotificationType::InProgress,
            category: INGEST_CATEGORY.to_string(),
            job_id: job.job_id.clone(),
            title: progress_title(0, job.total_items),
            message: format!("Ingesting {} papers for {}", job.total_items, job.target_key),
            metadata: metadata_for(job),
            read: false,
            created_at: now,
            updated_at: now,
        }
    }
}

fn progress_title(done: usize, total: usize) -> String {
    format!("Ingesting papers ({}/{})", done, total)
}

fn metadata_for(job: &BatchJob) -> NotificationMetadata {
    NotificationMetadata {
        progress: job.progress,
        completed_items: job.completed_items,
        failed_items: job.failed_items,
        total_items: job.total_items,
    }
}

fn metadata_json(job: &BatchJob) -> ServiceResult<String> {
    Ok(serde_json::to_string(&metadata_for(job)).map_err(DatabaseError::Serialization)?)
}

pub(super) fn insert_notification(conn: &Connection, notification: &Notification) -> ServiceResult<()> {
    let metadata =
        serde_json::to_string(&notification.metadata).map_err(DatabaseError::Serialization)?;
    conn.execute(
        r#"
        INSERT INTO notifications (id, type, category, job_id, title, message, metadata, read, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            notification.id,
            notification.notification_type.as_str(),
            notification.category,
            notification.job_id,
            notification.title,
            notification.message,
            metadata,
            notification.read as i64,
            notification.created_at.to_rfc3339(),
            notification.updated_at.to_rfc3339(),
        ],
    )
    .map_err(DatabaseError::Query)?;
    Ok(())
}

/// Refresh the in-progress notification from the job's counters.
pub(super) fn sync_progress(conn: &Connection, job: &BatchJob) -> ServiceResult<()> {
    conn.execute(
        r#"
        UPDATE notifications SET title = ?1, metadata = ?2, updated_at = ?3
        WHERE job_id = ?4 AND type = 'in_progress'
        "#,
        params![
            progress_title(job.completed_items + job.failed_items, job.total_items),
            metadata_json(job)?,
            Utc::now().to_rfc3339(),
            job.job_id,
        ],
    )
    .map_err(DatabaseError::Query)?;
    Ok(())
}

/// Write the final notification type, title and message for a finished job.
pub(super) fn finalize(
    conn: &Connection,
    job: &BatchJob,
    notification_type: NotificationType,
) -> ServiceResult<()> {
    let title = match notification_type {
        NotificationType::Success => "Paper ingestion complete",
        NotificationType::Warning => "Paper ingestion finished with issues",
        NotificationType::Error => "Paper ingestion failed",
        NotificationType::InProgress => "Ingesting papers",
    };
    let mut message = format!(
        "{} of {} papers ingested, {} failed",
        job.completed_items, job.total_items, job.failed_items
    );
    if let Some(detail) = &job.message {
        message.push_str(". ");
        message.push_str(detail);
    }

    conn.execute(
        r#"
        UPDATE notifications SET type = ?1, title = ?2, message = ?3, metadata = ?4, updated_at = ?5
        WHERE job_id = ?6
        "#,
        params![
            notification_type.as_str(),
            title,
            message,
            metadata_json(job)?,
            Utc::now().to_rfc3339(),
            job.job_id,
        ],
    )
    .map_err(DatabaseError::Query)?;
    Ok(())
}

impl Database {
    pub(super) fn find_notification_for_job(&self, job_id: &str) -> ServiceResult<Option<Notification>> {
        let conn = self.conn();
        let notification = conn
            .query_row(
                &format!(
                    "SELECT {} FROM notifications WHERE job_id = ?1",
                    Notification::COLUMNS
                ),
                params![job_id],
                Notification::from_row,
            )
            .optional()
            .map_err(DatabaseError::Query)?;
        Ok(notification)
    }
}
