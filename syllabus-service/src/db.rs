//! Database module for SQLite operations.
//!
//! This module provides the `Database` struct and all database operations
//! organized into submodules by domain.

mod batches;
mod extractions;
mod migrations;
pub mod models;
mod notifications;
mod papers;
mod syllabi;

pub use models::{
    BatchJob, ExtractionJob, ItemStatus, JobItem, JobStatus, Notification, NotificationMetadata,
    NotificationType, PaperRecord, natural_key,
};

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{DatabaseError, ServiceError, ServiceResult};
use crate::pipeline::events::ExtractionEvent;

/// Job, item and notification state used by the pipeline and the batch tracker.
///
/// Implemented by [`Database`]; counters only ever grow and terminal statuses are
/// written once.
pub trait JobStore: Send + Sync {
    /// Insert a pending extraction job, rejecting it if the target already has an
    /// active one.
    fn create_extraction_job(&self, job: &ExtractionJob) -> ServiceResult<()>;

    fn get_extraction_job(&self, job_id: &str) -> ServiceResult<Option<ExtractionJob>>;

    /// Mirror an emitted event into the job snapshot.
    fn record_extraction_event(
        &self,
        event: &ExtractionEvent,
        failed_chunks: Option<usize>,
    ) -> ServiceResult<()>;

    /// Create the job, its items and its notification in one transaction.
    fn create_batch_job(
        &self,
        job: &BatchJob,
        items: &[JobItem],
        notification: &Notification,
    ) -> ServiceResult<()>;

    fn get_batch_job(&self, job_id: &str) -> ServiceResult<Option<BatchJob>>;

    fn list_job_items(&self, job_id: &str) -> ServiceResult<Vec<JobItem>>;

    fn set_item_status(
        &self,
        item_id: &str,
        status: ItemStatus,
        error: Option<&str>,
    ) -> ServiceResult<()>;

    /// Record an item's final outcome, bump the job counters and sync the notification.
    fn record_item_outcome(
        &self,
        job_id: &str,
        item_id: &str,
        error: Option<&str>,
    ) -> ServiceResult<BatchJob>;

    fn set_batch_phase(&self, job_id: &str, phase: &str, message: Option<&str>)
    -> ServiceResult<()>;

    /// Move the job to a terminal status. Returns false if it was already terminal.
    fn finish_batch_job(
        &self,
        job_id: &str,
        status: JobStatus,
        message: Option<&str>,
    ) -> ServiceResult<bool>;

    fn skip_pending_items(&self, job_id: &str) -> ServiceResult<usize>;

    fn get_notification_for_job(&self, job_id: &str) -> ServiceResult<Option<Notification>>;
}

/// Database manager for SQLite operations
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> ServiceResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ServiceError::Database(DatabaseError::Connection(
                    rusqlite::Error::ToSqlConversionFailure(Box::new(e)),
                ))
            })?;
        }

        let conn = Connection::open(path).map_err(DatabaseError::Connection)?;

        // WAL lets pollers read while a run is writing
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;

        Self::from_connection(conn)
    }

    /// Private in-memory database, used by tests.
    pub fn open_in_memory() -> ServiceResult<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::Connection)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> ServiceResult<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the shared connection. A poisoned lock still guards a usable connection.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobStore for Database {
    fn create_extraction_job(&self, job: &ExtractionJob) -> ServiceResult<()> {
        self.insert_extraction_job(job)
    }

    fn get_extraction_job(&self, job_id: &str) -> ServiceResult<Option<ExtractionJob>> {
        self.find_extraction_job(job_id)
    }

    fn record_extraction_event(
        &self,
        event: &ExtractionEvent,
        failed_chunks: Option<usize>,
    ) -> ServiceResult<()> {
        self.update_extraction_snapshot(event, failed_chunks)
    }

    fn create_batch_job(
        &self,
        job: &BatchJob,
        items: &[JobItem],
        notification: &Notification,
    ) -> ServiceResult<()> {
        self.insert_batch_job(job, items, notification)
    }

    fn get_batch_job(&self, job_id: &str) -> ServiceResult<Option<BatchJob>> {
        self.find_batch_job(job_id)
    }

    fn list_job_items(&self, job_id: &str) -> ServiceResult<Vec<JobItem>> {
        self.find_job_items(job_id)
    }

    fn set_item_status(
        &self,
        item_id: &str,
        status: ItemStatus,
        error: Option<&str>,
    ) -> ServiceResult<()> {
        self.update_item_status(item_id, status, error)
    }

    fn record_item_outcome(
        &self,
        job_id: &str,
        item_id: &str,
        error: Option<&str>,
    ) -> ServiceResult<BatchJob> {
        self.apply_item_outcome(job_id, item_id, error)
    }

    fn set_batch_phase(
        &self,
        job_id: &str,
        phase: &str,
        message: Option<&str>,
    ) -> ServiceResult<()> {
        self.update_batch_phase(job_id, phase, message)
    }

    fn finish_batch_job(
        &self,
        job_id: &str,
        status: JobStatus,
        message: Option<&str>,
    ) -> ServiceResult<bool> {
        self.finalize_batch_job(job_id, status, message)
    }

    fn skip_pending_items(&self, job_id: &str) -> ServiceResult<usize> {
        self.mark_pending_items_skipped(job_id)
    }

    fn get_notification_for_job(&self, job_id: &str) -> ServiceResult<Option<Notification>> {
        self.find_notification_for_job(job_id)
    }
}
