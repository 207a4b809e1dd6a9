//! Database schema migrations.
//!
//! This module contains all database migrations and schema setup.

use rusqlite::Connection;

use crate::error::{DatabaseError, ServiceResult};

/// Run all database migrations.
///
/// Called during database initialization; every statement is idempotent.
pub(super) fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        r#"
        -- Extracted syllabus tree
        CREATE TABLE IF NOT EXISTS syllabi (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_key TEXT NOT NULL,
            subject_name TEXT NOT NULL,
            subject_code TEXT NOT NULL,
            total_credits INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (target_key, subject_code, subject_name)
        );

        CREATE INDEX IF NOT EXISTS idx_syllabi_target ON syllabi(target_key);

        CREATE TABLE IF NOT EXISTS syllabus_units (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            syllabus_id INTEGER NOT NULL,
            unit_number INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            raw_text TEXT NOT NULL DEFAULT '',
            hours INTEGER NOT NULL DEFAULT 0,
            UNIQUE (syllabus_id, unit_number),
            FOREIGN KEY (syllabus_id) REFERENCES syllabi(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS syllabus_topics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            unit_id INTEGER NOT NULL,
            topic_number INTEGER NOT NULL,
            title TEXT NOT NULL,
            FOREIGN KEY (unit_id) REFERENCES syllabus_units(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_syllabus_topics_unit ON syllabus_topics(unit_id);

        CREATE TABLE IF NOT EXISTS book_references (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            syllabus_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            authors TEXT NOT NULL DEFAULT '',
            publisher TEXT NOT NULL DEFAULT '',
            edition TEXT NOT NULL DEFAULT '',
            year INTEGER NOT NULL DEFAULT 0,
            isbn TEXT NOT NULL DEFAULT '',
            is_textbook INTEGER NOT NULL DEFAULT 0,
            book_type TEXT NOT NULL DEFAULT '',
            FOREIGN KEY (syllabus_id) REFERENCES syllabi(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_book_references_syllabus ON book_references(syllabus_id);

        -- Ingested exam papers
        CREATE TABLE IF NOT EXISTS papers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_key TEXT NOT NULL,
            year INTEGER NOT NULL,
            month TEXT NOT NULL,
            exam_type TEXT,
            title TEXT NOT NULL,
            source_ref TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            page_count INTEGER NOT NULL DEFAULT 0,
            data_source_id TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (target_key, year, month)
        );

        -- Single-document extraction runs
        CREATE TABLE IF NOT EXISTS extraction_jobs (
            job_id TEXT PRIMARY KEY,
            target_key TEXT NOT NULL,
            document_ref TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            progress INTEGER NOT NULL DEFAULT 0,
            phase TEXT,
            message TEXT,
            total_chunks INTEGER NOT NULL DEFAULT 0,
            completed_chunks INTEGER NOT NULL DEFAULT 0,
            failed_chunks INTEGER NOT NULL DEFAULT 0,
            error_type TEXT,
            error_message TEXT,
            result_ids TEXT,
            started_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT
        );

        -- At most one active run per target
        CREATE UNIQUE INDEX IF NOT EXISTS idx_extraction_jobs_active
            ON extraction_jobs(target_key) WHERE status IN ('pending', 'processing');

        -- Batch ingestion jobs
        CREATE TABLE IF NOT EXISTS batch_jobs (
            job_id TEXT PRIMARY KEY,
            target_key TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            progress INTEGER NOT NULL DEFAULT 0,
            current_phase TEXT,
            message TEXT,
            total_items INTEGER NOT NULL,
            completed_items INTEGER NOT NULL DEFAULT 0,
            failed_items INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            completed_at TEXT,
            CHECK (completed_items + failed_items <= total_items)
        );

        CREATE TABLE IF NOT EXISTS job_items (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            item_index INTEGER NOT NULL,
            natural_key TEXT NOT NULL,
            source_ref TEXT NOT NULL,
            year INTEGER NOT NULL,
            month TEXT NOT NULL,
            title TEXT,
            exam_type TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            error TEXT,
            updated_at TEXT NOT NULL,
            UNIQUE (job_id, item_index),
            FOREIGN KEY (job_id) REFERENCES batch_jobs(job_id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            category TEXT NOT NULL,
            job_id TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            message TEXT NOT NULL DEFAULT '',
            metadata TEXT NOT NULL,
            read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: e.to_string(),
    })?;

    Ok(())
}
