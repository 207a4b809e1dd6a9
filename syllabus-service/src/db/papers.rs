//! Ingested exam papers.

use rusqlite::params;
use std::collections::HashSet;

use super::Database;
use super::models::{PaperRecord, natural_key};
use crate::error::{DatabaseError, ServiceResult};

impl Database {
    /// Natural keys (`year-month`) already stored for a target.
    pub fn existing_paper_keys(&self, target_key: &str) -> ServiceResult<HashSet<String>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT year, month FROM papers WHERE target_key = ?1")
            .map_err(DatabaseError::Query)?;
        let keys = stmt
            .query_map(params![target_key], |row| {
                let year: i32 = row.get(0)?;
                let month: String = row.get(1)?;
                Ok(natural_key(year, &month))
            })
            .map_err(DatabaseError::Query)?
            .collect::<Result<HashSet<_>, _>>()
            .map_err(DatabaseError::Query)?;
        Ok(keys)
    }

    /// Insert a paper row, returning its id.
    pub fn insert_paper(&self, paper: &PaperRecord) -> ServiceResult<i64> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO papers (target_key, year, month, exam_type, title, source_ref, content_hash, page_count, data_source_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))
            "#,
            params![
                paper.target_key,
                paper.year,
                paper.month.trim(),
                paper.exam_type,
                paper.title,
                paper.source_ref,
                paper.content_hash,
                paper.page_count as i64,
                paper.data_source_id,
            ],
        )
        .map_err(DatabaseError::Query)?;
        Ok(conn.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(month: &str) -> PaperRecord {
        PaperRecord {
            target_key: "mca-sem3".into(),
            year: 2023,
            month: month.into(),
            exam_type: Some("end_sem".into()),
            title: format!("MCA Sem 3 {month} 2023"),
            source_ref: format!("https://papers.example/{month}.pdf"),
            content_hash: "abc".into(),
            page_count: 4,
            data_source_id: None,
        }
    }

    #[test]
    fn test_existing_keys_scoped_by_target() {
        let db = Database::open_in_memory().unwrap();
        db.insert_paper(&paper("May")).unwrap();
        db.insert_paper(&paper("December")).unwrap();

        let keys = db.existing_paper_keys("mca-sem3").unwrap();
        assert!(keys.contains("2023-May"));
        assert!(keys.contains("2023-December"));
        assert!(db.existing_paper_keys("mca-sem4").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_natural_key_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.insert_paper(&paper("May")).unwrap();
        assert!(db.insert_paper(&paper("May")).is_err());
    }
}
