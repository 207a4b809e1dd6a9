//! Batched replace-by-target persistence of extracted syllabi.
//!
//! Everything for one target is written in a single transaction: the old tree is
//! deleted (units, topics and books go with it by cascade), then parents and children
//! are inserted with multi-row statements. Parent ids are resolved by natural key
//! after each parent batch.

use rusqlite::types::Value;
use rusqlite::{Transaction, params, params_from_iter};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::Database;
use crate::config::PersistenceConfig;
use crate::error::{DatabaseError, ServiceResult};
use crate::syllabus::{SubjectData, SyllabusExtraction};

const SYLLABUS_COLUMNS: &[&str] = &["target_key", "subject_name", "subject_code", "total_credits"];
const UNIT_COLUMNS: &[&str] = &[
    "syllabus_id",
    "unit_number",
    "title",
    "description",
    "raw_text",
    "hours",
];
const TOPIC_COLUMNS: &[&str] = &["unit_id", "topic_number", "title"];
const BOOK_COLUMNS: &[&str] = &[
    "syllabus_id",
    "title",
    "authors",
    "publisher",
    "edition",
    "year",
    "isbn",
    "is_textbook",
    "book_type",
];

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn int(value: impl Into<i64>) -> Value {
    Value::Integer(value.into())
}

/// One multi-row INSERT for `rows`.
fn insert_batch(tx: &Transaction<'_>, table: &str, columns: &[&str], rows: &[Vec<Value>]) -> ServiceResult<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let row_placeholder = format!("({})", vec!["?"; columns.len()].join(", "));
    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        columns.join(", "),
        vec![row_placeholder; rows.len()].join(", ")
    );
    tx.execute(&sql, params_from_iter(rows.iter().flatten()))
        .map_err(DatabaseError::Query)?;
    Ok(())
}

fn insert_batched(
    tx: &Transaction<'_>,
    table: &str,
    columns: &[&str],
    rows: &[Vec<Value>],
    batch_size: usize,
) -> ServiceResult<()> {
    for batch in rows.chunks(batch_size.max(1)) {
        insert_batch(tx, table, columns, batch)?;
    }
    Ok(())
}

fn syllabus_ids(tx: &Transaction<'_>, target_key: &str) -> ServiceResult<HashMap<(String, String), i64>> {
    let mut stmt = tx
        .prepare("SELECT id, subject_code, subject_name FROM syllabi WHERE target_key = ?1")
        .map_err(DatabaseError::Query)?;
    let ids = stmt
        .query_map(params![target_key], |row| {
            Ok(((row.get(1)?, row.get(2)?), row.get(0)?))
        })
        .map_err(DatabaseError::Query)?
        .collect::<Result<HashMap<_, _>, _>>()
        .map_err(DatabaseError::Query)?;
    Ok(ids)
}

fn unit_ids(tx: &Transaction<'_>, target_key: &str) -> ServiceResult<HashMap<(i64, u32), i64>> {
    let mut stmt = tx
        .prepare(
            "SELECT u.id, u.syllabus_id, u.unit_number FROM syllabus_units u \
             JOIN syllabi s ON s.id = u.syllabus_id WHERE s.target_key = ?1",
        )
        .map_err(DatabaseError::Query)?;
    let ids = stmt
        .query_map(params![target_key], |row| {
            Ok(((row.get(1)?, row.get(2)?), row.get(0)?))
        })
        .map_err(DatabaseError::Query)?
        .collect::<Result<HashMap<_, _>, _>>()
        .map_err(DatabaseError::Query)?;
    Ok(ids)
}

fn subject_key(subject: &SubjectData) -> (String, String) {
    (subject.subject_code.clone(), subject.subject_name.clone())
}

impl Database {
    /// Replace everything stored for `target_key` with `result`.
    ///
    /// Returns the new syllabus ids in subject order. Any failure rolls the whole
    /// target back.
    pub fn replace_syllabi(
        &self,
        target_key: &str,
        result: &SyllabusExtraction,
        sizes: &PersistenceConfig,
    ) -> ServiceResult<Vec<i64>> {
        let mut seen = HashSet::new();
        let subjects: Vec<&SubjectData> = result
            .subjects
            .iter()
            .filter(|s| {
                let fresh = seen.insert(subject_key(s));
                if !fresh {
                    warn!(code = %s.subject_code, name = %s.subject_name, "Duplicate subject in result, keeping first");
                }
                fresh
            })
            .collect();

        let mut conn = self.conn();
        let tx = conn.transaction().map_err(DatabaseError::Query)?;

        let deleted = tx
            .execute("DELETE FROM syllabi WHERE target_key = ?1", params![target_key])
            .map_err(DatabaseError::Query)?;
        if deleted > 0 {
            debug!(target_key, deleted, "Removed previous syllabi");
        }

        // Parents, resolving ids after each batch
        let mut subject_ids: HashMap<(String, String), i64> = HashMap::new();
        for batch in subjects.chunks(sizes.syllabus_batch_size.max(1)) {
            let rows: Vec<Vec<Value>> = batch
                .iter()
                .map(|s| {
                    vec![
                        text(target_key),
                        text(&s.subject_name),
                        text(&s.subject_code),
                        int(s.total_credits),
                    ]
                })
                .collect();
            insert_batch(&tx, "syllabi", SYLLABUS_COLUMNS, &rows)?;
            subject_ids = syllabus_ids(&tx, target_key)?;
        }

        let ids_in_order = |s: &SubjectData| subject_ids.get(&subject_key(s)).copied();

        let mut unit_rows = Vec::new();
        let mut book_rows = Vec::new();
        for subject in &subjects {
            let Some(syllabus_id) = ids_in_order(subject) else {
                continue;
            };
            for unit in &subject.units {
                unit_rows.push(vec![
                    int(syllabus_id),
                    int(unit.unit_number),
                    text(&unit.title),
                    text(&unit.description),
                    text(&unit.raw_text),
                    int(unit.hours),
                ]);
            }
            for book in &subject.books {
                book_rows.push(vec![
                    int(syllabus_id),
                    text(&book.title),
                    text(&book.authors),
                    text(&book.publisher),
                    text(&book.edition),
                    int(book.year),
                    text(&book.isbn),
                    int(book.is_textbook),
                    text(&book.book_type),
                ]);
            }
        }

        let mut unit_id_map = HashMap::new();
        for batch in unit_rows.chunks(sizes.unit_batch_size.max(1)) {
            insert_batch(&tx, "syllabus_units", UNIT_COLUMNS, batch)?;
            unit_id_map = unit_ids(&tx, target_key)?;
        }

        let mut topic_rows = Vec::new();
        for subject in &subjects {
            let Some(syllabus_id) = ids_in_order(subject) else {
                continue;
            };
            for unit in &subject.units {
                let Some(&unit_id) = unit_id_map.get(&(syllabus_id, unit.unit_number)) else {
                    continue;
                };
                for topic in &unit.topics {
                    topic_rows.push(vec![int(unit_id), int(topic.topic_number), text(&topic.title)]);
                }
            }
        }

        insert_batched(&tx, "syllabus_topics", TOPIC_COLUMNS, &topic_rows, sizes.topic_batch_size)?;
        insert_batched(&tx, "book_references", BOOK_COLUMNS, &book_rows, sizes.book_batch_size)?;

        let ids: Vec<i64> = subjects.iter().filter_map(|s| ids_in_order(s)).collect();

        tx.commit().map_err(DatabaseError::Query)?;

        debug!(
            target_key,
            syllabi = ids.len(),
            units = unit_rows.len(),
            topics = topic_rows.len(),
            books = book_rows.len(),
            "Persisted syllabi"
        );
        Ok(ids)
    }

    /// Row counts for a target: (syllabi, units, topics, books).
    pub fn syllabus_counts(&self, target_key: &str) -> ServiceResult<(usize, usize, usize, usize)> {
        let conn = self.conn();
        let counts = conn
            .query_row(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM syllabi WHERE target_key = ?1),
                    (SELECT COUNT(*) FROM syllabus_units u JOIN syllabi s ON s.id = u.syllabus_id WHERE s.target_key = ?1),
                    (SELECT COUNT(*) FROM syllabus_topics t JOIN syllabus_units u ON u.id = t.unit_id JOIN syllabi s ON s.id = u.syllabus_id WHERE s.target_key = ?1),
                    (SELECT COUNT(*) FROM book_references b JOIN syllabi s ON s.id = b.syllabus_id WHERE s.target_key = ?1)
                "#,
                params![target_key],
                |row| {
                    let syllabi: i64 = row.get(0)?;
                    let units: i64 = row.get(1)?;
                    let topics: i64 = row.get(2)?;
                    let books: i64 = row.get(3)?;
                    Ok((syllabi as usize, units as usize, topics as usize, books as usize))
                },
            )
            .map_err(DatabaseError::Query)?;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syllabus::{BookData, TopicData, UnitData};

    fn small_batches() -> PersistenceConfig {
        PersistenceConfig {
            syllabus_batch_size: 1,
            unit_batch_size: 2,
            topic_batch_size: 3,
            book_batch_size: 1,
        }
    }

    fn subject(code: &str, units: u32, topics_per_unit: u32) -> SubjectData {
        SubjectData {
            subject_code: code.into(),
            subject_name: format!("Subject {code}"),
            total_credits: 4,
            units: (1..=units)
                .map(|n| UnitData {
                    unit_number: n,
                    title: format!("Unit title {n}"),
                    topics: (1..=topics_per_unit)
                        .map(|t| TopicData {
                            topic_number: t,
                            title: format!("Topic {t}"),
                        })
                        .collect(),
                    ..Default::default()
                })
                .collect(),
            books: vec![BookData {
                title: format!("Book for {code}"),
                is_textbook: true,
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_persists_whole_tree_across_batches() {
        let db = Database::open_in_memory().unwrap();
        let result = SyllabusExtraction {
            subjects: vec![subject("MCA 301", 3, 4), subject("MCA 302", 2, 1)],
        };

        let ids = db.replace_syllabi("mca-sem3", &result, &small_batches()).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(db.syllabus_counts("mca-sem3").unwrap(), (2, 5, 14, 2));
    }

    #[test]
    fn test_replace_removes_previous_rows() {
        let db = Database::open_in_memory().unwrap();
        let first = SyllabusExtraction {
            subjects: vec![subject("MCA 301", 3, 4), subject("MCA 302", 2, 1)],
        };
        let second = SyllabusExtraction {
            subjects: vec![subject("MCA 303", 1, 2)],
        };
        let other = SyllabusExtraction {
            subjects: vec![subject("MCA 401", 1, 1)],
        };

        db.replace_syllabi("mca-sem4", &other, &crate::config::ServiceConfig::default().persistence)
            .unwrap();
        db.replace_syllabi("mca-sem3", &first, &crate::config::ServiceConfig::default().persistence)
            .unwrap();
        let ids = db
            .replace_syllabi("mca-sem3", &second, &crate::config::ServiceConfig::default().persistence)
            .unwrap();

        assert_eq!(ids.len(), 1);
        assert_eq!(db.syllabus_counts("mca-sem3").unwrap(), (1, 1, 2, 1));
        assert_eq!(db.syllabus_counts("mca-sem4").unwrap(), (1, 1, 1, 1));

        let orphans: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM syllabus_topics WHERE unit_id NOT IN (SELECT id FROM syllabus_units)",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn test_duplicate_subjects_written_once() {
        let db = Database::open_in_memory().unwrap();
        let result = SyllabusExtraction {
            subjects: vec![subject("MCA 301", 1, 1), subject("MCA 301", 2, 2)],
        };
        let ids = db.replace_syllabi("t", &result, &small_batches()).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(db.syllabus_counts("t").unwrap(), (1, 1, 1, 1));
    }
}
