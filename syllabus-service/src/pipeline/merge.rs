//! Deterministic merge of per-chunk partial results into one canonical tree.
//!
//! Chunks are walked in `chunk_number` order. An entity seen again (because of
//! overlapping pages) is replaced only when the later copy is strictly more complete;
//! otherwise the first copy is kept and only its empty fields are filled in.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::syllabus::{BookData, SubjectData, SyllabusExtraction, UnitData};

use super::{ChunkResult, ChunkStatus};

/// Merge all successful chunk results. Input order does not matter.
pub fn merge_chunk_results(results: &[ChunkResult]) -> SyllabusExtraction {
    let mut successful: Vec<&ChunkResult> = results
        .iter()
        .filter(|r| r.status == ChunkStatus::Success)
        .collect();
    successful.sort_by_key(|r| r.chunk_number);

    let mut merger = Merger::default();
    for result in successful {
        let Some(partial) = &result.partial else {
            continue;
        };
        for subject in &partial.subjects {
            merger.add_subject(result.chunk_number, subject);
        }
    }

    let merged = merger.finish();
    debug!(subjects = merged.subjects.len(), "Merged chunk results");
    merged
}

#[derive(Default)]
struct SubjectEntry {
    subject: SubjectData,
    units: BTreeMap<u32, UnitData>,
    books: Vec<BookData>,
    book_index: HashMap<String, usize>,
}

#[derive(Default)]
struct Merger {
    entries: Vec<SubjectEntry>,
    index: HashMap<String, usize>,
    last_subject: Option<usize>,
}

impl Merger {
    fn add_subject(&mut self, chunk_number: usize, subject: &SubjectData) {
        let position = if subject.is_continuation() {
            match self.last_subject {
                Some(position) => position,
                None => {
                    warn!(
                        chunk = chunk_number,
                        units = subject.units.len(),
                        "Continuation content with no preceding subject, dropping"
                    );
                    return;
                }
            }
        } else {
            let key = subject.natural_key();
            let position = match self.index.get(&key) {
                Some(&position) => position,
                None => {
                    self.entries.push(SubjectEntry::default());
                    let position = self.entries.len() - 1;
                    self.index.insert(key, position);
                    position
                }
            };
            merge_subject_fields(&mut self.entries[position].subject, subject);
            self.last_subject = Some(position);
            position
        };

        let entry = &mut self.entries[position];
        for unit in &subject.units {
            merge_unit(&mut entry.units, unit);
        }
        for book in &subject.books {
            merge_book(entry, book);
        }
    }

    fn finish(self) -> SyllabusExtraction {
        let subjects = self
            .entries
            .into_iter()
            .map(|entry| SubjectData {
                units: entry.units.into_values().collect(),
                books: entry.books,
                ..entry.subject
            })
            .collect();
        SyllabusExtraction { subjects }
    }
}

fn merge_subject_fields(current: &mut SubjectData, incoming: &SubjectData) {
    fill_if_empty(&mut current.subject_name, &incoming.subject_name);
    fill_if_empty(&mut current.subject_code, &incoming.subject_code);
    current.total_credits = current.total_credits.max(incoming.total_credits);
}

fn merge_unit(units: &mut BTreeMap<u32, UnitData>, incoming: &UnitData) {
    match units.get_mut(&incoming.unit_number) {
        None => {
            units.insert(incoming.unit_number, incoming.clone());
        }
        Some(current) if unit_is_more_complete(incoming, current) => {
            let mut replacement = incoming.clone();
            fill_unit_gaps(&mut replacement, current);
            *current = replacement;
        }
        Some(current) => fill_unit_gaps(current, incoming),
    }
}

fn unit_is_more_complete(candidate: &UnitData, current: &UnitData) -> bool {
    let score = |u: &UnitData| (u.populated_fields(), u.raw_text.len(), u.topics.len());
    score(candidate) > score(current)
}

fn fill_unit_gaps(target: &mut UnitData, source: &UnitData) {
    fill_if_empty(&mut target.title, &source.title);
    fill_if_empty(&mut target.description, &source.description);
    fill_if_empty(&mut target.raw_text, &source.raw_text);
    if target.hours == 0 {
        target.hours = source.hours;
    }
    if target.topics.is_empty() {
        target.topics = source.topics.clone();
    }
}

fn merge_book(entry: &mut SubjectEntry, incoming: &BookData) {
    let key = incoming.natural_key();
    if key.is_empty() {
        return;
    }
    match entry.book_index.get(&key) {
        None => {
            entry.books.push(incoming.clone());
            entry.book_index.insert(key, entry.books.len() - 1);
        }
        Some(&position) => {
            let current = &mut entry.books[position];
            if incoming.populated_fields() > current.populated_fields() {
                *current = incoming.clone();
            }
        }
    }
}

fn fill_if_empty(target: &mut String, source: &str) {
    if target.trim().is_empty() && !source.trim().is_empty() {
        *target = source.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syllabus::TopicData;

    fn unit(number: u32, title: &str, raw_text: &str, topics: &[&str]) -> UnitData {
        UnitData {
            unit_number: number,
            title: title.into(),
            raw_text: raw_text.into(),
            topics: topics
                .iter()
                .enumerate()
                .map(|(i, t)| TopicData {
                    topic_number: i as u32 + 1,
                    title: t.to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn subject(code: &str, name: &str, units: Vec<UnitData>) -> SubjectData {
        SubjectData {
            subject_code: code.into(),
            subject_name: name.into(),
            units,
            ..Default::default()
        }
    }

    fn success(chunk_number: usize, subjects: Vec<SubjectData>) -> ChunkResult {
        ChunkResult {
            chunk_number,
            status: ChunkStatus::Success,
            partial: Some(SyllabusExtraction { subjects }),
            retry_count: 0,
            error: None,
        }
    }

    fn sample_results() -> Vec<ChunkResult> {
        vec![
            success(
                1,
                vec![subject(
                    "MCA 301",
                    "Soft Computing",
                    vec![unit(1, "Neural Networks", "", &[]), unit(2, "Fuzzy", "Fuzzy sets", &["Sets"])],
                )],
            ),
            success(
                2,
                vec![subject(
                    "MCA 301",
                    "Soft Computing",
                    vec![unit(
                        2,
                        "Fuzzy Logic",
                        "Fuzzy sets, fuzzy relations",
                        &["Sets", "Relations"],
                    )],
                )],
            ),
            success(
                3,
                vec![
                    subject("CONTINUATION", "", vec![unit(3, "Genetic Algorithms", "GA basics", &["Selection"])]),
                    subject("MCA 302", "Compilers", vec![unit(1, "Lexing", "Tokens", &["DFA"])]),
                ],
            ),
            ChunkResult {
                chunk_number: 4,
                status: ChunkStatus::Failed,
                partial: None,
                retry_count: 2,
                error: None,
            },
        ]
    }

    #[test]
    fn test_overlap_prefers_more_complete_unit() {
        let merged = merge_chunk_results(&sample_results());
        let soft = &merged.subjects[0];
        assert_eq!(soft.subject_code, "MCA 301");
        let unit2 = soft.units.iter().find(|u| u.unit_number == 2).unwrap();
        assert_eq!(unit2.title, "Fuzzy Logic");
        assert_eq!(unit2.topics.len(), 2);
    }

    #[test]
    fn test_less_complete_duplicate_keeps_first() {
        let results = vec![
            success(1, vec![subject("X1", "X", vec![unit(1, "Full", "Raw text here", &["A"])])]),
            success(2, vec![subject("X1", "X", vec![unit(1, "Partial", "", &[])])]),
        ];
        let merged = merge_chunk_results(&results);
        assert_eq!(merged.subjects[0].units[0].title, "Full");
    }

    #[test]
    fn test_continuation_attaches_to_previous_subject() {
        let merged = merge_chunk_results(&sample_results());
        assert_eq!(merged.subjects.len(), 2);
        let numbers: Vec<u32> = merged.subjects[0].units.iter().map(|u| u.unit_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(merged.subjects[1].subject_code, "MCA 302");
    }

    #[test]
    fn test_codeless_late_units_join_previous_subject() {
        let results = vec![
            success(1, vec![subject("MCA 301", "Soft Computing", vec![unit(1, "Neural Networks", "NN", &[])])]),
            success(2, vec![subject("", "Soft Computing Cont", vec![unit(4, "Hybrid Systems", "Neuro-fuzzy", &[])])]),
            success(3, vec![subject("", "Module 5", vec![unit(5, "Swarm Methods", "PSO", &[])])]),
        ];
        let merged = merge_chunk_results(&results);
        assert_eq!(merged.subjects.len(), 1);
        let numbers: Vec<u32> = merged.subjects[0].units.iter().map(|u| u.unit_number).collect();
        assert_eq!(numbers, vec![1, 4, 5]);
    }

    #[test]
    fn test_orphan_continuation_dropped() {
        let results = vec![success(1, vec![subject("CONTINUATION", "", vec![unit(4, "T", "R", &[])])])];
        assert!(merge_chunk_results(&results).subjects.is_empty());
    }

    #[test]
    fn test_merge_is_order_independent() {
        let results = sample_results();
        let expected = serde_json::to_string(&merge_chunk_results(&results)).unwrap();

        // every rotation and the reversal
        for shift in 0..results.len() {
            let mut permuted = results.clone();
            permuted.rotate_left(shift);
            let merged = serde_json::to_string(&merge_chunk_results(&permuted)).unwrap();
            assert_eq!(merged, expected);
        }
        let mut reversed = results.clone();
        reversed.reverse();
        assert_eq!(
            serde_json::to_string(&merge_chunk_results(&reversed)).unwrap(),
            expected
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let once = merge_chunk_results(&sample_results());
        let again = merge_chunk_results(&[success(1, once.subjects.clone())]);
        assert_eq!(once, again);
    }

    #[test]
    fn test_books_deduplicated_and_credits_max() {
        let mut first = subject("MCA 303", "Networks", vec![]);
        first.total_credits = 3;
        first.books = vec![BookData {
            title: "Computer Networks".into(),
            ..Default::default()
        }];
        let mut second = subject("MCA 303", "Networks", vec![]);
        second.total_credits = 4;
        second.books = vec![BookData {
            title: "computer networks ".into(),
            authors: "Tanenbaum".into(),
            ..Default::default()
        }];

        let merged = merge_chunk_results(&[success(1, vec![first]), success(2, vec![second])]);
        let subject = &merged.subjects[0];
        assert_eq!(subject.total_credits, 4);
        assert_eq!(subject.books.len(), 1);
        assert_eq!(subject.books[0].authors, "Tanenbaum");
    }
}
