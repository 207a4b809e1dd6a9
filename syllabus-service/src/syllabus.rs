//! Syllabus entity tree: subject → unit → topic, plus book references.
//!
//! The same shape is used for the per-chunk partial result returned by the
//! inference service and for the merged canonical result.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Subject code used by the model for pages that continue the previous chunk's subject.
pub const CONTINUATION_MARKERS: &[&str] = &["CONTINUATION", "CONTINUATION_PAGE"];

/// Subject names the model falls back to when a page has no subject header.
const PLACEHOLDER_NAMES: &[&str] = &[
    "continuation", "continued", "full name", "subject", "untitled", "unknown", "n/a", "na",
    "course", "module", "chapter", "section", "part",
];

/// A codeless subject whose first unit is at least this late starts mid-syllabus.
const LATE_FIRST_UNIT: u32 = 4;

/// Structured extraction result for one chunk, or the merge of all chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SyllabusExtraction {
    #[serde(default)]
    pub subjects: Vec<SubjectData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubjectData {
    #[serde(default)]
    pub subject_name: String,
    /// Course code, e.g. `MCA 301`. Use `CONTINUATION` for pages that continue an earlier subject.
    #[serde(default)]
    pub subject_code: String,
    #[serde(default)]
    pub total_credits: u32,
    #[serde(default)]
    pub units: Vec<UnitData>,
    #[serde(default)]
    pub books: Vec<BookData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UnitData {
    #[serde(default)]
    pub unit_number: u32,
    /// Short unit title (at most 8 words).
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Full unit text as written in the document.
    #[serde(default)]
    pub raw_text: String,
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub topics: Vec<TopicData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TopicData {
    #[serde(default)]
    pub topic_number: u32,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BookData {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: String,
    #[serde(default)]
    pub publisher: String,
    #[serde(default)]
    pub edition: String,
    #[serde(default)]
    pub year: u32,
    #[serde(default)]
    pub isbn: String,
    #[serde(default)]
    pub is_textbook: bool,
    /// `textbook` or `reference`.
    #[serde(default)]
    pub book_type: String,
}

impl SubjectData {
    /// Natural key used to merge the same subject seen in several chunks.
    pub fn natural_key(&self) -> String {
        let code = self.subject_code.trim();
        let name = self.subject_name.trim().to_lowercase();
        if code.is_empty() {
            name
        } else {
            format!("{}|{}", code.to_uppercase(), name)
        }
    }

    /// Whether this entry carries pages that continue the previous subject.
    pub fn is_continuation(&self) -> bool {
        let code = self.subject_code.trim();
        if CONTINUATION_MARKERS
            .iter()
            .any(|m| code.eq_ignore_ascii_case(m))
        {
            return true;
        }
        let name = self.subject_name.trim().to_lowercase();
        if name.is_empty() || PLACEHOLDER_NAMES.contains(&name.as_str()) {
            return code.is_empty() || PLACEHOLDER_NAMES.contains(&code.to_lowercase().as_str());
        }
        if !code.is_empty() {
            return false;
        }

        // Codeless: "Module 3", "Chapter 5: ..." or units that start mid-syllabus
        let placeholder_prefix = PLACEHOLDER_NAMES
            .iter()
            .any(|generic| name.starts_with(&format!("{generic} ")));
        let first_unit = self.units.iter().map(|u| u.unit_number).min();
        placeholder_prefix || first_unit.is_some_and(|n| n >= LATE_FIRST_UNIT)
    }
}

impl UnitData {
    /// Number of populated fields, used to decide which duplicate is more complete.
    pub fn populated_fields(&self) -> usize {
        [
            !self.title.trim().is_empty(),
            !self.description.trim().is_empty(),
            !self.raw_text.trim().is_empty(),
            self.hours > 0,
            !self.topics.is_empty(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }
}

impl BookData {
    pub fn natural_key(&self) -> String {
        self.title.trim().to_lowercase()
    }

    pub fn populated_fields(&self) -> usize {
        [
            !self.title.trim().is_empty(),
            !self.authors.trim().is_empty(),
            !self.publisher.trim().is_empty(),
            !self.edition.trim().is_empty(),
            self.year > 0,
            !self.isbn.trim().is_empty(),
            !self.book_type.trim().is_empty(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_key_prefers_code() {
        let subject = SubjectData {
            subject_name: "Soft Computing ".into(),
            subject_code: "mca 301".into(),
            ..Default::default()
        };
        assert_eq!(subject.natural_key(), "MCA 301|soft computing");

        let nameless = SubjectData {
            subject_name: "Soft Computing".into(),
            ..Default::default()
        };
        assert_eq!(nameless.natural_key(), "soft computing");
    }

    #[test]
    fn test_continuation_detection() {
        let marker = SubjectData {
            subject_code: "continuation_page".into(),
            subject_name: "Whatever".into(),
            ..Default::default()
        };
        assert!(marker.is_continuation());

        let placeholder = SubjectData {
            subject_name: "Unknown".into(),
            ..Default::default()
        };
        assert!(placeholder.is_continuation());

        let real = SubjectData {
            subject_code: "MCA 301".into(),
            subject_name: "Soft Computing".into(),
            ..Default::default()
        };
        assert!(!real.is_continuation());
    }

    #[test]
    fn test_codeless_generic_or_late_subjects_continue() {
        let module = SubjectData {
            subject_name: "Module 3".into(),
            ..Default::default()
        };
        assert!(module.is_continuation());

        let late = SubjectData {
            subject_name: "Soft Computing".into(),
            units: vec![
                UnitData {
                    unit_number: 5,
                    ..Default::default()
                },
                UnitData {
                    unit_number: 4,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert!(late.is_continuation());

        // A real code keeps either one a subject of its own
        let coded = SubjectData {
            subject_code: "MCA 305".into(),
            ..late.clone()
        };
        assert!(!coded.is_continuation());
        let early = SubjectData {
            units: vec![UnitData {
                unit_number: 1,
                ..Default::default()
            }],
            ..late
        };
        assert!(!early.is_continuation());
    }

    #[test]
    fn test_missing_fields_deserialize_to_defaults() {
        let parsed: SyllabusExtraction =
            serde_json::from_str(r#"{"subjects":[{"subject_name":"DBMS","units":[{"unit_number":2}]}]}"#)
                .unwrap();
        let unit = &parsed.subjects[0].units[0];
        assert_eq!(unit.unit_number, 2);
        assert!(unit.title.is_empty());
        assert_eq!(unit.populated_fields(), 0);
    }
}
