//! Post-merge field clean-up. Never fails; every fix is a deterministic rewrite.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::ingestion::truncate_chars;
use crate::syllabus::{CONTINUATION_MARKERS, SubjectData, SyllabusExtraction, TopicData, UnitData};

pub const MAX_TITLE_CHARS: usize = 60;
pub const MAX_TITLE_WORDS: usize = 8;
const GENERATED_TITLE_WORDS: usize = 5;
const MIN_TOPIC_CHARS: usize = 3;

const FILLER_WORDS: &[&str] = &[
    "introduction",
    "overview",
    "basics",
    "to",
    "and",
    "or",
    "the",
    "a",
    "an",
];

static UNIT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^UNIT\s*[–\-—]?\s*(\d+|IV|V|III|II|I)\b\s*[:\-–—]?\s*")
        .expect("unit prefix pattern is valid")
});

static ELECTIVE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^Elective\s*[–\-—]\s*(IV|V|I{1,3})\b\s*").expect("elective pattern is valid")
});

static CODE_WITH_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]+\s*\d+)\s*\((\d+)\)$").expect("code pattern is valid")
});

/// Counts of the fixes applied by [`sanitize`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SanitizeReport {
    pub titles_fixed: usize,
    pub units_dropped: usize,
    pub subjects_dropped: usize,
    pub topics_generated: usize,
}

/// Apply every field rule to the merged tree in place.
pub fn sanitize(result: &mut SyllabusExtraction) -> SanitizeReport {
    let mut report = SanitizeReport::default();

    result.subjects.retain(|subject| {
        let code = subject.subject_code.trim();
        let keep = !code.is_empty()
            && !CONTINUATION_MARKERS
                .iter()
                .any(|m| code.eq_ignore_ascii_case(m));
        if !keep {
            info!(name = %subject.subject_name, code, "Dropping subject without a usable code");
            report.subjects_dropped += 1;
        }
        keep
    });

    for subject in &mut result.subjects {
        normalize_subject(subject);

        let before = subject.units.len();
        subject.units.retain(|unit| {
            let keep = !(unit.title.trim().is_empty() && unit.raw_text.trim().is_empty());
            if !keep {
                debug!(unit = unit.unit_number, "Unit has no title or raw text, skipping");
            }
            keep
        });
        report.units_dropped += before - subject.units.len();

        for unit in &mut subject.units {
            let fixed = fix_unit_title(&unit.title, &unit.raw_text, unit.unit_number);
            if fixed != unit.title {
                debug!(
                    unit = unit.unit_number,
                    from = %unit.title,
                    to = %fixed,
                    "Fixed unit title"
                );
                unit.title = fixed;
                report.titles_fixed += 1;
            }
            if fill_topics_from_raw_text(unit) {
                report.topics_generated += 1;
            }
        }
    }

    if report != SanitizeReport::default() {
        info!(
            titles_fixed = report.titles_fixed,
            units_dropped = report.units_dropped,
            subjects_dropped = report.subjects_dropped,
            topics_generated = report.topics_generated,
            "Sanitized merged result"
        );
    }
    report
}

/// Enforce title rules for one unit.
///
/// A title equal to the raw text (or missing) is regenerated from the raw text; a title
/// over the length or word limit is cut at a word boundary.
pub fn fix_unit_title(title: &str, raw_text: &str, unit_number: u32) -> String {
    let fallback = format!("Unit {}", unit_number);

    let mut fixed = if title == raw_text || title.trim().is_empty() {
        create_title_from_text(&clean_unit_title(raw_text), &fallback)
    } else {
        title.trim().to_string()
    };

    let cleaned = clean_unit_title(&fixed);
    fixed = if cleaned.is_empty() {
        // Title was only a "Unit N" prefix
        if raw_text.trim().is_empty() {
            fallback.clone()
        } else {
            create_title_from_text(&clean_unit_title(raw_text), &fallback)
        }
    } else {
        cleaned
    };

    if exceeds_limits(&fixed) {
        fixed = shorten_title(&fixed);
    }
    fixed
}

fn exceeds_limits(title: &str) -> bool {
    title.chars().count() > MAX_TITLE_CHARS || title.split_whitespace().count() > MAX_TITLE_WORDS
}

/// Strip a leading `Unit 1:` / `UNIT – IV` style prefix.
pub fn clean_unit_title(title: &str) -> String {
    UNIT_PREFIX.replace(title.trim(), "").trim().to_string()
}

/// Keep whole words while the title stays within the character and word limits.
pub fn shorten_title(title: &str) -> String {
    let mut shortened = String::new();
    for (count, word) in title.split_whitespace().enumerate() {
        if count >= MAX_TITLE_WORDS {
            break;
        }
        let extra = if shortened.is_empty() { 0 } else { 1 };
        if shortened.chars().count() + extra + word.chars().count() > MAX_TITLE_CHARS {
            break;
        }
        if extra == 1 {
            shortened.push(' ');
        }
        shortened.push_str(word);
    }

    if shortened.is_empty() {
        // First word alone is over the limit
        truncate_chars(title.trim(), MAX_TITLE_CHARS)
    } else {
        shortened
    }
}

/// First few meaningful words of `text`, skipping fillers after the first word.
pub fn create_title_from_text(text: &str, fallback: &str) -> String {
    let mut words: Vec<&str> = Vec::new();
    for word in text.split_whitespace() {
        if words.len() >= GENERATED_TITLE_WORDS {
            break;
        }
        let clean = word.trim_matches(|c| ",.;:!?-–".contains(c));
        if clean.is_empty() {
            continue;
        }
        if words.is_empty() || !FILLER_WORDS.contains(&clean.to_lowercase().as_str()) {
            words.push(clean);
        }
    }

    while words.len() > 1 && words.join(" ").chars().count() > MAX_TITLE_CHARS {
        words.pop();
    }

    match words.as_slice() {
        [] => fallback.to_string(),
        [only] => truncate_chars(only, MAX_TITLE_CHARS),
        _ => words.join(" "),
    }
}

/// Split raw unit text on common separators into topic titles.
pub fn extract_topics_from_raw_text(raw_text: &str) -> Vec<String> {
    let text = raw_text
        .replace(" – ", "|")
        .replace(" - ", "|")
        .replace("; ", "|")
        .replace(", ", "|")
        .replace('\n', "|");

    let mut seen = HashSet::new();
    text.split('|')
        .map(str::trim)
        .filter(|t| t.chars().count() >= MIN_TOPIC_CHARS)
        .filter(|t| seen.insert(t.to_lowercase()))
        .map(str::to_string)
        .collect()
}

fn fill_topics_from_raw_text(unit: &mut UnitData) -> bool {
    if unit.topics.len() > 1 || unit.raw_text.trim().is_empty() {
        return false;
    }
    let extracted = extract_topics_from_raw_text(&unit.raw_text);
    if extracted.len() <= unit.topics.len() {
        return false;
    }
    unit.topics = extracted
        .into_iter()
        .enumerate()
        .map(|(i, title)| TopicData {
            topic_number: i as u32 + 1,
            title,
        })
        .collect();
    true
}

/// Normalize elective subject codes and collapse whitespace.
///
/// `MCA 303 (1)` becomes `MCA 303-(1)`; a name prefixed `Elective –II` moves the index
/// into the code (`MCA 304` → `MCA 304-(2)`).
pub fn normalize_subject(subject: &mut SubjectData) {
    let mut name = subject.subject_name.trim().to_string();
    let code = subject.subject_code.trim().to_string();

    let mut elective_index = None;
    if let Some(caps) = ELECTIVE_PREFIX.captures(&name) {
        elective_index = roman_to_int(&caps[1]);
        name = ELECTIVE_PREFIX.replace(&name, "").trim().to_string();
    }

    let code = if let Some(caps) = CODE_WITH_INDEX.captures(&code) {
        format!("{}-({})", caps[1].trim(), &caps[2])
    } else if let Some(index) = elective_index {
        format!("{}-({})", code, index)
    } else {
        code
    };

    subject.subject_name = collapse_whitespace(&name);
    subject.subject_code = collapse_whitespace(&code);
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn roman_to_int(roman: &str) -> Option<u32> {
    match roman.to_uppercase().as_str() {
        "I" => Some(1),
        "II" => Some(2),
        "III" => Some(3),
        "IV" => Some(4),
        "V" => Some(5),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FUZZY_TEXT: &str = "Fuzzy Logic Crisp & fuzzy sets fuzzy relations fuzzy conditional statements fuzzy rules fuzzy algorithm. Fuzzy logic controller, defuzzification";

    #[test]
    fn test_title_equal_to_raw_text_is_regenerated() {
        let raw = format!("{FUZZY_TEXT} methods");
        assert!(raw.chars().count() > 140);

        let title = fix_unit_title(&raw, &raw, 3);
        assert!(title.chars().count() <= MAX_TITLE_CHARS);
        assert!(title.split_whitespace().count() <= MAX_TITLE_WORDS);
        assert_ne!(title, raw);
        assert_eq!(title, "Fuzzy Logic Crisp & fuzzy");
    }

    #[test]
    fn test_long_title_truncated_at_word_boundary() {
        let title = "Advanced Concepts in Distributed Database Management Systems and Transaction Processing";
        let fixed = fix_unit_title(title, "", 1);
        assert!(fixed.chars().count() <= MAX_TITLE_CHARS);
        assert!(title.starts_with(&fixed));
        assert!(title[fixed.len()..].starts_with(' '));
    }

    #[test]
    fn test_too_many_words_truncated() {
        let title = "A B C D E F G H I J";
        let fixed = fix_unit_title(title, "", 1);
        assert_eq!(fixed, "A B C D E F G H");
    }

    #[test]
    fn test_single_long_word_cut() {
        let word = "x".repeat(90);
        assert_eq!(shorten_title(&word).len(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_good_title_unchanged() {
        assert_eq!(fix_unit_title("Relational Algebra", "Selection, projection", 2), "Relational Algebra");
    }

    #[test]
    fn test_generated_title_skips_fillers() {
        assert_eq!(
            create_title_from_text("Introduction to the Theory of Computation and Automata", "Unit"),
            "Introduction Theory of Computation Automata"
        );
        assert_eq!(create_title_from_text("  ,, ", "Unit 4"), "Unit 4");
    }

    #[test]
    fn test_unit_prefix_removed() {
        assert_eq!(clean_unit_title("Unit 1: Introduction to ML"), "Introduction to ML");
        assert_eq!(clean_unit_title("UNIT – IV Graphs"), "Graphs");
        assert_eq!(clean_unit_title("UNIT-3 Trees"), "Trees");
        assert_eq!(clean_unit_title("Unit Introduction"), "Unit Introduction");
    }

    #[test]
    fn test_prefix_only_title_falls_back() {
        assert_eq!(fix_unit_title("Unit 2", "", 2), "Unit 2");
        assert_eq!(fix_unit_title("Unit 2:", "Sorting, searching", 2), "Sorting searching");
    }

    #[test]
    fn test_topics_from_raw_text() {
        let topics = extract_topics_from_raw_text("Sets; relations, Functions – Sets\nGraphs - ab");
        assert_eq!(topics, vec!["Sets", "relations", "Functions", "Graphs"]);
    }

    #[test]
    fn test_subject_code_normalization() {
        let mut subject = SubjectData {
            subject_code: "MCA 303 (1)".into(),
            subject_name: "Cloud  Computing".into(),
            ..Default::default()
        };
        normalize_subject(&mut subject);
        assert_eq!(subject.subject_code, "MCA 303-(1)");
        assert_eq!(subject.subject_name, "Cloud Computing");

        let mut elective = SubjectData {
            subject_code: "MCA 304".into(),
            subject_name: "Elective –II Machine Learning".into(),
            ..Default::default()
        };
        normalize_subject(&mut elective);
        assert_eq!(elective.subject_code, "MCA 304-(2)");
        assert_eq!(elective.subject_name, "Machine Learning");

        let mut fourth = SubjectData {
            subject_code: "MCA 305".into(),
            subject_name: "Elective-IV Data Mining".into(),
            ..Default::default()
        };
        normalize_subject(&mut fourth);
        assert_eq!(fourth.subject_code, "MCA 305-(4)");
    }

    #[test]
    fn test_sanitize_drops_invalid_entities() {
        let mut result = SyllabusExtraction {
            subjects: vec![
                SubjectData {
                    subject_code: "".into(),
                    subject_name: "No Code".into(),
                    ..Default::default()
                },
                SubjectData {
                    subject_code: "MCA 301".into(),
                    subject_name: "Soft Computing".into(),
                    units: vec![
                        UnitData {
                            unit_number: 1,
                            ..Default::default()
                        },
                        UnitData {
                            unit_number: 2,
                            title: FUZZY_TEXT.into(),
                            raw_text: FUZZY_TEXT.into(),
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                },
            ],
        };

        let report = sanitize(&mut result);
        assert_eq!(report.subjects_dropped, 1);
        assert_eq!(report.units_dropped, 1);
        assert_eq!(report.titles_fixed, 1);
        assert_eq!(report.topics_generated, 1);

        let unit = &result.subjects[0].units[0];
        assert!(unit.title.chars().count() <= MAX_TITLE_CHARS);
        assert!(unit.topics.len() > 1);
        assert_eq!(unit.topics[0].topic_number, 1);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let mut result = SyllabusExtraction {
            subjects: vec![SubjectData {
                subject_code: "MCA 303 (2)".into(),
                subject_name: "Elective –II Cloud".into(),
                units: vec![UnitData {
                    unit_number: 1,
                    title: "Unit 1: Virtualization".into(),
                    raw_text: "Hypervisors, containers".into(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        };
        sanitize(&mut result);
        let once = result.clone();
        let report = sanitize(&mut result);
        assert_eq!(result, once);
        assert_eq!(report, SanitizeReport::default());
    }
}
