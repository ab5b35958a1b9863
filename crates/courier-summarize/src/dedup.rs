use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{NoExpand, Regex};
use serde::Serialize;

use courier_types::EmailRecord;

const BLOCK_SEPARATOR: &str = "\n\n";
const FALLBACK_KEY_CHARS: usize = 20;

fn subject_line() -> &'static Regex {
    static SUBJECT: OnceLock<Regex> = OnceLock::new();
    SUBJECT.get_or_init(|| Regex::new(r"(?m)^Subject:\s*(.*)$").expect("valid subject regex"))
}

/// First `Subject:` header value in the block, trimmed.
pub fn extract_subject(block: &str) -> Option<String> {
    subject_line()
        .captures(block)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Splits a corpus on blank lines into trimmed, non-empty records.
pub fn parse_records(text: &str) -> Vec<EmailRecord> {
    text.split(BLOCK_SEPARATOR)
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(|block| EmailRecord::new(extract_subject(block), block))
        .collect()
}

fn grouping_key(record: &EmailRecord) -> String {
    match &record.subject {
        Some(subject) => subject.clone(),
        None => record.raw_block.chars().take(FALLBACK_KEY_CHARS).collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CondensedEntry {
    pub record: EmailRecord,
    pub occurrences: usize,
}

/// Representatives in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CondensedCorpus {
    entries: Vec<CondensedEntry>,
}

impl CondensedCorpus {
    pub fn entries(&self) -> &[CondensedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of records that went in.
    pub fn total_records(&self) -> usize {
        self.entries.iter().map(|e| e.occurrences).sum()
    }

    pub fn to_text(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.record.raw_block.as_str())
            .collect::<Vec<_>>()
            .join(BLOCK_SEPARATOR)
    }
}

/// Groups records by subject (exact match, no case folding) and keeps the
/// first record of each group. Repeated groups get ` (xN)` appended to the
/// representative's first subject line.
pub fn condense(records: &[EmailRecord]) -> CondensedCorpus {
    let mut order: Vec<CondensedEntry> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let key = grouping_key(record);
        match index.get(&key) {
            Some(&slot) => order[slot].occurrences += 1,
            None => {
                index.insert(key, order.len());
                order.push(CondensedEntry {
                    record: record.clone(),
                    occurrences: 1,
                });
            }
        }
    }

    for entry in order.iter_mut().filter(|e| e.occurrences > 1) {
        if let Some(subject) = entry.record.subject.as_deref() {
            let line = format!("Subject: {subject} (x{})", entry.occurrences);
            entry.record.raw_block = subject_line()
                .replacen(&entry.record.raw_block, 1, NoExpand(&line))
                .into_owned();
        }
    }

    CondensedCorpus { entries: order }
}

/// [`parse_records`] then [`condense`], rendered back to corpus text.
pub fn condense_text(text: &str) -> String {
    condense(&parse_records(text)).to_text()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn repeated_subject_collapses_with_count() {
        let corpus = "From: a\nSubject: Report\nSnippet1\n\nFrom: b\nSubject: Report\nSnippet2";
        let condensed = condense(&parse_records(corpus));
        assert_eq!(condensed.len(), 1);
        assert_eq!(condensed.entries()[0].occurrences, 2);
        assert_eq!(
            condensed.entries()[0].record.raw_block,
            "From: a\nSubject: Report (x2)\nSnippet1"
        );
    }

    #[test]
    fn groups_keep_first_appearance_order() {
        let corpus = "Subject: B\nx\n\nSubject: A\ny\n\nSubject: A\nz\n\nSubject: B\nw\n\nSubject: A\nv";
        let condensed = condense(&parse_records(corpus));
        let subjects = condensed
            .entries()
            .iter()
            .map(|e| e.record.raw_block.lines().next().unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(subjects, vec!["Subject: B (x2)", "Subject: A (x3)"]);
    }

    #[test]
    fn subjects_differing_by_case_stay_apart() {
        let corpus = "Subject: report\n1\n\nSubject: Report\n2";
        assert_eq!(condense(&parse_records(corpus)).len(), 2);
    }

    #[test]
    fn blocks_without_subject_group_by_leading_characters() {
        let corpus = "From: newsletter@shop.example\nsale one\n\nFrom: newsletter@shop.example\nsale two";
        let condensed = condense(&parse_records(corpus));
        assert_eq!(condensed.len(), 1);
        assert_eq!(condensed.entries()[0].occurrences, 2);
        assert_eq!(
            condensed.entries()[0].record.raw_block,
            "From: newsletter@shop.example\nsale one"
        );
    }

    #[test]
    fn only_the_first_subject_line_is_rewritten() {
        let corpus = "Subject: Hi\nQuoted:\nSubject: Hi\n\nSubject: Hi\nagain";
        let condensed = condense(&parse_records(corpus));
        assert_eq!(
            condensed.entries()[0].record.raw_block,
            "Subject: Hi (x2)\nQuoted:\nSubject: Hi"
        );
    }

    #[test]
    fn dollar_signs_in_subjects_are_literal() {
        let corpus = "Subject: $1 off\na\n\nSubject: $1 off\nb";
        assert!(condense_text(corpus).starts_with("Subject: $1 off (x2)"));
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(condense(&[]).is_empty());
        assert_eq!(condense_text("\n\n  \n\n"), "");
    }

    #[test]
    fn unique_subjects_are_a_fixed_point() {
        let corpus = "Subject: One\na\n\nSubject: Two (x3)\nb";
        let once = condense_text(corpus);
        assert_eq!(once, corpus);
        assert_eq!(condense_text(&once), once);
    }

    proptest! {
        #[test]
        fn occurrences_account_for_every_record(subjects in proptest::collection::vec(0u8..5, 0..40)) {
            let records = subjects
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    let block = format!("Subject: topic {s}\nbody {i}");
                    EmailRecord::new(extract_subject(&block), block)
                })
                .collect::<Vec<_>>();
            let condensed = condense(&records);
            let mut distinct = subjects.clone();
            distinct.sort_unstable();
            distinct.dedup();
            prop_assert_eq!(condensed.total_records(), records.len());
            prop_assert_eq!(condensed.len(), distinct.len());
        }
    }
}
