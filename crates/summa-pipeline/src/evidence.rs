//! Evidence record model: retrieved documents and the deduplicated set.
//!
//! Records are immutable once retrieved. The set is built by merging the
//! results of up to two queries; merge order is keyed by the record's external
//! id, never by arrival order, so concurrent retrieval cannot change the
//! outcome. When two queries return the same id with differing metadata, the
//! record with a non-empty abstract wins; otherwise the first-seen record is
//! kept.

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::{Citation, CitationOrigin};

/// One retrieved academic document with citation-grade metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EvidenceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_id: Option<String>,
    pub title: String,
    pub authors: Vec<String>,
    pub year: i32,
    /// Empty string when the source had no abstract.
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// The query that first surfaced this record.
    pub source_query: String,
}

impl EvidenceRecord {
    /// Stable identity used for dedup: paper id, else DOI, else title+year.
    pub fn dedupe_key(&self) -> String {
        if let Some(id) = self.paper_id.as_deref().filter(|s| !s.is_empty()) {
            return format!("paper_id:{id}");
        }
        if let Some(doi) = self.doi.as_deref().filter(|s| !s.is_empty()) {
            return format!("doi:{}", normalize_doi(doi));
        }
        format!("title_year:{}::{}", self.title.to_lowercase(), self.year)
    }

    pub fn to_citation(&self, origin: CitationOrigin) -> Citation {
        Citation {
            title: self.title.clone(),
            authors: self.authors.clone(),
            year: Some(self.year),
            paper_id: self.paper_id.clone(),
            doi: self.doi.clone(),
            origin,
        }
    }
}

/// Lowercase, strip a leading `doi:` prefix.
pub fn normalize_doi(value: &str) -> String {
    let normalized = value.trim().to_lowercase();
    normalized
        .strip_prefix("doi:")
        .map(|rest| rest.trim().to_string())
        .unwrap_or(normalized)
}

/// Deduplicated evidence set, preserving first-seen order.
///
/// Invariant: no two records share a dedupe key. First-seen order is the
/// fallback-citation selection order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceSet {
    records: Vec<EvidenceRecord>,
    index: HashMap<String, usize>,
}

impl Serialize for EvidenceSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.records.serialize(serializer)
    }
}

impl EvidenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = EvidenceRecord>) -> Self {
        let mut set = Self::new();
        for record in records {
            set.insert(record);
        }
        set
    }

    /// Insert a record, deduplicating by key.
    ///
    /// A duplicate replaces the stored record (in place, keeping its
    /// position) only when the stored abstract is empty and the new one is
    /// not; otherwise the first-seen record is kept.
    pub fn insert(&mut self, record: EvidenceRecord) {
        let key = record.dedupe_key();
        match self.index.get(&key) {
            None => {
                self.index.insert(key, self.records.len());
                self.records.push(record);
            }
            Some(&position) => {
                let existing = &self.records[position];
                if existing.abstract_text.is_empty() && !record.abstract_text.is_empty() {
                    self.records[position] = record;
                }
            }
        }
    }

    pub fn records(&self) -> &[EvidenceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains_paper_id(&self, paper_id: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.paper_id.as_deref() == Some(paper_id))
    }

    pub fn contains_doi(&self, doi: &str) -> bool {
        let wanted = normalize_doi(doi);
        self.records
            .iter()
            .filter_map(|r| r.doi.as_deref())
            .any(|d| normalize_doi(d) == wanted)
    }
}

/// Status of a retrieval round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStatus {
    Ok,
    NoGroundedCitationsFound,
}

/// Outcome of the Retrieving stage: queries issued, merged evidence, and any
/// per-query errors. Per-query failures degrade the set, they never abort the
/// run — an empty set flows into the sentinel-citation path downstream.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalOutcome {
    pub status: RetrievalStatus,
    pub message: String,
    pub queries: Vec<String>,
    pub errors: Vec<String>,
    pub papers: EvidenceSet,
}

/// The up-to-two queries for a run: the raw question, then the refined query
/// from the framing stage, skipping empties and exact duplicates.
pub fn build_dual_queries(question: &str, refined_query: Option<&str>) -> Vec<String> {
    let mut queries: Vec<String> = Vec::new();
    for candidate in [Some(question), refined_query] {
        let Some(candidate) = candidate else { continue };
        let trimmed = candidate.trim();
        if !trimmed.is_empty() && !queries.iter().any(|q| q == trimmed) {
            queries.push(trimmed.to_string());
        }
    }
    queries
}

/// Merge per-query result lists into one deduplicated set.
///
/// Results are folded in fixed query order, so the merge is independent of
/// which query finished first.
pub fn merge_query_results(result_sets: Vec<Vec<EvidenceRecord>>) -> EvidenceSet {
    let mut merged = EvidenceSet::new();
    for records in result_sets {
        for record in records {
            merged.insert(record);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(paper_id: &str, title: &str, abstract_text: &str) -> EvidenceRecord {
        EvidenceRecord {
            paper_id: Some(paper_id.to_string()),
            title: title.to_string(),
            authors: vec!["A. Author".into()],
            year: 2021,
            abstract_text: abstract_text.to_string(),
            citation_count: Some(10),
            doi: None,
            url: None,
            source_query: "q".into(),
        }
    }

    #[test]
    fn test_merge_with_self_is_idempotent() {
        let a = vec![record("P1", "One", "abs"), record("P2", "Two", "")];
        let merged = merge_query_results(vec![a.clone(), a.clone()]);
        assert_eq!(merged.records(), EvidenceSet::from_records(a).records());
    }

    #[test]
    fn test_duplicate_prefers_non_empty_abstract() {
        let first = record("P1", "One", "");
        let second = record("P1", "One (updated)", "an abstract");
        let merged = merge_query_results(vec![vec![first], vec![second]]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.records()[0].abstract_text, "an abstract");
    }

    #[test]
    fn test_duplicate_with_abstract_keeps_first_seen() {
        let first = record("P1", "One", "original abstract");
        let second = record("P1", "One (later)", "other abstract");
        let merged = merge_query_results(vec![vec![first], vec![second]]);
        assert_eq!(merged.records()[0].title, "One");
        assert_eq!(merged.records()[0].abstract_text, "original abstract");
    }

    #[test]
    fn test_dedupe_key_falls_back_to_doi_then_title_year() {
        let mut r = record("", "Quantum Widgets", "");
        r.paper_id = None;
        r.doi = Some("DOI:10.1000/XYZ".into());
        assert_eq!(r.dedupe_key(), "doi:10.1000/xyz");
        r.doi = None;
        assert_eq!(r.dedupe_key(), "title_year:quantum widgets::2021");
    }

    #[test]
    fn test_build_dual_queries_dedupes_and_skips_empty() {
        assert_eq!(build_dual_queries("q", None), vec!["q".to_string()]);
        assert_eq!(build_dual_queries("q", Some("  ")), vec!["q".to_string()]);
        assert_eq!(build_dual_queries("q", Some("q")), vec!["q".to_string()]);
        assert_eq!(
            build_dual_queries("q", Some("refined")),
            vec!["q".to_string(), "refined".to_string()]
        );
    }

    #[test]
    fn test_contains_doi_normalizes() {
        let mut r = record("P9", "Nine", "");
        r.doi = Some("10.1/ABC".into());
        let set = EvidenceSet::from_records([r]);
        assert!(set.contains_doi("doi:10.1/abc"));
        assert!(!set.contains_doi("10.1/other"));
    }
}
