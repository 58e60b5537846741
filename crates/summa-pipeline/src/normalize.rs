//! Hypothesis Normalizer: canonical records out of loosely-shaped output.
//!
//! Every hypothesis leaving this module is field-complete and internally
//! consistent no matter what the generative stage produced. Rules, in order:
//! missing textual fields get deterministic placeholders derived from the
//! hypothesis's position and the question; citations are sanitized against
//! the evidence set (unresolvable ones dropped, fallbacks injected, sentinel
//! when the set is empty); objection/reply triplets are padded to exactly 3,
//! index-aligned; near-duplicate hypotheses flagged by the critic's
//! distinctness matrix are collapsed into the kept representative.
//!
//! Normalization is idempotent: applying it to an already-normalized
//! hypothesis changes nothing.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, info};

use crate::evidence::{normalize_doi, EvidenceSet};
use crate::model::{Citation, CitationOrigin, Hypothesis, Objection, Reply};
use crate::stage::JsonMap;

const MAX_HYPOTHESES: usize = 5;
const FALLBACK_CITATION_LIMIT: usize = 3;
const QUESTION_SNIPPET_LEN: usize = 80;

/// Normalize raw generator output into canonical hypotheses.
///
/// Ids are assigned here (`h1`, `h2`, … in generation order); whatever id the
/// generator invented is discarded. At most five hypotheses are kept.
pub fn normalize_generated(
    payload: &JsonMap,
    evidence: &EvidenceSet,
    question: &str,
) -> Vec<Hypothesis> {
    let raw = payload
        .get("hypotheses")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut normalized = Vec::new();
    for item in raw.iter().filter(|item| item.is_object()) {
        if normalized.len() >= MAX_HYPOTHESES {
            break;
        }
        let position = normalized.len() + 1;
        normalized.push(build_hypothesis(item, position, evidence, question));
    }
    debug!(count = normalized.len(), "generator output normalized");
    normalized
}

fn build_hypothesis(
    item: &Value,
    position: usize,
    evidence: &EvidenceSet,
    question: &str,
) -> Hypothesis {
    let snippet = question_snippet(question);
    let citations = citations_or_fallback(item.get("citations"), evidence);

    Hypothesis {
        id: format!("h{position}"),
        title: text_or(
            item.get("title"),
            &format!("Hypothesis {position} for: {snippet}"),
        ),
        statement: text_or(
            item.get("statement"),
            &format!("Hypothesis {position} offers no stated thesis for: {snippet}"),
        ),
        mechanism_cause: text_or(
            item.get("mechanism_cause"),
            &format!("Causal mechanism for hypothesis {position} was not specified."),
        ),
        empirical_domain: text_or(
            item.get("empirical_domain"),
            &format!("Empirical domain for hypothesis {position} was not specified."),
        ),
        theoretical_framework: text_or(
            item.get("theoretical_framework"),
            &format!("Theoretical framework for hypothesis {position} was not specified."),
        ),
        novelty_rationale: text_or(
            item.get("novelty_rationale"),
            &format!("Novelty rationale for hypothesis {position} was not provided."),
        ),
        plausibility_rationale: text_or(
            item.get("plausibility_rationale"),
            &format!("Plausibility rationale for hypothesis {position} was not provided."),
        ),
        testability_rationale: text_or(
            item.get("testability_rationale"),
            &format!("Testability rationale for hypothesis {position} was not provided."),
        ),
        falsifiable_predictions: text_list_or(
            item.get("falsifiable_predictions"),
            &format!("No falsifiable prediction was provided for hypothesis {position}."),
        ),
        minimal_experiments: text_list_or(
            item.get("minimal_experiments"),
            &format!("No minimal experiment was provided for hypothesis {position}."),
        ),
        citations,
        objections: ensure_objections(item.get("objections")),
        replies: ensure_replies(item.get("replies")),
        pairwise_record: None,
        scores: None,
    }
}

/// Fold critic output into the current hypothesis set.
///
/// Critic items are matched by id; unknown ids are ignored, and hypotheses
/// the critic never mentioned keep their current fields. Only non-empty
/// critic fields replace existing values, so a lazy critic cannot blank out
/// a hypothesis. The 3/3 triplet invariant is re-established afterwards.
pub fn normalize_critic(
    payload: &JsonMap,
    current: Vec<Hypothesis>,
    evidence: &EvidenceSet,
) -> Vec<Hypothesis> {
    let raw = payload.get("hypotheses").and_then(Value::as_array);
    let Some(raw) = raw.filter(|items| !items.is_empty()) else {
        return current;
    };

    let mut by_id: HashMap<&str, &Value> = HashMap::new();
    for item in raw.iter().filter(|item| item.is_object()) {
        if let Some(id) = item.get("id").and_then(Value::as_str) {
            by_id.entry(id).or_insert(item);
        }
    }

    current
        .into_iter()
        .map(|mut hypothesis| {
            if let Some(item) = by_id.get(hypothesis.id.as_str()) {
                apply_critic_item(&mut hypothesis, item, evidence);
            }
            hypothesis
        })
        .collect()
}

fn apply_critic_item(hypothesis: &mut Hypothesis, item: &Value, evidence: &EvidenceSet) {
    update_text(&mut hypothesis.title, item.get("title"));
    update_text(&mut hypothesis.statement, item.get("statement"));
    update_text(&mut hypothesis.mechanism_cause, item.get("mechanism_cause"));
    update_text(&mut hypothesis.empirical_domain, item.get("empirical_domain"));
    update_text(
        &mut hypothesis.theoretical_framework,
        item.get("theoretical_framework"),
    );
    update_text(&mut hypothesis.novelty_rationale, item.get("novelty_rationale"));
    update_text(
        &mut hypothesis.plausibility_rationale,
        item.get("plausibility_rationale"),
    );
    update_text(
        &mut hypothesis.testability_rationale,
        item.get("testability_rationale"),
    );

    if let Some(predictions) = clean_text_list(item.get("falsifiable_predictions")) {
        hypothesis.falsifiable_predictions = predictions;
    }
    if let Some(experiments) = clean_text_list(item.get("minimal_experiments")) {
        hypothesis.minimal_experiments = experiments;
    }

    let critic_citations = sanitize_citations(item.get("citations"), evidence);
    if !critic_citations.is_empty() {
        hypothesis.citations = critic_citations;
    }

    if item.get("objections").is_some() {
        hypothesis.objections = ensure_objections(item.get("objections"));
    }
    if item.get("replies").is_some() {
        hypothesis.replies = ensure_replies(item.get("replies"));
    }
}

/// Collapse hypothesis pairs the critic judged indistinct on every axis.
///
/// Keep/collapse tie-break: the hypothesis with the longer trimmed
/// `mechanism_cause` text is kept (proxy for the more specific mechanism);
/// equal lengths keep the earlier generation-order hypothesis. The collapsed
/// hypothesis's first falsifiable prediction is merged into the kept one's
/// novelty rationale.
pub fn collapse_indistinct(
    hypotheses: Vec<Hypothesis>,
    distinctness_matrix: Option<&Value>,
) -> Vec<Hypothesis> {
    let Some(entries) = distinctness_matrix.and_then(Value::as_array) else {
        return hypotheses;
    };

    let mut hypotheses = hypotheses;
    let mut collapsed_ids: HashSet<String> = HashSet::new();

    for entry in entries {
        let Some(a_id) = entry.get("hypothesis_a_id").and_then(Value::as_str) else {
            continue;
        };
        let Some(b_id) = entry.get("hypothesis_b_id").and_then(Value::as_str) else {
            continue;
        };
        // Missing axis flags count as distinct; only an explicit all-false
        // entry marks a duplicate pair.
        let distinct = flag(entry, "mechanism_distinct")
            || flag(entry, "domain_distinct")
            || flag(entry, "framework_distinct");
        if distinct || a_id == b_id {
            continue;
        }
        if collapsed_ids.contains(a_id) || collapsed_ids.contains(b_id) {
            continue;
        }

        let Some(a_index) = hypotheses.iter().position(|h| h.id == a_id) else {
            continue;
        };
        let Some(b_index) = hypotheses.iter().position(|h| h.id == b_id) else {
            continue;
        };

        let a_len = hypotheses[a_index].mechanism_cause.trim().chars().count();
        let b_len = hypotheses[b_index].mechanism_cause.trim().chars().count();
        let (keep, drop) = if b_len > a_len {
            (b_index, a_index)
        } else {
            (a_index, b_index)
        };

        let removed = hypotheses.remove(drop);
        let keep = if drop < keep { keep - 1 } else { keep };
        if let Some(prediction) = removed.falsifiable_predictions.first() {
            let kept = &mut hypotheses[keep];
            kept.novelty_rationale = format!(
                "{} Absorbed from collapsed duplicate {}: {}",
                kept.novelty_rationale, removed.id, prediction
            );
        }
        info!(
            kept = %hypotheses[keep].id,
            collapsed = %removed.id,
            "indistinct hypothesis pair collapsed"
        );
        collapsed_ids.insert(removed.id);
    }

    hypotheses
}

fn flag(entry: &Value, key: &str) -> bool {
    entry.get(key).and_then(Value::as_bool).unwrap_or(true)
}

/// Guarantee exactly 3 objections numbered 1, 2, 3.
pub fn ensure_objections(raw: Option<&Value>) -> Vec<Objection> {
    let mut objections: Vec<Objection> = Vec::new();
    if let Some(items) = raw.and_then(Value::as_array) {
        for item in items {
            let number = item.get("number").and_then(Value::as_u64);
            let text = item.get("text").and_then(Value::as_str).map(str::trim);
            if let (Some(number), Some(text)) = (number, text) {
                if number >= 1 && !text.is_empty() {
                    objections.push(Objection {
                        number: number as u32,
                        text: text.to_string(),
                    });
                }
            }
        }
    }

    objections.sort_by_key(|o| o.number);
    for n in 1..=3u32 {
        if !objections.iter().any(|o| o.number == n) {
            objections.push(Objection {
                number: n,
                text: format!("Objection {n} was not explicitly provided; further critique required."),
            });
        }
    }
    objections.sort_by_key(|o| o.number);
    objections.truncate(3);
    objections
}

/// Guarantee exactly 3 replies targeting objections 1, 2, 3.
pub fn ensure_replies(raw: Option<&Value>) -> Vec<Reply> {
    let mut replies: Vec<Reply> = Vec::new();
    if let Some(items) = raw.and_then(Value::as_array) {
        for item in items {
            let number = item.get("objection_number").and_then(Value::as_u64);
            let text = item.get("text").and_then(Value::as_str).map(str::trim);
            if let (Some(number), Some(text)) = (number, text) {
                if number >= 1 && !text.is_empty() {
                    replies.push(Reply {
                        objection_number: number as u32,
                        text: text.to_string(),
                    });
                }
            }
        }
    }

    replies.sort_by_key(|r| r.objection_number);
    for n in 1..=3u32 {
        if !replies.iter().any(|r| r.objection_number == n) {
            replies.push(Reply {
                objection_number: n,
                text: format!("Reply to objection {n} requires further elaboration."),
            });
        }
    }
    replies.sort_by_key(|r| r.objection_number);
    replies.truncate(3);
    replies
}

/// Keep only citations that resolve to the evidence set (or carry an explicit
/// fallback/sentinel tag), deduplicated by resolved identity.
pub fn sanitize_citations(raw: Option<&Value>, evidence: &EvidenceSet) -> Vec<Citation> {
    let Some(items) = raw.and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut sanitized: Vec<Citation> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for item in items {
        if origin_of(item) == Some(CitationOrigin::Sentinel) {
            if seen.insert("sentinel".to_string()) {
                sanitized.push(Citation::sentinel());
            }
            continue;
        }

        let Some(title) = item.get("title").and_then(Value::as_str).map(str::trim) else {
            continue;
        };
        if title.is_empty() {
            continue;
        }
        let authors: Vec<String> = item
            .get("authors")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let Some(year) = item.get("year").and_then(Value::as_i64) else {
            continue;
        };
        if authors.is_empty() {
            continue;
        }

        let paper_id = item
            .get("paper_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| evidence.contains_paper_id(id));
        let doi = item
            .get("doi")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|d| evidence.contains_doi(d));
        let key = match (paper_id, doi) {
            (Some(id), _) => format!("paper_id:{id}"),
            (None, Some(d)) => format!("doi:{}", normalize_doi(d)),
            (None, None) => continue,
        };
        if !seen.insert(key) {
            continue;
        }

        let origin = match origin_of(item) {
            Some(CitationOrigin::Fallback) => CitationOrigin::Fallback,
            _ => CitationOrigin::Grounded,
        };
        sanitized.push(Citation {
            title: title.to_string(),
            authors,
            year: Some(year as i32),
            paper_id: paper_id.map(str::to_string),
            doi: doi.map(str::to_string),
            origin,
        });
    }
    sanitized
}

fn origin_of(item: &Value) -> Option<CitationOrigin> {
    match item.get("origin").and_then(Value::as_str) {
        Some("grounded") => Some(CitationOrigin::Grounded),
        Some("fallback") => Some(CitationOrigin::Fallback),
        Some("sentinel") => Some(CitationOrigin::Sentinel),
        _ => None,
    }
}

/// Up to 3 fallback citations in evidence first-seen order.
pub fn fallback_citations(evidence: &EvidenceSet) -> Vec<Citation> {
    evidence
        .records()
        .iter()
        .filter(|record| !record.title.is_empty())
        .filter(|record| (1800..=2100).contains(&record.year))
        .filter(|record| !record.authors.is_empty())
        .filter(|record| record.paper_id.is_some() || record.doi.is_some())
        .take(FALLBACK_CITATION_LIMIT)
        .map(|record| record.to_citation(CitationOrigin::Fallback))
        .collect()
}

fn citations_or_fallback(raw: Option<&Value>, evidence: &EvidenceSet) -> Vec<Citation> {
    let sanitized = sanitize_citations(raw, evidence);
    if !sanitized.is_empty() {
        return sanitized;
    }
    let fallback = fallback_citations(evidence);
    if fallback.is_empty() {
        // Empty evidence set: never fabricate a source.
        return vec![Citation::sentinel()];
    }
    fallback
}

fn text_or(value: Option<&Value>, fallback: &str) -> String {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

fn update_text(target: &mut String, value: Option<&Value>) {
    if let Some(text) = value.and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty()) {
        *target = text.to_string();
    }
}

fn clean_text_list(value: Option<&Value>) -> Option<Vec<String>> {
    let cleaned: Vec<String> = value
        .and_then(Value::as_array)?
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn text_list_or(value: Option<&Value>, fallback: &str) -> Vec<String> {
    clean_text_list(value).unwrap_or_else(|| vec![fallback.to_string()])
}

fn question_snippet(question: &str) -> String {
    let trimmed = question.trim();
    if trimmed.chars().count() <= QUESTION_SNIPPET_LEN {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(QUESTION_SNIPPET_LEN).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidenceRecord;
    use serde_json::json;

    fn evidence_with(ids: &[&str]) -> EvidenceSet {
        EvidenceSet::from_records(ids.iter().map(|id| EvidenceRecord {
            paper_id: Some(id.to_string()),
            title: format!("Paper {id}"),
            authors: vec!["A. Author".into()],
            year: 2020,
            abstract_text: "abs".into(),
            citation_count: Some(1),
            doi: Some(format!("10.1/{id}")),
            url: None,
            source_query: "q".into(),
        }))
    }

    fn generated(items: Value) -> JsonMap {
        match json!({ "hypotheses": items }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_ids_assigned_by_position_never_by_generator() {
        let payload = generated(json!([
            {"id": "weird-7", "title": "First"},
            {"id": "weird-7", "title": "Second"},
        ]));
        let hypotheses = normalize_generated(&payload, &evidence_with(&["P1"]), "Q?");
        assert_eq!(hypotheses[0].id, "h1");
        assert_eq!(hypotheses[1].id, "h2");
    }

    #[test]
    fn test_placeholders_derive_from_position_and_question() {
        let payload = generated(json!([{}]));
        let hypotheses = normalize_generated(&payload, &evidence_with(&["P1"]), "Why is the sky blue?");
        let h = &hypotheses[0];
        assert!(h.title.contains("Hypothesis 1"));
        assert!(h.title.contains("Why is the sky blue?"));
        assert!(h.statement.contains("Hypothesis 1"));
        assert!(h.novelty_rationale.contains("hypothesis 1"));
        assert_eq!(h.falsifiable_predictions.len(), 1);
        assert_eq!(h.minimal_experiments.len(), 1);
    }

    #[test]
    fn test_triplet_padding_marks_missing_indices() {
        let raw = json!({
            "objections": [
                {"number": 1, "text": "First objection"},
                {"number": 3, "text": "Third objection"},
            ],
            "replies": [
                {"objection_number": 2, "text": "Only reply"},
            ],
        });
        let objections = ensure_objections(raw.get("objections"));
        let replies = ensure_replies(raw.get("replies"));

        assert_eq!(objections.len(), 3);
        assert_eq!(objections[0].text, "First objection");
        assert!(objections[1].text.contains("Objection 2 was not explicitly provided"));
        assert_eq!(objections[2].text, "Third objection");

        assert_eq!(replies.len(), 3);
        assert!(replies[0].text.contains("Reply to objection 1"));
        assert_eq!(replies[1].text, "Only reply");
        assert!(replies[2].text.contains("Reply to objection 3"));
    }

    #[test]
    fn test_unresolvable_citations_dropped_and_fallback_injected() {
        let evidence = evidence_with(&["P1", "P2", "P3", "P4"]);
        let payload = generated(json!([{
            "title": "T",
            "citations": [
                {"title": "Invented", "authors": ["Nobody"], "year": 2020, "paper_id": "FAKE"},
            ],
        }]));
        let hypotheses = normalize_generated(&payload, &evidence, "Q");
        let citations = &hypotheses[0].citations;
        assert_eq!(citations.len(), 3);
        assert!(citations.iter().all(|c| c.origin == CitationOrigin::Fallback));
        assert_eq!(citations[0].paper_id.as_deref(), Some("P1"));
    }

    #[test]
    fn test_empty_evidence_yields_sentinel_citation() {
        let payload = generated(json!([{"title": "T"}]));
        let hypotheses = normalize_generated(&payload, &EvidenceSet::new(), "Q");
        assert_eq!(hypotheses[0].citations.len(), 1);
        assert!(hypotheses[0].citations[0].is_sentinel());
    }

    #[test]
    fn test_grounded_citation_resolved_by_doi() {
        let evidence = evidence_with(&["P1"]);
        let raw = json!([{"title": "Paper P1", "authors": ["A"], "year": 2020, "doi": "DOI:10.1/P1"}]);
        let citations = sanitize_citations(Some(&raw), &evidence);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].origin, CitationOrigin::Grounded);
        assert_eq!(citations[0].doi.as_deref(), Some("DOI:10.1/P1"));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let evidence = evidence_with(&["P1", "P2"]);
        let payload = generated(json!([
            {"title": "Only a title", "objections": [{"number": 2, "text": "obj"}]},
            {"statement": "Only a statement"},
        ]));
        let first = normalize_generated(&payload, &evidence, "The question?");

        let reencoded = match json!({ "hypotheses": first }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let second = normalize_generated(&reencoded, &evidence, "The question?");
        assert_eq!(first, second);
    }

    #[test]
    fn test_normalize_idempotent_with_sentinel_citations() {
        let payload = generated(json!([{"title": "T"}]));
        let empty = EvidenceSet::new();
        let first = normalize_generated(&payload, &empty, "Q");
        let reencoded = match json!({ "hypotheses": first }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let second = normalize_generated(&reencoded, &empty, "Q");
        assert_eq!(first, second);
    }

    #[test]
    fn test_critic_merge_updates_only_known_ids() {
        let evidence = evidence_with(&["P1"]);
        let current = normalize_generated(
            &generated(json!([{"title": "A"}, {"title": "B"}])),
            &evidence,
            "Q",
        );
        let critic = match json!({
            "hypotheses": [
                {"id": "h2", "statement": "Critic-updated statement",
                 "objections": [{"number": 1, "text": "sharp objection"}]},
                {"id": "h9", "statement": "Unknown id, ignored"},
            ]
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let merged = normalize_critic(&critic, current.clone(), &evidence);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].statement, current[0].statement);
        assert_eq!(merged[1].statement, "Critic-updated statement");
        assert_eq!(merged[1].objections[0].text, "sharp objection");
        assert!(merged[1].objections[1].text.contains("not explicitly provided"));
    }

    #[test]
    fn test_collapse_keeps_longer_mechanism_and_merges_prediction() {
        let evidence = evidence_with(&["P1"]);
        let payload = generated(json!([
            {"title": "H1", "mechanism_cause": "m"},
            {"title": "H2", "mechanism_cause": "m"},
            {"title": "H3", "mechanism_cause": "short",
             "falsifiable_predictions": ["p3"]},
            {"title": "H4", "mechanism_cause": "a much more specific causal pathway",
             "falsifiable_predictions": ["p4"]},
            {"title": "H5", "mechanism_cause": "m"},
        ]));
        let hypotheses = normalize_generated(&payload, &evidence, "Q");
        let matrix = json!([
            {"hypothesis_a_id": "h3", "hypothesis_b_id": "h4",
             "mechanism_distinct": false, "domain_distinct": false, "framework_distinct": false},
        ]);
        let survivors = collapse_indistinct(hypotheses, Some(&matrix));
        assert_eq!(survivors.len(), 4);
        assert!(survivors.iter().all(|h| h.id != "h3"));
        let kept = survivors.iter().find(|h| h.id == "h4").unwrap();
        assert!(kept.novelty_rationale.contains("h3"));
        assert!(kept.novelty_rationale.contains("p3"));
    }

    #[test]
    fn test_collapse_ignores_pairs_distinct_on_any_axis() {
        let evidence = evidence_with(&["P1"]);
        let hypotheses = normalize_generated(
            &generated(json!([{"title": "A"}, {"title": "B"}, {"title": "C"}])),
            &evidence,
            "Q",
        );
        let matrix = json!([
            {"hypothesis_a_id": "h1", "hypothesis_b_id": "h2",
             "mechanism_distinct": false, "domain_distinct": true, "framework_distinct": false},
            {"hypothesis_a_id": "h1", "hypothesis_b_id": "h3"},
        ]);
        let survivors = collapse_indistinct(hypotheses, Some(&matrix));
        assert_eq!(survivors.len(), 3);
    }
}
