//! Output contract: every check the final payload must pass.
//!
//! Violations are collected, never thrown; the orchestrator decides what a
//! violation means. Rendering violations are the only retryable kind (the
//! composer gets one more chance, then the fallback builder runs); any other
//! kind marks the run partially failed.

use std::collections::HashSet;

use crate::evidence::EvidenceSet;
use crate::model::{Hypothesis, RunPayload, SummaBlock, SCORE_WEIGHTS};
use crate::render::TOP_N;

/// Tolerance on the weighted overall score, absorbing rounding drift.
pub const SCORE_TOLERANCE: f64 = 0.06;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// Required fields missing or out of range.
    Structural,
    /// Ranked ids and hypothesis ids disagree.
    ReferentialIntegrity,
    /// Objection/reply triplets off the 1-2-3 pattern.
    Numbering,
    /// Overall score off the weighted formula, or scores out of scale.
    ScoreFormula,
    /// Citation not resolvable against the evidence set.
    CitationGrounding,
    /// Disputation blocks malformed. Retryable: the composer runs once more.
    Rendering,
}

#[derive(Debug, Clone)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
}

impl Violation {
    fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// JSON schema for the boundary payload, for out-of-process validation.
pub fn payload_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(RunPayload)
}

/// True when every violation is of the retryable rendering kind.
pub fn rendering_only(violations: &[Violation]) -> bool {
    !violations.is_empty() && violations.iter().all(|v| v.kind == ViolationKind::Rendering)
}

/// Validate a finished payload against the output contract.
pub fn validate_payload(payload: &RunPayload, evidence: &EvidenceSet) -> Vec<Violation> {
    let mut violations = Vec::new();

    check_structure(payload, &mut violations);
    check_referential_integrity(payload, &mut violations);
    for hypothesis in &payload.hypotheses {
        check_triplets(hypothesis, &mut violations);
        check_scores(hypothesis, &mut violations);
        check_citations(hypothesis, evidence, &mut violations);
    }
    check_rendering(payload, &mut violations);

    violations
}

fn check_structure(payload: &RunPayload, violations: &mut Vec<Violation>) {
    if payload.question.trim().is_empty() {
        violations.push(Violation::new(ViolationKind::Structural, "question is empty"));
    }
    if payload.hypotheses.is_empty() {
        violations.push(Violation::new(
            ViolationKind::Structural,
            "payload carries no hypotheses",
        ));
        return;
    }
    if payload.hypotheses.len() > 5 {
        violations.push(Violation::new(
            ViolationKind::Structural,
            format!("{} hypotheses exceed the maximum of 5", payload.hypotheses.len()),
        ));
    }
    for hypothesis in &payload.hypotheses {
        let id = &hypothesis.id;
        let required = [
            ("title", &hypothesis.title),
            ("statement", &hypothesis.statement),
            ("mechanism_cause", &hypothesis.mechanism_cause),
            ("empirical_domain", &hypothesis.empirical_domain),
            ("theoretical_framework", &hypothesis.theoretical_framework),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                violations.push(Violation::new(
                    ViolationKind::Structural,
                    format!("hypothesis {id} has empty field '{field}'"),
                ));
            }
        }
        if hypothesis.falsifiable_predictions.is_empty() {
            violations.push(Violation::new(
                ViolationKind::Structural,
                format!("hypothesis {id} has no falsifiable predictions"),
            ));
        }
        if hypothesis.citations.is_empty() {
            violations.push(Violation::new(
                ViolationKind::Structural,
                format!("hypothesis {id} has no citations"),
            ));
        }
    }
}

fn check_referential_integrity(payload: &RunPayload, violations: &mut Vec<Violation>) {
    let ids: Vec<&str> = payload.hypotheses.iter().map(|h| h.id.as_str()).collect();
    let unique: HashSet<&str> = ids.iter().copied().collect();
    if unique.len() != ids.len() {
        violations.push(Violation::new(
            ViolationKind::ReferentialIntegrity,
            "hypothesis ids are not unique",
        ));
    }

    let ranked: HashSet<&str> = payload.ranked_hypothesis_ids.iter().map(String::as_str).collect();
    if ranked.len() != payload.ranked_hypothesis_ids.len() {
        violations.push(Violation::new(
            ViolationKind::ReferentialIntegrity,
            "ranked ids contain duplicates",
        ));
    }
    if ranked != unique {
        violations.push(Violation::new(
            ViolationKind::ReferentialIntegrity,
            "ranked ids are not exactly the hypothesis ids",
        ));
    }
}

fn check_triplets(hypothesis: &Hypothesis, violations: &mut Vec<Violation>) {
    let id = &hypothesis.id;
    let objection_numbers: Vec<u32> = hypothesis.objections.iter().map(|o| o.number).collect();
    if objection_numbers != vec![1, 2, 3] {
        violations.push(Violation::new(
            ViolationKind::Numbering,
            format!("hypothesis {id} objections are not numbered 1, 2, 3"),
        ));
    }
    let reply_numbers: Vec<u32> = hypothesis.replies.iter().map(|r| r.objection_number).collect();
    if reply_numbers != vec![1, 2, 3] {
        violations.push(Violation::new(
            ViolationKind::Numbering,
            format!("hypothesis {id} replies do not target objections 1, 2, 3"),
        ));
    }
}

fn check_scores(hypothesis: &Hypothesis, violations: &mut Vec<Violation>) {
    let id = &hypothesis.id;
    let Some(scores) = &hypothesis.scores else {
        violations.push(Violation::new(
            ViolationKind::ScoreFormula,
            format!("hypothesis {id} has no scores"),
        ));
        return;
    };
    for (name, value) in [
        ("novelty", scores.novelty),
        ("plausibility", scores.plausibility),
        ("testability", scores.testability),
        ("overall", scores.overall),
    ] {
        if !(1.0..=5.0).contains(&value) {
            violations.push(Violation::new(
                ViolationKind::ScoreFormula,
                format!("hypothesis {id} score '{name}' is outside 1..=5"),
            ));
        }
    }
    let (w_novelty, w_plausibility, w_testability) = SCORE_WEIGHTS;
    let expected =
        w_novelty * scores.novelty + w_plausibility * scores.plausibility + w_testability * scores.testability;
    if (scores.overall - expected).abs() > SCORE_TOLERANCE {
        violations.push(Violation::new(
            ViolationKind::ScoreFormula,
            format!(
                "hypothesis {id} overall {} deviates from weighted formula {expected:.3}",
                scores.overall
            ),
        ));
    }
}

fn check_citations(hypothesis: &Hypothesis, evidence: &EvidenceSet, violations: &mut Vec<Violation>) {
    let id = &hypothesis.id;
    for citation in &hypothesis.citations {
        if citation.is_sentinel() {
            if !evidence.is_empty() {
                violations.push(Violation::new(
                    ViolationKind::CitationGrounding,
                    format!("hypothesis {id} carries the no-citations sentinel despite evidence"),
                ));
            }
            continue;
        }
        let resolves = citation
            .paper_id
            .as_deref()
            .is_some_and(|p| evidence.contains_paper_id(p))
            || citation.doi.as_deref().is_some_and(|d| evidence.contains_doi(d));
        if !resolves {
            violations.push(Violation::new(
                ViolationKind::CitationGrounding,
                format!("hypothesis {id} citation '{}' does not resolve to evidence", citation.title),
            ));
        }
    }
}

fn check_rendering(payload: &RunPayload, violations: &mut Vec<Violation>) {
    // Full depth, or the single-block depth the run may have been asked for.
    let full = TOP_N.min(payload.ranked_hypothesis_ids.len()).max(1);
    let count = payload.summa_rendering.len();
    if count != full && count != 1 {
        violations.push(Violation::new(
            ViolationKind::Rendering,
            format!("expected {full} or 1 disputation block(s), got {count}"),
        ));
    }
    for (index, block) in payload.summa_rendering.iter().enumerate() {
        check_block(index + 1, block, violations);
    }
}

fn check_block(label: usize, block: &SummaBlock, violations: &mut Vec<Violation>) {
    if block.question.trim().is_empty() {
        violations.push(Violation::new(
            ViolationKind::Rendering,
            format!("block {label} has an empty question"),
        ));
    }
    let objection_numbers: Vec<u32> = block.objections.iter().map(|o| o.number).collect();
    if objection_numbers != vec![1, 2, 3] {
        violations.push(Violation::new(
            ViolationKind::Rendering,
            format!("block {label} objections are not numbered 1, 2, 3"),
        ));
    }
    let reply_numbers: Vec<u32> = block.replies.iter().map(|r| r.objection_number).collect();
    if reply_numbers != vec![1, 2, 3] {
        violations.push(Violation::new(
            ViolationKind::Rendering,
            format!("block {label} replies do not target objections 1, 2, 3"),
        ));
    }
    if block.on_the_contrary.trim().is_empty() {
        violations.push(Violation::new(
            ViolationKind::Rendering,
            format!("block {label} is missing its counter-thesis"),
        ));
    }
    if block.answer.trim().is_empty() {
        violations.push(Violation::new(
            ViolationKind::Rendering,
            format!("block {label} is missing its answer"),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidenceRecord;
    use crate::model::{Citation, CitationOrigin, Objection, Reply, Scores};
    use crate::ranking::round3;
    use crate::render::fallback_rendering;
    use std::collections::BTreeMap;

    fn evidence() -> EvidenceSet {
        EvidenceSet::from_records(vec![EvidenceRecord {
            paper_id: Some("P1".into()),
            title: "Paper P1".into(),
            authors: vec!["A. Author".into()],
            year: 2020,
            abstract_text: "abs".into(),
            citation_count: None,
            doi: Some("10.1/p1".into()),
            url: None,
            source_query: "q".into(),
        }])
    }

    fn hypothesis(id: &str) -> Hypothesis {
        let scores = Scores {
            novelty: 3.0,
            plausibility: 3.0,
            testability: 3.0,
            overall: round3(0.35 * 3.0 + 0.30 * 3.0 + 0.35 * 3.0),
        };
        Hypothesis {
            id: id.to_string(),
            title: format!("Title {id}"),
            statement: format!("Statement {id}"),
            mechanism_cause: "mechanism".into(),
            empirical_domain: "domain".into(),
            theoretical_framework: "framework".into(),
            novelty_rationale: "n".into(),
            plausibility_rationale: "p".into(),
            testability_rationale: "t".into(),
            falsifiable_predictions: vec!["pred".into()],
            minimal_experiments: vec!["exp".into()],
            citations: vec![Citation {
                title: "Paper P1".into(),
                authors: vec!["A. Author".into()],
                year: Some(2020),
                paper_id: Some("P1".into()),
                doi: None,
                origin: CitationOrigin::Grounded,
            }],
            objections: (1..=3)
                .map(|n| Objection {
                    number: n,
                    text: format!("objection {n}"),
                })
                .collect(),
            replies: (1..=3)
                .map(|n| Reply {
                    objection_number: n,
                    text: format!("reply {n}"),
                })
                .collect(),
            pairwise_record: None,
            scores: Some(scores),
        }
    }

    fn payload() -> RunPayload {
        let hypotheses = vec![hypothesis("h1"), hypothesis("h2"), hypothesis("h3")];
        let top: Vec<&Hypothesis> = hypotheses.iter().collect();
        let rendering = fallback_rendering("Q?", &top, top.len());
        RunPayload {
            question: "Q?".into(),
            domain: "general science".into(),
            hypotheses,
            ranked_hypothesis_ids: vec!["h1".into(), "h2".into(), "h3".into()],
            summa_rendering: rendering,
            stage_outputs: BTreeMap::new(),
            error: None,
        }
    }

    #[test]
    fn test_valid_payload_passes() {
        assert!(validate_payload(&payload(), &evidence()).is_empty());
    }

    #[test]
    fn test_ranked_id_mismatch_flagged() {
        let mut payload = payload();
        payload.ranked_hypothesis_ids = vec!["h1".into(), "h9".into()];
        let violations = validate_payload(&payload, &evidence());
        assert!(violations
            .iter()
            .any(|v| v.kind == ViolationKind::ReferentialIntegrity));
    }

    #[test]
    fn test_score_formula_deviation_flagged() {
        let mut payload = payload();
        payload.hypotheses[0].scores.as_mut().unwrap().overall = 4.2;
        let violations = validate_payload(&payload, &evidence());
        assert!(violations.iter().any(|v| v.kind == ViolationKind::ScoreFormula));
    }

    #[test]
    fn test_small_rounding_drift_tolerated() {
        let mut payload = payload();
        payload.hypotheses[0].scores.as_mut().unwrap().overall = 3.05;
        assert!(validate_payload(&payload, &evidence()).is_empty());
    }

    #[test]
    fn test_unresolvable_citation_flagged() {
        let mut payload = payload();
        payload.hypotheses[0].citations[0].paper_id = Some("FAKE".into());
        let violations = validate_payload(&payload, &evidence());
        assert!(violations
            .iter()
            .any(|v| v.kind == ViolationKind::CitationGrounding));
    }

    #[test]
    fn test_sentinel_allowed_only_with_empty_evidence() {
        let mut payload = payload();
        payload.hypotheses[0].citations = vec![Citation::sentinel()];
        let violations = validate_payload(&payload, &evidence());
        assert!(violations
            .iter()
            .any(|v| v.kind == ViolationKind::CitationGrounding));

        payload.hypotheses[1].citations = vec![Citation::sentinel()];
        payload.hypotheses[2].citations = vec![Citation::sentinel()];
        let violations = validate_payload(&payload, &EvidenceSet::new());
        assert!(violations
            .iter()
            .all(|v| v.kind != ViolationKind::CitationGrounding));
    }

    #[test]
    fn test_block_count_mismatch_is_rendering_only() {
        let mut payload = payload();
        payload.summa_rendering.pop();
        let violations = validate_payload(&payload, &evidence());
        assert!(rendering_only(&violations));
    }

    #[test]
    fn test_bad_triplet_numbering_flagged() {
        let mut payload = payload();
        payload.hypotheses[1].objections[0].number = 7;
        let violations = validate_payload(&payload, &evidence());
        assert!(violations.iter().any(|v| v.kind == ViolationKind::Numbering));
        assert!(!rendering_only(&violations));
    }
}
