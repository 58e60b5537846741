//! Boundary data model for the hypothesis pipeline.
//!
//! Every type here crosses the pipeline boundary: hypotheses and their
//! dialectical triplets, pairwise ranking artifacts, the Summa rendering
//! blocks, and the final `RunPayload`. All of it serializes with snake_case
//! field names and derives a JSON schema so callers can validate the payload
//! independently (see `contract::payload_schema`).

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Fixed weights for the overall score: novelty, plausibility, testability.
pub const SCORE_WEIGHTS: (f64, f64, f64) = (0.35, 0.30, 0.35);

/// Title used for the sentinel citation when retrieval produced no evidence.
pub const NO_CITATIONS_SENTINEL: &str = "No grounded citations found";

/// How a citation entered a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CitationOrigin {
    /// Emitted by the generator and resolved against the evidence set.
    Grounded,
    /// Injected from the evidence set after all generated citations were dropped.
    Fallback,
    /// Placeholder meaning "no grounded citations found" — the evidence set was empty.
    Sentinel,
}

/// A reference embedded in a hypothesis.
///
/// Valid only if it resolves to a retrieved evidence record, or if it is
/// explicitly tagged `Fallback` (still resolvable) or `Sentinel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Citation {
    pub title: String,
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paper_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    pub origin: CitationOrigin,
}

impl Citation {
    /// The sentinel value set when the evidence set itself is empty.
    pub fn sentinel() -> Self {
        Self {
            title: NO_CITATIONS_SENTINEL.to_string(),
            authors: Vec::new(),
            year: None,
            paper_id: None,
            doi: None,
            origin: CitationOrigin::Sentinel,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.origin == CitationOrigin::Sentinel
    }
}

/// One numbered objection against a hypothesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Objection {
    pub number: u32,
    pub text: String,
}

/// A reply, index-aligned to the objection it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Reply {
    pub objection_number: u32,
    pub text: String,
}

/// Result of a single pairwise judgment on one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    A,
    B,
    Tie,
}

/// The three judged dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Novelty,
    Plausibility,
    Testability,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [
        Dimension::Novelty,
        Dimension::Plausibility,
        Dimension::Testability,
    ];
}

/// One unordered pair judged on all three dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PairwiseComparison {
    pub hypothesis_a_id: String,
    pub hypothesis_b_id: String,
    pub winner_novelty: Winner,
    pub winner_plausibility: Winner,
    pub winner_testability: Winner,
}

impl PairwiseComparison {
    /// An explicit tie on every dimension — the default for missing pairs.
    pub fn tie(a: &str, b: &str) -> Self {
        Self {
            hypothesis_a_id: a.to_string(),
            hypothesis_b_id: b.to_string(),
            winner_novelty: Winner::Tie,
            winner_plausibility: Winner::Tie,
            winner_testability: Winner::Tie,
        }
    }

    pub fn winner(&self, dimension: Dimension) -> Winner {
        match dimension {
            Dimension::Novelty => self.winner_novelty,
            Dimension::Plausibility => self.winner_plausibility,
            Dimension::Testability => self.winner_testability,
        }
    }

    pub fn involves(&self, id: &str) -> bool {
        self.hypothesis_a_id == id || self.hypothesis_b_id == id
    }
}

/// Per-dimension win counts for one hypothesis (a tie adds to neither side).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WinCounts {
    pub novelty: u32,
    pub plausibility: u32,
    pub testability: u32,
}

impl WinCounts {
    pub fn get(&self, dimension: Dimension) -> u32 {
        match dimension {
            Dimension::Novelty => self.novelty,
            Dimension::Plausibility => self.plausibility,
            Dimension::Testability => self.testability,
        }
    }

    pub fn add(&mut self, dimension: Dimension) {
        match dimension {
            Dimension::Novelty => self.novelty += 1,
            Dimension::Plausibility => self.plausibility += 1,
            Dimension::Testability => self.testability += 1,
        }
    }
}

/// All pairwise judgments involving one hypothesis, plus its win tallies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PairwiseRecord {
    pub comparisons: Vec<PairwiseComparison>,
    pub wins_by_dimension: WinCounts,
}

/// Derived 1–5 scale values per dimension and the weighted overall score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Scores {
    pub novelty: f64,
    pub plausibility: f64,
    pub testability: f64,
    pub overall: f64,
}

/// A normalized hypothesis.
///
/// The id is assigned by the normalizer (`h1`, `h2`, … in generation order),
/// never taken from the generative service. The normalizer guarantees every
/// textual field is non-empty and the objection/reply triplets hold exactly
/// three index-aligned entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Hypothesis {
    pub id: String,
    pub title: String,
    pub statement: String,
    pub mechanism_cause: String,
    pub empirical_domain: String,
    pub theoretical_framework: String,
    pub novelty_rationale: String,
    pub plausibility_rationale: String,
    pub testability_rationale: String,
    pub falsifiable_predictions: Vec<String>,
    pub minimal_experiments: Vec<String>,
    pub citations: Vec<Citation>,
    pub objections: Vec<Objection>,
    pub replies: Vec<Reply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairwise_record: Option<PairwiseRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<Scores>,
}

/// The fixed disputation structure rendered for one ranked hypothesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SummaBlock {
    pub question: String,
    pub objections: Vec<Objection>,
    pub on_the_contrary: String,
    pub answer: String,
    pub replies: Vec<Reply>,
}

/// Stage failure description carried into a partial-failure payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StageErrorContract {
    pub stage: String,
    pub message: String,
    pub retry_attempted: bool,
}

/// The boundary payload produced by a run.
///
/// On success: every hypothesis field-complete, `ranked_hypothesis_ids` a
/// permutation of the hypothesis ids, `summa_rendering` holding one or three
/// blocks, no `error`. On partial failure: every artifact produced before the
/// failing stage, the raw `stage_outputs` ledger, and a single `error` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunPayload {
    pub question: String,
    pub domain: String,
    pub hypotheses: Vec<Hypothesis>,
    pub ranked_hypothesis_ids: Vec<String>,
    pub summa_rendering: Vec<SummaBlock>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stage_outputs: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageErrorContract>,
}
