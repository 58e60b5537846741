//! Pairwise ranking: comparisons in, per-dimension scores and a total order out.
//!
//! The ranker stage emits only pairwise judgments. This module drops
//! malformed entries, pads every unjudged pair with an explicit tie, tallies
//! per-dimension win counts (a tie awards neither side), maps win counts onto
//! the 1-5 scale by shared average rank position, and derives the weighted
//! overall score. The mapping is deterministic: equal win counts share the
//! average of the rank positions they span, so an all-tie dimension places
//! every hypothesis at exactly 3.0.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::model::{
    Dimension, Hypothesis, PairwiseComparison, PairwiseRecord, Scores, WinCounts, Winner,
    SCORE_WEIGHTS,
};
use crate::stage::JsonMap;

/// Parse the ranker stage payload against the hypothesis set.
///
/// Tolerant by design: entries that are malformed, reference unknown ids,
/// pair a hypothesis with itself, or repeat an already-seen pair are dropped,
/// and every pair the ranker never judged is padded with an explicit all-tie
/// comparison. The only shape failure (feeding the stage retry) is a missing
/// 'comparisons' array.
pub fn parse_comparisons(
    payload: &JsonMap,
    hypotheses: &[Hypothesis],
) -> Result<Vec<PairwiseComparison>, String> {
    let ids: HashSet<&str> = hypotheses.iter().map(|h| h.id.as_str()).collect();
    let items = payload
        .get("comparisons")
        .and_then(Value::as_array)
        .ok_or_else(|| "ranker output must include a 'comparisons' array".to_string())?;

    let mut comparisons: Vec<PairwiseComparison> = Vec::new();
    let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
    for item in items {
        let Ok(comparison) = serde_json::from_value::<PairwiseComparison>(item.clone()) else {
            continue;
        };
        if !ids.contains(comparison.hypothesis_a_id.as_str())
            || !ids.contains(comparison.hypothesis_b_id.as_str())
            || comparison.hypothesis_a_id == comparison.hypothesis_b_id
        {
            continue;
        }
        let key = pair_key(&comparison.hypothesis_a_id, &comparison.hypothesis_b_id);
        if !seen_pairs.insert(key) {
            continue;
        }
        comparisons.push(comparison);
    }

    // Unjudged pairs default to a tie on every dimension.
    for (index, a) in hypotheses.iter().enumerate() {
        for b in &hypotheses[index + 1..] {
            if !seen_pairs.contains(&pair_key(&a.id, &b.id)) {
                comparisons.push(PairwiseComparison::tie(&a.id, &b.id));
            }
        }
    }
    Ok(comparisons)
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Tally wins, attach scores and per-hypothesis pairwise records, and return
/// the ranked id order (best first).
///
/// Ranking order: overall descending, then testability descending, then
/// generation order ascending. A single hypothesis scores 3.0 everywhere.
pub fn apply_ranking(
    hypotheses: &mut [Hypothesis],
    comparisons: &[PairwiseComparison],
) -> Vec<String> {
    let mut wins: HashMap<String, WinCounts> = hypotheses
        .iter()
        .map(|h| (h.id.clone(), WinCounts::default()))
        .collect();

    for comparison in comparisons {
        for dimension in Dimension::ALL {
            match comparison.winner(dimension) {
                Winner::A => {
                    if let Some(counts) = wins.get_mut(comparison.hypothesis_a_id.as_str()) {
                        counts.add(dimension);
                    }
                }
                Winner::B => {
                    if let Some(counts) = wins.get_mut(comparison.hypothesis_b_id.as_str()) {
                        counts.add(dimension);
                    }
                }
                Winner::Tie => {}
            }
        }
    }

    let scales: HashMap<String, [f64; 3]> = scale_by_dimension(hypotheses, &wins);

    for hypothesis in hypotheses.iter_mut() {
        let [novelty, plausibility, testability] = scales[&hypothesis.id];
        let (w_novelty, w_plausibility, w_testability) = SCORE_WEIGHTS;
        let overall = w_novelty * novelty + w_plausibility * plausibility + w_testability * testability;
        hypothesis.scores = Some(Scores {
            novelty: round3(novelty),
            plausibility: round3(plausibility),
            testability: round3(testability),
            overall: round3(overall),
        });
        hypothesis.pairwise_record = Some(PairwiseRecord {
            comparisons: comparisons
                .iter()
                .filter(|c| c.involves(&hypothesis.id))
                .cloned()
                .collect(),
            wins_by_dimension: wins[hypothesis.id.as_str()],
        });
    }

    let mut order: Vec<usize> = (0..hypotheses.len()).collect();
    order.sort_by(|&a, &b| {
        let sa = hypotheses[a].scores.as_ref().map(|s| (s.overall, s.testability));
        let sb = hypotheses[b].scores.as_ref().map(|s| (s.overall, s.testability));
        sb.partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    order.into_iter().map(|i| hypotheses[i].id.clone()).collect()
}

/// Map win counts to the 1-5 scale per dimension.
///
/// Hypotheses are ordered by win count descending (generation order breaks
/// ties in position assignment); equal win counts share the average of the
/// positions they span, and position p over N hypotheses scales to
/// `5 - 4*(p-1)/(N-1)`.
fn scale_by_dimension(
    hypotheses: &[Hypothesis],
    wins: &HashMap<String, WinCounts>,
) -> HashMap<String, [f64; 3]> {
    let n = hypotheses.len();
    let mut scales: HashMap<String, [f64; 3]> = hypotheses
        .iter()
        .map(|h| (h.id.clone(), [3.0; 3]))
        .collect();
    if n <= 1 {
        return scales;
    }

    for (axis, dimension) in Dimension::ALL.into_iter().enumerate() {
        let mut ordered: Vec<&str> = hypotheses.iter().map(|h| h.id.as_str()).collect();
        ordered.sort_by_key(|id| std::cmp::Reverse(wins[*id].get(dimension)));

        let mut start = 0;
        while start < n {
            let count = wins[ordered[start]].get(dimension);
            let mut end = start;
            while end + 1 < n && wins[ordered[end + 1]].get(dimension) == count {
                end += 1;
            }
            // 1-based positions start+1 ..= end+1 share their average.
            let avg_position = (start + end) as f64 / 2.0 + 1.0;
            let scale = 5.0 - 4.0 * (avg_position - 1.0) / (n as f64 - 1.0);
            for id in &ordered[start..=end] {
                if let Some(s) = scales.get_mut(*id) {
                    s[axis] = scale;
                }
            }
            start = end + 1;
        }
    }
    scales
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
