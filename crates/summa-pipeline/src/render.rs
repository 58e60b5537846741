//! Summa rendering: dialectical blocks for the top-ranked hypotheses.
//!
//! The composer stage is asked for structured blocks, but its output is
//! accepted in two forms: a JSON `{"blocks": [...]}` object, or a plain-text
//! disputation with `---` separators and the canonical markers. Acceptance is
//! strict (block count, 3/3 triplets, non-empty counter-thesis and answer);
//! a run never fails on rendering, because a deterministic fallback builder
//! can always produce valid blocks from the hypotheses themselves.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::model::{Hypothesis, SummaBlock};
use crate::stage::{extract_json_object, strip_code_fence};

/// Number of top-ranked hypotheses rendered as disputation blocks.
pub const TOP_N: usize = 3;

/// Index (within the full ranked order) of the competing hypothesis whose
/// statement seeds the "on the contrary" of the block for the hypothesis at
/// ranked position `selected`.
///
/// Rank 1 argues against rank 2; every other rank argues against rank 1. The
/// competitor comes from the full ranked order regardless of how many blocks
/// are rendered, so a depth-1 rendering still argues against rank 2. With a
/// single ranked hypothesis there is no competitor.
pub fn competitor_index(selected: usize, ranked_len: usize) -> Option<usize> {
    if ranked_len <= 1 {
        return None;
    }
    match selected {
        0 => Some(1),
        _ => Some(0),
    }
}

fn on_the_contrary(subject: &Hypothesis, competitor: Option<&Hypothesis>) -> String {
    match competitor {
        Some(competitor) => format!("On the contrary, one may hold that {}", competitor.statement),
        None => {
            let objection = subject
                .objections
                .first()
                .map(|o| o.text.as_str())
                .unwrap_or("no objection was recorded");
            format!("On the contrary, the strongest objection states that {objection}")
        }
    }
}

/// Deterministic rendering of the first `top` hypotheses of `ranked` (full
/// ranked order, best first). Used when the composer stage fails both
/// attempts, so the pipeline never ends a run without a disputation.
pub fn fallback_rendering(question: &str, ranked: &[&Hypothesis], top: usize) -> Vec<SummaBlock> {
    ranked
        .iter()
        .take(top)
        .enumerate()
        .map(|(index, subject)| {
            let competitor = competitor_index(index, ranked.len()).map(|p| ranked[p]);
            SummaBlock {
                question: question.to_string(),
                objections: subject.objections.clone(),
                on_the_contrary: on_the_contrary(subject, competitor),
                answer: format!("I answer that {}", subject.statement),
                replies: subject.replies.clone(),
            }
        })
        .collect()
}

/// Parse a composer response into accepted blocks, or a shape-error string
/// that feeds the single retry.
pub fn parse_rendering(raw: &str, question: &str, expected: usize) -> Result<Vec<SummaBlock>, String> {
    let mut blocks = match extract_json_object(raw) {
        Ok(map) => blocks_from_json(&map)?,
        Err(_) => blocks_from_text(&strip_code_fence(raw))?,
    };
    accept_blocks(&mut blocks, question, expected)?;
    Ok(blocks)
}

fn blocks_from_json(map: &crate::stage::JsonMap) -> Result<Vec<SummaBlock>, String> {
    let items = map
        .get("blocks")
        .or_else(|| map.get("summa_rendering"))
        .and_then(Value::as_array)
        .ok_or_else(|| "composer output must include a 'blocks' array".to_string())?;
    items
        .iter()
        .map(|item| {
            serde_json::from_value(item.clone()).map_err(|err| format!("malformed block: {err}"))
        })
        .collect()
}

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*---\s*$").expect("static regex"))
}

fn numbered_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+)[.):]\s*(.+)$").expect("static regex"))
}

/// Parse a plain-text disputation into blocks.
///
/// Each block must carry the five canonical markers in order: `Question:`,
/// `Objections:`, `On the contrary`, `I answer that`, `Replies to objections`.
pub fn blocks_from_text(text: &str) -> Result<Vec<SummaBlock>, String> {
    let mut blocks = Vec::new();
    for (index, chunk) in separator_re().split(text).enumerate() {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            continue;
        }
        blocks.push(block_from_chunk(chunk).map_err(|err| format!("block {}: {err}", index + 1))?);
    }
    if blocks.is_empty() {
        return Err("no disputation blocks found in composer text".to_string());
    }
    Ok(blocks)
}

fn block_from_chunk(chunk: &str) -> Result<SummaBlock, String> {
    #[derive(PartialEq)]
    enum Section {
        Preamble,
        Objections,
        Contrary,
        Answer,
        Replies,
    }

    let mut question = String::new();
    let mut objections = Vec::new();
    let mut contrary_lines: Vec<String> = Vec::new();
    let mut answer_lines: Vec<String> = Vec::new();
    let mut replies = Vec::new();
    let mut section = Section::Preamble;

    for line in chunk.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Question:") {
            question = rest.trim().to_string();
            section = Section::Preamble;
        } else if trimmed.eq_ignore_ascii_case("objections:") {
            section = Section::Objections;
        } else if trimmed.starts_with("On the contrary") {
            section = Section::Contrary;
            contrary_lines.push(trimmed.to_string());
        } else if trimmed.starts_with("I answer that") {
            section = Section::Answer;
            answer_lines.push(trimmed.to_string());
        } else if trimmed.to_ascii_lowercase().starts_with("replies to objections") {
            section = Section::Replies;
        } else if trimmed.is_empty() {
            continue;
        } else {
            match section {
                Section::Objections => {
                    if let Some(caps) = numbered_re().captures(trimmed) {
                        objections.push(crate::model::Objection {
                            number: caps[1].parse().unwrap_or(0),
                            text: caps[2].trim().to_string(),
                        });
                    }
                }
                Section::Replies => {
                    if let Some(caps) = numbered_re().captures(trimmed) {
                        replies.push(crate::model::Reply {
                            objection_number: caps[1].parse().unwrap_or(0),
                            text: caps[2].trim().to_string(),
                        });
                    }
                }
                Section::Contrary => contrary_lines.push(trimmed.to_string()),
                Section::Answer => answer_lines.push(trimmed.to_string()),
                Section::Preamble => {}
            }
        }
    }

    if question.is_empty() {
        return Err("missing 'Question:' marker".to_string());
    }
    if contrary_lines.is_empty() {
        return Err("missing 'On the contrary' marker".to_string());
    }
    if answer_lines.is_empty() {
        return Err("missing 'I answer that' marker".to_string());
    }
    Ok(SummaBlock {
        question,
        objections,
        on_the_contrary: contrary_lines.join(" "),
        answer: answer_lines.join(" "),
        replies,
    })
}

/// Strict acceptance of composed blocks. Normalizes an empty block question
/// to the run question; everything else must already be right.
pub fn accept_blocks(
    blocks: &mut [SummaBlock],
    question: &str,
    expected: usize,
) -> Result<(), String> {
    if blocks.len() != expected {
        return Err(format!(
            "expected {expected} disputation block(s), got {}",
            blocks.len()
        ));
    }
    for (index, block) in blocks.iter_mut().enumerate() {
        let label = index + 1;
        if block.question.trim().is_empty() {
            block.question = question.to_string();
        }
        if block.objections.len() != 3 {
            return Err(format!("block {label} must carry exactly 3 objections"));
        }
        block.objections.sort_by_key(|o| o.number);
        if block.objections.iter().map(|o| o.number).collect::<Vec<_>>() != vec![1, 2, 3] {
            return Err(format!("block {label} objections must be numbered 1, 2, 3"));
        }
        if block.replies.len() != 3 {
            return Err(format!("block {label} must carry exactly 3 replies"));
        }
        block.replies.sort_by_key(|r| r.objection_number);
        if block
            .replies
            .iter()
            .map(|r| r.objection_number)
            .collect::<Vec<_>>()
            != vec![1, 2, 3]
        {
            return Err(format!("block {label} replies must target objections 1, 2, 3"));
        }
        if block.on_the_contrary.trim().is_empty() {
            return Err(format!("block {label} is missing its counter-thesis"));
        }
        if block.answer.trim().is_empty() {
            return Err(format!("block {label} is missing its answer"));
        }
        if block.objections.iter().any(|o| o.text.trim().is_empty())
            || block.replies.iter().any(|r| r.text.trim().is_empty())
        {
            return Err(format!("block {label} has an empty objection or reply"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Objection, Reply};

    fn hypothesis(id: &str, statement: &str) -> Hypothesis {
        Hypothesis {
            id: id.to_string(),
            title: format!("Title {id}"),
            statement: statement.to_string(),
            mechanism_cause: "m".into(),
            empirical_domain: "d".into(),
            theoretical_framework: "f".into(),
            novelty_rationale: "n".into(),
            plausibility_rationale: "p".into(),
            testability_rationale: "t".into(),
            falsifiable_predictions: vec!["pred".into()],
            minimal_experiments: vec!["exp".into()],
            citations: Vec::new(),
            objections: (1..=3)
                .map(|n| Objection {
                    number: n,
                    text: format!("{id} objection {n}"),
                })
                .collect(),
            replies: (1..=3)
                .map(|n| Reply {
                    objection_number: n,
                    text: format!("{id} reply {n}"),
                })
                .collect(),
            pairwise_record: None,
            scores: None,
        }
    }

    #[test]
    fn test_competitor_mapping_ranks() {
        assert_eq!(competitor_index(0, 3), Some(1));
        assert_eq!(competitor_index(1, 3), Some(0));
        assert_eq!(competitor_index(2, 3), Some(0));
        assert_eq!(competitor_index(0, 2), Some(1));
        assert_eq!(competitor_index(0, 1), None);
    }

    #[test]
    fn test_fallback_rendering_pairs_competitors() {
        let h1 = hypothesis("h1", "the first claim holds");
        let h2 = hypothesis("h2", "the second claim holds");
        let h3 = hypothesis("h3", "the third claim holds");
        let blocks = fallback_rendering("Q?", &[&h1, &h2, &h3], 3);

        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].on_the_contrary.contains("the second claim holds"));
        assert!(blocks[1].on_the_contrary.contains("the first claim holds"));
        assert!(blocks[2].on_the_contrary.contains("the first claim holds"));
        assert!(blocks[0].answer.starts_with("I answer that"));
        assert_eq!(blocks[0].objections.len(), 3);
        assert_eq!(blocks[0].replies.len(), 3);
    }

    #[test]
    fn test_fallback_top_one_argues_against_rank_two() {
        let h1 = hypothesis("h1", "the first claim holds");
        let h2 = hypothesis("h2", "the second claim holds");
        let h3 = hypothesis("h3", "the third claim holds");
        let blocks = fallback_rendering("Q?", &[&h1, &h2, &h3], 1);

        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].on_the_contrary.contains("the second claim holds"));
    }

    #[test]
    fn test_fallback_single_survivor_uses_strongest_objection() {
        let h1 = hypothesis("h1", "only claim");
        let blocks = fallback_rendering("Q?", &[&h1], 1);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0]
            .on_the_contrary
            .contains("the strongest objection states that h1 objection 1"));
    }

    #[test]
    fn test_parse_rendering_accepts_json_blocks() {
        let h1 = hypothesis("h1", "claim");
        let h2 = hypothesis("h2", "other claim");
        let blocks = fallback_rendering("Q?", &[&h1, &h2], 2);
        let raw = serde_json::to_string(&serde_json::json!({ "blocks": blocks })).unwrap();
        let parsed = parse_rendering(&raw, "Q?", 2).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].question, "Q?");
    }

    #[test]
    fn test_parse_rendering_accepts_marked_text() {
        let raw = "\
Question: Why?
Objections:
1. first objection
2. second objection
3. third objection
On the contrary, one may hold that the rival view is right.
I answer that the claim holds.
Replies to objections:
1. first reply
2. second reply
3. third reply
";
        let parsed = parse_rendering(raw, "Why?", 1).unwrap();
        assert_eq!(parsed[0].objections.len(), 3);
        assert_eq!(parsed[0].replies[2].objection_number, 3);
        assert!(parsed[0].answer.contains("the claim holds"));
    }

    #[test]
    fn test_parse_rendering_rejects_wrong_block_count() {
        let h1 = hypothesis("h1", "claim");
        let blocks = fallback_rendering("Q?", &[&h1], 1);
        let raw = serde_json::to_string(&serde_json::json!({ "blocks": blocks })).unwrap();
        let err = parse_rendering(&raw, "Q?", 3).unwrap_err();
        assert!(err.contains("expected 3 disputation block(s)"));
    }

    #[test]
    fn test_accept_rejects_bad_numbering() {
        let h1 = hypothesis("h1", "claim");
        let mut blocks = fallback_rendering("Q?", &[&h1], 1);
        blocks[0].objections[2].number = 5;
        let err = accept_blocks(&mut blocks, "Q?", 1).unwrap_err();
        assert!(err.contains("numbered 1, 2, 3"));
    }

    #[test]
    fn test_blocks_from_text_requires_markers() {
        let err = blocks_from_text("just some prose without structure").unwrap_err();
        assert!(err.contains("Question:"));
    }
}
