//! Markdown presentation of a finished run.

use std::fmt::Write as _;

use crate::model::{Citation, Hypothesis, RunPayload, SummaBlock};

/// Render the payload as a human-readable markdown report.
pub fn to_markdown(payload: &RunPayload) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Research Question\n");
    let _ = writeln!(out, "> {}\n", payload.question);
    let _ = writeln!(out, "Domain: {}\n", payload.domain);

    if let Some(error) = &payload.error {
        let _ = writeln!(out, "## Run Status\n");
        let _ = writeln!(
            out,
            "**Partially failed** at stage `{}`: {}\n",
            error.stage, error.message
        );
    }

    let _ = writeln!(out, "## Ranked Hypotheses\n");
    if payload.ranked_hypothesis_ids.is_empty() {
        let _ = writeln!(out, "_No ranked hypotheses were produced._\n");
    }
    for (rank, id) in payload.ranked_hypothesis_ids.iter().enumerate() {
        if let Some(hypothesis) = payload.hypotheses.iter().find(|h| h.id == *id) {
            write_hypothesis(&mut out, rank + 1, hypothesis);
        }
    }

    if !payload.summa_rendering.is_empty() {
        let _ = writeln!(out, "## Disputation\n");
        for (index, block) in payload.summa_rendering.iter().enumerate() {
            write_block(&mut out, index + 1, block);
        }
    }

    out
}

fn write_hypothesis(out: &mut String, rank: usize, hypothesis: &Hypothesis) {
    let _ = writeln!(out, "### {rank}. {} (`{}`)\n", hypothesis.title, hypothesis.id);
    let _ = writeln!(out, "{}\n", hypothesis.statement);
    let _ = writeln!(out, "- **Mechanism:** {}", hypothesis.mechanism_cause);
    let _ = writeln!(out, "- **Empirical domain:** {}", hypothesis.empirical_domain);
    let _ = writeln!(
        out,
        "- **Theoretical framework:** {}",
        hypothesis.theoretical_framework
    );
    if let Some(scores) = &hypothesis.scores {
        let _ = writeln!(
            out,
            "- **Scores:** novelty {:.3}, plausibility {:.3}, testability {:.3}, overall {:.3}",
            scores.novelty, scores.plausibility, scores.testability, scores.overall
        );
    }
    if !hypothesis.falsifiable_predictions.is_empty() {
        let _ = writeln!(out, "- **Falsifiable predictions:**");
        for prediction in &hypothesis.falsifiable_predictions {
            let _ = writeln!(out, "  - {prediction}");
        }
    }
    if !hypothesis.minimal_experiments.is_empty() {
        let _ = writeln!(out, "- **Minimal experiments:**");
        for experiment in &hypothesis.minimal_experiments {
            let _ = writeln!(out, "  - {experiment}");
        }
    }
    let _ = writeln!(out, "- **Citations:**");
    for citation in &hypothesis.citations {
        let _ = writeln!(out, "  - {}", format_citation(citation));
    }
    let _ = writeln!(out);
}

fn format_citation(citation: &Citation) -> String {
    if citation.is_sentinel() {
        return format!("_{}_", citation.title);
    }
    let mut parts = vec![citation.title.clone()];
    if !citation.authors.is_empty() {
        parts.push(citation.authors.join(", "));
    }
    if let Some(year) = citation.year {
        parts.push(year.to_string());
    }
    if let Some(doi) = &citation.doi {
        parts.push(format!("doi:{doi}"));
    } else if let Some(paper_id) = &citation.paper_id {
        parts.push(format!("id:{paper_id}"));
    }
    parts.join(" — ")
}

fn write_block(out: &mut String, index: usize, block: &SummaBlock) {
    let _ = writeln!(out, "### Article {index}\n");
    let _ = writeln!(out, "**Question:** {}\n", block.question);
    let _ = writeln!(out, "**Objections:**\n");
    for objection in &block.objections {
        let _ = writeln!(out, "{}. {}", objection.number, objection.text);
    }
    let _ = writeln!(out, "\n{}\n", block.on_the_contrary);
    let _ = writeln!(out, "{}\n", block.answer);
    let _ = writeln!(out, "**Replies to objections:**\n");
    for reply in &block.replies {
        let _ = writeln!(out, "{}. {}", reply.objection_number, reply.text);
    }
    let _ = writeln!(out, "\n---\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CitationOrigin, Objection, Reply, Scores, StageErrorContract};
    use std::collections::BTreeMap;

    fn payload() -> RunPayload {
        let hypothesis = Hypothesis {
            id: "h1".into(),
            title: "Thermal gradients drive banding".into(),
            statement: "Banding emerges from thermal gradients.".into(),
            mechanism_cause: "gradient-driven diffusion".into(),
            empirical_domain: "metallurgy".into(),
            theoretical_framework: "reaction-diffusion theory".into(),
            novelty_rationale: "n".into(),
            plausibility_rationale: "p".into(),
            testability_rationale: "t".into(),
            falsifiable_predictions: vec!["banding disappears in isothermal melts".into()],
            minimal_experiments: vec!["controlled cooling assay".into()],
            citations: vec![Citation {
                title: "On Banding".into(),
                authors: vec!["A. Smith".into()],
                year: Some(2019),
                paper_id: Some("P1".into()),
                doi: Some("10.1/x".into()),
                origin: CitationOrigin::Grounded,
            }],
            objections: vec![Objection {
                number: 1,
                text: "obj".into(),
            }],
            replies: vec![Reply {
                objection_number: 1,
                text: "rep".into(),
            }],
            pairwise_record: None,
            scores: Some(Scores {
                novelty: 5.0,
                plausibility: 3.0,
                testability: 1.0,
                overall: 3.0,
            }),
        };
        RunPayload {
            question: "Why do alloys band?".into(),
            domain: "metallurgy".into(),
            hypotheses: vec![hypothesis],
            ranked_hypothesis_ids: vec!["h1".into()],
            summa_rendering: vec![SummaBlock {
                question: "Why do alloys band?".into(),
                objections: vec![Objection {
                    number: 1,
                    text: "first objection".into(),
                }],
                on_the_contrary: "On the contrary, one may hold otherwise.".into(),
                answer: "I answer that banding is thermal.".into(),
                replies: vec![Reply {
                    objection_number: 1,
                    text: "first reply".into(),
                }],
            }],
            stage_outputs: BTreeMap::new(),
            error: None,
        }
    }

    #[test]
    fn test_markdown_carries_ranked_hypotheses_and_disputation() {
        let md = to_markdown(&payload());
        assert!(md.contains("# Research Question"));
        assert!(md.contains("### 1. Thermal gradients drive banding (`h1`)"));
        assert!(md.contains("overall 3.000"));
        assert!(md.contains("doi:10.1/x"));
        assert!(md.contains("### Article 1"));
        assert!(md.contains("I answer that banding is thermal."));
    }

    #[test]
    fn test_markdown_reports_partial_failure() {
        let mut payload = payload();
        payload.error = Some(StageErrorContract {
            stage: "ranker".into(),
            message: "exhausted its retry".into(),
            retry_attempted: true,
        });
        let md = to_markdown(&payload);
        assert!(md.contains("## Run Status"));
        assert!(md.contains("`ranker`"));
    }
}
