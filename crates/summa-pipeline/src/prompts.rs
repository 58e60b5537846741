//! Prompt templates for each pipeline stage.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever template content
//! changes, so a logged response can be traced back to the prompt that
//! produced it. Templates use `{key}` placeholders; rendering replaces known
//! keys only and preserves every other literal brace, because several
//! templates embed JSON examples.

/// Prompt version. Bump on any template content change.
pub const PROMPT_VERSION: &str = "2.2.0";

/// Problem Framer: question → structured research memo.
pub const PROBLEM_FRAMER: &str = "\
You are a research problem framer working in the domain of {domain}.
Objective: {objective}

Convert the question below into a structured research memo.

Question: {question}

Return strict JSON only, with this shape:
{\"restated_problem\": \"...\", \"key_variables\": [\"...\"], \
\"assumptions\": [\"...\"], \"refined_query\": \"...\"}

The refined_query must be a literature-search query of at most 12 words.";

/// Literature Scout: retrieved papers → evidence memo.
pub const LITERATURE_SCOUT: &str = "\
You are a literature scout for the domain of {domain}.

Problem memo:
{problem_memo_json}

Retrieved papers:
{retrieval_json}

Summarize the retrieved papers into an evidence memo. Only reference papers
present in the retrieval results; never invent sources.

Return strict JSON only:
{\"evidence_summary\": \"...\", \"key_findings\": [\"...\"], \
\"gaps\": [\"...\"]}";

/// Hypothesis Generator: memos + evidence → 3-5 grounded hypotheses.
pub const HYPOTHESIS_GENERATOR: &str = "\
You are a hypothesis generator for the domain of {domain}.
Objective: {objective}

Question: {question}

Problem memo:
{problem_memo_json}

Evidence memo:
{evidence_memo_json}

Retrieved papers:
{retrieval_json}

Produce 3 to 5 distinct hypotheses grounded in the evidence. Each must name
its causal mechanism, empirical domain, and theoretical framework, and cite
only papers present in the retrieval results (by paper_id or doi).

Return strict JSON only:
{\"hypotheses\": [{\"title\": \"...\", \"statement\": \"...\", \
\"mechanism_cause\": \"...\", \"empirical_domain\": \"...\", \
\"theoretical_framework\": \"...\", \"novelty_rationale\": \"...\", \
\"plausibility_rationale\": \"...\", \"testability_rationale\": \"...\", \
\"falsifiable_predictions\": [\"...\"], \"minimal_experiments\": [\"...\"], \
\"citations\": [{\"title\": \"...\", \"authors\": [\"...\"], \"year\": 2020, \
\"paper_id\": \"...\", \"doi\": \"...\"}]}]}";

/// Critic: stress-test hypotheses, add objections/replies and a
/// distinctness matrix over the three axes.
pub const CRITIC: &str = "\
You are a critic stress-testing research hypotheses in the domain of {domain}.

Question: {question}

Hypotheses:
{hypotheses_json}

For every hypothesis (keep its id unchanged) provide exactly 3 objections
(numbered 1, 2, 3) and 3 replies (reply i answers objection i). Also judge
every pair of hypotheses: a pair is distinct only if it differs on at least
one of causal mechanism, empirical domain, or theoretical framework.

Return strict JSON only:
{\"hypotheses\": [{\"id\": \"...\", \"title\": \"...\", \"statement\": \"...\", \
\"objections\": [{\"number\": 1, \"text\": \"...\"}], \
\"replies\": [{\"objection_number\": 1, \"text\": \"...\"}]}], \
\"distinctness_matrix\": [{\"hypothesis_a_id\": \"...\", \
\"hypothesis_b_id\": \"...\", \"mechanism_distinct\": true, \
\"domain_distinct\": true, \"framework_distinct\": true}]}";

/// Ranker: pairwise comparisons only — never absolute 1-5 ratings, which
/// suffer central-tendency and position bias.
pub const RANKER: &str = "\
You are ranking research hypotheses for the domain of {domain}.

Hypotheses under review:
{critic_json}

Compare every unordered pair of hypotheses on three dimensions: novelty,
plausibility, testability. For each dimension declare \"a\", \"b\", or
\"tie\". Do NOT assign numeric ratings; only pairwise judgments.

Return strict JSON only:
{\"comparisons\": [{\"hypothesis_a_id\": \"...\", \"hypothesis_b_id\": \"...\", \
\"winner_novelty\": \"a\", \"winner_plausibility\": \"tie\", \
\"winner_testability\": \"b\"}]}";

/// Summa Composer: render the top hypotheses in the disputation format.
pub const SUMMA_COMPOSER: &str = "\
You are composing a Summa-style disputation for the domain of {domain}.

Question: {question}

Top hypotheses (best first):
{top_hypotheses_json}

Ranking:
{ranking_json}

Counter-thesis sources, one per block (a null competitor means use the
hypothesis's strongest objection):
{competitors_json}

Render exactly {top_count} block(s), one per top hypothesis in ranking order.
Each block must carry the question, the hypothesis's three objections, an
\"on the contrary\" counter-thesis derived from the listed competitor
statement (or from the strongest objection when the competitor is null),
the hypothesis statement as the answer, and the three replies.

Return strict JSON only:
{\"blocks\": [{\"question\": \"...\", \
\"objections\": [{\"number\": 1, \"text\": \"...\"}], \
\"on_the_contrary\": \"...\", \"answer\": \"...\", \
\"replies\": [{\"objection_number\": 1, \"text\": \"...\"}]}]}";

/// Render `{key}` placeholders while preserving unrelated literal braces.
///
/// A plain formatter is unsafe here: templates embed JSON examples whose
/// braces must survive untouched.
pub fn render(template: &str, inputs: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (key, value) in inputs {
        rendered = rendered.replace(&format!("{{{key}}}"), value);
    }
    rendered
}

/// Append the first attempt's failure reason so the retry can correct itself.
pub fn with_retry_context(prompt: &str, retry_error: &str) -> String {
    format!(
        "{prompt}\n\nRetry context:\nPrevious attempt failed with: {retry_error}\n\
         You must return strict JSON only, with no surrounding prose."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_replaces_known_keys() {
        let rendered = render("ask {question} in {domain}", &[("question", "Q"), ("domain", "D")]);
        assert_eq!(rendered, "ask Q in D");
    }

    #[test]
    fn test_render_preserves_literal_braces() {
        let template = "shape: {\"hypotheses\": []} for {question}";
        let rendered = render(template, &[("question", "Q")]);
        assert_eq!(rendered, "shape: {\"hypotheses\": []} for Q");
    }

    #[test]
    fn test_retry_context_appended() {
        let prompt = with_retry_context("base", "no JSON object found");
        assert!(prompt.starts_with("base\n\nRetry context:"));
        assert!(prompt.contains("no JSON object found"));
    }

    #[test]
    fn test_all_templates_request_strict_json() {
        for template in [
            PROBLEM_FRAMER,
            LITERATURE_SCOUT,
            HYPOTHESIS_GENERATOR,
            CRITIC,
            RANKER,
            SUMMA_COMPOSER,
        ] {
            assert!(template.contains("Return strict JSON only"));
        }
    }
}
