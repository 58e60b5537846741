//! Run loop: drives the state machine from question to final payload.
//!
//! Failure policy: configuration problems are the only hard errors. Every
//! stage failure after the single retry ends the run through the
//! `PartiallyFailed` edge with a best-effort payload carrying the typed
//! error and the per-stage output ledger. Rendering is special twice over:
//! a failed composition falls back to the deterministic builder, and
//! rendering-only contract violations trigger one recomposition before the
//! fallback, so a run never dies on presentation.

use serde_json::Value;
use tracing::{info, warn};

use crate::config::Settings;
use crate::contract::{rendering_only, validate_payload};
use crate::error::{PipelineError, StageError};
use crate::evidence::EvidenceSet;
use crate::executor::StageExecutor;
use crate::model::{Hypothesis, RunPayload, SummaBlock};
use crate::normalize::{collapse_indistinct, normalize_critic, normalize_generated};
use crate::prompts;
use crate::ranking::{apply_ranking, parse_comparisons};
use crate::render::{competitor_index, fallback_rendering, parse_rendering, TOP_N};
use crate::scholar::{retrieve_evidence, SearchClient};
use crate::stage::{extract_json_object, extract_object_with_array, run_stage};
use crate::state_machine::{PipelineState, StateMachine};

/// Minimum distinct hypotheses before the diversity regeneration kicks in.
const MIN_DISTINCT: usize = 3;

/// Per-run inputs.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub question: String,
    pub domain: Option<String>,
    pub objective: Option<String>,
    /// Number of top hypotheses rendered: 1 or [`TOP_N`]; anything else is a
    /// configuration error.
    pub top: usize,
}

impl RunOptions {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            domain: None,
            objective: None,
            top: TOP_N,
        }
    }
}

/// The pipeline orchestrator.
pub struct Pipeline<'a> {
    executor: &'a dyn StageExecutor,
    search: &'a dyn SearchClient,
    settings: &'a Settings,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        executor: &'a dyn StageExecutor,
        search: &'a dyn SearchClient,
        settings: &'a Settings,
    ) -> Self {
        Self {
            executor,
            search,
            settings,
        }
    }

    /// Run the full pipeline.
    ///
    /// `Err` only for configuration problems; every run that starts returns
    /// `Ok` with either a contract-clean payload or a partial payload whose
    /// `error` names the stage that ended it.
    pub async fn run(&self, options: RunOptions) -> Result<RunPayload, PipelineError> {
        self.settings.validate()?;
        if options.question.trim().is_empty() {
            return Err(PipelineError::Configuration("question is empty".into()));
        }
        if options.top != 1 && options.top != TOP_N {
            return Err(PipelineError::Configuration(format!(
                "rendering depth must be 1 or {TOP_N}, got {}",
                options.top
            )));
        }

        let question = options.question.trim().to_string();
        let domain = options
            .domain
            .clone()
            .unwrap_or_else(|| self.settings.default_domain.clone());
        let objective = options
            .objective
            .clone()
            .unwrap_or_else(|| self.settings.default_objective.clone());

        let mut sm = StateMachine::new();
        let mut draft = Draft::new(&question, &domain);
        info!(question = %question, domain = %domain, "pipeline run started");

        // Framing
        let framer_prompt = prompts::render(
            prompts::PROBLEM_FRAMER,
            &[
                ("question", &question),
                ("domain", &domain),
                ("objective", &objective),
            ],
        );
        let problem_memo = match run_stage(
            self.executor,
            "problem_framer",
            &framer_prompt,
            extract_json_object,
        )
        .await
        {
            Ok(memo) => memo,
            Err(err) => return Ok(draft.partial(&mut sm, err)),
        };
        draft.record("problem_framer", Value::Object(problem_memo.clone()));
        let refined_query = problem_memo
            .get("refined_query")
            .and_then(Value::as_str)
            .map(str::to_string);

        // Retrieving never ends a run; empty evidence degrades to the
        // sentinel-citation path downstream.
        advance(&mut sm, PipelineState::Retrieving, None);
        let retrieval = retrieve_evidence(self.search, &question, refined_query.as_deref()).await;
        draft.record(
            "retrieval",
            serde_json::to_value(&retrieval).unwrap_or(Value::Null),
        );
        let evidence = retrieval.papers.clone();
        info!(
            papers = evidence.len(),
            status = ?retrieval.status,
            "evidence retrieval finished"
        );

        // Scouting
        advance(&mut sm, PipelineState::Scouting, None);
        let problem_memo_json = to_json_string(&Value::Object(problem_memo.clone()));
        let retrieval_json = to_json_string(&serde_json::to_value(&retrieval).unwrap_or(Value::Null));
        let scout_prompt = prompts::render(
            prompts::LITERATURE_SCOUT,
            &[
                ("domain", &domain),
                ("problem_memo_json", &problem_memo_json),
                ("retrieval_json", &retrieval_json),
            ],
        );
        let evidence_memo = match run_stage(
            self.executor,
            "literature_scout",
            &scout_prompt,
            extract_json_object,
        )
        .await
        {
            Ok(memo) => memo,
            Err(err) => return Ok(draft.partial(&mut sm, err)),
        };
        draft.record("literature_scout", Value::Object(evidence_memo.clone()));
        let evidence_memo_json = to_json_string(&Value::Object(evidence_memo));

        // Generating
        advance(&mut sm, PipelineState::Generating, None);
        let generator_prompt = prompts::render(
            prompts::HYPOTHESIS_GENERATOR,
            &[
                ("question", &question),
                ("domain", &domain),
                ("objective", &objective),
                ("problem_memo_json", &problem_memo_json),
                ("evidence_memo_json", &evidence_memo_json),
                ("retrieval_json", &retrieval_json),
            ],
        );
        let mut hypotheses = match self
            .generate(&generator_prompt, "hypothesis_generator", &evidence, &question, &mut draft)
            .await
        {
            Ok(hypotheses) => hypotheses,
            Err(err) => return Ok(draft.partial(&mut sm, err)),
        };
        draft.hypotheses = hypotheses.clone();

        // Critiquing
        advance(&mut sm, PipelineState::Critiquing, None);
        hypotheses = match self
            .critique(&question, &domain, hypotheses, &evidence, &mut draft)
            .await
        {
            Ok(hypotheses) => hypotheses,
            Err(err) => return Ok(draft.partial(&mut sm, err)),
        };

        // Diversity regeneration: one full regenerate-and-recritique pass
        // when the collapse left too few distinct hypotheses. Failure here
        // keeps the survivors instead of ending the run.
        if hypotheses.len() < MIN_DISTINCT {
            let reason = format!("{} distinct survivors, need {MIN_DISTINCT}", hypotheses.len());
            advance(&mut sm, PipelineState::Generating, Some(&reason));
            match self
                .regenerate_for_diversity(
                    &generator_prompt,
                    &hypotheses,
                    &evidence,
                    &question,
                    &mut draft,
                )
                .await
            {
                Ok(regenerated) => {
                    advance(&mut sm, PipelineState::Critiquing, None);
                    match self
                        .critique(&question, &domain, regenerated, &evidence, &mut draft)
                        .await
                    {
                        Ok(recritiqued) if recritiqued.len() >= hypotheses.len() => {
                            hypotheses = recritiqued;
                        }
                        Ok(recritiqued) => {
                            warn!(
                                regenerated = recritiqued.len(),
                                survivors = hypotheses.len(),
                                "diversity retry produced fewer hypotheses, keeping survivors"
                            );
                        }
                        Err(err) => {
                            warn!(error = %err, "diversity recritique failed, keeping survivors");
                        }
                    }
                }
                Err(err) => {
                    advance(&mut sm, PipelineState::Critiquing, Some("regeneration failed"));
                    warn!(error = %err, "diversity regeneration failed, keeping survivors");
                }
            }
        }
        draft.hypotheses = hypotheses.clone();

        // Ranking
        advance(&mut sm, PipelineState::Ranking, None);
        let comparisons = if hypotheses.len() <= 1 {
            Vec::new()
        } else {
            let critic_json = to_json_string(&serde_json::to_value(&hypotheses).unwrap_or(Value::Null));
            let ranker_prompt =
                prompts::render(prompts::RANKER, &[("domain", &domain), ("critic_json", &critic_json)]);
            let parse = |raw: &str| {
                let map = extract_json_object(raw)?;
                parse_comparisons(&map, &hypotheses)
            };
            match run_stage(self.executor, "ranker", &ranker_prompt, parse).await {
                Ok(comparisons) => comparisons,
                Err(err) => return Ok(draft.partial(&mut sm, err)),
            }
        };
        let ranked_ids = apply_ranking(&mut hypotheses, &comparisons);
        draft.record(
            "ranker",
            serde_json::to_value(&comparisons).unwrap_or(Value::Null),
        );
        draft.hypotheses = hypotheses.clone();
        draft.ranked_ids = ranked_ids.clone();

        // Rendering
        advance(&mut sm, PipelineState::Rendering, None);
        let ranked: Vec<&Hypothesis> = ranked_ids
            .iter()
            .filter_map(|id| hypotheses.iter().find(|h| h.id == *id))
            .collect();
        let top_count = options.top.min(ranked.len()).max(1);
        let rendering = self
            .compose(&mut sm, &question, &domain, &ranked, top_count)
            .await;
        draft.rendering = rendering;

        // Validating
        advance(&mut sm, PipelineState::Validating, None);
        let mut payload = draft.clone().into_payload();
        let mut violations = validate_payload(&payload, &evidence);
        if rendering_only(&violations) {
            warn!(count = violations.len(), "rendering violations, rebuilding blocks");
            advance(&mut sm, PipelineState::Rendering, Some("blocks rejected by contract"));
            let rebuilt = fallback_rendering(&question, &ranked, top_count);
            payload.summa_rendering = rebuilt.clone();
            draft.rendering = rebuilt;
            advance(&mut sm, PipelineState::Validating, Some("deterministic recomposition"));
            violations = validate_payload(&payload, &evidence);
        }

        if violations.is_empty() {
            advance(&mut sm, PipelineState::Succeeded, None);
            payload.stage_outputs.clear();
            payload.error = None;
            info!(summary = %sm.summary(), "pipeline run succeeded");
            return Ok(payload);
        }

        let messages: Vec<&str> = violations.iter().map(|v| v.message.as_str()).collect();
        let err = StageError {
            stage: "contract_validation".into(),
            message: messages.join("; "),
            retry_attempted: false,
        };
        Ok(draft.partial(&mut sm, err))
    }

    async fn generate(
        &self,
        prompt: &str,
        stage: &str,
        evidence: &EvidenceSet,
        question: &str,
        draft: &mut Draft,
    ) -> Result<Vec<Hypothesis>, StageError> {
        let parse = |raw: &str| {
            let map = extract_object_with_array(raw, "hypotheses")?;
            let hypotheses = normalize_generated(&map, evidence, question);
            if hypotheses.is_empty() {
                return Err("no usable hypothesis objects in generator output".to_string());
            }
            Ok((map, hypotheses))
        };
        let (map, hypotheses) = run_stage(self.executor, stage, prompt, parse).await?;
        draft.record(stage, Value::Object(map));
        Ok(hypotheses)
    }

    async fn regenerate_for_diversity(
        &self,
        generator_prompt: &str,
        survivors: &[Hypothesis],
        evidence: &EvidenceSet,
        question: &str,
        draft: &mut Draft,
    ) -> Result<Vec<Hypothesis>, StageError> {
        let survivors_json = to_json_string(&serde_json::to_value(survivors).unwrap_or(Value::Null));
        let prompt = format!(
            "{generator_prompt}\n\nDiversity context:\nAn earlier attempt collapsed to these \
             hypotheses:\n{survivors_json}\nGenerate a fresh set of hypotheses that are mutually \
             distinct in causal mechanism, empirical domain, and theoretical framework."
        );
        self.generate(
            &prompt,
            "hypothesis_generator_diversity_retry",
            evidence,
            question,
            draft,
        )
        .await
    }

    async fn critique(
        &self,
        question: &str,
        domain: &str,
        hypotheses: Vec<Hypothesis>,
        evidence: &EvidenceSet,
        draft: &mut Draft,
    ) -> Result<Vec<Hypothesis>, StageError> {
        let hypotheses_json = to_json_string(&serde_json::to_value(&hypotheses).unwrap_or(Value::Null));
        let prompt = prompts::render(
            prompts::CRITIC,
            &[
                ("question", question),
                ("domain", domain),
                ("hypotheses_json", &hypotheses_json),
            ],
        );
        let parse = |raw: &str| extract_object_with_array(raw, "hypotheses");
        let map = run_stage(self.executor, "critic", &prompt, parse).await?;
        draft.record("critic", Value::Object(map.clone()));

        let merged = normalize_critic(&map, hypotheses, evidence);
        Ok(collapse_indistinct(merged, map.get("distinctness_matrix")))
    }

    /// Compose the disputation blocks for the first `top_count` hypotheses of
    /// `ranked` (full ranked order, best first). On a double composer failure
    /// the state machine takes its recomposition self-loop and the
    /// deterministic builder supplies the blocks; this stage never ends the
    /// run.
    async fn compose(
        &self,
        sm: &mut StateMachine,
        question: &str,
        domain: &str,
        ranked: &[&Hypothesis],
        top_count: usize,
    ) -> Vec<SummaBlock> {
        if ranked.is_empty() {
            return Vec::new();
        }
        let expected = top_count.min(ranked.len()).max(1);
        let selected = &ranked[..expected];

        let top_json = to_json_string(&serde_json::to_value(selected).unwrap_or(Value::Null));
        let ranked_ids: Vec<&str> = ranked.iter().map(|h| h.id.as_str()).collect();
        let ranking_json = to_json_string(&serde_json::to_value(&ranked_ids).unwrap_or(Value::Null));
        // The counter-thesis competitor comes from the full ranked order, so
        // a depth-1 rendering still argues against the runner-up.
        let competitors: Vec<Value> = (0..expected)
            .map(|index| match competitor_index(index, ranked.len()) {
                Some(p) => serde_json::json!({
                    "block": index + 1,
                    "competitor_id": ranked[p].id,
                    "competitor_statement": ranked[p].statement,
                }),
                None => serde_json::json!({ "block": index + 1, "competitor_id": Value::Null }),
            })
            .collect();
        let competitors_json = to_json_string(&Value::Array(competitors));
        let top_count_text = expected.to_string();
        let prompt = prompts::render(
            prompts::SUMMA_COMPOSER,
            &[
                ("question", question),
                ("domain", domain),
                ("top_hypotheses_json", &top_json),
                ("ranking_json", &ranking_json),
                ("competitors_json", &competitors_json),
                ("top_count", &top_count_text),
            ],
        );
        let parse = |raw: &str| parse_rendering(raw, question, expected);
        match run_stage(self.executor, "summa_composer", &prompt, parse).await {
            Ok(blocks) => blocks,
            Err(err) => {
                warn!(error = %err, "composer failed, using deterministic rendering");
                advance(sm, PipelineState::Rendering, Some("deterministic fallback"));
                fallback_rendering(question, ranked, expected)
            }
        }
    }
}

fn advance(sm: &mut StateMachine, to: PipelineState, reason: Option<&str>) {
    // Edges here are all taken from the legal table; a rejection would be an
    // orchestrator bug, which the log must surface without killing the run.
    if let Err(err) = sm.advance(to, reason) {
        warn!(error = %err, "state machine rejected transition");
    }
}

fn to_json_string(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

/// Mutable run scratchpad the partial-failure path snapshots from.
#[derive(Clone)]
struct Draft {
    question: String,
    domain: String,
    hypotheses: Vec<Hypothesis>,
    ranked_ids: Vec<String>,
    rendering: Vec<SummaBlock>,
    ledger: std::collections::BTreeMap<String, Value>,
}

impl Draft {
    fn new(question: &str, domain: &str) -> Self {
        Self {
            question: question.to_string(),
            domain: domain.to_string(),
            hypotheses: Vec::new(),
            ranked_ids: Vec::new(),
            rendering: Vec::new(),
            ledger: Default::default(),
        }
    }

    fn record(&mut self, stage: &str, output: Value) {
        self.ledger.insert(stage.to_string(), output);
    }

    fn into_payload(self) -> RunPayload {
        RunPayload {
            question: self.question,
            domain: self.domain,
            hypotheses: self.hypotheses,
            ranked_hypothesis_ids: self.ranked_ids,
            summa_rendering: self.rendering,
            stage_outputs: self.ledger,
            error: None,
        }
    }

    fn partial(self, sm: &mut StateMachine, err: StageError) -> RunPayload {
        warn!(stage = %err.stage, error = %err.message, "run ending partially failed");
        if sm.fail(&err.to_string()).is_err() {
            warn!("state machine already terminal");
        }
        let mut payload = self.into_payload();
        payload.error = Some(err.into_contract());
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_options_default_top() {
        let options = RunOptions::new("Why?");
        assert_eq!(options.top, TOP_N);
        assert!(options.domain.is_none());
    }
}
