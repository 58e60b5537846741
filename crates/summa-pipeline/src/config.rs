//! Runtime settings, sourced from the environment with sensible defaults.

use std::time::Duration;

use crate::error::PipelineError;

/// Top-level pipeline settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Model name passed to the chat-completions endpoint.
    pub model: String,
    /// OpenAI-compatible inference base URL (`…/v1`).
    pub inference_base_url: String,
    pub inference_api_key: Option<String>,
    pub inference_timeout: Duration,
    /// Domain label used when the caller does not provide one.
    pub default_domain: String,
    /// Objective line injected into framing/generation prompts.
    pub default_objective: String,
    pub semantic_scholar_base_url: String,
    pub semantic_scholar_api_key: Option<String>,
    pub semantic_scholar_timeout: Duration,
    /// Papers requested per search query (clamped to 1..=100 by the client).
    pub per_query_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: env_or("SUMMA_MODEL", "gpt-4o-mini"),
            inference_base_url: env_or("SUMMA_INFERENCE_URL", "https://api.openai.com/v1"),
            inference_api_key: std::env::var("SUMMA_INFERENCE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok()),
            inference_timeout: Duration::from_secs(env_parse("SUMMA_INFERENCE_TIMEOUT_SECS", 120)),
            default_domain: env_or("SUMMA_DOMAIN", "general science"),
            default_objective: env_or(
                "SUMMA_OBJECTIVE",
                "produce literature-grounded, falsifiable research hypotheses",
            ),
            semantic_scholar_base_url: env_or(
                "SUMMA_SCHOLAR_URL",
                "https://api.semanticscholar.org",
            ),
            semantic_scholar_api_key: std::env::var("SEMANTIC_SCHOLAR_API_KEY").ok(),
            semantic_scholar_timeout: Duration::from_secs(env_parse(
                "SUMMA_SCHOLAR_TIMEOUT_SECS",
                30,
            )),
            per_query_limit: env_parse("SUMMA_PER_QUERY_LIMIT", 10),
        }
    }
}

impl Settings {
    /// Reject settings a run cannot start with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.model.trim().is_empty() {
            return Err(PipelineError::Configuration("model name is empty".into()));
        }
        if self.inference_base_url.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "inference base URL is empty".into(),
            ));
        }
        if self.per_query_limit == 0 {
            return Err(PipelineError::Configuration(
                "per-query limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
