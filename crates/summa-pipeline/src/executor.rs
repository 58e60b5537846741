//! Generative stage executor: the narrow seam to the text-generation service.
//!
//! The core never assumes anything about the executor beyond
//! `execute(stage, prompt) → raw text`; transport failures and malformed
//! output are treated identically by the stage runner's retry policy.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Settings;

/// One call to the external generative collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Produce raw response text for the given stage prompt.
    async fn execute(&self, stage: &str, prompt: &str) -> Result<String>;
}

/// OpenAI-compatible chat-completions executor.
pub struct OpenAiExecutor {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl OpenAiExecutor {
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: settings.inference_base_url.clone(),
            api_key: settings.inference_api_key.clone(),
            model: settings.model.clone(),
            timeout: settings.inference_timeout,
        }
    }
}

#[async_trait]
impl StageExecutor for OpenAiExecutor {
    async fn execute(&self, stage: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.7,
        });

        let mut request = self.client.post(&url).json(&body).timeout(self.timeout);
        if let Some(key) = self.api_key.as_deref() {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("inference request failed for stage '{stage}'"))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("inference HTTP {status} for stage '{stage}': {detail}");
        }

        let payload: Value = response
            .json()
            .await
            .with_context(|| format!("inference response was not JSON for stage '{stage}'"))?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .to_string();
        if content.is_empty() {
            bail!("inference returned an empty completion for stage '{stage}'");
        }
        debug!(stage = %stage, chars = content.len(), "completion received");
        Ok(content)
    }
}
