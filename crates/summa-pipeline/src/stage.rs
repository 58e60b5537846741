//! Stage Runner: invoke the generative collaborator, parse strictly, retry once.
//!
//! The contract: one call, strict parse; on any failure (transport error,
//! unparseable text, shape mismatch) exactly one more call with the failure
//! reason appended as context; a second failure becomes a typed `StageError`.
//! Failure never crosses this boundary as a panic or untyped error.
//!
//! Parsing tolerates surrounding prose and code-fence wrapping: the first
//! well-formed JSON object found in the text is extracted, because the
//! upstream producer is not contractually constrained to emit clean output.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::StageError;
use crate::executor::StageExecutor;
use crate::prompts;

/// JSON object type used for loosely-shaped stage output.
pub type JsonMap = Map<String, Value>;

/// Run one named stage with the retry-once policy.
///
/// `parse` performs the strict parse/shape check on the raw response; its
/// error string becomes the retry context for the second attempt.
pub async fn run_stage<T>(
    executor: &dyn StageExecutor,
    stage: &str,
    prompt: &str,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<T, StageError> {
    let first = attempt(executor, stage, prompt, &parse).await;
    let message = match first {
        Ok(value) => return Ok(value),
        Err(message) => message,
    };

    warn!(stage = %stage, error = %message, "stage attempt failed, retrying once");
    let retry_prompt = prompts::with_retry_context(prompt, &message);
    match attempt(executor, stage, &retry_prompt, &parse).await {
        Ok(value) => {
            info!(stage = %stage, "stage succeeded on retry");
            Ok(value)
        }
        Err(message) => Err(StageError {
            stage: stage.to_string(),
            message,
            retry_attempted: true,
        }),
    }
}

async fn attempt<T>(
    executor: &dyn StageExecutor,
    stage: &str,
    prompt: &str,
    parse: &impl Fn(&str) -> Result<T, String>,
) -> Result<T, String> {
    let raw = executor
        .execute(stage, prompt)
        .await
        .map_err(|err| format!("stage call failed: {err:#}"))?;
    parse(&raw)
}

fn opening_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^```[a-zA-Z]*\s*").expect("static regex"))
}

fn closing_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*```$").expect("static regex"))
}

fn object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static regex"))
}

/// Strip a surrounding markdown code fence, if any.
pub fn strip_code_fence(raw: &str) -> String {
    let text = raw.trim();
    let text = opening_fence_re().replace(text, "");
    closing_fence_re().replace(&text, "").trim().to_string()
}

/// Extract the first well-formed JSON object from raw stage output.
pub fn extract_json_object(raw: &str) -> Result<JsonMap, String> {
    let text = strip_code_fence(raw);

    let parsed: Result<Value, _> = serde_json::from_str(&text);
    let value = match parsed {
        Ok(value) => value,
        Err(_) => {
            let candidate = object_re()
                .find(&text)
                .ok_or_else(|| format!("no JSON object found in stage output: {}", snippet(raw)))?;
            serde_json::from_str(candidate.as_str())
                .map_err(|err| format!("embedded JSON object failed to parse: {err}"))?
        }
    };

    match value {
        Value::Object(map) => Ok(map),
        _ => Err("stage output must be a JSON object".to_string()),
    }
}

/// Extract a JSON object and require a non-empty array under `key`.
pub fn extract_object_with_array(raw: &str, key: &str) -> Result<JsonMap, String> {
    let map = extract_json_object(raw)?;
    match map.get(key).and_then(Value::as_array) {
        Some(items) if !items.is_empty() => Ok(map),
        Some(_) => Err(format!("stage output field '{key}' must be a non-empty array")),
        None => Err(format!("stage output must include a '{key}' array")),
    }
}

fn snippet(raw: &str) -> String {
    raw.chars().take(260).collect::<String>().replace('\n', " ")
}
