//! Error taxonomy for the pipeline core.
//!
//! Three failure classes, with different propagation rules:
//!
//! | Class                | Retried                  | Surfaces as              |
//! |----------------------|--------------------------|--------------------------|
//! | `StageError`         | once, inside the runner  | partial-failure payload  |
//! | `ContractViolation`  | once, rendering only     | partial-failure payload  |
//! | `Configuration`      | never                    | `Err` before any stage   |
//!
//! A run therefore always returns a payload unless its parameters were
//! rejected up front. Stage failures never cross the runner boundary as
//! panics or ad-hoc errors — they are typed results.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::StageErrorContract;

/// Typed failure from a single stage after its retry budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{stage}: {message}")]
pub struct StageError {
    /// Stage name as invoked against the generative collaborator.
    pub stage: String,
    /// The last failure message (second attempt, when a retry happened).
    pub message: String,
    /// Whether the retry-once budget was consumed.
    pub retry_attempted: bool,
}

impl StageError {
    pub fn into_contract(self) -> StageErrorContract {
        StageErrorContract {
            stage: self.stage,
            message: self.message,
            retry_attempted: self.retry_attempted,
        }
    }
}

/// Top-level error returned by `run_pipeline`.
///
/// Only configuration problems surface here; every other failure mode is
/// folded into the returned payload.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid run parameters (empty question, unsupported `top` value).
    /// Rejected before the state machine starts; never retried.
    #[error("configuration error: {0}")]
    Configuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_display() {
        let err = StageError {
            stage: "critic".into(),
            message: "no JSON object found".into(),
            retry_attempted: true,
        };
        assert_eq!(err.to_string(), "critic: no JSON object found");
    }

    #[test]
    fn test_stage_error_into_contract() {
        let err = StageError {
            stage: "ranker".into(),
            message: "missing comparisons".into(),
            retry_attempted: true,
        };
        let contract = err.into_contract();
        assert_eq!(contract.stage, "ranker");
        assert!(contract.retry_attempted);
    }
}
