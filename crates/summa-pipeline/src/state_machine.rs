//! Pipeline State Machine — explicit states and legal transition guards.
//!
//! Provides a typed state model for the run loop so that:
//! 1. Every state transition is auditable and logged.
//! 2. Illegal transitions are caught by `advance()` guards.
//! 3. Offline replay can reconstruct the exact sequence of states.
//!
//! The orchestrator calls `advance()` to move between states. Each call
//! validates the transition is legal and records it in the transition log.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The set of pipeline states.
///
/// Every run starts at `Framing` and terminates at either `Succeeded` or
/// `PartiallyFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Turning the question into a structured problem memo.
    Framing,
    /// Dual-query literature search against the evidence source.
    Retrieving,
    /// Summarizing retrieved papers into an evidence memo.
    Scouting,
    /// Producing 3-5 candidate hypotheses grounded in the evidence.
    Generating,
    /// Stress-testing hypotheses: objections, replies, distinctness.
    Critiquing,
    /// Pairwise comparison and score derivation.
    Ranking,
    /// Composing the dialectical disputation blocks.
    Rendering,
    /// Final payload checked against the output contract.
    Validating,
    /// Run completed with a contract-clean payload — terminal state.
    Succeeded,
    /// Run ended with a typed error and best-effort payload — terminal state.
    PartiallyFailed,
}

impl PipelineState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::PartiallyFailed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Framing => write!(f, "Framing"),
            Self::Retrieving => write!(f, "Retrieving"),
            Self::Scouting => write!(f, "Scouting"),
            Self::Generating => write!(f, "Generating"),
            Self::Critiquing => write!(f, "Critiquing"),
            Self::Ranking => write!(f, "Ranking"),
            Self::Rendering => write!(f, "Rendering"),
            Self::Validating => write!(f, "Validating"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::PartiallyFailed => write!(f, "PartiallyFailed"),
        }
    }
}

/// Legal transitions between pipeline states.
///
/// The transition table encodes the valid edges in the state graph:
/// ```text
/// Framing → Retrieving
/// Retrieving → Scouting
/// Scouting → Generating
/// Generating → Critiquing
/// Critiquing → Generating (diversity regeneration, at most once)
/// Critiquing → Ranking
/// Ranking → Rendering
/// Rendering → Rendering (re-composition on rejected blocks)
/// Rendering → Validating
/// Validating → Rendering (re-composition on contract-rejected blocks)
/// Validating → Succeeded
/// any non-terminal → PartiallyFailed
/// ```
///
/// The two re-composition edges share a single at-most-once budget.
fn is_legal_transition(from: PipelineState, to: PipelineState) -> bool {
    use PipelineState::*;

    // Any non-terminal state can end the run partially failed.
    if to == PartiallyFailed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Framing, Retrieving)
            | (Retrieving, Scouting)
            | (Scouting, Generating)
            | (Generating, Critiquing)
            // Too few distinct survivors → regenerate once
            | (Critiquing, Generating)
            | (Critiquing, Ranking)
            | (Ranking, Rendering)
            // Rejected blocks → one re-composition
            | (Rendering, Rendering)
            | (Rendering, Validating)
            // Contract-rejected blocks → one re-composition
            | (Validating, Rendering)
            | (Validating, Succeeded)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// The state transitioned from.
    pub from: PipelineState,
    /// The state transitioned to.
    pub to: PipelineState,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    /// Optional context about why this transition happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: PipelineState,
    pub to: PipelineState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// The pipeline state machine.
///
/// Tracks the current state, enforces legal transitions (including the
/// at-most-once back-edges), and maintains a complete log of transitions for
/// replay and diagnostics.
pub struct StateMachine {
    current: PipelineState,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
    regenerated: bool,
    recomposed: bool,
}

impl StateMachine {
    /// Create a new state machine starting at `Framing`.
    pub fn new() -> Self {
        Self {
            current: PipelineState::Framing,
            created_at: Instant::now(),
            transitions: Vec::new(),
            regenerated: false,
            recomposed: false,
        }
    }

    /// Get the current state.
    pub fn current(&self) -> PipelineState {
        self.current
    }

    /// Attempt to advance to the next state.
    ///
    /// Returns `Err(IllegalTransition)` if the edge is not in the state graph
    /// or a once-only back-edge is taken a second time.
    pub fn advance(
        &mut self,
        to: PipelineState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let back_edge = IllegalTransition {
            from: self.current,
            to,
        };
        if self.current == PipelineState::Critiquing && to == PipelineState::Generating {
            if self.regenerated {
                return Err(back_edge);
            }
            self.regenerated = true;
        }
        if to == PipelineState::Rendering
            && matches!(
                self.current,
                PipelineState::Rendering | PipelineState::Validating
            )
        {
            if self.recomposed {
                return Err(back_edge);
            }
            self.recomposed = true;
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(
            from = %self.current,
            to = %to,
            "State transition"
        );

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Transition to `PartiallyFailed` from any non-terminal state.
    ///
    /// Convenience method — always legal from non-terminal states.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(PipelineState::PartiallyFailed, Some(reason))
    }

    /// Whether the state machine is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Get the full transition log.
    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Get a summary string of the state machine's history.
    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        format!(
            "{} → {} ({}ms, {} transitions)",
            PipelineState::Framing,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        ) + if states.is_empty() {
            String::new()
        } else {
            format!(" [{}]", states.join(" → "))
        }
        .as_str()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
