//! Literature-grounded hypothesis pipeline.
//!
//! Turns a research question into ranked, falsifiable hypotheses rendered in
//! the Summa disputation format: framing, dual-query evidence retrieval,
//! scouting, generation, critique, pairwise ranking, composition, and a final
//! contract validation — all driven through an explicit state machine with a
//! retry-once policy per generative stage.

pub mod config;
pub mod contract;
pub mod error;
pub mod evidence;
pub mod executor;
pub mod format;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod prompts;
pub mod ranking;
pub mod render;
pub mod scholar;
pub mod stage;
pub mod state_machine;

pub use config::Settings;
pub use error::{PipelineError, StageError};
pub use executor::{OpenAiExecutor, StageExecutor};
pub use model::{Hypothesis, RunPayload, SummaBlock};
pub use orchestrator::{Pipeline, RunOptions};
pub use scholar::{SearchClient, SemanticScholarClient};
