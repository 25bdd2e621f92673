//! The Trickster dialogue orchestration core.
//!
//! Wires the prompt store, context assembler, safety pipeline, and provider
//! contract into the two conversational operations: `respond` (student turn →
//! streamed adversarial reply, possibly transitioning phase) and `debrief`
//! (task complete → streamed honest reveal). The engine is the only code path
//! that mutates a session's exchange list, redaction flag, or prompt
//! snapshot.

pub mod context;
pub mod engine;
pub mod evaluator;
pub mod prompts;
pub mod readiness;
pub mod safety;
pub mod usage;

pub use context::{AssembledContext, ContextAssembler};
pub use engine::{
    DebriefOutcome, DebriefResult, DoneData, EngineError, RedactionData, ReplyOutcome,
    TransitionKind, TricksterEngine, TricksterOutcome,
};
pub use evaluator::{EvaluationResult, Evaluator, EvaluatorError};
pub use prompts::{PromptStore, TricksterPrompts};
