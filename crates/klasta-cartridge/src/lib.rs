//! The task cartridge data model: the contract between content authors and
//! the AI layer.
//!
//! A cartridge bundles everything one authored task needs: its phase state
//! machine, AI configuration, evaluation rubric, safety guardrails, and the
//! post-task reveal. Schema validation and the on-disk registry live with the
//! platform; this crate defines the shapes the dialogue core reads.

mod error;
mod interaction;
mod types;

pub use error::{CartridgeError, Result};
pub use interaction::{ButtonChoice, Interaction};
pub use types::{
    AiConfig, AiTransitions, ChecklistItem, ContextRequirements, EmbeddedPattern,
    EvaluationContract, EvaluationOutcome, PassConditions, PersonaMode, Phase, RevealContent,
    SafetyConfig, TaskCartridge, TaskType,
};
