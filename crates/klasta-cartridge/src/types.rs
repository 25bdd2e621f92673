use klasta_core::ModelTier;
use serde::{Deserialize, Serialize};

use crate::interaction::Interaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    AiDriven,
    Static,
    Hybrid,
}

/// How the Trickster presents itself within the task content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaMode {
    Presenting,
    ChatParticipant,
    Narrator,
    Commenter,
}

impl PersonaMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonaMode::Presenting => "presenting",
            PersonaMode::ChatParticipant => "chat_participant",
            PersonaMode::Narrator => "narrator",
            PersonaMode::Commenter => "commenter",
        }
    }
}

/// How much student context the AI needs for this task.
///
/// Only `session_only` is fully supported in this revision; the other levels
/// are accepted and downgraded by the context assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextRequirements {
    SessionOnly,
    LearningProfile,
    FullHistory,
}

impl ContextRequirements {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextRequirements::SessionOnly => "session_only",
            ContextRequirements::LearningProfile => "learning_profile",
            ContextRequirements::FullHistory => "full_history",
        }
    }
}

/// How the task connects to the AI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub model_preference: ModelTier,
    pub prompt_directory: String,
    pub persona_mode: PersonaMode,
    pub has_static_fallback: bool,
    pub context_requirements: ContextRequirements,
}

/// Maps Trickster engine signals to target phase IDs.
///
/// All three fields are required. Authors that don't distinguish partial from
/// max_exchanges map both to the same target phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiTransitions {
    pub on_success: String,
    pub on_max_exchanges: String,
    pub on_partial: String,
}

/// Named outcomes for terminal phases: what the evaluation concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationOutcome {
    TricksterWins,
    Partial,
    TricksterLoses,
}

impl EvaluationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationOutcome::TricksterWins => "trickster_wins",
            EvaluationOutcome::Partial => "partial",
            EvaluationOutcome::TricksterLoses => "trickster_loses",
        }
    }
}

/// A single phase in the task state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub visible_blocks: Vec<String>,
    #[serde(default)]
    pub trickster_content: Option<String>,
    #[serde(default)]
    pub is_ai_phase: bool,
    #[serde(default)]
    pub interaction: Option<Interaction>,
    #[serde(default)]
    pub ai_transitions: Option<AiTransitions>,
    #[serde(default)]
    pub is_terminal: bool,
    #[serde(default)]
    pub evaluation_outcome: Option<EvaluationOutcome>,
}

/// One manipulation pattern baked into the task content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedPattern {
    pub id: String,
    pub description: String,
    pub technique: String,
    pub real_world_connection: String,
}

/// What the student should demonstrate to earn credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub pattern_refs: Vec<String>,
    #[serde(default)]
    pub is_mandatory: bool,
}

/// Textual descriptions of each evaluation outcome for this task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassConditions {
    pub trickster_wins: String,
    pub partial: String,
    pub trickster_loses: String,
}

/// The rubric contract between the cartridge author and the evaluator.
///
/// Declares *what* to check: the evaluator decides *how*.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationContract {
    #[serde(default)]
    pub patterns_embedded: Vec<EmbeddedPattern>,
    #[serde(default)]
    pub checklist: Vec<ChecklistItem>,
    pub pass_conditions: PassConditions,
}

/// Post-task reveal: the lesson behind the trick.
///
/// Pre-authored. The AI personalizes *around* this content; the key lesson is
/// always this exact text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealContent {
    pub key_lesson: String,
    #[serde(default)]
    pub additional_resources: Vec<String>,
}

/// Safety guardrails for this task.
///
/// Content boundaries define forbidden output areas; the intensity ceiling
/// caps adversarial pressure on a 1–5 scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default)]
    pub content_boundaries: Vec<String>,
    pub intensity_ceiling: u8,
    pub cold_start_safe: bool,
}

/// The root model for a task cartridge.
///
/// `ai_config` absent means static-only: AI operations are forbidden on this
/// task and the dialogue engine refuses to serve it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCartridge {
    pub task_id: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub ai_config: Option<AiConfig>,
    #[serde(default)]
    pub phases: Vec<Phase>,
    pub evaluation: EvaluationContract,
    pub safety: SafetyConfig,
    pub reveal: RevealContent,
}

impl TaskCartridge {
    /// Parse a cartridge from its authored JSON.
    pub fn from_json(raw: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Look up a phase by id.
    pub fn phase(&self, id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    /// True when at least one phase runs AI dialogue.
    pub fn has_ai_phase(&self) -> bool {
        self.phases.iter().any(|p| p.is_ai_phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cartridge_json() -> &'static str {
        r#"{
            "task_id": "saltiniu-patikra",
            "task_type": "ai_driven",
            "ai_config": {
                "model_preference": "standard",
                "prompt_directory": "saltiniu-patikra",
                "persona_mode": "chat_participant",
                "has_static_fallback": false,
                "context_requirements": "session_only"
            },
            "phases": [
                {
                    "id": "dialogas",
                    "title": "Pokalbis",
                    "is_ai_phase": true,
                    "interaction": {
                        "type": "freeform",
                        "trickster_opening": "Ar tikrai viskuo tiki?",
                        "min_exchanges": 2,
                        "max_exchanges": 10
                    },
                    "ai_transitions": {
                        "on_success": "atskleidimas",
                        "on_partial": "pakartojimas",
                        "on_max_exchanges": "atskleidimas"
                    }
                },
                {"id": "atskleidimas", "title": "Atskleidimas", "is_terminal": true}
            ],
            "evaluation": {
                "patterns_embedded": [
                    {
                        "id": "autoritetas",
                        "description": "Apeliavimas į autoritetą",
                        "technique": "authority_bias",
                        "real_world_connection": "Reklamos su gydytojais"
                    }
                ],
                "checklist": [
                    {"id": "c1", "description": "Paklausė šaltinio", "is_mandatory": true}
                ],
                "pass_conditions": {
                    "trickster_wins": "Mokinys patikėjo",
                    "partial": "Suabejojo, bet nepatikrino",
                    "trickster_loses": "Patikrino šaltinį"
                }
            },
            "safety": {
                "content_boundaries": ["self_harm", "violence"],
                "intensity_ceiling": 3,
                "cold_start_safe": true
            },
            "reveal": {
                "key_lesson": "Autoritetas nėra įrodymas."
            }
        }"#
    }

    #[test]
    fn full_cartridge_parses() {
        let cartridge = TaskCartridge::from_json(cartridge_json()).expect("parse");
        assert_eq!(cartridge.task_id, "saltiniu-patikra");
        assert_eq!(cartridge.task_type, TaskType::AiDriven);
        assert!(cartridge.has_ai_phase());
        assert_eq!(cartridge.phases.len(), 2);
        assert_eq!(
            cartridge.ai_config.as_ref().unwrap().model_preference,
            ModelTier::Standard
        );

        let phase = cartridge.phase("dialogas").expect("phase");
        assert!(phase.is_ai_phase);
        assert!(phase.ai_transitions.is_some());
    }

    #[test]
    fn static_cartridge_has_no_ai_config() {
        let raw = r#"{
            "task_id": "statinis",
            "task_type": "static",
            "phases": [],
            "evaluation": {
                "pass_conditions": {
                    "trickster_wins": "a", "partial": "b", "trickster_loses": "c"
                }
            },
            "safety": {"intensity_ceiling": 1, "cold_start_safe": true},
            "reveal": {"key_lesson": "pamoka"}
        }"#;
        let cartridge: TaskCartridge = serde_json::from_str(raw).expect("parse");
        assert!(cartridge.ai_config.is_none());
        assert!(!cartridge.has_ai_phase());
        assert!(cartridge.safety.content_boundaries.is_empty());
    }

    #[test]
    fn broken_json_surfaces_a_typed_error() {
        let err = TaskCartridge::from_json("{ne json").unwrap_err();
        assert!(matches!(err, crate::error::CartridgeError::Deserialize(_)));
        assert_eq!(err.code(), "CARTRIDGE_INVALID");
    }
}
