use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced an exchange turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeRole {
    Student,
    Trickster,
}

/// One turn in the conversation. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub role: ExchangeRole,
    pub content: String,
    /// RFC3339 creation instant.
    pub created_at: DateTime<Utc>,
}

impl Exchange {
    pub fn new(role: ExchangeRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// A recorded student choice from a button phase.
///
/// The payload is opaque to the AI layer; only `context_label` is read, for
/// injection into the system prompt of later AI phases.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChoiceRecord {
    pub context_label: Option<String>,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// The four prompt layers captured into a session on its first AI call.
///
/// Only layers that were actually loaded are stored. Once set, the snapshot
/// never changes for the lifetime of the task attempt: live sessions must
/// not see mid-flight prompt drift after a content hot-reload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PromptSnapshot {
    pub persona: Option<String>,
    pub behaviour: Option<String>,
    pub safety: Option<String>,
    pub task_override: Option<String>,
}

/// Mutable conversation state for one student's task attempt.
///
/// Mutated only by the trickster engine. Everything else reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSession {
    pub id: String,
    pub student_id: String,
    pub current_task: Option<String>,
    pub current_phase: Option<String>,
    pub exchanges: Vec<Exchange>,
    pub choices: Vec<ChoiceRecord>,
    /// One-shot: set when the last AI reply was redacted, cleared by the next
    /// successful context assembly.
    pub last_redaction_reason: Option<String>,
    pub prompt_snapshots: Option<PromptSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GameSession {
    pub fn new(student_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            student_id: student_id.into(),
            current_task: None,
            current_phase: None,
            exchanges: Vec::new(),
            choices: Vec::new(),
            last_redaction_reason: None,
            prompt_snapshots: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of student-role turns so far.
    pub fn student_exchange_count(&self) -> usize {
        self.exchanges
            .iter()
            .filter(|e| e.role == ExchangeRole::Student)
            .count()
    }

    pub fn push_student(&mut self, content: impl Into<String>) {
        self.exchanges
            .push(Exchange::new(ExchangeRole::Student, content));
        self.updated_at = Utc::now();
    }

    pub fn push_trickster(&mut self, content: impl Into<String>) {
        self.exchanges
            .push(Exchange::new(ExchangeRole::Trickster, content));
        self.updated_at = Utc::now();
    }
}
