//! Post-task evaluation against the cartridge's rubric contract.
//!
//! Uses `complete()`: rubric analysis needs the full response before
//! structured parsing. The model is asked for a strict-JSON verdict; the
//! object is extracted from the reply text, which may arrive wrapped in a
//! code fence.

use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use klasta_cartridge::{EvaluationContract, EvaluationOutcome};
use klasta_core::{Exchange, ExchangeRole, ModelConfig};
use klasta_provider::{AiProvider, ChatRequest, Message, ProviderError, Role};

use crate::usage::log_ai_call;

#[derive(Debug, thiserror::Error)]
pub enum EvaluatorError {
    #[error("provider failure: {0}")]
    Provider(#[from] ProviderError),

    #[error("model returned an unparseable verdict: {0}")]
    Verdict(String),
}

/// Structured output of an evaluation pass.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub outcome: EvaluationOutcome,
    /// Human-readable summary (Lithuanian).
    pub summary: String,
    /// Pattern-level breakdown as returned by the model.
    pub details: serde_json::Value,
}

/// Assesses a finished conversation against the evaluation contract.
pub struct Evaluator {
    provider: Arc<dyn AiProvider>,
}

impl Evaluator {
    pub fn new(provider: Arc<dyn AiProvider>) -> Self {
        Self { provider }
    }

    pub async fn evaluate(
        &self,
        exchanges: &[Exchange],
        contract: &EvaluationContract,
        task_id: &str,
        session_id: &str,
        model: &ModelConfig,
    ) -> Result<EvaluationResult, EvaluatorError> {
        let request = ChatRequest {
            system_prompt: build_rubric_prompt(contract),
            messages: vec![Message {
                role: Role::User,
                content: format!(
                    "Įvertink šį pokalbį:\n\n{}",
                    format_transcript(exchanges)
                ),
            }],
            model: model.clone(),
            tools: None,
        };

        let started = Instant::now();
        let completion = self.provider.complete(&request).await?;
        log_ai_call(
            &model.model_id,
            Some(&completion.usage),
            started.elapsed().as_secs_f64() * 1000.0,
            task_id,
            session_id,
            "evaluation",
        );

        parse_verdict(&completion.text)
    }
}

fn build_rubric_prompt(contract: &EvaluationContract) -> String {
    let mut parts: Vec<String> = Vec::new();
    parts.push(
        "Tu esi pokalbio vertintojas. Įvertink, ar mokinys atpažino \
         manipuliacijos metodus pokalbyje su Triksteriu."
            .to_string(),
    );

    if !contract.patterns_embedded.is_empty() {
        parts.push("\n### Įterpti metodai".to_string());
        for pattern in &contract.patterns_embedded {
            parts.push(format!("- {} ({})", pattern.description, pattern.technique));
        }
    }

    if !contract.checklist.is_empty() {
        parts.push("\n### Kontrolinis sarasas".to_string());
        for item in &contract.checklist {
            let mandatory = if item.is_mandatory { " [PRIVALOMA]" } else { "" };
            parts.push(format!("- {}{mandatory}", item.description));
        }
    }

    let pc = &contract.pass_conditions;
    parts.push(format!(
        "\n### Vertinimo salygos\n\
         - trickster_wins: {}\n\
         - partial: {}\n\
         - trickster_loses: {}",
        pc.trickster_wins, pc.partial, pc.trickster_loses
    ));

    parts.push(
        "\nAtsakyk TIK JSON objektu, be jokio kito teksto:\n\
         {\"outcome\": \"trickster_wins|partial|trickster_loses\", \
         \"summary\": \"trumpa santrauka lietuviškai\", \
         \"details\": {}}"
            .to_string(),
    );

    parts.join("\n")
}

fn format_transcript(exchanges: &[Exchange]) -> String {
    exchanges
        .iter()
        .map(|ex| {
            let speaker = match ex.role {
                ExchangeRole::Student => "MOKINYS",
                ExchangeRole::Trickster => "TRIKSTERIS",
            };
            format!("{speaker}: {}", ex.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Extract the JSON object from the reply (the model may wrap it in a code
/// fence) and map it onto the typed result.
fn parse_verdict(text: &str) -> Result<EvaluationResult, EvaluatorError> {
    let trimmed = text.trim();
    let json_str = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end >= start => &trimmed[start..=end],
        _ => trimmed,
    };

    let raw: RawVerdict = serde_json::from_str(json_str).map_err(|e| {
        warn!(error = %e, raw = json_str, "evaluation verdict parse failed");
        EvaluatorError::Verdict(e.to_string())
    })?;

    Ok(EvaluationResult {
        outcome: raw.outcome,
        summary: raw.summary,
        details: raw.details,
    })
}

#[derive(serde::Deserialize)]
struct RawVerdict {
    outcome: EvaluationOutcome,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    details: serde_json::Value,
}
