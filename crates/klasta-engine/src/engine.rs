//! The Trickster dialogue engine: streaming, safety, transitions.
//!
//! `respond` and `debrief` drive one provider call each: session mutation
//! happens before and after streaming, never during. Text tokens are fanned
//! to the caller's channel while the engine accumulates the reply,
//! intercepts tool calls, retries a malformed response once, and applies the
//! output safety check after the stream ends. The resolved outcome is the
//! operation's return value, read after the channel drains.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use klasta_cartridge::{AiTransitions, Interaction, Phase, TaskCartridge};
use klasta_core::{resolve_tier, GameSession};
use klasta_provider::{
    AiProvider, ChatRequest, ProviderError, StreamEvent, UsageInfo,
};

use crate::context::ContextAssembler;
use crate::prompts::PromptStore;
use crate::safety;
use crate::usage::log_ai_call;

/// Minimum reply length (characters) before the malformed-response retry.
const MIN_RESPONSE_CHARS: usize = 10;

/// Event channel depth between the provider task and the engine.
const STREAM_CHANNEL_DEPTH: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("phase '{phase}' does not have a freeform interaction")]
    NotFreeformPhase { phase: String },

    #[error("phase '{phase}' does not have ai_transitions")]
    MissingTransitions { phase: String },

    #[error("task '{task}' does not have an ai_config")]
    MissingAiConfig { task: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("provider failure: {0}")]
    Provider(#[from] ProviderError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Short error code string surfaced at the transport boundary.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFreeformPhase { .. } => "INVALID_PHASE",
            EngineError::MissingTransitions { .. } => "INVALID_PHASE",
            EngineError::MissingAiConfig { .. } => "AI_NOT_CONFIGURED",
            EngineError::Cancelled => "AI_TIMEOUT",
            EngineError::Provider(e) => e.code(),
            EngineError::Internal(_) => "STREAM_ERROR",
        }
    }
}

/// A transition signal extracted from the model's tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionSignal {
    Understood,
    Partial,
    MaxReached,
}

impl TransitionSignal {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "understood" => Some(TransitionSignal::Understood),
            "partial" => Some(TransitionSignal::Partial),
            "max_reached" => Some(TransitionSignal::MaxReached),
            _ => None,
        }
    }

    fn kind(self) -> TransitionKind {
        match self {
            TransitionSignal::Understood => TransitionKind::OnSuccess,
            TransitionSignal::Partial => TransitionKind::OnPartial,
            TransitionSignal::MaxReached => TransitionKind::OnMaxExchanges,
        }
    }
}

/// Which entry of the phase's transition map fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    OnSuccess,
    OnPartial,
    OnMaxExchanges,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::OnSuccess => "on_success",
            TransitionKind::OnPartial => "on_partial",
            TransitionKind::OnMaxExchanges => "on_max_exchanges",
        }
    }

    fn target(self, transitions: &AiTransitions) -> String {
        match self {
            TransitionKind::OnSuccess => transitions.on_success.clone(),
            TransitionKind::OnPartial => transitions.on_partial.clone(),
            TransitionKind::OnMaxExchanges => transitions.on_max_exchanges.clone(),
        }
    }
}

/// Post-completion metadata for a safe dialogue reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoneData {
    pub phase_transition: Option<TransitionKind>,
    pub next_phase: Option<String>,
    pub exchanges_count: usize,
}

/// Post-completion metadata for a redacted reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedactionData {
    pub fallback_text: String,
    pub boundary: String,
}

/// How a dialogue reply ended. `Done` and `Redacted` are mutually exclusive;
/// `Malformed` serialises at the transport as a done event carrying
/// `error: "malformed_response"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Done(DoneData),
    Redacted(RedactionData),
    Malformed { exchanges_count: usize },
}

/// How a debrief ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebriefOutcome {
    Complete,
    Redacted(RedactionData),
    Malformed,
}

/// A finished dialogue turn: the outcome plus the call's usage, if the
/// provider reported any.
#[derive(Debug)]
pub struct TricksterOutcome {
    pub reply: ReplyOutcome,
    pub usage: Option<UsageInfo>,
}

/// A finished debrief: outcome plus usage.
#[derive(Debug)]
pub struct DebriefResult {
    pub reply: DebriefOutcome,
    pub usage: Option<UsageInfo>,
}

/// Orchestrates Trickster dialogue: the only code path that mutates a
/// session's exchanges, phase flags, or prompt snapshot. A single session
/// must not see concurrent calls; the transport serialises per session.
pub struct TricksterEngine {
    provider: Arc<dyn AiProvider>,
    store: Arc<PromptStore>,
    assembler: ContextAssembler,
}

impl TricksterEngine {
    pub fn new(
        provider: Arc<dyn AiProvider>,
        store: Arc<PromptStore>,
        assembler: ContextAssembler,
    ) -> Self {
        Self {
            provider,
            store,
            assembler,
        }
    }

    /// Process a student message and stream the Trickster's reply.
    ///
    /// Text tokens are written to `tx` as they arrive; the resolved outcome
    /// and usage are the return value, available once the channel has
    /// drained. The student exchange is appended before the provider call, so
    /// a failing stream never loses student input.
    pub async fn respond(
        &self,
        session: &mut GameSession,
        cartridge: &TaskCartridge,
        phase: &Phase,
        student_input: &str,
        tx: mpsc::Sender<String>,
        cancel: Option<&CancellationToken>,
    ) -> Result<TricksterOutcome, EngineError> {
        // 1. Preconditions: surfaced before any streaming begins.
        let ai_config = cartridge
            .ai_config
            .as_ref()
            .ok_or_else(|| EngineError::MissingAiConfig {
                task: cartridge.task_id.clone(),
            })?;
        let (min_exchanges, max_exchanges) = match &phase.interaction {
            Some(Interaction::Freeform {
                min_exchanges,
                max_exchanges,
                ..
            }) => (*min_exchanges, *max_exchanges),
            _ => {
                return Err(EngineError::NotFreeformPhase {
                    phase: phase.id.clone(),
                })
            }
        };
        let transitions = phase
            .ai_transitions
            .as_ref()
            .ok_or_else(|| EngineError::MissingTransitions {
                phase: phase.id.clone(),
            })?;

        let model_config = resolve_tier(ai_config.model_preference);

        // 2. Snapshot prompts on the first AI call for this task attempt.
        if session.prompt_snapshots.is_none() {
            let prompts = self
                .store
                .load(model_config.provider.as_str(), Some(&cartridge.task_id));
            self.assembler.snapshot_prompts(session, &prompts);
        }

        // 3. Save the student exchange before the AI call.
        session.push_student(student_input);

        // 4. Input validation: advisory only, never blocks.
        safety::validate_input(student_input, &cartridge.task_id);

        // 5. Assemble context.
        let exchange_count = session.student_exchange_count();
        let ctx = self.assembler.assemble_dialogue(
            session,
            cartridge,
            model_config.provider.as_str(),
            exchange_count,
            min_exchanges,
        );

        info!(
            task = %cartridge.task_id,
            phase = %phase.id,
            exchange = exchange_count,
            max_exchanges,
            "trickster respond"
        );

        let request = ChatRequest {
            system_prompt: ctx.system_prompt,
            messages: ctx.messages,
            model: model_config.clone(),
            tools: ctx.tools,
        };

        let started = Instant::now();
        let mut accumulated = String::new();
        let mut signal: Option<TransitionSignal> = None;

        // 6. Stream, accumulate, intercept tool calls.
        let mut usage = self
            .stream_once(&request, &tx, cancel, &mut accumulated, Some(&mut signal))
            .await?;

        // 7. Malformed response: one retry with the identical context.
        if accumulated.chars().count() < MIN_RESPONSE_CHARS && signal.is_none() {
            warn!(min_chars = MIN_RESPONSE_CHARS, "malformed response, retrying");

            let mut retry_signal: Option<TransitionSignal> = None;
            usage = self
                .stream_once(&request, &tx, cancel, &mut accumulated, Some(&mut retry_signal))
                .await?;
            if retry_signal.is_some() {
                signal = retry_signal;
            }

            if accumulated.chars().count() < MIN_RESPONSE_CHARS {
                error!(
                    min_chars = MIN_RESPONSE_CHARS,
                    "both attempts produced a malformed response"
                );
                self.log_usage(cartridge, session, "trickster", &model_config.model_id, usage, started);
                // No trickster exchange on terminal failure.
                return Ok(TricksterOutcome {
                    reply: ReplyOutcome::Malformed {
                        exchanges_count: exchange_count,
                    },
                    usage,
                });
            }
        }

        // 8. Post-completion safety check.
        let safety_result = safety::check_output(&accumulated, &cartridge.safety, false);

        let reply = if let Some(violation) = safety_result.violation {
            // 9. Redaction beats any transition.
            session.push_trickster(&violation.fallback_text);
            session.last_redaction_reason = Some(violation.boundary.clone());
            info!(boundary = %violation.boundary, "safety violation");
            ReplyOutcome::Redacted(RedactionData {
                fallback_text: violation.fallback_text,
                boundary: violation.boundary,
            })
        } else {
            // 10. Safe: store the reply and resolve the transition.
            session.push_trickster(&accumulated);

            let kind = match signal {
                Some(signal) => Some(signal.kind()),
                None if exchange_count >= max_exchanges => Some(TransitionKind::OnMaxExchanges),
                None => None,
            };
            let next_phase = kind.map(|k| k.target(transitions));

            if let Some(kind) = kind {
                info!(
                    transition = kind.as_str(),
                    next_phase = next_phase.as_deref().unwrap_or(""),
                    "phase transition resolved"
                );
            }

            ReplyOutcome::Done(DoneData {
                phase_transition: kind,
                next_phase,
                exchanges_count: exchange_count,
            })
        };

        self.log_usage(cartridge, session, "trickster", &model_config.model_id, usage, started);
        Ok(TricksterOutcome { reply, usage })
    }

    /// Stream the Trickster's honest reveal after task completion.
    ///
    /// No phase, no transitions, no exchange gates. The full history is
    /// included unabridged and the safety check runs with the pedagogical
    /// exemption enabled.
    pub async fn debrief(
        &self,
        session: &mut GameSession,
        cartridge: &TaskCartridge,
        tx: mpsc::Sender<String>,
        cancel: Option<&CancellationToken>,
    ) -> Result<DebriefResult, EngineError> {
        let ai_config = cartridge
            .ai_config
            .as_ref()
            .ok_or_else(|| EngineError::MissingAiConfig {
                task: cartridge.task_id.clone(),
            })?;
        let model_config = resolve_tier(ai_config.model_preference);

        let ctx =
            self.assembler
                .assemble_debrief(session, cartridge, model_config.provider.as_str());

        info!(
            task = %cartridge.task_id,
            exchanges = session.exchanges.len(),
            "trickster debrief"
        );

        let request = ChatRequest {
            system_prompt: ctx.system_prompt,
            messages: ctx.messages,
            model: model_config.clone(),
            tools: None,
        };

        let started = Instant::now();
        let mut accumulated = String::new();

        let mut usage = self
            .stream_once(&request, &tx, cancel, &mut accumulated, None)
            .await?;

        if accumulated.chars().count() < MIN_RESPONSE_CHARS {
            warn!(min_chars = MIN_RESPONSE_CHARS, "malformed debrief, retrying");

            usage = self
                .stream_once(&request, &tx, cancel, &mut accumulated, None)
                .await?;

            if accumulated.chars().count() < MIN_RESPONSE_CHARS {
                error!(
                    min_chars = MIN_RESPONSE_CHARS,
                    "both debrief attempts produced a malformed response"
                );
                self.log_usage(cartridge, session, "debrief", &model_config.model_id, usage, started);
                return Ok(DebriefResult {
                    reply: DebriefOutcome::Malformed,
                    usage,
                });
            }
        }

        let safety_result = safety::check_output(&accumulated, &cartridge.safety, true);

        let reply = if let Some(violation) = safety_result.violation {
            session.push_trickster(&violation.fallback_text);
            session.last_redaction_reason = Some(violation.boundary.clone());
            info!(boundary = %violation.boundary, "debrief safety violation");
            DebriefOutcome::Redacted(RedactionData {
                fallback_text: violation.fallback_text,
                boundary: violation.boundary,
            })
        } else {
            session.push_trickster(&accumulated);
            DebriefOutcome::Complete
        };

        self.log_usage(cartridge, session, "debrief", &model_config.model_id, usage, started);
        Ok(DebriefResult { reply, usage })
    }

    /// Drive one provider stream: fan text to the caller, accumulate it,
    /// and intercept tool calls.
    ///
    /// With `signal` present (dialogue), a `transition_phase` call records
    /// its signal; unknown signals and tools are logged and ignored. Without
    /// it (debrief), every tool call is unexpected.
    async fn stream_once(
        &self,
        request: &ChatRequest,
        tx: &mpsc::Sender<String>,
        cancel: Option<&CancellationToken>,
        accumulated: &mut String,
        mut signal: Option<&mut Option<TransitionSignal>>,
    ) -> Result<Option<UsageInfo>, EngineError> {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Err(EngineError::Cancelled);
        }

        let (etx, mut erx) = mpsc::channel::<StreamEvent>(STREAM_CHANNEL_DEPTH);
        let provider = Arc::clone(&self.provider);
        let req = request.clone();
        let producer = tokio::spawn(async move { provider.stream(&req, etx).await });

        loop {
            tokio::select! {
                _ = cancelled(cancel) => {
                    producer.abort();
                    return Err(EngineError::Cancelled);
                }
                event = erx.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        StreamEvent::TextChunk { text } => {
                            accumulated.push_str(&text);
                            if tx.send(text).await.is_err() {
                                producer.abort();
                                return Err(EngineError::Cancelled);
                            }
                        }
                        StreamEvent::ToolCall { name, arguments } => {
                            self.intercept_tool_call(&name, &arguments, &mut signal);
                        }
                    }
                }
            }
        }

        let usage = producer
            .await
            .map_err(|e| EngineError::Internal(format!("provider task failed: {e}")))??;
        Ok(usage)
    }

    fn intercept_tool_call(
        &self,
        name: &str,
        arguments: &serde_json::Value,
        signal: &mut Option<&mut Option<TransitionSignal>>,
    ) {
        let Some(slot) = signal.as_deref_mut() else {
            warn!(tool = %name, "unexpected tool call in debrief");
            return;
        };

        if name != "transition_phase" {
            warn!(tool = %name, "unexpected tool call");
            return;
        }

        let raw = arguments.get("signal").and_then(|v| v.as_str());
        match raw.and_then(TransitionSignal::parse) {
            Some(parsed) => *slot = Some(parsed),
            None => warn!(signal = raw.unwrap_or("<missing>"), "unknown transition signal"),
        }
    }

    fn log_usage(
        &self,
        cartridge: &TaskCartridge,
        session: &GameSession,
        call_type: &str,
        model_id: &str,
        usage: Option<UsageInfo>,
        started: Instant,
    ) {
        log_ai_call(
            model_id,
            usage.as_ref(),
            started.elapsed().as_secs_f64() * 1000.0,
            &cartridge.task_id,
            &session.id,
            call_type,
        );
    }
}

async fn cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}
