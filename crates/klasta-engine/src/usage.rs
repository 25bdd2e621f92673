//! Structured usage logging for AI calls.
//!
//! One INFO record per completed call with every field needed for cost
//! analysis. Fields are structured so a JSON log subscriber picks them up
//! without parsing the message text.

use klasta_provider::UsageInfo;
use tracing::info;

/// Emit the per-call usage record.
///
/// `call_type` is one of `trickster`, `debrief`, or `evaluation`. Providers
/// without usage reporting (the mock) log zeros.
pub fn log_ai_call(
    model_id: &str,
    usage: Option<&UsageInfo>,
    latency_ms: f64,
    task_id: &str,
    session_id: &str,
    call_type: &str,
) {
    let prompt_tokens = usage.map(|u| u.prompt_tokens).unwrap_or(0);
    let completion_tokens = usage.map(|u| u.completion_tokens).unwrap_or(0);

    info!(
        target: "klasta::ai::usage",
        model_id,
        prompt_tokens,
        completion_tokens,
        latency_ms,
        task_id,
        session_id,
        call_type,
        "ai call complete"
    );
}
