//! Graceful-degradation check for AI phases.
//!
//! Called by the transport before entering an AI phase to decide whether to
//! proceed, fall back to static content (`has_static_fallback`), or surface
//! a service-unavailable condition. The dialogue engine itself is only
//! invoked once this list comes back empty.

use klasta_cartridge::TaskCartridge;
use klasta_core::config::AiSettings;
use klasta_core::{resolve_tier, ProviderKind};

use crate::prompts::PromptStore;

/// Check whether a cartridge's AI phases can be served.
///
/// Returns human-readable issue descriptions; empty means ready. Static-only
/// cartridges and cartridges without AI phases are vacuously ready.
pub fn check_ai_readiness(
    cartridge: &TaskCartridge,
    settings: &AiSettings,
    store: &PromptStore,
) -> Vec<String> {
    let mut issues: Vec<String> = Vec::new();

    let Some(ref ai_config) = cartridge.ai_config else {
        return issues;
    };
    if !cartridge.has_ai_phase() {
        return issues;
    }

    let model_config = resolve_tier(ai_config.model_preference);
    let api_key = match model_config.provider {
        ProviderKind::Gemini => &settings.google_api_key,
        ProviderKind::Anthropic => &settings.anthropic_api_key,
    };
    if api_key.is_empty() {
        issues.push(format!(
            "Missing API key for provider '{}'",
            model_config.provider
        ));
    }

    issues.extend(store.validate(cartridge));

    issues
}
