//! Model tier registry: single source of truth for AI model identifiers.
//!
//! Every AI call resolves its model through `resolve_tier`. The rest of the
//! codebase never carries raw model ID strings. To swap a model, change one
//! entry in the table below.

use serde::{Deserialize, Serialize};

/// The model vendor behind a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability tier requested by a cartridge (`ai_config.model_preference`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Standard,
    Complex,
}

/// A resolved tier: concrete provider, model id, and reasoning budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub provider: ProviderKind,
    pub model_id: String,
    /// Reasoning token budget. Providers that accept one pass it through;
    /// providers that do not simply ignore it.
    pub thinking_budget: u32,
}

/// Resolve a capability tier to its concrete model configuration.
///
/// The table is read-only after process init; resolution is total over the
/// tier enum, so a bad tier cannot reach this point.
pub fn resolve_tier(tier: ModelTier) -> ModelConfig {
    match tier {
        ModelTier::Fast => ModelConfig {
            provider: ProviderKind::Gemini,
            model_id: "gemini-flash-lite-latest".to_string(),
            thinking_budget: 0,
        },
        ModelTier::Standard => ModelConfig {
            provider: ProviderKind::Gemini,
            model_id: "gemini-3-flash-preview".to_string(),
            thinking_budget: 1024,
        },
        ModelTier::Complex => ModelConfig {
            provider: ProviderKind::Anthropic,
            model_id: "claude-sonnet-4-6".to_string(),
            thinking_budget: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tier_resolves() {
        for tier in [ModelTier::Fast, ModelTier::Standard, ModelTier::Complex] {
            let config = resolve_tier(tier);
            assert!(!config.model_id.is_empty());
        }
    }

    #[test]
    fn complex_routes_to_anthropic() {
        assert_eq!(resolve_tier(ModelTier::Complex).provider, ProviderKind::Anthropic);
        assert_eq!(resolve_tier(ModelTier::Fast).provider, ProviderKind::Gemini);
    }

    #[test]
    fn tier_deserializes_lowercase() {
        let tier: ModelTier = serde_json::from_str("\"standard\"").expect("parse");
        assert_eq!(tier, ModelTier::Standard);
    }
}
