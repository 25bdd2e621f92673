use std::sync::Arc;

use klasta_core::config::AiSettings;
use klasta_core::{ModelConfig, ProviderKind};

use crate::anthropic::AnthropicProvider;
use crate::error::ProviderError;
use crate::gemini::GeminiProvider;
use crate::provider::AiProvider;

/// Route a resolved tier to a concrete provider instance.
///
/// One provider instance per process is the recommended arrangement; usage is
/// captured per call, so a single instance serves concurrent calls safely.
pub fn build_provider(
    model: &ModelConfig,
    settings: &AiSettings,
) -> Result<Arc<dyn AiProvider>, ProviderError> {
    match model.provider {
        ProviderKind::Gemini => {
            if settings.google_api_key.is_empty() {
                return Err(ProviderError::Unavailable(
                    "missing API key for provider 'gemini'".to_string(),
                ));
            }
            Ok(Arc::new(GeminiProvider::new(
                settings.google_api_key.clone(),
                None,
            )))
        }
        ProviderKind::Anthropic => {
            if settings.anthropic_api_key.is_empty() {
                return Err(ProviderError::Unavailable(
                    "missing API key for provider 'anthropic'".to_string(),
                ));
            }
            Ok(Arc::new(AnthropicProvider::new(
                settings.anthropic_api_key.clone(),
                None,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use klasta_core::{resolve_tier, ModelTier};

    #[test]
    fn missing_key_is_unavailable() {
        let settings = AiSettings::default();
        let err = build_provider(&resolve_tier(ModelTier::Fast), &settings).unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn keys_route_to_their_providers() {
        let settings = AiSettings {
            google_api_key: "g".to_string(),
            anthropic_api_key: "a".to_string(),
        };
        let gemini = build_provider(&resolve_tier(ModelTier::Standard), &settings).expect("gemini");
        assert_eq!(gemini.name(), "gemini");
        let claude = build_provider(&resolve_tier(ModelTier::Complex), &settings).expect("claude");
        assert_eq!(claude.name(), "anthropic");
    }
}
