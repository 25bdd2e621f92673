use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (klasta.toml + KLASTA_* env overrides).
///
/// Holds infrastructure settings only: API keys, prompt directory, context
/// budgets. Model routing goes through the tier table in `model.rs`, never
/// through config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KlastaConfig {
    #[serde(default)]
    pub ai: AiSettings,
    #[serde(default)]
    pub prompts: PromptSettings,
    #[serde(default)]
    pub context: ContextSettings,
    #[serde(default)]
    pub language: LanguageSettings,
}

impl Default for KlastaConfig {
    fn default() -> Self {
        Self {
            ai: AiSettings::default(),
            prompts: PromptSettings::default(),
            context: ContextSettings::default(),
            language: LanguageSettings::default(),
        }
    }
}

/// API credentials: a single configured key per provider.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AiSettings {
    #[serde(default)]
    pub google_api_key: String,
    #[serde(default)]
    pub anthropic_api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSettings {
    /// Root of the prompt directory tree (contains trickster/ and tasks/).
    #[serde(default = "default_prompts_dir")]
    pub dir: String,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            dir: default_prompts_dir(),
        }
    }
}

/// Context assembly budgets.
///
/// `chars_per_token` is a heuristic: Lithuanian averages ~3 characters per
/// token. Kept configurable for languages where the ratio differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSettings {
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            chars_per_token: default_chars_per_token(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageSettings {
    #[serde(default = "default_language")]
    pub default_language: String,
}

impl Default for LanguageSettings {
    fn default() -> Self {
        Self {
            default_language: default_language(),
        }
    }
}

fn default_prompts_dir() -> String {
    "prompts".to_string()
}
fn default_token_budget() -> usize {
    100_000
}
fn default_chars_per_token() -> usize {
    3
}
fn default_language() -> String {
    "lt".to_string()
}

impl KlastaConfig {
    /// Load config from a TOML file with KLASTA_* env var overrides.
    ///
    /// Real environment variables take precedence over file values. A missing
    /// file is not an error: defaults apply.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path.unwrap_or("klasta.toml");

        let config: KlastaConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("KLASTA_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}
