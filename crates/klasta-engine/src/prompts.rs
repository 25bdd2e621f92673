//! Prompt loading from disk with model-specific fallback and caching.
//!
//! Each prompt layer (persona, behaviour, safety) has a base file and
//! optional model-specific overrides under `<root>/trickster/`; per-task
//! overrides live under `<root>/tasks/<task_id>/`. The loader tries the
//! model-specific file first, falls back to base, and caches the result by
//! (provider, task_id). The cache is process-local and deliberately stale
//! after a content write until `invalidate()`: live sessions must not see
//! mid-flight prompt drift.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use klasta_cartridge::{TaskCartridge, TaskType};

/// Provider name → file suffix. Unknown providers fall back to base files.
fn provider_suffix(provider: &str) -> Option<&'static str> {
    match provider {
        "anthropic" => Some("claude"),
        "gemini" => Some("gemini"),
        _ => None,
    }
}

/// Prompt types that live in `<root>/trickster/` (layers 1–3).
const BASE_PROMPT_TYPES: [&str; 3] = ["persona", "behaviour", "safety"];

/// Loaded prompt layers for a single (provider, task_id) combination.
///
/// Each field is the whitespace-stripped Markdown content of the file, or
/// `None` when the file is absent or empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TricksterPrompts {
    pub persona: Option<String>,
    pub behaviour: Option<String>,
    pub safety: Option<String>,
    pub task_override: Option<String>,
}

type CacheKey = (String, Option<String>);

/// Loads and caches Trickster prompt files from disk.
pub struct PromptStore {
    prompts_dir: PathBuf,
    cache: Mutex<HashMap<CacheKey, TricksterPrompts>>,
}

impl PromptStore {
    pub fn new(prompts_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Load the Trickster prompt layers with model-specific fallback.
    ///
    /// No I/O occurs on a cache hit. `task_override` is `None` when
    /// `task_id` is absent.
    pub fn load(&self, provider: &str, task_id: Option<&str>) -> TricksterPrompts {
        let key: CacheKey = (provider.to_string(), task_id.map(str::to_string));
        if let Some(cached) = self.cache.lock().unwrap().get(&key) {
            debug!(provider, task_id, "prompt cache hit");
            return cached.clone();
        }

        debug!(provider, task_id, "prompt cache miss");
        let suffix = provider_suffix(provider);
        let trickster_dir = self.prompts_dir.join("trickster");

        let persona = load_with_fallback(&trickster_dir, "persona", suffix);
        let behaviour = load_with_fallback(&trickster_dir, "behaviour", suffix);
        let safety = load_with_fallback(&trickster_dir, "safety", suffix);

        let task_override = task_id.and_then(|id| {
            let task_dir = self.prompts_dir.join("tasks").join(id);
            load_with_fallback(&task_dir, "trickster", suffix)
        });

        let result = TricksterPrompts {
            persona,
            behaviour,
            safety,
            task_override,
        };
        self.cache.lock().unwrap().insert(key, result.clone());
        result
    }

    /// Validate that the required base prompt files exist for AI-phase tasks.
    ///
    /// Only tasks whose type requires AI, with an `ai_config`, and with at
    /// least one AI phase are checked; everything else validates vacuously.
    pub fn validate(&self, cartridge: &TaskCartridge) -> Vec<String> {
        if !matches!(cartridge.task_type, TaskType::AiDriven | TaskType::Hybrid) {
            return Vec::new();
        }
        if cartridge.ai_config.is_none() {
            return Vec::new();
        }
        if !cartridge.has_ai_phase() {
            return Vec::new();
        }

        let mut errors = Vec::new();
        let trickster_dir = self.prompts_dir.join("trickster");

        for prompt_type in BASE_PROMPT_TYPES {
            let filename = format!("{prompt_type}_base.md");
            let path = trickster_dir.join(&filename);
            match std::fs::read_to_string(&path) {
                Err(_) => errors.push(format!(
                    "Task '{}': missing required prompt file prompts/trickster/{filename}",
                    cartridge.task_id
                )),
                Ok(content) if content.trim().is_empty() => errors.push(format!(
                    "Task '{}': prompt file prompts/trickster/{filename} is empty",
                    cartridge.task_id
                )),
                Ok(_) => {}
            }
        }

        errors
    }

    /// Drop all cached entries. Wired to content hot-reload.
    pub fn invalidate(&self) {
        let mut cache = self.cache.lock().unwrap();
        debug!(entries = cache.len(), "prompt cache invalidated");
        cache.clear();
    }
}

/// Try `{type}_{suffix}.md` first, then `{type}_base.md`.
fn load_with_fallback(directory: &Path, type_name: &str, suffix: Option<&str>) -> Option<String> {
    if let Some(suffix) = suffix {
        if let Some(content) = read_prompt_file(&directory.join(format!("{type_name}_{suffix}.md")))
        {
            return Some(content);
        }
    }
    read_prompt_file(&directory.join(format!("{type_name}_base.md")))
}

/// Read a single prompt file. Absent or whitespace-only files count as
/// absent.
fn read_prompt_file(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let stripped = content.trim();
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}
