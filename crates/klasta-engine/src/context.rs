//! Context assembly: layering, budgeting, prompt snapshotting.
//!
//! Builds the full AI call payload: an eight-layer system prompt from prompt
//! files and cartridge data, the exchange history as provider-neutral
//! messages, and the conditional phase-transition tool. Handles the
//! character-based token budget, the one-shot redaction note, and the prompt
//! snapshot that isolates live sessions from content hot-reloads.

use std::sync::Arc;

use tracing::debug;

use klasta_cartridge::TaskCartridge;
use klasta_core::config::ContextSettings;
use klasta_core::{Exchange, ExchangeRole, GameSession, PromptSnapshot};
use klasta_provider::{Message, Role, ToolDefinition};

use crate::prompts::{PromptStore, TricksterPrompts};

/// Provider-ready AI call payload. Maps directly onto `ChatRequest`.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Option<Vec<ToolDefinition>>,
}

/// The single tool exposed to the model during dialogue, once the phase's
/// minimum exchange count is reached.
pub fn transition_tool() -> ToolDefinition {
    ToolDefinition {
        name: "transition_phase".to_string(),
        description: "Signal that the conversation phase should transition.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "signal": {
                    "type": "string",
                    "enum": ["understood", "partial", "max_reached"],
                    "description": "The transition signal.",
                },
            },
            "required": ["signal"],
        }),
    }
}

/// Assembles AI call payloads from prompts, cartridge data, and session
/// state.
pub struct ContextAssembler {
    store: Arc<PromptStore>,
    token_budget: usize,
    chars_per_token: usize,
}

impl ContextAssembler {
    pub fn new(store: Arc<PromptStore>, settings: &ContextSettings) -> Self {
        Self {
            store,
            token_budget: settings.token_budget,
            chars_per_token: settings.chars_per_token,
        }
    }

    // -------------------------------------------------------------------
    // Public API
    // -------------------------------------------------------------------

    /// Assemble the full Trickster dialogue call payload.
    ///
    /// `exchange_count` already includes the student message appended for
    /// this turn. The session's one-shot redaction flag is consumed here.
    pub fn assemble_dialogue(
        &self,
        session: &mut GameSession,
        cartridge: &TaskCartridge,
        provider: &str,
        exchange_count: usize,
        min_exchanges: usize,
    ) -> AssembledContext {
        if let Some(ref ai_config) = cartridge.ai_config {
            let ctx_req = ai_config.context_requirements;
            if ctx_req != klasta_cartridge::ContextRequirements::SessionOnly {
                debug!(
                    requested = ctx_req.as_str(),
                    "context level downgraded to session_only"
                );
            }
        }

        let prompts = self.resolve_prompts(session, cartridge, provider);
        let system_prompt = self.build_dialogue_system_prompt(&prompts, session, cartridge);

        let messages = format_exchanges(&session.exchanges);
        let messages = self.trim_if_needed(&system_prompt, messages);

        let tools = if exchange_count >= min_exchanges {
            Some(vec![transition_tool()])
        } else {
            None
        };

        AssembledContext {
            system_prompt,
            messages,
            tools,
        }
    }

    /// Assemble the debrief (reveal) call payload.
    ///
    /// Same prompt layers 1–4; layer 5 carries the evaluation data plus the
    /// reveal instruction. Full history, no trimming, no tools, and no
    /// redaction note.
    pub fn assemble_debrief(
        &self,
        session: &GameSession,
        cartridge: &TaskCartridge,
        provider: &str,
    ) -> AssembledContext {
        let prompts = self.resolve_prompts(session, cartridge, provider);
        let system_prompt = self.build_debrief_system_prompt(&prompts, session, cartridge);

        AssembledContext {
            system_prompt,
            messages: format_exchanges(&session.exchanges),
            tools: None,
        }
    }

    /// Save the non-null prompt layers into the session.
    ///
    /// Called on the first AI call for a task attempt. Subsequent assemblies
    /// read the snapshot instead of the store, so a hot-reload cannot change
    /// a live conversation's prompts.
    pub fn snapshot_prompts(&self, session: &mut GameSession, prompts: &TricksterPrompts) {
        session.prompt_snapshots = Some(PromptSnapshot {
            persona: prompts.persona.clone(),
            behaviour: prompts.behaviour.clone(),
            safety: prompts.safety.clone(),
            task_override: prompts.task_override.clone(),
        });
    }

    /// Reconstruct prompts from the session snapshot, if one exists.
    pub fn prompt_snapshot(&self, session: &GameSession) -> Option<TricksterPrompts> {
        session.prompt_snapshots.as_ref().map(|s| TricksterPrompts {
            persona: s.persona.clone(),
            behaviour: s.behaviour.clone(),
            safety: s.safety.clone(),
            task_override: s.task_override.clone(),
        })
    }

    // -------------------------------------------------------------------
    // Prompt resolution
    // -------------------------------------------------------------------

    /// Snapshot first, then store fallback.
    fn resolve_prompts(
        &self,
        session: &GameSession,
        cartridge: &TaskCartridge,
        provider: &str,
    ) -> TricksterPrompts {
        if let Some(snapshot) = self.prompt_snapshot(session) {
            return snapshot;
        }

        let task_id = cartridge
            .ai_config
            .as_ref()
            .map(|_| cartridge.task_id.as_str());
        self.store.load(provider, task_id)
    }

    // -------------------------------------------------------------------
    // System prompt assembly
    // -------------------------------------------------------------------

    fn build_dialogue_system_prompt(
        &self,
        prompts: &TricksterPrompts,
        session: &mut GameSession,
        cartridge: &TaskCartridge,
    ) -> String {
        let mut layers: Vec<String> = Vec::new();

        append_prompt_layers(&mut layers, prompts);

        layers.push(build_task_context(session, cartridge));
        layers.push(build_safety_config(cartridge));
        layers.push(language_instruction().to_string());
        if let Some(layer8) = build_context_labels(session) {
            layers.push(layer8);
        }

        // Redaction note: one-shot, appended after the main layers.
        if let Some(note) = take_redaction_context(session) {
            layers.push(note);
        }

        layers.join("\n\n")
    }

    fn build_debrief_system_prompt(
        &self,
        prompts: &TricksterPrompts,
        session: &GameSession,
        cartridge: &TaskCartridge,
    ) -> String {
        let mut layers: Vec<String> = Vec::new();

        append_prompt_layers(&mut layers, prompts);

        layers.push(build_debrief_context(cartridge));
        layers.push(build_safety_config(cartridge));
        layers.push(language_instruction().to_string());
        if let Some(layer8) = build_context_labels(session) {
            layers.push(layer8);
        }

        layers.join("\n\n")
    }

    // -------------------------------------------------------------------
    // Token budgeting
    // -------------------------------------------------------------------

    /// Trim oldest exchange pairs when the estimate exceeds the budget.
    ///
    /// The estimate is character-based; complete pairs (user + assistant)
    /// are removed from the front to keep the conversation coherent. The
    /// system prompt is never trimmed.
    fn trim_if_needed(&self, system_prompt: &str, messages: Vec<Message>) -> Vec<Message> {
        let budget_chars = self.token_budget * self.chars_per_token;
        let mut total_chars = system_prompt.chars().count()
            + messages
                .iter()
                .map(|m| m.content.chars().count())
                .sum::<usize>();

        if total_chars <= budget_chars {
            return messages;
        }

        let original_len = messages.len();
        let mut trimmed = messages;
        while total_chars > budget_chars && trimmed.len() >= 2 {
            let pair_chars: usize = trimmed[..2].iter().map(|m| m.content.chars().count()).sum();
            trimmed.drain(..2);
            total_chars -= pair_chars;
        }

        debug!(
            removed = original_len - trimmed.len(),
            budget_tokens = self.token_budget,
            "trimmed exchange history to fit budget"
        );

        trimmed
    }
}

// -----------------------------------------------------------------------
// Individual layer builders
// -----------------------------------------------------------------------

/// Layers 1–4: prompt files, skipping absent layers.
fn append_prompt_layers(layers: &mut Vec<String>, prompts: &TricksterPrompts) {
    for layer in [
        &prompts.persona,
        &prompts.behaviour,
        &prompts.safety,
        &prompts.task_override,
    ]
    .into_iter()
    .flatten()
    {
        layers.push(layer.clone());
    }
}

/// Layer 5 (dialogue): persona mode, current phase, and the evaluation
/// contract rendered with Lithuanian labels.
fn build_task_context(session: &GameSession, cartridge: &TaskCartridge) -> String {
    let mut parts: Vec<String> = Vec::new();
    parts.push("## Uzduoties kontekstas".to_string());

    if let Some(ref ai_config) = cartridge.ai_config {
        parts.push(format!("\nPersona: {}", ai_config.persona_mode.as_str()));
    }
    if let Some(ref phase) = session.current_phase {
        parts.push(format!("Faze: {phase}"));
    }

    let evaluation = &cartridge.evaluation;

    if !evaluation.patterns_embedded.is_empty() {
        parts.push("\n### Vertinimo kriterijai".to_string());
        for (i, pattern) in evaluation.patterns_embedded.iter().enumerate() {
            parts.push(format!(
                "{}. **{}**\n   Technika: {}\n   Ryšys su realybe: {}",
                i + 1,
                pattern.description,
                pattern.technique,
                pattern.real_world_connection
            ));
        }
    }

    if !evaluation.checklist.is_empty() {
        parts.push("\n### Kontrolinis sarasas".to_string());
        for item in &evaluation.checklist {
            let mandatory = if item.is_mandatory { " [PRIVALOMA]" } else { "" };
            parts.push(format!("- {}{mandatory}", item.description));
        }
    }

    parts.push("\n### Vertinimo salygos".to_string());
    let pc = &evaluation.pass_conditions;
    parts.push(format!(
        "- Triksteris laimi: {}\n- Is dalies: {}\n- Triksteris pralaimi: {}",
        pc.trickster_wins, pc.partial, pc.trickster_loses
    ));

    parts.join("\n")
}

/// Layer 5 (debrief): the evaluation data plus the reveal instruction:
/// drop the adversarial stance, name the techniques used, tie them to the
/// student's actual statements, explain the lesson.
fn build_debrief_context(cartridge: &TaskCartridge) -> String {
    let mut parts: Vec<String> = Vec::new();
    parts.push("## Atskleidimo kontekstas".to_string());

    let evaluation = &cartridge.evaluation;

    if !evaluation.patterns_embedded.is_empty() {
        parts.push("\n### Panaudoti manipuliacijos metodai".to_string());
        for (i, pattern) in evaluation.patterns_embedded.iter().enumerate() {
            parts.push(format!(
                "{}. **{}**\n   Technika: {}\n   Ryšys su realybe: {}",
                i + 1,
                pattern.description,
                pattern.technique,
                pattern.real_world_connection
            ));
        }
    }

    if !evaluation.checklist.is_empty() {
        parts.push("\n### Ko mokinys turejo pastebeti".to_string());
        for item in &evaluation.checklist {
            let mandatory = if item.is_mandatory { " [PRIVALOMA]" } else { "" };
            parts.push(format!("- {}{mandatory}", item.description));
        }
    }

    parts.push("\n### Vertinimo salygos".to_string());
    let pc = &evaluation.pass_conditions;
    parts.push(format!(
        "- Triksteris laimi: {}\n- Is dalies: {}\n- Triksteris pralaimi: {}",
        pc.trickster_wins, pc.partial, pc.trickster_loses
    ));

    parts.push(
        "\n### Instrukcija\n\
         Dabar tu nebesi priesininkas. Nusimesk Triksterio kauke ir \
         iskisk atvirai su mokiniu. Papasakok, kokius manipuliacijos \
         metodus panaudojai, nurodydamas konkrecius pavyzdzius is pokalbio. \
         Kai mokinys sake kazka konkretaus, susiek tai su manipuliacijos \
         technika. Pvz.: 'Kai sakei, kad saltinis patikimas — tai buvo \
         autoriteto salisumo spastai.' Pabaigoje paaisink, ko galima \
         ismokti is sios patirties ir kaip atpazinti panasias situacijas \
         realiame gyvenime."
            .to_string(),
    );

    parts.join("\n")
}

/// Layer 6: safety configuration from the cartridge.
fn build_safety_config(cartridge: &TaskCartridge) -> String {
    let safety = &cartridge.safety;
    let mut parts: Vec<String> = Vec::new();
    parts.push("## Saugumo nustatymai".to_string());
    if !safety.content_boundaries.is_empty() {
        parts.push(format!(
            "\nTurinio ribos: {}",
            safety.content_boundaries.join(", ")
        ));
    }
    parts.push(format!("Intensyvumo lubos: {}/5", safety.intensity_ceiling));
    parts.join("\n")
}

/// Layer 7: hard-coded language instruction.
fn language_instruction() -> &'static str {
    "## Kalbos instrukcija\n\n\
     Visada atsakyk lietuviškai. Niekada nepersijunk \
     i kita kalba, net jei mokinys raso kita kalba."
}

/// Layer 8: student path context from choice context labels. Omitted
/// entirely when no choice carries one.
fn build_context_labels(session: &GameSession) -> Option<String> {
    let labels: Vec<&str> = session
        .choices
        .iter()
        .filter_map(|c| c.context_label.as_deref())
        .collect();
    if labels.is_empty() {
        return None;
    }

    let mut lines = vec!["## Mokinio pasirinkimai".to_string(), String::new()];
    for label in labels {
        lines.push(format!("- {label}"));
    }
    Some(lines.join("\n"))
}

/// Redaction note: reads and clears the one-shot flag.
fn take_redaction_context(session: &mut GameSession) -> Option<String> {
    let reason = session.last_redaction_reason.take()?;

    Some(format!(
        "## Sistemos pastaba\n\n\
         Tavo ankstesnis atsakymas buvo pasalintas saugumo sistemos \
         del: {reason}. \
         Mokinys mate bendra pakaitini pranesima. Laikykis personazo — \
         jei mokinys klausia apie cenzura, pripazink tai naturaliai ir \
         koreguok savo pozuri."
    ))
}

/// Exchanges → provider-neutral messages, chronological order.
/// Role mapping is fixed: student → user, trickster → assistant.
fn format_exchanges(exchanges: &[Exchange]) -> Vec<Message> {
    exchanges
        .iter()
        .map(|ex| Message {
            role: match ex.role {
                ExchangeRole::Student => Role::User,
                ExchangeRole::Trickster => Role::Assistant,
            },
            content: ex.content.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use klasta_core::ChoiceRecord;

    fn cartridge() -> TaskCartridge {
        serde_json::from_str(
            r#"{
            "task_id": "uzd-1",
            "task_type": "ai_driven",
            "ai_config": {
                "model_preference": "standard",
                "prompt_directory": "uzd-1",
                "persona_mode": "chat_participant",
                "has_static_fallback": false,
                "context_requirements": "session_only"
            },
            "phases": [{"id": "p1", "title": "P1", "is_ai_phase": true}],
            "evaluation": {
                "patterns_embedded": [{
                    "id": "pat-1",
                    "description": "Apeliavimas į autoritetą",
                    "technique": "authority_bias",
                    "real_world_connection": "Reklamos su gydytojais"
                }],
                "checklist": [{"id": "c1", "description": "Paklausė šaltinio", "is_mandatory": true}],
                "pass_conditions": {
                    "trickster_wins": "Patikėjo",
                    "partial": "Suabejojo",
                    "trickster_loses": "Patikrino"
                }
            },
            "safety": {
                "content_boundaries": ["self_harm"],
                "intensity_ceiling": 3,
                "cold_start_safe": true
            },
            "reveal": {"key_lesson": "Autoritetas nėra įrodymas."}
        }"#,
        )
        .expect("cartridge")
    }

    fn assembler(budget: usize) -> ContextAssembler {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(PromptStore::new(dir.path()));
        ContextAssembler::new(
            store,
            &ContextSettings {
                token_budget: budget,
                chars_per_token: 3,
            },
        )
    }

    fn snapshotted_session() -> GameSession {
        let mut session = GameSession::new("mok-1");
        session.current_phase = Some("p1".to_string());
        session.prompt_snapshots = Some(PromptSnapshot {
            persona: Some("PERSONA".to_string()),
            behaviour: Some("ELGESYS".to_string()),
            safety: Some("SAUGA".to_string()),
            task_override: None,
        });
        session
    }

    #[test]
    fn dialogue_layers_appear_in_order() {
        let assembler = assembler(100_000);
        let mut session = snapshotted_session();
        let prompt = assembler
            .assemble_dialogue(&mut session, &cartridge(), "gemini", 1, 2)
            .system_prompt;

        let persona = prompt.find("PERSONA").expect("persona");
        let behaviour = prompt.find("ELGESYS").expect("behaviour");
        let safety = prompt.find("SAUGA").expect("safety");
        let task = prompt.find("## Uzduoties kontekstas").expect("task ctx");
        let safety_cfg = prompt.find("## Saugumo nustatymai").expect("safety cfg");
        let language = prompt.find("## Kalbos instrukcija").expect("language");

        assert!(persona < behaviour && behaviour < safety && safety < task);
        assert!(task < safety_cfg && safety_cfg < language);
        assert!(prompt.contains("Persona: chat_participant"));
        assert!(prompt.contains("Faze: p1"));
        assert!(prompt.contains("[PRIVALOMA]"));
        assert!(prompt.contains("Intensyvumo lubos: 3/5"));
        // no choices, no redaction: those layers are absent
        assert!(!prompt.contains("## Mokinio pasirinkimai"));
        assert!(!prompt.contains("## Sistemos pastaba"));
    }

    #[test]
    fn tools_gated_by_min_exchanges() {
        let assembler = assembler(100_000);
        let cartridge = cartridge();

        let mut session = snapshotted_session();
        let below = assembler.assemble_dialogue(&mut session, &cartridge, "gemini", 1, 2);
        assert!(below.tools.is_none());

        let mut session = snapshotted_session();
        let at = assembler.assemble_dialogue(&mut session, &cartridge, "gemini", 2, 2);
        let tools = at.tools.expect("tools");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "transition_phase");
    }

    #[test]
    fn redaction_note_is_one_shot() {
        let assembler = assembler(100_000);
        let cartridge = cartridge();
        let mut session = snapshotted_session();
        session.last_redaction_reason = Some("self_harm".to_string());

        let first = assembler.assemble_dialogue(&mut session, &cartridge, "gemini", 1, 2);
        assert!(first.system_prompt.contains("## Sistemos pastaba"));
        assert!(first.system_prompt.contains("del: self_harm"));
        assert!(session.last_redaction_reason.is_none());

        let second = assembler.assemble_dialogue(&mut session, &cartridge, "gemini", 1, 2);
        assert!(!second.system_prompt.contains("## Sistemos pastaba"));
    }

    #[test]
    fn debrief_skips_redaction_and_trim_and_tools() {
        let assembler = assembler(10); // far below any history
        let cartridge = cartridge();
        let mut session = snapshotted_session();
        session.last_redaction_reason = Some("violence".to_string());
        for _ in 0..5 {
            session.push_student("klausimas");
            session.push_trickster("atsakymas");
        }

        let ctx = assembler.assemble_debrief(&session, &cartridge, "gemini");
        assert!(ctx.tools.is_none());
        assert_eq!(ctx.messages.len(), 10); // full history, no trimming
        assert!(!ctx.system_prompt.contains("## Sistemos pastaba"));
        assert!(ctx.system_prompt.contains("## Atskleidimo kontekstas"));
        assert!(ctx.system_prompt.contains("Nusimesk Triksterio kauke"));
        // flag untouched by debrief assembly
        assert_eq!(session.last_redaction_reason.as_deref(), Some("violence"));
    }

    #[test]
    fn context_labels_render_in_choice_order() {
        let assembler = assembler(100_000);
        let cartridge = cartridge();
        let mut session = snapshotted_session();
        session.choices.push(ChoiceRecord {
            context_label: Some("patikėjo šaltiniu".to_string()),
            ..Default::default()
        });
        session.choices.push(ChoiceRecord::default());
        session.choices.push(ChoiceRecord {
            context_label: Some("paprašė įrodymų".to_string()),
            ..Default::default()
        });

        let prompt = assembler
            .assemble_dialogue(&mut session, &cartridge, "gemini", 1, 2)
            .system_prompt;
        let first = prompt.find("- patikėjo šaltiniu").expect("first label");
        let second = prompt.find("- paprašė įrodymų").expect("second label");
        assert!(first < second);
    }

    #[test]
    fn trimming_removes_oldest_pairs_and_keeps_tail() {
        // Budget of 1000 tokens × 3 chars = 3000 chars. The system prompt
        // takes well under a thousand; 20 pairs of 200-char messages (8000
        // chars) must shed whole pairs from the front.
        let assembler = assembler(1000);
        let cartridge = cartridge();
        let mut session = GameSession::new("mok-1");
        session.prompt_snapshots = Some(PromptSnapshot::default());
        for i in 0..20 {
            session.push_student(format!("klaus {i:03} {}", "k".repeat(190)));
            session.push_trickster(format!("atsak {i:03} {}", "a".repeat(190)));
        }

        let ctx = assembler.assemble_dialogue(&mut session, &cartridge, "gemini", 20, 99);
        assert!(!ctx.messages.is_empty());
        assert!(ctx.messages.len() < 40);
        assert_eq!(ctx.messages.len() % 2, 0);
        assert_eq!(ctx.messages.first().unwrap().role, Role::User);
        assert_eq!(ctx.messages.last().unwrap().role, Role::Assistant);
        // the newest pair survives
        assert!(ctx.messages.last().unwrap().content.contains("atsak 019"));
    }

    #[test]
    fn no_trimming_under_budget() {
        let assembler = assembler(100_000);
        let cartridge = cartridge();
        let mut session = snapshotted_session();
        session.push_student("labas");
        session.push_trickster("sveikas");

        let ctx = assembler.assemble_dialogue(&mut session, &cartridge, "gemini", 1, 2);
        assert_eq!(ctx.messages.len(), 2);
        assert_eq!(ctx.messages[0].content, "labas");
    }

    #[test]
    fn snapshot_round_trips_through_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("trickster")).expect("mkdir");
        std::fs::write(dir.path().join("trickster/persona_base.md"), "persona turinys")
            .expect("write");
        let store = Arc::new(PromptStore::new(dir.path()));
        let assembler = ContextAssembler::new(store.clone(), &ContextSettings::default());

        let loaded = store.load("gemini", None);
        let mut session = GameSession::new("mok-1");
        assembler.snapshot_prompts(&mut session, &loaded);

        let restored = assembler.prompt_snapshot(&session).expect("snapshot");
        assert_eq!(restored, loaded);
    }

    #[test]
    fn snapshot_shields_session_from_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("trickster")).expect("mkdir");
        std::fs::write(dir.path().join("trickster/persona_base.md"), "originali persona")
            .expect("write");
        let store = Arc::new(PromptStore::new(dir.path()));
        let assembler = ContextAssembler::new(store.clone(), &ContextSettings::default());
        let cartridge = cartridge();

        let mut session = GameSession::new("mok-1");
        let loaded = store.load("gemini", Some("uzd-1"));
        assembler.snapshot_prompts(&mut session, &loaded);

        // content changes and the cache is flushed
        std::fs::write(dir.path().join("trickster/persona_base.md"), "nauja persona")
            .expect("write");
        store.invalidate();

        let ctx = assembler.assemble_dialogue(&mut session, &cartridge, "gemini", 1, 2);
        assert!(ctx.system_prompt.contains("originali persona"));
        assert!(!ctx.system_prompt.contains("nauja persona"));
    }
}
