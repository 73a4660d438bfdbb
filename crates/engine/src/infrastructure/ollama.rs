//! Ollama line generator (OpenAI-compatible API).
//!
//! Every reply is expected to carry a JSON object; models wrap it in prose
//! or code fences often enough that we scan for the first balanced brace
//! block instead of parsing the raw reply.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use tidemill_domain::{
    ArcDraft, EconomyDraft, EventsDraft, FactionDraft, MissionDraft, RoutineDraft, RumorDraft,
};

use crate::infrastructure::ports::{
    DraftContext, GeneratedLine, LineGenError, LineGenPort, LineRequest, RelationShift,
    ShiftRequest,
};

/// Default Ollama base URL.
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Default model for Ollama.
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

/// Client for Ollama's OpenAI-compatible API.
#[derive(Clone)]
pub struct OllamaLineGen {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaLineGen {
    pub fn new(base_url: &str, model: &str) -> Self {
        // LLM requests can be slow; give them two minutes.
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// Create client from `OLLAMA_URL` and `OLLAMA_MODEL`, falling back to
    /// defaults when unset.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("OLLAMA_URL").unwrap_or_else(|_| DEFAULT_OLLAMA_BASE_URL.to_string());
        let model =
            std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| DEFAULT_OLLAMA_MODEL.to_string());
        Self::new(&base_url, &model)
    }

    async fn chat(
        &self,
        system: String,
        user: String,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LineGenError> {
        let request = OpenAIChatRequest {
            model: self.model.clone(),
            messages: vec![
                OpenAIMessage {
                    role: "system".to_string(),
                    content: system,
                },
                OpenAIMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            temperature,
            max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| LineGenError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .map_err(|e| LineGenError::RequestFailed(e.to_string()))?;
            return Err(LineGenError::RequestFailed(error_text));
        }

        let api_response: OpenAIChatResponse = response
            .json()
            .await
            .map_err(|e| LineGenError::InvalidResponse(e.to_string()))?;

        api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LineGenError::InvalidResponse("no choices in reply".to_string()))
    }

    async fn draft<T: serde::de::DeserializeOwned>(
        &self,
        instruction: &str,
        ctx: &DraftContext,
    ) -> Result<T, LineGenError> {
        let reply = self
            .chat(
                DRAFT_SYSTEM.to_string(),
                format!("{}\n\n{}", draft_context_block(ctx), instruction),
                0.8,
                700,
            )
            .await?;
        let json = extract_json(&reply)
            .ok_or_else(|| LineGenError::InvalidResponse("no JSON object in reply".to_string()))?;
        serde_json::from_str(json).map_err(|e| LineGenError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl LineGenPort for OllamaLineGen {
    async fn generate_line(&self, req: LineRequest) -> Result<GeneratedLine, LineGenError> {
        let system = format!(
            "You voice {name}, the town {role} in a small riverside town. \
             Traits: {traits}. Speak in character, one short reply, no narration. \
             Respond ONLY with JSON: \
             {{\"line\": \"...\", \"emotion\": \"one word\", \"memory\": \"note or empty\"}}",
            name = req.speaker_name,
            role = req.speaker_role,
            traits = req.speaker_traits.join(", "),
        );
        let mut user = format!(
            "Weather: {}. Word around town: {}\n",
            req.weather, req.rumor
        );
        if let Some(stage) = &req.arc_stage {
            user.push_str(&format!("The mood of the season: {stage}\n"));
        }
        if !req.memories.is_empty() {
            user.push_str("You remember:\n");
            for memory in &req.memories {
                user.push_str(&format!("- {memory}\n"));
            }
        }
        let who = if req.listener_is_player {
            "a visitor"
        } else {
            "a neighbour"
        };
        if req.prompt.is_empty() {
            user.push_str(&format!(
                "{listener}, {who}, approaches you. Greet or address them (turn {turn}).",
                listener = req.listener_name,
                who = who,
                turn = req.turn,
            ));
        } else {
            user.push_str(&format!(
                "{listener} ({who}) says to you: \"{prompt}\". Reply (turn {turn}).",
                listener = req.listener_name,
                who = who,
                prompt = req.prompt,
                turn = req.turn,
            ));
        }

        let reply = self.chat(system, user, 0.9, 220).await?;
        Ok(parse_generated_line(&reply))
    }

    async fn assess_shift(&self, req: ShiftRequest) -> Result<RelationShift, LineGenError> {
        let system = format!(
            "You judge how a conversation changed {npc}'s (the {role}) opinion of {player}. \
             Respond ONLY with JSON: {{\"delta\": -2..2, \"reason\": \"short phrase\"}}",
            npc = req.npc_name,
            role = req.npc_role,
            player = req.player_name,
        );
        let user = format!("The conversation:\n{}", req.transcript.join("\n"));
        let reply = self.chat(system, user, 0.3, 120).await?;
        let json = extract_json(&reply)
            .ok_or_else(|| LineGenError::InvalidResponse("no JSON object in reply".to_string()))?;
        let raw: ShiftReply =
            serde_json::from_str(json).map_err(|e| LineGenError::InvalidResponse(e.to_string()))?;
        Ok(RelationShift {
            delta: raw.delta.clamp(-2, 2) as i8,
            reason: raw.reason.unwrap_or_default(),
        })
    }

    async fn draft_mission(&self, ctx: DraftContext) -> Result<MissionDraft, LineGenError> {
        self.draft(
            "Write one small mission a townsperson might post. JSON fields: \
             title, blurb, kind (reach_point|talk_to_npc|talk_to_role|visit_area|harvest_count|\
             talk_unique_npcs|talk_unique_roles|visit_unique_areas), target, count, urgency (1-3), \
             giver_role.",
            &ctx,
        )
        .await
    }

    async fn draft_economy(&self, ctx: DraftContext) -> Result<EconomyDraft, LineGenError> {
        self.draft(
            "Set tomorrow's market. JSON fields: prices (map of crop name to coins), \
             demand (map of crop name to low|normal|high), reward_multiplier (0.75-1.35).",
            &ctx,
        )
        .await
    }

    async fn draft_factions(&self, ctx: DraftContext) -> Result<FactionDraft, LineGenError> {
        self.draft(
            "Update the town's factions. JSON fields: factions (list of {name, members \
             (NPC names), influence 20-80}), tensions (list of {a, b, tension 0-100}).",
            &ctx,
        )
        .await
    }

    async fn draft_events(&self, ctx: DraftContext) -> Result<EventsDraft, LineGenError> {
        self.draft(
            "Invent up to 4 small world events for tomorrow. JSON field: events (list of \
             {title, severity 1-2, effect (weather|rewards|rumor), weather, amount, rumor}).",
            &ctx,
        )
        .await
    }

    async fn draft_rumor(&self, ctx: DraftContext) -> Result<RumorDraft, LineGenError> {
        self.draft(
            "Write tomorrow's rumor of the day, one sentence. JSON field: rumor.",
            &ctx,
        )
        .await
    }

    async fn draft_arc(&self, ctx: DraftContext) -> Result<ArcDraft, LineGenError> {
        self.draft(
            "Invent a slow story arc for the town. JSON fields: title, stages \
             (3-5 one-sentence stages).",
            &ctx,
        )
        .await
    }

    async fn draft_routines(&self, ctx: DraftContext) -> Result<RoutineDraft, LineGenError> {
        self.draft(
            "Nudge tomorrow's routines. JSON field: nudges (list of {role, shift_minutes \
             -120..120, venue (tavern|plaza|chapel|riverside|market)}).",
            &ctx,
        )
        .await
    }
}

/// A generator that always fails, forcing every caller onto its
/// deterministic fallback. Used in tests and for offline operation.
pub struct NullLineGen;

#[async_trait]
impl LineGenPort for NullLineGen {
    async fn generate_line(&self, _req: LineRequest) -> Result<GeneratedLine, LineGenError> {
        Err(LineGenError::RequestFailed("line generation disabled".to_string()))
    }

    async fn assess_shift(&self, _req: ShiftRequest) -> Result<RelationShift, LineGenError> {
        Err(LineGenError::RequestFailed("line generation disabled".to_string()))
    }

    async fn draft_mission(&self, _ctx: DraftContext) -> Result<MissionDraft, LineGenError> {
        Err(LineGenError::RequestFailed("line generation disabled".to_string()))
    }

    async fn draft_economy(&self, _ctx: DraftContext) -> Result<EconomyDraft, LineGenError> {
        Err(LineGenError::RequestFailed("line generation disabled".to_string()))
    }

    async fn draft_factions(&self, _ctx: DraftContext) -> Result<FactionDraft, LineGenError> {
        Err(LineGenError::RequestFailed("line generation disabled".to_string()))
    }

    async fn draft_events(&self, _ctx: DraftContext) -> Result<EventsDraft, LineGenError> {
        Err(LineGenError::RequestFailed("line generation disabled".to_string()))
    }

    async fn draft_rumor(&self, _ctx: DraftContext) -> Result<RumorDraft, LineGenError> {
        Err(LineGenError::RequestFailed("line generation disabled".to_string()))
    }

    async fn draft_arc(&self, _ctx: DraftContext) -> Result<ArcDraft, LineGenError> {
        Err(LineGenError::RequestFailed("line generation disabled".to_string()))
    }

    async fn draft_routines(&self, _ctx: DraftContext) -> Result<RoutineDraft, LineGenError> {
        Err(LineGenError::RequestFailed("line generation disabled".to_string()))
    }
}

// =============================================================================
// Reply parsing
// =============================================================================

const DRAFT_SYSTEM: &str = "You are the unseen hand shaping a small riverside town. \
     Answer ONLY with the requested JSON object, nothing else.";

fn draft_context_block(ctx: &DraftContext) -> String {
    let mut block = format!(
        "Day {day}. Weather: {weather}. Rumor: {rumor}\nResidents: {roster}",
        day = ctx.day,
        weather = ctx.weather,
        rumor = ctx.rumor,
        roster = ctx.roster.join(", "),
    );
    if let Some(stage) = &ctx.arc_stage {
        block.push_str(&format!("\nStory so far: {stage}"));
    }
    if !ctx.faction_names.is_empty() {
        block.push_str(&format!("\nFactions: {}", ctx.faction_names.join(", ")));
    }
    if !ctx.recent_events.is_empty() {
        block.push_str(&format!("\nRecent events: {}", ctx.recent_events.join("; ")));
    }
    if let Some(player) = &ctx.player_name {
        block.push_str(&format!("\nThe mission is for {player}"));
        if let Some(rep) = &ctx.player_reputation {
            block.push_str(&format!(", who the town considers {rep}"));
        }
        block.push('.');
    }
    block
}

#[derive(Debug, Deserialize)]
struct LineReply {
    #[serde(default)]
    line: String,
    #[serde(default)]
    emotion: Option<String>,
    #[serde(default)]
    memory: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShiftReply {
    #[serde(default)]
    delta: i32,
    #[serde(default)]
    reason: Option<String>,
}

/// Lenient line parsing: prefer the JSON shape, fall back to treating the
/// whole reply as the spoken line.
fn parse_generated_line(reply: &str) -> GeneratedLine {
    if let Some(json) = extract_json(reply) {
        if let Ok(parsed) = serde_json::from_str::<LineReply>(json) {
            if !parsed.line.trim().is_empty() {
                return GeneratedLine {
                    line: parsed.line.trim().to_string(),
                    emotion: parsed
                        .emotion
                        .filter(|e| !e.trim().is_empty())
                        .unwrap_or_else(|| "neutral".to_string()),
                    memory_note: parsed.memory.filter(|m| !m.trim().is_empty()),
                };
            }
        }
    }
    GeneratedLine {
        line: reply.trim().to_string(),
        emotion: "neutral".to_string(),
        memory_note: None,
    }
}

/// Find the first balanced `{...}` block, respecting strings and escapes.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

// =============================================================================
// OpenAI API types
// =============================================================================

#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_finds_a_plain_object() {
        let text = r#"{"line": "Morning.", "emotion": "warm"}"#;
        assert_eq!(extract_json(text), Some(text));
    }

    #[test]
    fn extract_json_skips_leading_prose_and_fences() {
        let text = "Sure! Here you go:\n```json\n{\"rumor\": \"The tide was late.\"}\n```";
        assert_eq!(extract_json(text), Some(r#"{"rumor": "The tide was late."}"#));
    }

    #[test]
    fn extract_json_handles_nested_objects_and_braces_in_strings() {
        let text = r#"noise {"a": {"b": "has } brace"}, "c": 1} trailing"#;
        assert_eq!(
            extract_json(text),
            Some(r#"{"a": {"b": "has } brace"}, "c": 1}"#)
        );
    }

    #[test]
    fn extract_json_returns_none_without_an_object() {
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("{unclosed"), None);
    }

    #[test]
    fn parse_line_prefers_the_json_shape() {
        let parsed =
            parse_generated_line(r#"{"line": "The forge is hot.", "emotion": "gruff", "memory": ""}"#);
        assert_eq!(parsed.line, "The forge is hot.");
        assert_eq!(parsed.emotion, "gruff");
        assert_eq!(parsed.memory_note, None);
    }

    #[test]
    fn parse_line_falls_back_to_the_raw_reply() {
        let parsed = parse_generated_line("The forge is hot.");
        assert_eq!(parsed.line, "The forge is hot.");
        assert_eq!(parsed.emotion, "neutral");
    }

    #[test]
    fn draft_payloads_decode_with_missing_fields() {
        let draft: MissionDraft =
            serde_json::from_str(r#"{"title": "Nets to mend", "kind": "visit_area", "target": "docks"}"#)
                .unwrap();
        assert_eq!(draft.title, "Nets to mend");
        assert!(draft.urgency.is_none());
    }
}
