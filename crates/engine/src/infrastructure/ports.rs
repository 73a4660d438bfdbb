//! Port traits for infrastructure boundaries.
//!
//! These are the ONLY abstractions in the engine. Everything else is concrete
//! types. Ports exist for:
//! - Line generation (could swap Ollama -> any OpenAI-compatible backend)
//! - The durable store (could swap SQLite -> Postgres)
//! - Clock/Random (for testing)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tidemill_domain::{
    ArcDraft, EconomyDraft, EventsDraft, FactionDraft, MissionDraft, NpcId, RoutineDraft,
    RumorDraft,
};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LineGenError {
    #[error("generation request failed: {0}")]
    RequestFailed(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// The cooldown gate refused the key; the caller should fall back.
    #[error("rate limited")]
    RateLimited,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn database(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

// =============================================================================
// Clock and Random
// =============================================================================

pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub trait RandomPort: Send + Sync {
    /// Uniform draw in `[0, n)`; `n == 0` yields 0.
    fn draw(&self, n: u32) -> u32;
}

// =============================================================================
// Line generation
// =============================================================================

/// Everything the generator needs to voice one line.
#[derive(Debug, Clone, Default)]
pub struct LineRequest {
    pub speaker_name: String,
    pub speaker_role: String,
    pub speaker_traits: Vec<String>,
    pub listener_name: String,
    pub listener_is_player: bool,
    /// What prompted the line: the player's words, a conversation topic, or
    /// empty for an opener.
    pub prompt: String,
    pub turn: u32,
    pub weather: String,
    pub rumor: String,
    pub arc_stage: Option<String>,
    /// Relevant memory lines, freshest first.
    pub memories: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GeneratedLine {
    pub line: String,
    pub emotion: String,
    /// Something worth remembering from the exchange, if anything.
    pub memory_note: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ShiftRequest {
    pub npc_name: String,
    pub npc_role: String,
    pub player_name: String,
    /// The exchange, alternating lines, oldest first.
    pub transcript: Vec<String>,
}

/// How a conversation moved the NPC's opinion. `delta` is clamped to
/// `[-2, 2]` on ingestion regardless of what the generator claims.
#[derive(Debug, Clone)]
pub struct RelationShift {
    pub delta: i8,
    pub reason: String,
}

/// World summary handed to the nightly draft calls.
#[derive(Debug, Clone, Default)]
pub struct DraftContext {
    pub day: u32,
    pub weather: String,
    pub rumor: String,
    pub arc_stage: Option<String>,
    pub recent_events: Vec<String>,
    /// "Name (Role)" per NPC.
    pub roster: Vec<String>,
    pub faction_names: Vec<String>,
    /// For mission drafts: who the mission is for.
    pub player_name: Option<String>,
    pub player_reputation: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LineGenPort: Send + Sync {
    async fn generate_line(&self, req: LineRequest) -> Result<GeneratedLine, LineGenError>;
    async fn assess_shift(&self, req: ShiftRequest) -> Result<RelationShift, LineGenError>;

    // Nightly draft calls. Each returns loosely-typed serde data the core
    // must normalize before use.
    async fn draft_mission(&self, ctx: DraftContext) -> Result<MissionDraft, LineGenError>;
    async fn draft_economy(&self, ctx: DraftContext) -> Result<EconomyDraft, LineGenError>;
    async fn draft_factions(&self, ctx: DraftContext) -> Result<FactionDraft, LineGenError>;
    async fn draft_events(&self, ctx: DraftContext) -> Result<EventsDraft, LineGenError>;
    async fn draft_rumor(&self, ctx: DraftContext) -> Result<RumorDraft, LineGenError>;
    async fn draft_arc(&self, ctx: DraftContext) -> Result<ArcDraft, LineGenError>;
    async fn draft_routines(&self, ctx: DraftContext) -> Result<RoutineDraft, LineGenError>;
}

// =============================================================================
// Durable store
// =============================================================================

/// One remembered thing, owned by an NPC.
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub owner: NpcId,
    /// `intro`, `interaction`, `observation`, `banter`, ...
    pub kind: String,
    pub content: String,
    /// 1 (trivia) to 5 (life-changing).
    pub importance: i32,
    /// Free-form tags; counterpart ids and names go here so pair queries
    /// can find shared history.
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorePort: Send + Sync {
    async fn append_memory(&self, record: MemoryRecord) -> Result<(), StoreError>;
    async fn recent_memories(
        &self,
        owner: NpcId,
        limit: u32,
    ) -> Result<Vec<MemoryRecord>, StoreError>;
    /// Memories owned by `owner` that are tagged with `counterpart`.
    async fn pair_memories(
        &self,
        owner: NpcId,
        counterpart: Uuid,
        limit: u32,
    ) -> Result<Vec<MemoryRecord>, StoreError>;
    /// Append-only log of relation and reputation movement, for later audit.
    async fn record_relation_delta(
        &self,
        subject: Uuid,
        object: String,
        delta: i32,
        note: String,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
    async fn save_snapshot(&self, blob: String) -> Result<(), StoreError>;
    async fn load_snapshot(&self) -> Result<Option<String>, StoreError>;
}
