//! View DTOs pushed to clients.
//!
//! Pure data, no domain types: ids are raw `Uuid`s, enums become display
//! strings, and positions are flat floats. The engine assembles these from
//! the world; clients only ever render them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointView {
    pub x: f32,
    pub y: f32,
}

// =============================================================================
// Shared town state (identical for every player, cacheable)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TownView {
    pub day: u32,
    pub minute: u32,
    /// Formatted as "Day 3, 14:20".
    pub clock_label: String,
    pub weather: String,
    pub rumor: String,
    pub arc: Option<ArcView>,
    pub happenings: Vec<HappeningView>,
    pub town_mission: Option<MissionView>,
    pub economy: EconomyView,
    pub factions: Vec<FactionView>,
    pub tensions: Vec<TensionView>,
    /// Today's event log, newest last.
    pub events_today: Vec<String>,
    pub npcs: Vec<NpcView>,
    pub players: Vec<PlayerPublicView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcView {
    pub id: Uuid,
    pub name: String,
    pub role: String,
    pub pos: PointView,
    pub area: String,
    /// What the NPC is up to, e.g. "working", "at the tavern", "following you".
    pub doing: String,
    pub in_conversation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerPublicView {
    pub id: Uuid,
    pub name: String,
    pub pos: PointView,
    pub sleeping: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcView {
    pub title: String,
    pub stage: String,
    pub stage_number: usize,
    pub total_stages: usize,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HappeningView {
    pub title: String,
    pub severity: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomyView {
    pub prices: Vec<CropPriceView>,
    pub reward_multiplier: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropPriceView {
    pub crop: String,
    pub price: u32,
    pub demand: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactionView {
    pub name: String,
    pub influence: u8,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensionView {
    pub a: String,
    pub b: String,
    pub tension: u8,
}

// =============================================================================
// Per-player state
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: Uuid,
    pub name: String,
    pub pos: PointView,
    pub sleeping: bool,
    pub farm: FarmView,
    pub missions: MissionsView,
    pub reputation: ReputationView,
    /// How each NPC's circle currently regards this player.
    pub npc_stances: Vec<NpcStanceView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcStanceView {
    pub npc_id: Uuid,
    pub stance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmView {
    pub home: PointView,
    pub coins: u32,
    pub plots: Vec<PlotView>,
    pub seeds: Vec<CropCountView>,
    pub produce: Vec<CropCountView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotView {
    pub index: usize,
    pub pos: PointView,
    /// `empty`, `seeded`, `growing`, or `ready`.
    pub state: String,
    pub crop: Option<String>,
    pub growth_percent: u8,
    pub moisture_percent: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropCountView {
    pub crop: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionsView {
    /// The opening chain, while any of it remains.
    pub chain: Option<MissionView>,
    pub dynamic: Option<MissionView>,
    pub town: Option<TownProgressView>,
    pub completed_dynamic: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionView {
    pub id: Uuid,
    pub title: String,
    pub blurb: String,
    pub objective: String,
    pub reward_coins: u32,
    pub urgency: Option<u8>,
    /// Human-readable progress, e.g. "2/3 harvested".
    pub progress: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TownProgressView {
    pub mission_id: Uuid,
    pub progress: String,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationView {
    pub global: i16,
    pub label: String,
    pub by_role: Vec<RoleRepView>,
    /// Recent deltas, freshest first, e.g. "+4 (mission for the smith)".
    pub recent: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRepView {
    pub role: String,
    pub score: i16,
}

/// The full per-player push: the shared town body plus this player's slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldView {
    pub town: TownView,
    pub you: PlayerView,
}
