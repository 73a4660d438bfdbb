//! Derived social-economic state: rumor heat, factions, world events, the
//! market plan, and the story arc.
//!
//! Each model pairs an AI-draft ingestion path (validated and clamped field
//! by field) with a deterministic offline fallback, so the town keeps moving
//! when no generator is reachable. Blended updates damp refresh-to-refresh
//! churn.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::crops::CropKind;
use crate::geom::Area;
use crate::hash::{stable_hash, stable_hash_str};
use crate::ids::NpcId;
use crate::routine::{Role, RoutineNudge, VenueKind};

/// Heat added when an event text mentions an area or role.
pub const RUMOR_SPIKE: u8 = 8;
/// Rumor heat ceiling.
pub const RUMOR_MAX: u8 = 70;

/// Faction influence bounds.
pub const INFLUENCE_MIN: u8 = 20;
pub const INFLUENCE_MAX: u8 = 80;

/// Most world events active at once.
pub const MAX_HAPPENINGS: usize = 4;

/// Reward multiplier bounds.
pub const REWARD_MULT_MIN: f32 = 0.75;
pub const REWARD_MULT_MAX: f32 = 1.35;

/// Largest routine shift a nudge may apply, in minutes.
pub const MAX_NUDGE_SHIFT: i16 = 120;

// =============================================================================
// Weather
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Weather {
    #[default]
    Clear,
    Overcast,
    Rain,
    Fog,
}

impl Weather {
    pub fn display_name(self) -> &'static str {
        match self {
            Weather::Clear => "clear",
            Weather::Overcast => "overcast",
            Weather::Rain => "rain",
            Weather::Fog => "fog",
        }
    }

    pub fn parse(text: &str) -> Option<Weather> {
        match text.trim().to_lowercase().as_str() {
            "clear" | "sunny" => Some(Weather::Clear),
            "overcast" | "cloudy" => Some(Weather::Overcast),
            "rain" | "rainy" | "storm" => Some(Weather::Rain),
            "fog" | "foggy" | "mist" => Some(Weather::Fog),
            _ => None,
        }
    }
}

impl std::fmt::Display for Weather {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

// =============================================================================
// Rumor heat
// =============================================================================

/// Decaying per-area and per-role gossip intensity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RumorHeatMap {
    pub areas: HashMap<Area, u8>,
    pub roles: HashMap<Role, u8>,
}

impl Default for RumorHeatMap {
    fn default() -> Self {
        Self {
            areas: Area::ALL.into_iter().map(|a| (a, 0)).collect(),
            roles: Role::ALL.into_iter().map(|r| (r, 0)).collect(),
        }
    }
}

impl RumorHeatMap {
    /// Fold one town event into the heat map: everything cools by 1, then
    /// every area and role named in the text spikes.
    pub fn on_event(&mut self, text: &str) {
        let lowered = text.to_lowercase();
        for (area, heat) in self.areas.iter_mut() {
            *heat = heat.saturating_sub(1);
            if lowered.contains(area.display_name()) {
                *heat = (*heat + RUMOR_SPIKE).min(RUMOR_MAX);
            }
        }
        for (role, heat) in self.roles.iter_mut() {
            *heat = heat.saturating_sub(1);
            if lowered.contains(role.display_name()) {
                *heat = (*heat + RUMOR_SPIKE).min(RUMOR_MAX);
            }
        }
    }

    /// The hottest area, for generation context and the world view.
    pub fn hottest_area(&self) -> Option<(Area, u8)> {
        self.areas
            .iter()
            .max_by_key(|(_, heat)| **heat)
            .filter(|(_, heat)| **heat > 0)
            .map(|(area, heat)| (*area, *heat))
    }
}

// =============================================================================
// Factions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Faction {
    pub name: String,
    pub members: Vec<NpcId>,
    pub influence: u8,
}

/// Tension between two factions, keyed by ordered names. Kept as records so
/// the snapshot stays valid JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensionRecord {
    pub a: String,
    pub b: String,
    pub tension: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactionState {
    pub factions: Vec<Faction>,
    pub tensions: Vec<TensionRecord>,
}

impl FactionState {
    pub fn influence_of(&self, name: &str) -> Option<u8> {
        self.factions
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.influence)
    }

    pub fn tension_between(&self, a: &str, b: &str) -> Option<u8> {
        let (a, b) = order_names(a, b);
        self.tensions
            .iter()
            .find(|t| t.a == a && t.b == b)
            .map(|t| t.tension)
    }

    /// Merge a validated draft into the current state. Influence blends 65%
    /// old / 35% new; tensions blend 60/40. Unknown member names are dropped
    /// by the resolver.
    pub fn ingest(&mut self, draft: FactionDraft, resolve_npc: &dyn Fn(&str) -> Option<NpcId>) {
        let mut next = Vec::new();
        for entry in draft.factions.into_iter().take(MAX_HAPPENINGS + 1) {
            let name = entry.name.trim().to_string();
            if name.is_empty() {
                continue;
            }
            let incoming = entry
                .influence
                .unwrap_or(50)
                .clamp(INFLUENCE_MIN as i32, INFLUENCE_MAX as i32) as u8;
            let influence = match self.influence_of(&name) {
                Some(previous) => blend(previous, incoming, 0.65),
                None => incoming,
            };
            let members: Vec<NpcId> = entry
                .members
                .iter()
                .filter_map(|n| resolve_npc(n))
                .collect();
            next.push(Faction {
                name,
                members,
                influence: influence.clamp(INFLUENCE_MIN, INFLUENCE_MAX),
            });
        }
        if !next.is_empty() {
            self.factions = next;
        }

        let mut tensions = Vec::new();
        for entry in draft.tensions {
            let (a, b) = order_names(entry.a.trim(), entry.b.trim());
            if a.is_empty() || b.is_empty() || a == b {
                continue;
            }
            let incoming = entry.tension.unwrap_or(30).clamp(0, 100) as u8;
            let tension = match self.tension_between(&a, &b) {
                Some(previous) => blend(previous, incoming, 0.60),
                None => incoming,
            };
            tensions.push(TensionRecord { a, b, tension });
        }
        if !tensions.is_empty() {
            self.tensions = tensions;
        }
    }
}

fn order_names(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

fn blend(previous: u8, incoming: u8, keep: f32) -> u8 {
    (previous as f32 * keep + incoming as f32 * (1.0 - keep)).round() as u8
}

// =============================================================================
// World events
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventEffect {
    FlipWeather(Weather),
    BoostRewards(f32),
    AppendRumor(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldHappening {
    pub title: String,
    pub severity: u8,
    pub effect: EventEffect,
}

// =============================================================================
// Economy
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DemandTier {
    Low,
    #[default]
    Normal,
    High,
}

impl DemandTier {
    fn parse(text: &str) -> DemandTier {
        match text.trim().to_lowercase().as_str() {
            "low" => DemandTier::Low,
            "high" => DemandTier::High,
            _ => DemandTier::Normal,
        }
    }
}

/// The market plan for the day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomyPlan {
    pub prices: HashMap<CropKind, u32>,
    pub demand: HashMap<CropKind, DemandTier>,
    pub reward_multiplier: f32,
}

impl Default for EconomyPlan {
    fn default() -> Self {
        Self {
            prices: CropKind::ALL
                .into_iter()
                .map(|c| (c, c.def().base_price))
                .collect(),
            demand: CropKind::ALL.into_iter().map(|c| (c, DemandTier::Normal)).collect(),
            reward_multiplier: 1.0,
        }
    }
}

impl EconomyPlan {
    pub fn price_of(&self, crop: CropKind) -> Option<u32> {
        self.prices.get(&crop).copied()
    }

    pub fn boost_rewards(&mut self, amount: f32) {
        self.reward_multiplier =
            (self.reward_multiplier + amount).clamp(REWARD_MULT_MIN, REWARD_MULT_MAX);
    }
}

// =============================================================================
// Story arc
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryArc {
    pub title: String,
    pub stages: Vec<String>,
    pub current: usize,
    pub completed: bool,
}

/// Result of one arc advancement.
#[derive(Debug, Clone, PartialEq)]
pub enum ArcStep {
    /// The arc moved on to this stage.
    NowAt(String),
    /// The final stage finished; the arc is done.
    Completed,
    /// Nothing to advance.
    AlreadyDone,
}

impl StoryArc {
    pub fn current_stage(&self) -> Option<&str> {
        if self.completed {
            None
        } else {
            self.stages.get(self.current).map(String::as_str)
        }
    }

    /// Move to the next stage; mission completions drive this.
    pub fn advance(&mut self) -> ArcStep {
        if self.completed {
            return ArcStep::AlreadyDone;
        }
        self.current += 1;
        match self.stages.get(self.current) {
            Some(stage) => ArcStep::NowAt(stage.clone()),
            None => {
                self.completed = true;
                ArcStep::Completed
            }
        }
    }
}

// =============================================================================
// Drafts
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EconomyDraft {
    #[serde(default)]
    pub prices: HashMap<String, u32>,
    #[serde(default)]
    pub demand: HashMap<String, String>,
    #[serde(default)]
    pub reward_multiplier: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactionDraftEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub influence: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TensionDraftEntry {
    #[serde(default)]
    pub a: String,
    #[serde(default)]
    pub b: String,
    #[serde(default)]
    pub tension: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactionDraft {
    #[serde(default)]
    pub factions: Vec<FactionDraftEntry>,
    #[serde(default)]
    pub tensions: Vec<TensionDraftEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDraftEntry {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub severity: Option<i32>,
    /// Effect keyword: weather, rewards, rumor.
    #[serde(default)]
    pub effect: String,
    #[serde(default)]
    pub weather: Option<String>,
    #[serde(default)]
    pub amount: Option<f32>,
    #[serde(default)]
    pub rumor: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsDraft {
    #[serde(default)]
    pub events: Vec<EventDraftEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RumorDraft {
    #[serde(default)]
    pub rumor: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArcDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub stages: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutineDraftEntry {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub shift_minutes: Option<i32>,
    #[serde(default)]
    pub venue: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutineDraft {
    #[serde(default)]
    pub nudges: Vec<RoutineDraftEntry>,
}

// =============================================================================
// Normalization
// =============================================================================

/// Fold an economy draft over the previous plan, clamping everything.
pub fn normalize_economy(draft: EconomyDraft, previous: &EconomyPlan) -> EconomyPlan {
    let mut plan = previous.clone();
    for (name, price) in draft.prices {
        if let Some(crop) = CropKind::parse(&name) {
            plan.prices.insert(crop, price.clamp(1, 200));
        }
    }
    for (name, tier) in draft.demand {
        if let Some(crop) = CropKind::parse(&name) {
            plan.demand.insert(crop, DemandTier::parse(&tier));
        }
    }
    if let Some(mult) = draft.reward_multiplier {
        if mult.is_finite() {
            plan.reward_multiplier = mult.clamp(REWARD_MULT_MIN, REWARD_MULT_MAX);
        }
    }
    plan
}

/// Validate an events draft into at most [`MAX_HAPPENINGS`] happenings.
pub fn normalize_events(draft: EventsDraft) -> Vec<WorldHappening> {
    draft
        .events
        .into_iter()
        .filter_map(|entry| {
            let title = entry.title.trim().to_string();
            if title.is_empty() {
                return None;
            }
            let severity = entry.severity.unwrap_or(1).clamp(1, 2) as u8;
            let effect = match entry.effect.trim().to_lowercase().as_str() {
                "weather" => EventEffect::FlipWeather(
                    entry.weather.as_deref().and_then(Weather::parse).unwrap_or(Weather::Overcast),
                ),
                "rewards" => {
                    let amount = entry.amount.unwrap_or(0.1);
                    let amount = if amount.is_finite() {
                        amount.clamp(-0.3, 0.3)
                    } else {
                        0.1
                    };
                    EventEffect::BoostRewards(amount)
                }
                _ => EventEffect::AppendRumor(
                    entry.rumor.unwrap_or_else(|| title.clone()),
                ),
            };
            Some(WorldHappening {
                title,
                severity,
                effect,
            })
        })
        .take(MAX_HAPPENINGS)
        .collect()
}

/// A non-empty trimmed rumor line, capped in length.
pub fn normalize_rumor(draft: RumorDraft) -> Option<String> {
    let rumor = draft.rumor.trim();
    if rumor.is_empty() {
        return None;
    }
    let mut line: String = rumor.chars().take(160).collect();
    if line.len() < rumor.len() {
        line.push('…');
    }
    Some(line)
}

/// Validate an arc draft; drafts without at least two stages are rejected.
pub fn normalize_arc(draft: ArcDraft) -> Option<StoryArc> {
    let title = draft.title.trim().to_string();
    let stages: Vec<String> = draft
        .stages
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .take(5)
        .collect();
    if title.is_empty() || stages.len() < 2 {
        return None;
    }
    Some(StoryArc {
        title,
        stages,
        current: 0,
        completed: false,
    })
}

/// Validate routine nudges; unknown roles are dropped, shifts clamped.
pub fn normalize_routines(draft: RoutineDraft) -> HashMap<Role, RoutineNudge> {
    let mut nudges = HashMap::new();
    for entry in draft.nudges {
        let Some(role) = Role::parse(&entry.role) else {
            continue;
        };
        let shift = entry
            .shift_minutes
            .unwrap_or(0)
            .clamp(-(MAX_NUDGE_SHIFT as i32), MAX_NUDGE_SHIFT as i32) as i16;
        nudges.insert(
            role,
            RoutineNudge {
                shift_minutes: shift,
                venue: entry.venue.as_deref().and_then(VenueKind::parse),
            },
        );
    }
    nudges
}

// =============================================================================
// Deterministic fallbacks
// =============================================================================

/// Offline market plan: prices wobble around base by day, demand rotates.
pub fn fallback_economy(day: u32) -> EconomyPlan {
    let mut plan = EconomyPlan::default();
    for crop in CropKind::ALL {
        let h = stable_hash(&[day as u64, stable_hash_str(crop.display_name())]);
        let base = crop.def().base_price;
        // Wobble in [-25%, +25%] of base.
        let wobble = (h % 51) as i64 - 25;
        let price = (base as i64 + base as i64 * wobble / 100).max(1) as u32;
        plan.prices.insert(crop, price);
        let tier = match (h >> 8) & 0b11 {
            0 => DemandTier::Low,
            1 | 2 => DemandTier::Normal,
            _ => DemandTier::High,
        };
        plan.demand.insert(crop, tier);
    }
    let mult_wobble = (stable_hash(&[day as u64, 0xec0]) % 31) as f32 / 100.0 - 0.15;
    plan.reward_multiplier = (1.0 + mult_wobble).clamp(REWARD_MULT_MIN, REWARD_MULT_MAX);
    plan
}

/// Offline faction snapshot: two standing factions split by trade, with a
/// day-hashed drift in influence and tension. Member names feed the same
/// ingestion resolver the generator path uses.
pub fn fallback_factions(npcs: &[(String, Role)], day: u32) -> FactionDraft {
    let names_of = |pick: &dyn Fn(Role) -> bool| -> Vec<String> {
        npcs.iter()
            .filter(|(_, role)| pick(*role))
            .map(|(name, _)| name.clone())
            .collect()
    };
    let harbour = names_of(&|role| {
        matches!(role, Role::Fisher | Role::Merchant | Role::Innkeeper | Role::Guard)
    });
    let field = names_of(&|role| {
        matches!(role, Role::Farmer | Role::Forester | Role::Priest | Role::Blacksmith)
    });

    let drift = |salt: u64| ((stable_hash(&[day as u64, salt]) % 21) as i32 - 10);
    FactionDraft {
        factions: vec![
            FactionDraftEntry {
                name: "Harbor Guild".to_string(),
                members: harbour,
                influence: Some(50 + drift(1)),
            },
            FactionDraftEntry {
                name: "Field Circle".to_string(),
                members: field,
                influence: Some(50 + drift(2)),
            },
        ],
        tensions: vec![TensionDraftEntry {
            a: "Harbor Guild".to_string(),
            b: "Field Circle".to_string(),
            tension: Some(30 + drift(3)),
        }],
    }
}

const FALLBACK_EVENTS: &[(&str, &str)] = &[
    ("A cold wind off the water", "weather"),
    ("Good catch at the docks", "rewards"),
    ("Strangers seen near the forest", "rumor"),
    ("The chapel bell rang thirteen times", "rumor"),
    ("Market stalls packed early", "rewards"),
    ("Fog banks rolling up the river", "weather"),
];

/// Offline world events: one or two drawn from a fixed table by day.
pub fn fallback_events(day: u32) -> EventsDraft {
    let h = stable_hash(&[day as u64, 0xeef]);
    let count = 1 + (h % 2) as usize;
    let events = (0..count)
        .map(|i| {
            let (title, effect) = FALLBACK_EVENTS[(h as usize + i * 3) % FALLBACK_EVENTS.len()];
            EventDraftEntry {
                title: title.to_string(),
                severity: Some(1 + ((h >> (4 * i)) % 2) as i32),
                effect: effect.to_string(),
                weather: Some(if h & 1 == 0 { "fog" } else { "rain" }.to_string()),
                amount: Some(0.08),
                rumor: None,
            }
        })
        .collect();
    EventsDraft { events }
}

const FALLBACK_RUMORS: &[&str] = &[
    "They say the miller's scales run light on market days.",
    "Someone left flowers at the forest shrine before dawn.",
    "The guard doubled their rounds past the docks last night.",
    "Old nets keep washing up torn below the riverside.",
    "The innkeeper is paying double for pumpkins, so they say.",
    "A letter with no seal arrived at the chapel.",
];

/// Offline rumor of the day.
pub fn fallback_rumor(day: u32) -> String {
    FALLBACK_RUMORS[(stable_hash(&[day as u64, 0x4a]) as usize) % FALLBACK_RUMORS.len()].to_string()
}

/// Offline story arc used until a generator supplies one.
pub fn fallback_arc() -> StoryArc {
    StoryArc {
        title: "The Quiet Tide".to_string(),
        stages: vec![
            "Something has the town on edge, though nobody says what.".to_string(),
            "Whispers point toward the old shrine in the forest.".to_string(),
            "The factions each want the matter settled their own way.".to_string(),
            "The town gathers to put the unease to rest.".to_string(),
        ],
        current: 0,
        completed: false,
    }
}

/// Offline routine nudges: a mild shift for a couple of roles per day.
pub fn fallback_routines(day: u32) -> RoutineDraft {
    let nudges = Role::ALL
        .iter()
        .enumerate()
        .filter(|(i, _)| stable_hash(&[day as u64, *i as u64]) % 3 == 0)
        .map(|(i, role)| {
            let h = stable_hash(&[day as u64, 0xa0 + i as u64]);
            let shift = ((h % 5) as i32 - 2) * 30;
            RoutineDraftEntry {
                role: role.display_name().to_string(),
                shift_minutes: Some(shift),
                venue: ((h & 0b100) == 0).then(|| {
                    ["tavern", "plaza", "riverside"][(h >> 3) as usize % 3].to_string()
                }),
            }
        })
        .collect();
    RoutineDraft { nudges }
}
