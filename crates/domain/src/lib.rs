//! Tidemill domain: the world aggregate and every simulation rule that acts
//! on it. Pure and synchronous; time, randomness, and text generation are
//! injected by the engine.

pub mod clock;
pub mod crops;
pub mod error;
pub mod farm;
pub mod geom;
pub mod hash;
pub mod ids;
pub mod missions;
pub mod movement;
pub mod npc;
pub mod player;
pub mod relations;
pub mod routine;
pub mod seed;
pub mod social;
pub mod world;

pub use clock::{Moment, WorldClock};
pub use error::DomainError;
pub use world::{TownEvent, World};

// Re-export ID types
pub use ids::{ConnectionId, MissionId, NpcId, PlayerId};

// Geometry and the fixed town map
pub use geom::{Area, Rect, Vec2, FOREST_SHRINE, WORLD_SIZE};

// NPC state and behaviour
pub use npc::{Directive, DirectiveKind, Npc, NpcProfile, NpcTask, MAX_TASKS};
pub use routine::{MovementStyle, Role, RoutineNudge, RoutinePhase, RoutineState, VenueKind};

// Players, farming, missions
pub use crops::{CropDef, CropKind};
pub use farm::{
    apply_action, tick_growth, Farm, FarmAction, FarmActionError, FarmOutcome, HarvestReport,
    Inventory, Plot, PlotState, FARM_REACH, PLOTS_PER_FARM, STARTING_COINS,
};
pub use missions::{
    apply_event, chain_mission, normalize_mission_draft, DynamicMission, MissionAdvance,
    MissionDraft, MissionEvent, MissionProgress, MissionSpec, ObjectiveCounters, ObjectiveSpec,
    TownMission, TownMissionProgress,
};
pub use player::{split_line, DialogueState, PlayerSession};

// Social fabric
pub use relations::{
    pair_weight_multiplier, relation_label, reputation_label, PlayerReputation, RelationEntry,
    RelationStore, ReputationBook, ReputationDelta,
};
pub use social::{
    ArcDraft, ArcStep, DemandTier, EconomyDraft, EconomyPlan, EventEffect, EventsDraft, Faction,
    FactionDraft, FactionState, RoutineDraft, RumorDraft, RumorHeatMap, StoryArc, TensionRecord,
    Weather, WorldHappening,
};

pub use seed::seed_world;
