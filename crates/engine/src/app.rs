//! Application state and composition. One `App` per process, shared with
//! every handler and background loop via `Arc`.

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio::sync::RwLock;

use tidemill_domain::{NpcId, PlayerId, World};
use tidemill_shared::ServerMessage;

use crate::api::connections::ConnectionManager;
use crate::infrastructure::cooldown::{CooldownGate, TtlCache};
use crate::infrastructure::ports::{ClockPort, LineGenPort, RandomPort, StorePort};
use crate::npc_chat::CancelToken;
use crate::view::{self, ViewCache};

/// Window in which a repeated generation request for the same semantic key
/// is denied and the canned fallback used instead.
const GEN_GATE_WINDOW: Duration = Duration::from_secs(8);
const GEN_GATE_MAX_KEYS: usize = 512;

const SHIFT_CACHE_TTL: Duration = Duration::from_secs(6 * 3600);
const SHIFT_CACHE_MAX: usize = 512;

const FOLLOWUP_CACHE_TTL: Duration = Duration::from_secs(48 * 3600);
const FOLLOWUP_CACHE_MAX: usize = 256;

/// Simulation knobs, all overridable from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Wall-clock interval between ticks.
    pub tick_millis: u64,
    /// Simulated minutes each tick advances.
    pub tick_sim_minutes: u32,
    /// Ticks between autosaves.
    pub autosave_ticks: u32,
    /// In-world minutes an NPC stays unavailable for talk after a
    /// conversation ends.
    pub talk_cooldown_minutes: u32,
    /// Wall-clock pause between autonomous conversation turns.
    pub turn_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_millis: 1000,
            tick_sim_minutes: 2,
            autosave_ticks: 60,
            talk_cooldown_minutes: 30,
            turn_delay_ms: 1200,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Self {
            tick_millis: env_parse("TICK_MILLIS", defaults.tick_millis),
            tick_sim_minutes: env_parse("TICK_SIM_MINUTES", defaults.tick_sim_minutes),
            autosave_ticks: env_parse("AUTOSAVE_TICKS", defaults.autosave_ticks),
            talk_cooldown_minutes: env_parse(
                "TALK_COOLDOWN_MINUTES",
                defaults.talk_cooldown_minutes,
            ),
            turn_delay_ms: env_parse("TURN_DELAY_MS", defaults.turn_delay_ms),
        }
    }
}

/// Everything the handlers and loops share.
pub struct App {
    pub world: Arc<RwLock<World>>,
    pub connections: ConnectionManager,
    pub line_gen: Arc<dyn LineGenPort>,
    pub store: Arc<dyn StorePort>,
    pub clock: Arc<dyn ClockPort>,
    pub random: Arc<dyn RandomPort>,
    /// Rate limit per semantic generation key (speaker+target+context).
    pub talk_gate: CooldownGate,
    /// Relationship-shift assessments, one per pair per day.
    pub shift_cache: TtlCache<String, i8>,
    /// Next-day follow-up hints fed back into generation context.
    pub followup_cache: TtlCache<String, String>,
    /// An autonomous NPC conversation is running.
    pub convo_in_progress: AtomicBool,
    /// An NPC errand is being walked through.
    pub task_in_progress: AtomicBool,
    /// An autosave write is in flight.
    pub autosave_in_progress: AtomicBool,
    /// Raised to stop the running autonomous conversation at the next turn.
    pub cancel_chat: CancelToken,
    /// NPCs locked into the running autonomous conversation.
    pub chatting: DashSet<NpcId>,
    /// Finished observation reports waiting to be narrated to their
    /// requester on the next interaction.
    pub pending_reports: DashMap<(NpcId, PlayerId), String>,
    /// Rolling transcript of each player's current dialogue, for the
    /// end-of-talk relationship assessment.
    pub transcripts: DashMap<PlayerId, Vec<String>>,
    pub views: ViewCache,
    pub config: Config,
}

impl App {
    pub fn new(
        world: World,
        line_gen: Arc<dyn LineGenPort>,
        store: Arc<dyn StorePort>,
        clock: Arc<dyn ClockPort>,
        random: Arc<dyn RandomPort>,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            world: Arc::new(RwLock::new(world)),
            connections: ConnectionManager::new(),
            line_gen,
            store,
            clock,
            random,
            talk_gate: CooldownGate::new(GEN_GATE_WINDOW, GEN_GATE_MAX_KEYS),
            shift_cache: TtlCache::new(SHIFT_CACHE_TTL, SHIFT_CACHE_MAX),
            followup_cache: TtlCache::new(FOLLOWUP_CACHE_TTL, FOLLOWUP_CACHE_MAX),
            convo_in_progress: AtomicBool::new(false),
            task_in_progress: AtomicBool::new(false),
            autosave_in_progress: AtomicBool::new(false),
            cancel_chat: CancelToken::new(),
            chatting: DashSet::new(),
            pending_reports: DashMap::new(),
            transcripts: DashMap::new(),
            views: ViewCache::new(),
            config,
        })
    }

    /// NPCs that are mid-conversation right now, with a player or with each
    /// other.
    pub fn busy_npcs(&self, world: &World) -> HashSet<NpcId> {
        let mut busy: HashSet<NpcId> = world
            .players
            .values()
            .filter_map(|p| p.dialogue.talking_with())
            .collect();
        busy.extend(self.chatting.iter().map(|id| *id));
        busy
    }

    /// Push a fresh world view to every joined player.
    pub async fn push_world_views(&self) {
        let bound = self.connections.bound_players().await;
        if bound.is_empty() {
            return;
        }
        let mut outgoing = Vec::with_capacity(bound.len());
        {
            let world = self.world.read().await;
            let busy = self.busy_npcs(&world);
            let town = self.views.town_view(&world, &busy);
            for player in bound {
                if let Some(view) = view::world_view(&world, player, town.clone()) {
                    outgoing.push((player, view));
                }
            }
        }
        for (player, view) in outgoing {
            self.connections
                .send_to_player(
                    player,
                    ServerMessage::WorldView {
                        view: Box::new(view),
                    },
                )
                .await;
        }
    }

    /// Push a fresh world view to one player.
    pub async fn push_view_to(&self, player: PlayerId) {
        let view = {
            let world = self.world.read().await;
            let busy = self.busy_npcs(&world);
            let town = self.views.town_view(&world, &busy);
            view::world_view(&world, player, town)
        };
        if let Some(view) = view {
            self.connections
                .send_to_player(
                    player,
                    ServerMessage::WorldView {
                        view: Box::new(view),
                    },
                )
                .await;
        }
    }

    /// App wired against the null generator and store, for orchestration
    /// tests.
    #[cfg(test)]
    pub fn for_tests(world: World) -> Arc<Self> {
        use crate::infrastructure::clock::{FixedClock, FixedRandom};
        use crate::infrastructure::ollama::NullLineGen;
        use crate::infrastructure::store::NullStore;
        use chrono::TimeZone;

        let clock = FixedClock(chrono::Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        App::new(
            world,
            Arc::new(NullLineGen),
            Arc::new(NullStore),
            Arc::new(clock),
            Arc::new(FixedRandom(0)),
            Config::default(),
        )
    }
}
