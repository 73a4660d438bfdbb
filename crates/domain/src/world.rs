//! The world aggregate: every piece of live simulation state in one place.
//!
//! The engine owns exactly one `World` behind an async lock; everything here
//! is synchronous and pure so the tick body can run without suspension.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::clock::{Moment, WorldClock};
use crate::farm::Farm;
use crate::geom::{Area, Vec2};
use crate::ids::{NpcId, PlayerId};
use crate::missions::TownMission;
use crate::movement::{self, MoveContext};
use crate::npc::Npc;
use crate::player::PlayerSession;
use crate::relations::{RelationStore, ReputationBook};
use crate::routine::{Role, RoutineNudge};
use crate::social::{
    EconomyPlan, EventEffect, FactionState, RumorHeatMap, StoryArc, Weather, WorldHappening,
};

/// Event-log entries kept from the previous day.
pub const YESTERDAY_EVENTS_KEPT: usize = 24;

/// A line in the town's running event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TownEvent {
    pub text: String,
    pub at: Moment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
    pub clock: WorldClock,
    pub weather: Weather,
    pub rumor_of_the_day: String,
    pub events_today: Vec<TownEvent>,
    pub events_yesterday: Vec<TownEvent>,
    /// Active derived world events (at most four).
    pub happenings: Vec<WorldHappening>,
    pub town_mission: Option<TownMission>,
    pub story_arc: Option<StoryArc>,
    pub economy: EconomyPlan,
    pub factions: FactionState,
    pub rumor_heat: RumorHeatMap,
    pub routine_nudges: HashMap<Role, RoutineNudge>,
    pub npcs: Vec<Npc>,
    pub players: HashMap<PlayerId, PlayerSession>,
    pub farms: HashMap<PlayerId, Farm>,
    pub relations: RelationStore,
    pub reputation: ReputationBook,
    /// Dynamic missions finished per player, lifetime.
    pub completed_dynamic: HashMap<PlayerId, u32>,
}

impl World {
    /// An empty world with default derived state; see `seed` for the
    /// populated starting town.
    pub fn new() -> Self {
        Self {
            clock: WorldClock::new(),
            weather: Weather::Clear,
            rumor_of_the_day: String::new(),
            events_today: Vec::new(),
            events_yesterday: Vec::new(),
            happenings: Vec::new(),
            town_mission: None,
            story_arc: None,
            economy: EconomyPlan::default(),
            factions: FactionState::default(),
            rumor_heat: RumorHeatMap::default(),
            routine_nudges: HashMap::new(),
            npcs: Vec::new(),
            players: HashMap::new(),
            farms: HashMap::new(),
            relations: RelationStore::default(),
            reputation: ReputationBook::default(),
            completed_dynamic: HashMap::new(),
        }
    }

    // =========================================================================
    // Clock
    // =========================================================================

    /// Advance simulated time, applying rollover bookkeeping once per crossed
    /// day: archive the event log and wake sleeping players.
    pub fn advance_clock(&mut self, delta_minutes: u32) -> u32 {
        let crossings = self.clock.advance(delta_minutes);
        for _ in 0..crossings {
            let mut archived = std::mem::take(&mut self.events_today);
            if archived.len() > YESTERDAY_EVENTS_KEPT {
                archived.drain(..archived.len() - YESTERDAY_EVENTS_KEPT);
            }
            self.events_yesterday = archived;
            for player in self.players.values_mut() {
                player.sleeping = false;
            }
        }
        crossings
    }

    pub fn now(&self) -> Moment {
        self.clock.now()
    }

    // =========================================================================
    // Event log and derived effects
    // =========================================================================

    /// Record a town event and fold it into the rumor heat map.
    pub fn log_event(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.rumor_heat.on_event(&text);
        self.events_today.push(TownEvent {
            text,
            at: self.clock.now(),
        });
    }

    /// Install a fresh set of world events and apply their effects.
    pub fn apply_happenings(&mut self, happenings: Vec<WorldHappening>) {
        for happening in &happenings {
            match &happening.effect {
                EventEffect::FlipWeather(weather) => self.weather = *weather,
                EventEffect::BoostRewards(amount) => self.economy.boost_rewards(*amount),
                EventEffect::AppendRumor(line) => {
                    if !self.rumor_of_the_day.is_empty() {
                        self.rumor_of_the_day.push(' ');
                    }
                    self.rumor_of_the_day.push_str(line);
                }
            }
            self.log_event(happening.title.clone());
        }
        self.happenings = happenings;
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn npc(&self, id: NpcId) -> Option<&Npc> {
        self.npcs.iter().find(|n| n.id == id)
    }

    pub fn npc_mut(&mut self, id: NpcId) -> Option<&mut Npc> {
        self.npcs.iter_mut().find(|n| n.id == id)
    }

    pub fn npc_by_name(&self, name: &str) -> Option<&Npc> {
        self.npcs
            .iter()
            .find(|n| n.name.eq_ignore_ascii_case(name.trim()))
    }

    /// The closest NPC to a point, with its distance.
    pub fn nearest_npc(&self, pos: Vec2) -> Option<(&Npc, f32)> {
        self.npcs
            .iter()
            .map(|n| (n, n.pos.distance(pos)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerSession> {
        self.players.get(&id)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut PlayerSession> {
        self.players.get_mut(&id)
    }

    /// Registered player by display name, for reconnect rehydration.
    pub fn registered_player_by_name(&self, name: &str) -> Option<&PlayerSession> {
        self.players
            .values()
            .find(|p| p.registered && p.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn awake_players(&self) -> Vec<(PlayerId, Vec2)> {
        self.players
            .values()
            .filter(|p| p.is_awake())
            .map(|p| (p.player_id, p.pos))
            .collect()
    }

    pub fn any_player_in_dialogue(&self) -> bool {
        self.players.values().any(|p| p.connected && p.in_dialogue())
    }

    /// The player's farm, allocated on first use. Homes fill a fixed grid
    /// across the farmland so neighbours never overlap.
    pub fn ensure_farm(&mut self, player: PlayerId) -> &mut Farm {
        let slot = self.farms.len();
        self.farms
            .entry(player)
            .or_insert_with(|| Farm::new(farm_home(slot)))
    }

    // =========================================================================
    // Movement
    // =========================================================================

    /// Step every NPC one tick. Positions are snapshotted first so each NPC
    /// sees the same world.
    pub fn step_all_npcs(&mut self, dt_minutes: f32, draw: &mut dyn FnMut(u32) -> u32) {
        let positions: Vec<(NpcId, Vec2)> = self.npcs.iter().map(|n| (n.id, n.pos)).collect();
        let awake = self.awake_players();
        for npc in &mut self.npcs {
            let ctx = MoveContext {
                clock: &self.clock,
                dt_minutes,
                awake_players: &awake,
                npc_positions: &positions,
                relations: &self.relations,
                nudge: self.routine_nudges.get(&npc.role),
            };
            movement::step_npc(npc, &ctx, draw);
        }
    }

    /// Step one NPC while everyone else stands still. The errand loop walks
    /// its runner with this while the tick's movement pass is paused.
    pub fn step_npc_only(&mut self, id: NpcId, dt_minutes: f32, draw: &mut dyn FnMut(u32) -> u32) {
        let positions: Vec<(NpcId, Vec2)> = self.npcs.iter().map(|n| (n.id, n.pos)).collect();
        let awake = self.awake_players();
        let Some(npc) = self.npcs.iter_mut().find(|n| n.id == id) else {
            return;
        };
        let ctx = MoveContext {
            clock: &self.clock,
            dt_minutes,
            awake_players: &awake,
            npc_positions: &positions,
            relations: &self.relations,
            nudge: self.routine_nudges.get(&npc.role),
        };
        movement::step_npc(npc, &ctx, draw);
    }

    // =========================================================================
    // Snapshot support
    // =========================================================================

    /// A copy of the world fit for persistence: guests dropped, everyone
    /// offline, transient interaction state cleared.
    pub fn snapshot_clone(&self) -> World {
        let mut snap = self.clone();
        let guests: Vec<PlayerId> = snap
            .players
            .values()
            .filter(|p| !p.registered)
            .map(|p| p.player_id)
            .collect();
        for guest in guests {
            snap.players.remove(&guest);
            snap.farms.remove(&guest);
            snap.completed_dynamic.remove(&guest);
            snap.reputation.forget(guest);
        }
        for player in snap.players.values_mut() {
            player.connected = false;
            let _ = player.end_dialogue();
        }
        for npc in &mut snap.npcs {
            npc.active_task = None;
            npc.frozen_ticks = 0;
            npc.near_player_ticks = 0;
        }
        snap
    }

    /// Normalize a freshly loaded snapshot into a runnable world.
    pub fn rehydrate(&mut self) {
        for player in self.players.values_mut() {
            player.connected = false;
            player.sleeping = false;
            let _ = player.end_dialogue();
        }
        for npc in &mut self.npcs {
            npc.active_task = None;
            npc.frozen_ticks = 0;
            npc.near_player_ticks = 0;
            npc.wander_target = None;
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

/// Farm home positions: a three-by-three grid over the farmland. Slots wrap
/// after nine farms; plots stay clear of the area edge either way.
fn farm_home(slot: usize) -> Vec2 {
    let bounds = Area::Farmland.bounds();
    let col = (slot % 3) as f32;
    let row = ((slot / 3) % 3) as f32;
    Vec2::new(
        bounds.min.x + 48.0 + col * 160.0,
        bounds.min.y + 48.0 + row * 160.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npc::{Directive, DirectiveKind};
    use crate::routine::Role;
    use crate::social::{EventEffect, WorldHappening};

    #[test]
    fn rollover_archives_and_truncates_the_event_log() {
        let mut world = World::new();
        for i in 0..30 {
            world.log_event(format!("event {i}"));
        }
        assert_eq!(world.events_today.len(), 30);

        // From 08:00, a full day crosses dawn once.
        world.advance_clock(24 * 60);
        assert!(world.events_today.is_empty());
        assert_eq!(world.events_yesterday.len(), YESTERDAY_EVENTS_KEPT);
        assert_eq!(world.events_yesterday.last().unwrap().text, "event 29");
        assert_eq!(world.events_yesterday[0].text, "event 6");
    }

    #[test]
    fn rollover_wakes_sleeping_players() {
        let mut world = World::new();
        let id = PlayerId::new();
        let mut session = PlayerSession::new(id, "Rook", true, Vec2::ZERO);
        session.sleeping = true;
        world.players.insert(id, session);

        world.advance_clock(10);
        assert!(world.players[&id].sleeping);
        world.advance_clock(24 * 60);
        assert!(!world.players[&id].sleeping);
    }

    #[test]
    fn log_event_feeds_the_rumor_heat() {
        let mut world = World::new();
        world.log_event("a brawl at the tavern");
        assert!(world.rumor_heat.areas[&Area::Tavern] > 0);
        assert_eq!(world.events_today.len(), 1);
    }

    #[test]
    fn happenings_apply_their_effects_on_ingestion() {
        let mut world = World::new();
        world.rumor_of_the_day = "Quiet day.".to_string();
        world.apply_happenings(vec![
            WorldHappening {
                title: "Storm front".to_string(),
                severity: 2,
                effect: EventEffect::FlipWeather(Weather::Rain),
            },
            WorldHappening {
                title: "Festival prep".to_string(),
                severity: 1,
                effect: EventEffect::BoostRewards(0.2),
            },
            WorldHappening {
                title: "Whispers".to_string(),
                severity: 1,
                effect: EventEffect::AppendRumor("The river gave back a ring.".to_string()),
            },
        ]);
        assert_eq!(world.weather, Weather::Rain);
        assert!((world.economy.reward_multiplier - 1.2).abs() < 1e-6);
        assert!(world.rumor_of_the_day.ends_with("ring."));
        assert_eq!(world.happenings.len(), 3);
        assert_eq!(world.events_today.len(), 3);
    }

    #[test]
    fn farms_allocate_distinct_homes() {
        let mut world = World::new();
        let (a, b, c) = (PlayerId::new(), PlayerId::new(), PlayerId::new());
        let home_a = world.ensure_farm(a).home;
        let home_b = world.ensure_farm(b).home;
        let home_c = world.ensure_farm(c).home;
        assert_ne!(home_a, home_b);
        assert_ne!(home_b, home_c);
        // Re-asking returns the same farm.
        assert_eq!(world.ensure_farm(a).home, home_a);
        for home in [home_a, home_b, home_c] {
            assert!(Area::Farmland.bounds().contains(home));
        }
    }

    #[test]
    fn snapshot_drops_guests_and_disconnects_the_rest() {
        let mut world = World::new();
        let keeper = PlayerId::new();
        let guest = PlayerId::new();
        world
            .players
            .insert(keeper, PlayerSession::new(keeper, "Rook", true, Vec2::ZERO));
        world
            .players
            .insert(guest, PlayerSession::new(guest, "Guest-1", false, Vec2::ZERO));
        world.ensure_farm(keeper);
        world.ensure_farm(guest);

        let snap = world.snapshot_clone();
        assert!(snap.players.contains_key(&keeper));
        assert!(!snap.players.contains_key(&guest));
        assert!(!snap.farms.contains_key(&guest));
        assert!(!snap.players[&keeper].connected);
        // The live world is untouched.
        assert!(world.players[&guest].connected);
    }

    #[test]
    fn world_snapshot_round_trips_through_json() {
        let mut world = World::new();
        world.npcs.push(Npc::new(
            "Odo",
            Role::Blacksmith,
            Area::ResidentialLanes,
            Vec2::new(700.0, 1200.0),
            18.0,
        ));
        let id = PlayerId::new();
        world
            .players
            .insert(id, PlayerSession::new(id, "Rook", true, Vec2::new(900.0, 900.0)));
        world.ensure_farm(id);
        world.log_event("a test of the record keeping");
        world.relations.bump(
            world.npcs[0].id,
            NpcId::new(),
            -6,
            "feud",
            world.now(),
        );

        let json = serde_json::to_string(&world.snapshot_clone()).unwrap();
        let restored: World = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.clock, world.clock);
        assert_eq!(restored.npcs.len(), 1);
        assert_eq!(restored.npcs[0].name, "Odo");
        assert_eq!(restored.relations.len(), 1);
        assert!(restored.players.contains_key(&id));
    }

    #[test]
    fn step_all_npcs_moves_workers_toward_their_posts() {
        let mut world = World::new();
        let mut npc = Npc::new(
            "Odo",
            Role::Blacksmith,
            Area::ResidentialLanes,
            Area::TownSquare.bounds().center(),
            20.0,
        );
        // Pick a workday for this NPC.
        let workday = (1..=7)
            .find(|d| d % 7 != npc.profile.holiday_weekday)
            .unwrap();
        world.clock = WorldClock::starting_at(workday, 10 * 60);
        npc.routine.area = Area::TownSquare;
        let before = npc.pos.distance(Area::Smithy.bounds().center());
        world.npcs.push(npc);

        let mut draw = |n: u32| n / 2;
        world.step_all_npcs(2.0, &mut draw);
        let after = world.npcs[0].pos.distance(Area::Smithy.bounds().center());
        assert!(after < before);
    }

    #[test]
    fn step_npc_only_leaves_the_rest_standing() {
        let mut world = World::new();
        let start = Area::TownSquare.bounds().center();
        for name in ["Odo", "Mira"] {
            world.npcs.push(Npc::new(
                name,
                Role::Blacksmith,
                Area::ResidentialLanes,
                start,
                20.0,
            ));
        }
        let walker = world.npcs[0].id;
        let goal = start + Vec2::new(200.0, 0.0);
        world.npcs[0].set_directive(Directive::new(
            DirectiveKind::GoToPoint { point: goal },
            None,
        ));
        world.npcs[1].set_directive(Directive::new(
            DirectiveKind::GoToPoint { point: goal },
            None,
        ));

        let mut draw = |n: u32| n / 2;
        world.step_npc_only(walker, 2.0, &mut draw);
        assert!(world.npcs[0].pos.x > start.x);
        assert_eq!(world.npcs[1].pos, start);
    }
}
