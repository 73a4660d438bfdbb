//! Assembles the wire views pushed to clients. The shared town body is
//! cached per tick signature; the per-player slice is always built fresh.

use std::collections::HashSet;
use std::sync::Mutex;

use uuid::Uuid;

use tidemill_domain::{
    chain_mission, relation_label, reputation_label, Area, CropKind, Farm, MissionSpec, Npc,
    NpcId, ObjectiveCounters, ObjectiveSpec, PlayerId, RoutinePhase, TownMission, Vec2, Weather,
    World,
};
use tidemill_shared::{
    ArcView, CropCountView, CropPriceView, EconomyView, FactionView, FarmView, HappeningView,
    MissionView, MissionsView, NpcStanceView, NpcView, PlayerPublicView, PlayerView, PlotView,
    PointView, ReputationView, RoleRepView, TensionView, TownProgressView, TownView, WorldView,
};

fn point(p: Vec2) -> PointView {
    PointView { x: p.x, y: p.y }
}

// =============================================================================
// Town body cache
// =============================================================================

/// The volatile fields that feed the shared town body. While none of them
/// move, the cached body is reused for every connected player.
#[derive(Debug, Clone, PartialEq)]
struct TownSignature {
    day: u32,
    minute: u32,
    weather: Weather,
    rumor: String,
    events_today: usize,
    town_mission: Option<Uuid>,
    arc_stage: Option<(usize, bool)>,
    reward_multiplier_bits: u32,
    busy: Vec<Uuid>,
}

impl TownSignature {
    fn of(world: &World, busy: &HashSet<NpcId>) -> Self {
        let mut busy: Vec<Uuid> = busy.iter().map(|id| id.to_uuid()).collect();
        busy.sort();
        Self {
            day: world.clock.day(),
            minute: world.clock.minute(),
            weather: world.weather,
            rumor: world.rumor_of_the_day.clone(),
            events_today: world.events_today.len(),
            town_mission: world.town_mission.as_ref().map(|m| m.id.to_uuid()),
            arc_stage: world.story_arc.as_ref().map(|a| (a.current, a.completed)),
            reward_multiplier_bits: world.economy.reward_multiplier.to_bits(),
            busy,
        }
    }
}

/// Read-through cache for the shared portion of the world view.
pub struct ViewCache {
    cached: Mutex<Option<(TownSignature, TownView)>>,
}

impl ViewCache {
    pub fn new() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }

    /// The town body for this instant, rebuilt only when the signature moved.
    /// Player positions change outside the tick, so that slice is refreshed
    /// on every call either way.
    pub fn town_view(&self, world: &World, busy: &HashSet<NpcId>) -> TownView {
        let signature = TownSignature::of(world, busy);
        let mut cached = match self.cached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some((held, view)) = cached.as_ref() {
            if *held == signature {
                let mut view = view.clone();
                view.players = players_slice(world);
                return view;
            }
        }
        let view = build_town_view(world, busy);
        *cached = Some((signature, view.clone()));
        view
    }

    pub fn clear(&self) {
        let mut cached = match self.cached.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cached = None;
    }
}

impl Default for ViewCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Town body
// =============================================================================

fn players_slice(world: &World) -> Vec<PlayerPublicView> {
    let mut players: Vec<PlayerPublicView> = world
        .players
        .values()
        .filter(|p| p.connected)
        .map(|p| PlayerPublicView {
            id: p.player_id.to_uuid(),
            name: p.name.clone(),
            pos: point(p.pos),
            sleeping: p.sleeping,
        })
        .collect();
    players.sort_by(|a, b| a.name.cmp(&b.name));
    players
}

fn build_town_view(world: &World, busy: &HashSet<NpcId>) -> TownView {
    let now = world.now();

    let npcs = world
        .npcs
        .iter()
        .map(|npc| NpcView {
            id: npc.id.to_uuid(),
            name: npc.name.clone(),
            role: npc.role.to_string(),
            pos: point(npc.pos),
            area: npc.routine.area.to_string(),
            doing: doing_label(npc, now),
            in_conversation: busy.contains(&npc.id),
        })
        .collect();

    let economy = EconomyView {
        prices: CropKind::ALL
            .into_iter()
            .map(|crop| CropPriceView {
                crop: crop.to_string(),
                price: world
                    .economy
                    .price_of(crop)
                    .unwrap_or(crop.def().base_price),
                demand: demand_label(world, crop).to_string(),
            })
            .collect(),
        reward_multiplier: world.economy.reward_multiplier,
    };

    let factions = world
        .factions
        .factions
        .iter()
        .map(|f| FactionView {
            name: f.name.clone(),
            influence: f.influence,
            members: f
                .members
                .iter()
                .filter_map(|id| world.npc(*id).map(|n| n.name.clone()))
                .collect(),
        })
        .collect();

    let tensions = world
        .factions
        .tensions
        .iter()
        .map(|t| TensionView {
            a: t.a.clone(),
            b: t.b.clone(),
            tension: t.tension,
        })
        .collect();

    TownView {
        day: world.clock.day(),
        minute: world.clock.minute(),
        clock_label: world.clock.label(),
        weather: world.weather.to_string(),
        rumor: world.rumor_of_the_day.clone(),
        arc: world.story_arc.as_ref().map(|arc| ArcView {
            title: arc.title.clone(),
            stage: arc.current_stage().unwrap_or_default().to_string(),
            stage_number: (arc.current + 1).min(arc.stages.len()),
            total_stages: arc.stages.len(),
            completed: arc.completed,
        }),
        happenings: world
            .happenings
            .iter()
            .map(|h| HappeningView {
                title: h.title.clone(),
                severity: h.severity,
            })
            .collect(),
        town_mission: world.town_mission.as_ref().map(town_mission_view),
        economy,
        factions,
        tensions,
        events_today: world
            .events_today
            .iter()
            .map(|ev| {
                format!(
                    "{:02}:{:02} {}",
                    ev.at.minute / 60,
                    ev.at.minute % 60,
                    ev.text
                )
            })
            .collect(),
        npcs,
        players: players_slice(world),
    }
}

fn doing_label(npc: &Npc, now: tidemill_domain::Moment) -> String {
    if let Some(directive) = npc.directive.as_ref().filter(|d| !d.is_expired(now)) {
        return directive.describe();
    }
    if npc.active_task.is_some() {
        return "on an errand".to_string();
    }
    match npc.routine.phase {
        RoutinePhase::Work => "working".to_string(),
        RoutinePhase::AfterWork | RoutinePhase::HolidayOuting => {
            format!("at the {}", npc.routine.area)
        }
        RoutinePhase::Rest | RoutinePhase::HolidayRest => "resting".to_string(),
    }
}

fn demand_label(world: &World, crop: CropKind) -> &'static str {
    use tidemill_domain::DemandTier;
    match world.economy.demand.get(&crop).copied().unwrap_or_default() {
        DemandTier::Low => "low",
        DemandTier::Normal => "normal",
        DemandTier::High => "high",
    }
}

// =============================================================================
// Missions
// =============================================================================

fn progress_string(counters: &ObjectiveCounters, objective: &ObjectiveSpec) -> String {
    match counters.progress(objective) {
        Some((current, target)) => format!("{current}/{target}"),
        None => String::new(),
    }
}

fn mission_view(id: Uuid, spec: &MissionSpec, urgency: Option<u8>, progress: String) -> MissionView {
    MissionView {
        id,
        title: spec.title.clone(),
        blurb: spec.blurb.clone(),
        objective: spec.objective.describe(),
        reward_coins: spec.reward_coins,
        urgency,
        progress,
    }
}

fn town_mission_view(town: &TownMission) -> MissionView {
    // Shared body: per-player progress lives in TownProgressView instead.
    mission_view(town.id.to_uuid(), &town.spec, None, String::new())
}

// =============================================================================
// Per-player slice
// =============================================================================

/// The full push for one player, or `None` if they vanished between the
/// decision to push and the build.
pub fn world_view(world: &World, player_id: PlayerId, town: TownView) -> Option<WorldView> {
    Some(WorldView {
        town,
        you: player_view(world, player_id)?,
    })
}

pub fn player_view(world: &World, player_id: PlayerId) -> Option<PlayerView> {
    let player = world.player(player_id)?;

    let spare_farm;
    let farm = match world.farms.get(&player_id) {
        Some(farm) => farm,
        None => {
            spare_farm = Farm::new(Area::Farmland.bounds().center());
            &spare_farm
        }
    };

    let missions = &player.missions;
    let chain = if !missions.chain_exhausted() {
        chain_mission(missions.chain_index).map(|spec| {
            // Chain steps have no minted id; a synthetic one keyed by index
            // keeps client-side render keys stable.
            let id = Uuid::from_u128(missions.chain_index as u128 + 1);
            mission_view(
                id,
                &spec,
                None,
                progress_string(&missions.counters, &spec.objective),
            )
        })
    } else {
        None
    };
    let dynamic = missions.dynamic.as_ref().map(|d| {
        mission_view(
            d.id.to_uuid(),
            &d.spec,
            Some(d.urgency),
            progress_string(&missions.counters, &d.spec.objective),
        )
    });
    let town_progress = world.town_mission.as_ref().map(|town| TownProgressView {
        mission_id: town.id.to_uuid(),
        progress: if missions.town.mission_id == Some(town.id) {
            progress_string(&missions.town.counters, &town.spec.objective)
        } else {
            String::new()
        },
        completed: missions.town.mission_id == Some(town.id) && missions.town.completed,
    });

    let reputation = reputation_view(world, player_id);
    let npc_stances = world
        .npcs
        .iter()
        .map(|npc| NpcStanceView {
            npc_id: npc.id.to_uuid(),
            stance: stance_label(world.reputation.toward_role(player_id, npc.role)).to_string(),
        })
        .collect();

    Some(PlayerView {
        id: player.player_id.to_uuid(),
        name: player.name.clone(),
        pos: point(player.pos),
        sleeping: player.sleeping,
        farm: farm_view(farm),
        missions: MissionsView {
            chain,
            dynamic,
            town: town_progress,
            completed_dynamic: world
                .completed_dynamic
                .get(&player_id)
                .copied()
                .unwrap_or(0),
        },
        reputation,
        npc_stances,
    })
}

fn farm_view(farm: &Farm) -> FarmView {
    let plots = farm
        .plots
        .iter()
        .enumerate()
        .map(|(index, plot)| {
            let growth_percent = match plot.crop {
                Some(crop) => {
                    let total = crop.def().grow_minutes;
                    ((plot.growth / total) * 100.0).clamp(0.0, 100.0) as u8
                }
                None => 0,
            };
            PlotView {
                index,
                pos: point(farm.plot_position(index)),
                state: match plot.state {
                    tidemill_domain::PlotState::Empty => "empty",
                    tidemill_domain::PlotState::Seeded => "seeded",
                    tidemill_domain::PlotState::Growing => "growing",
                    tidemill_domain::PlotState::Ready => "ready",
                }
                .to_string(),
                crop: plot.crop.map(|c| c.to_string()),
                growth_percent,
                moisture_percent: plot.moisture.clamp(0.0, 100.0) as u8,
            }
        })
        .collect();

    let counts = |counts: &std::collections::HashMap<CropKind, u32>| {
        CropKind::ALL
            .into_iter()
            .filter_map(|crop| {
                let count = counts.get(&crop).copied().unwrap_or(0);
                (count > 0).then(|| CropCountView {
                    crop: crop.to_string(),
                    count,
                })
            })
            .collect::<Vec<_>>()
    };

    FarmView {
        home: point(farm.home),
        coins: farm.coins,
        plots,
        seeds: counts(&farm.inventory.seeds),
        produce: counts(&farm.inventory.produce),
    }
}

fn reputation_view(world: &World, player_id: PlayerId) -> ReputationView {
    let global = world.reputation.global(player_id);
    let (by_role, recent) = match world.reputation.of(player_id) {
        Some(rep) => {
            let mut by_role: Vec<RoleRepView> = rep
                .by_role
                .iter()
                .map(|(role, score)| RoleRepView {
                    role: role.to_string(),
                    score: *score,
                })
                .collect();
            by_role.sort_by(|a, b| a.role.cmp(&b.role));
            let recent = rep
                .recent
                .iter()
                .rev()
                .map(|d| match d.role {
                    Some(role) => format!("{:+} with the {} ({})", d.delta, role, d.note),
                    None => format!("{:+} ({})", d.delta, d.note),
                })
                .collect();
            (by_role, recent)
        }
        None => (Vec::new(), Vec::new()),
    };
    ReputationView {
        global,
        label: reputation_label(global).to_string(),
        by_role,
        recent,
    }
}

/// Bucket a player's standing with a trade into the display label. Uses the
/// same vocabulary as NPC relations so clients render one scale.
fn stance_label(toward_role: i16) -> &'static str {
    relation_label((toward_role / 6).clamp(-10, 10) as i8)
}
