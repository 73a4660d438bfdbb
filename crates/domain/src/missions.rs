//! Mission engine: the fixed opening chain, endless dynamic missions, and
//! the shared town mission.
//!
//! All progress is event-driven. Gameplay code reports `MissionEvent`s and
//! the engine mutates only the counters scoped to the active objective, so a
//! stale or repeated event can never advance a mission twice.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::clock::Moment;
use crate::geom::{Area, Vec2, FOREST_SHRINE};
use crate::ids::{MissionId, NpcId};
use crate::routine::Role;

/// Radius within which "reach the shrine" style objectives trigger.
pub const REACH_RADIUS: f32 = 48.0;

/// Reputation granted on any mission completion.
pub const MISSION_GLOBAL_REP: i16 = 4;
/// Extra reputation toward the giver's role, when the mission has one.
pub const MISSION_ROLE_REP: i16 = 6;

// =============================================================================
// Objectives
// =============================================================================

/// The shared objective vocabulary. Chain, dynamic, and town missions all
/// normalize into these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjectiveSpec {
    ReachPoint { point: Vec2, radius: f32 },
    /// NPCs are referenced by display name: ids are minted fresh per world.
    TalkToNpc { name: String },
    TalkToRole { role: Role },
    VisitArea { area: Area },
    HarvestCount { count: u32 },
    TalkUniqueNpcs { count: u32 },
    TalkUniqueRoles { count: u32 },
    VisitUniqueAreas { count: u32 },
}

impl ObjectiveSpec {
    /// One-line instruction shown to the player.
    pub fn describe(&self) -> String {
        match self {
            ObjectiveSpec::ReachPoint { .. } => "Find the spot marked on your map.".to_string(),
            ObjectiveSpec::TalkToNpc { name } => format!("Talk to {name}."),
            ObjectiveSpec::TalkToRole { role } => format!("Talk to the {role}."),
            ObjectiveSpec::VisitArea { area } => format!("Visit the {area}."),
            ObjectiveSpec::HarvestCount { count } => format!("Harvest {count} crops."),
            ObjectiveSpec::TalkUniqueNpcs { count } => {
                format!("Talk to {count} different townsfolk.")
            }
            ObjectiveSpec::TalkUniqueRoles { count } => {
                format!("Talk to folk of {count} different trades.")
            }
            ObjectiveSpec::VisitUniqueAreas { count } => {
                format!("Visit {count} different parts of town.")
            }
        }
    }
}

/// Per-objective progress. Reset on every advance so counts never leak
/// between objectives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveCounters {
    pub harvested: u32,
    pub talked: u32,
    pub unique_npcs: HashSet<NpcId>,
    pub unique_roles: HashSet<Role>,
    pub unique_areas: HashSet<Area>,
}

impl ObjectiveCounters {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Progress summary as (current, target) for display, when the objective
    /// is countable.
    pub fn progress(&self, objective: &ObjectiveSpec) -> Option<(u32, u32)> {
        match objective {
            ObjectiveSpec::HarvestCount { count } => Some((self.harvested.min(*count), *count)),
            ObjectiveSpec::TalkUniqueNpcs { count } => {
                Some(((self.unique_npcs.len() as u32).min(*count), *count))
            }
            ObjectiveSpec::TalkUniqueRoles { count } => {
                Some(((self.unique_roles.len() as u32).min(*count), *count))
            }
            ObjectiveSpec::VisitUniqueAreas { count } => {
                Some(((self.unique_areas.len() as u32).min(*count), *count))
            }
            _ => None,
        }
    }
}

// =============================================================================
// Mission specs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionSpec {
    pub title: String,
    pub blurb: String,
    pub objective: ObjectiveSpec,
    pub reward_coins: u32,
    pub giver_role: Option<Role>,
}

/// Number of missions in the fixed opening chain.
pub const CHAIN_LEN: usize = 8;

/// The fixed opening chain. Index 0 is the first mission every new player
/// receives.
pub fn chain_mission(index: usize) -> Option<MissionSpec> {
    let spec = match index {
        0 => MissionSpec {
            title: "The Standing Stone".to_string(),
            blurb: "Old stories put a shrine deep in the forest. See it yourself.".to_string(),
            objective: ObjectiveSpec::ReachPoint {
                point: FOREST_SHRINE,
                radius: REACH_RADIUS,
            },
            reward_coins: 12,
            giver_role: None,
        },
        1 => MissionSpec {
            title: "A Word with the Smith".to_string(),
            blurb: "Odo at the smithy has work for newcomers.".to_string(),
            objective: ObjectiveSpec::TalkToNpc {
                name: "Odo".to_string(),
            },
            reward_coins: 10,
            giver_role: Some(Role::Blacksmith),
        },
        2 => MissionSpec {
            title: "Market Day".to_string(),
            blurb: "Walk the stalls of market row and get your bearings.".to_string(),
            objective: ObjectiveSpec::VisitArea {
                area: Area::MarketRow,
            },
            reward_coins: 10,
            giver_role: Some(Role::Merchant),
        },
        3 => MissionSpec {
            title: "First Harvest".to_string(),
            blurb: "Prove you can work the soil. Bring in three crops.".to_string(),
            objective: ObjectiveSpec::HarvestCount { count: 3 },
            reward_coins: 18,
            giver_role: Some(Role::Farmer),
        },
        4 => MissionSpec {
            title: "The Chapel Bell".to_string(),
            blurb: "The priest keeps the town's stories. Pay a visit.".to_string(),
            objective: ObjectiveSpec::TalkToRole { role: Role::Priest },
            reward_coins: 12,
            giver_role: Some(Role::Priest),
        },
        5 => MissionSpec {
            title: "Making the Rounds".to_string(),
            blurb: "Four townsfolk should know your face by now.".to_string(),
            objective: ObjectiveSpec::TalkUniqueNpcs { count: 4 },
            reward_coins: 20,
            giver_role: None,
        },
        6 => MissionSpec {
            title: "Every Corner".to_string(),
            blurb: "See five districts of the town with your own eyes.".to_string(),
            objective: ObjectiveSpec::VisitUniqueAreas { count: 5 },
            reward_coins: 22,
            giver_role: None,
        },
        7 => MissionSpec {
            title: "Trades of the Town".to_string(),
            blurb: "Gilda says you only know a town once you know its trades.".to_string(),
            objective: ObjectiveSpec::TalkUniqueRoles { count: 3 },
            reward_coins: 25,
            giver_role: Some(Role::Innkeeper),
        },
        _ => return None,
    };
    Some(spec)
}

/// An AI-authored mission normalized into the shared vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicMission {
    pub id: MissionId,
    pub spec: MissionSpec,
    pub urgency: u8,
    pub assigned_at: Moment,
    /// Set on the first counter mutation; unstarted stale missions are
    /// eligible for reassignment by the daily refresh.
    pub progressed: bool,
}

impl DynamicMission {
    /// Stale means assigned on an earlier day with no progress at all.
    pub fn is_stale(&self, today: u32) -> bool {
        !self.progressed && self.assigned_at.day < today
    }
}

/// The single shared town mission. Per-player progress is keyed by `id` so
/// rotation resets everyone cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TownMission {
    pub id: MissionId,
    pub spec: MissionSpec,
    pub posted_day: u32,
}

// =============================================================================
// Drafts
// =============================================================================

/// Raw mission text from the generator, before normalization. Field values
/// are untrusted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissionDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub blurb: String,
    /// Objective keyword: reach_point, talk_to_npc, talk_to_role, visit_area,
    /// harvest_count, talk_unique_npcs, talk_unique_roles, visit_unique_areas.
    #[serde(default)]
    pub kind: String,
    /// Target name: an NPC, a role, or an area, depending on `kind`.
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub urgency: Option<u8>,
    #[serde(default)]
    pub reward_coins: Option<u32>,
    #[serde(default)]
    pub giver_role: Option<String>,
}

/// Clamp and map a draft into a playable mission. Unknown kinds and missing
/// targets degrade to a safe visit-the-square objective rather than failing.
pub fn normalize_mission_draft(
    draft: MissionDraft,
    reward_multiplier: f32,
    now: Moment,
) -> DynamicMission {
    let urgency = draft.urgency.unwrap_or(1).clamp(1, 3);

    let count = |default: u32| draft.count.unwrap_or(default).clamp(1, 12);
    let objective = match draft.kind.trim().to_lowercase().as_str() {
        "reach_point" => ObjectiveSpec::ReachPoint {
            point: Area::parse(&draft.target)
                .map(|a| a.bounds().center())
                .unwrap_or(FOREST_SHRINE),
            radius: REACH_RADIUS,
        },
        "talk_to_npc" if !draft.target.trim().is_empty() => ObjectiveSpec::TalkToNpc {
            name: draft.target.trim().to_string(),
        },
        "talk_to_role" => match Role::parse(&draft.target) {
            Some(role) => ObjectiveSpec::TalkToRole { role },
            None => ObjectiveSpec::TalkUniqueRoles { count: count(2) },
        },
        "visit_area" => ObjectiveSpec::VisitArea {
            area: Area::parse(&draft.target).unwrap_or(Area::TownSquare),
        },
        "harvest_count" => ObjectiveSpec::HarvestCount { count: count(3) },
        "talk_unique_npcs" => ObjectiveSpec::TalkUniqueNpcs { count: count(3) },
        "talk_unique_roles" => ObjectiveSpec::TalkUniqueRoles { count: count(2) },
        "visit_unique_areas" => ObjectiveSpec::VisitUniqueAreas { count: count(3) },
        _ => ObjectiveSpec::VisitArea {
            area: Area::TownSquare,
        },
    };

    let base = draft
        .reward_coins
        .unwrap_or(match urgency {
            1 => 14,
            2 => 24,
            _ => 40,
        })
        .clamp(5, 150);
    let reward_coins = ((base as f32 * reward_multiplier).round() as u32).clamp(5, 200);

    let title = if draft.title.trim().is_empty() {
        "A Favor Asked".to_string()
    } else {
        draft.title.trim().to_string()
    };

    DynamicMission {
        id: MissionId::new(),
        spec: MissionSpec {
            title,
            blurb: draft.blurb.trim().to_string(),
            objective,
            reward_coins,
            giver_role: draft.giver_role.as_deref().and_then(Role::parse),
        },
        urgency,
        assigned_at: now,
        progressed: false,
    }
}

// =============================================================================
// Progress and events
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TownMissionProgress {
    pub mission_id: Option<MissionId>,
    pub counters: ObjectiveCounters,
    /// Set once this player finishes the current mission; cleared on rotation.
    pub completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionProgress {
    pub chain_index: usize,
    pub counters: ObjectiveCounters,
    pub dynamic: Option<DynamicMission>,
    pub town: TownMissionProgress,
}

impl MissionProgress {
    /// The personal objective currently in play: the chain while it lasts,
    /// then the dynamic slot.
    pub fn active_personal(&self) -> Option<MissionSpec> {
        if self.chain_index < CHAIN_LEN {
            chain_mission(self.chain_index)
        } else {
            self.dynamic.as_ref().map(|d| d.spec.clone())
        }
    }

    pub fn chain_exhausted(&self) -> bool {
        self.chain_index >= CHAIN_LEN
    }
}

/// Something a player did that missions might care about.
#[derive(Debug, Clone, PartialEq)]
pub enum MissionEvent {
    Moved { pos: Vec2 },
    Harvested { count: u32 },
    TalkedToNpc { npc: NpcId, name: String, role: Role },
    VisitedArea { area: Area },
}

/// A completed mission, with everything the caller needs to hand out rewards.
#[derive(Debug, Clone, PartialEq)]
pub enum MissionAdvance {
    Chain { index: usize, mission: MissionSpec },
    Dynamic { mission: MissionSpec, urgency: u8 },
    Town { mission_id: MissionId, mission: MissionSpec },
}

impl MissionAdvance {
    pub fn mission(&self) -> &MissionSpec {
        match self {
            MissionAdvance::Chain { mission, .. } => mission,
            MissionAdvance::Dynamic { mission, .. } => mission,
            MissionAdvance::Town { mission, .. } => mission,
        }
    }
}

/// Feed one event into a player's mission progress. Returns every mission it
/// completed (personal and town progress are tracked independently, so a
/// single event can complete both).
pub fn apply_event(
    progress: &mut MissionProgress,
    event: &MissionEvent,
    town: Option<&TownMission>,
) -> Vec<MissionAdvance> {
    let mut advances = Vec::new();

    // Personal objective: chain first, then the dynamic slot.
    if progress.chain_index < CHAIN_LEN {
        if let Some(mission) = chain_mission(progress.chain_index) {
            if feed(&mission.objective, &mut progress.counters, event) {
                advances.push(MissionAdvance::Chain {
                    index: progress.chain_index,
                    mission,
                });
                progress.chain_index += 1;
                progress.counters.reset();
            }
        }
    } else if let Some(dynamic) = progress.dynamic.as_mut() {
        let before = progress.counters.clone();
        let done = feed(&dynamic.spec.objective, &mut progress.counters, event);
        if done || progress.counters != before {
            dynamic.progressed = true;
        }
        if done {
            let finished = progress
                .dynamic
                .take()
                .map(|d| MissionAdvance::Dynamic {
                    mission: d.spec,
                    urgency: d.urgency,
                });
            if let Some(advance) = finished {
                advances.push(advance);
            }
            progress.counters.reset();
        }
    }

    // Town mission: shared spec, per-player counters keyed by mission id.
    // On rotation the event lands in the fresh counters.
    if let Some(town) = town {
        if progress.town.mission_id != Some(town.id) {
            progress.town.mission_id = Some(town.id);
            progress.town.counters.reset();
            progress.town.completed = false;
        }
        if !progress.town.completed
            && feed(&town.spec.objective, &mut progress.town.counters, event)
        {
            advances.push(MissionAdvance::Town {
                mission_id: town.id,
                mission: town.spec.clone(),
            });
            progress.town.completed = true;
            progress.town.counters.reset();
        }
    }

    advances
}

/// Mutate only the counters the objective cares about; return completion.
fn feed(objective: &ObjectiveSpec, counters: &mut ObjectiveCounters, event: &MissionEvent) -> bool {
    match (objective, event) {
        (ObjectiveSpec::ReachPoint { point, radius }, MissionEvent::Moved { pos }) => {
            pos.distance(*point) <= *radius
        }
        (ObjectiveSpec::TalkToNpc { name }, MissionEvent::TalkedToNpc { name: talked, .. }) => {
            counters.talked += 1;
            name.eq_ignore_ascii_case(talked)
        }
        (ObjectiveSpec::TalkToRole { role }, MissionEvent::TalkedToNpc { role: talked, .. }) => {
            counters.talked += 1;
            role == talked
        }
        (ObjectiveSpec::VisitArea { area }, MissionEvent::VisitedArea { area: visited }) => {
            area == visited
        }
        (ObjectiveSpec::HarvestCount { count }, MissionEvent::Harvested { count: n }) => {
            counters.harvested += n;
            counters.harvested >= *count
        }
        (ObjectiveSpec::TalkUniqueNpcs { count }, MissionEvent::TalkedToNpc { npc, .. }) => {
            counters.unique_npcs.insert(*npc);
            counters.unique_npcs.len() as u32 >= *count
        }
        (ObjectiveSpec::TalkUniqueRoles { count }, MissionEvent::TalkedToNpc { role, .. }) => {
            counters.unique_roles.insert(*role);
            counters.unique_roles.len() as u32 >= *count
        }
        (ObjectiveSpec::VisitUniqueAreas { count }, MissionEvent::VisitedArea { area }) => {
            counters.unique_areas.insert(*area);
            counters.unique_areas.len() as u32 >= *count
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moved_to(pos: Vec2) -> MissionEvent {
        MissionEvent::Moved { pos }
    }

    fn talked(name: &str, role: Role) -> MissionEvent {
        MissionEvent::TalkedToNpc {
            npc: NpcId::new(),
            name: name.to_string(),
            role,
        }
    }

    #[test]
    fn reaching_the_shrine_completes_mission_one_exactly_once() {
        let mut progress = MissionProgress::default();
        let advances = apply_event(&mut progress, &moved_to(FOREST_SHRINE), None);
        assert_eq!(advances.len(), 1);
        assert!(matches!(advances[0], MissionAdvance::Chain { index: 0, .. }));
        assert_eq!(progress.chain_index, 1);

        // Standing on the shrine again does nothing: the objective changed.
        let advances = apply_event(&mut progress, &moved_to(FOREST_SHRINE), None);
        assert!(advances.is_empty());
        assert_eq!(progress.chain_index, 1);
    }

    #[test]
    fn near_miss_on_the_reach_radius_does_not_complete() {
        let mut progress = MissionProgress::default();
        let outside = Vec2::new(FOREST_SHRINE.x + REACH_RADIUS + 1.0, FOREST_SHRINE.y);
        assert!(apply_event(&mut progress, &moved_to(outside), None).is_empty());
        assert_eq!(progress.chain_index, 0);
    }

    #[test]
    fn talk_to_npc_matches_by_name_case_insensitively() {
        let mut progress = MissionProgress {
            chain_index: 1,
            ..Default::default()
        };
        assert!(apply_event(&mut progress, &talked("Mira", Role::Farmer), None).is_empty());
        let advances = apply_event(&mut progress, &talked("odo", Role::Blacksmith), None);
        assert_eq!(advances.len(), 1);
        assert_eq!(progress.chain_index, 2);
    }

    #[test]
    fn harvest_counter_accumulates_and_resets_on_advance() {
        let mut progress = MissionProgress {
            chain_index: 3,
            ..Default::default()
        };
        assert!(apply_event(&mut progress, &MissionEvent::Harvested { count: 2 }, None).is_empty());
        assert_eq!(progress.counters.harvested, 2);
        let advances = apply_event(&mut progress, &MissionEvent::Harvested { count: 1 }, None);
        assert_eq!(advances.len(), 1);
        assert_eq!(progress.chain_index, 4);
        assert_eq!(progress.counters.harvested, 0);
    }

    #[test]
    fn unique_counters_ignore_repeats() {
        let mut progress = MissionProgress {
            chain_index: 5,
            ..Default::default()
        };
        let same = MissionEvent::TalkedToNpc {
            npc: NpcId::new(),
            name: "Mira".to_string(),
            role: Role::Farmer,
        };
        for _ in 0..5 {
            assert!(apply_event(&mut progress, &same, None).is_empty());
        }
        assert_eq!(progress.counters.unique_npcs.len(), 1);
    }

    #[test]
    fn dynamic_mission_takes_over_after_the_chain() {
        let mut progress = MissionProgress {
            chain_index: CHAIN_LEN,
            ..Default::default()
        };
        // No dynamic mission yet: events fall through.
        assert!(apply_event(&mut progress, &moved_to(FOREST_SHRINE), None).is_empty());

        progress.dynamic = Some(normalize_mission_draft(
            MissionDraft {
                kind: "harvest_count".to_string(),
                count: Some(2),
                urgency: Some(2),
                ..Default::default()
            },
            1.0,
            Moment::new(4, 600),
        ));
        assert!(apply_event(&mut progress, &MissionEvent::Harvested { count: 1 }, None).is_empty());
        assert!(progress.dynamic.as_ref().unwrap().progressed);
        let advances = apply_event(&mut progress, &MissionEvent::Harvested { count: 1 }, None);
        assert_eq!(advances.len(), 1);
        assert!(matches!(advances[0], MissionAdvance::Dynamic { urgency: 2, .. }));
        assert!(progress.dynamic.is_none());
    }

    #[test]
    fn town_rotation_resets_progress_and_event_hits_fresh_counters() {
        let mut progress = MissionProgress {
            chain_index: CHAIN_LEN,
            ..Default::default()
        };
        let first = TownMission {
            id: MissionId::new(),
            spec: MissionSpec {
                title: "Town Granary".to_string(),
                blurb: String::new(),
                objective: ObjectiveSpec::HarvestCount { count: 3 },
                reward_coins: 30,
                giver_role: None,
            },
            posted_day: 1,
        };
        apply_event(&mut progress, &MissionEvent::Harvested { count: 2 }, Some(&first));
        assert_eq!(progress.town.counters.harvested, 2);

        // The mission rotates; the next event counts toward the new one only.
        let second = TownMission {
            id: MissionId::new(),
            posted_day: 2,
            ..first.clone()
        };
        let advances =
            apply_event(&mut progress, &MissionEvent::Harvested { count: 2 }, Some(&second));
        assert!(advances.is_empty());
        assert_eq!(progress.town.mission_id, Some(second.id));
        assert_eq!(progress.town.counters.harvested, 2);
    }

    #[test]
    fn one_event_can_complete_personal_and_town_missions_together() {
        let mut progress = MissionProgress {
            chain_index: 3,
            ..Default::default()
        };
        progress.counters.harvested = 2;
        let town = TownMission {
            id: MissionId::new(),
            spec: MissionSpec {
                title: "Shared Harvest".to_string(),
                blurb: String::new(),
                objective: ObjectiveSpec::HarvestCount { count: 1 },
                reward_coins: 20,
                giver_role: None,
            },
            posted_day: 1,
        };
        let advances =
            apply_event(&mut progress, &MissionEvent::Harvested { count: 1 }, Some(&town));
        assert_eq!(advances.len(), 2);
        assert!(matches!(advances[0], MissionAdvance::Chain { index: 3, .. }));
        assert!(matches!(advances[1], MissionAdvance::Town { .. }));

        // Completed means completed: more harvests do not re-award it.
        let advances =
            apply_event(&mut progress, &MissionEvent::Harvested { count: 5 }, Some(&town));
        assert!(advances.is_empty());
        assert!(progress.town.completed);
    }

    #[test]
    fn draft_normalization_clamps_and_scales() {
        let draft = MissionDraft {
            title: "  Urgent Errand ".to_string(),
            kind: "harvest_count".to_string(),
            count: Some(500),
            urgency: Some(9),
            reward_coins: Some(1000),
            giver_role: Some("farmer".to_string()),
            ..Default::default()
        };
        let mission = normalize_mission_draft(draft, 1.35, Moment::new(2, 400));
        assert_eq!(mission.urgency, 3);
        assert_eq!(mission.spec.title, "Urgent Errand");
        assert_eq!(mission.spec.giver_role, Some(Role::Farmer));
        assert!(matches!(
            mission.spec.objective,
            ObjectiveSpec::HarvestCount { count: 12 }
        ));
        // Base capped at 150, scaled by 1.35, then the hard 200 ceiling.
        assert_eq!(mission.spec.reward_coins, 200);
    }

    #[test]
    fn unknown_draft_kind_falls_back_to_the_square() {
        let mission =
            normalize_mission_draft(MissionDraft::default(), 1.0, Moment::new(1, 500));
        assert!(matches!(
            mission.spec.objective,
            ObjectiveSpec::VisitArea { area: Area::TownSquare }
        ));
        assert_eq!(mission.spec.title, "A Favor Asked");
        assert_eq!(mission.urgency, 1);
    }

    #[test]
    fn stale_means_unstarted_and_old() {
        let mission = normalize_mission_draft(
            MissionDraft {
                kind: "visit_area".to_string(),
                target: "docks".to_string(),
                ..Default::default()
            },
            1.0,
            Moment::new(3, 700),
        );
        assert!(!mission.is_stale(3));
        assert!(mission.is_stale(4));
        let mut started = mission.clone();
        started.progressed = true;
        assert!(!started.is_stale(9));
    }

    #[test]
    fn chain_has_eight_missions_and_ends() {
        for i in 0..CHAIN_LEN {
            assert!(chain_mission(i).is_some(), "missing chain mission {i}");
        }
        assert!(chain_mission(CHAIN_LEN).is_none());
    }
}
