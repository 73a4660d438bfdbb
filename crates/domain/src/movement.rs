//! Per-tick NPC movement.
//!
//! Priority each tick: player-issued directive, in-progress task, routine
//! area, avoidance of disliked NPCs, idle wander. The anti-jitter freeze
//! near awake players applies to routine-level movement only, so "follow me"
//! keeps working while standing next to the player.

use crate::clock::WorldClock;
use crate::geom::{Area, Vec2};
use crate::ids::{NpcId, PlayerId};
use crate::npc::{DirectiveKind, Npc, FREEZE_TICKS};
use crate::relations::RelationStore;
use crate::routine::{self, MovementStyle, RoutineNudge, RoutinePhase};

/// Disliked NPCs inside this radius can trigger a flee step.
pub const AVOID_RADIUS: f32 = 120.0;

/// Per-tick flee probability, in percent.
pub const AVOID_CHANCE_PERCENT: u32 = 35;

/// Standing this close to an awake player for a tick triggers the freeze.
pub const HOLD_RADIUS: f32 = 28.0;

/// Followers stop this far from their player.
pub const FOLLOW_GAP: f32 = 24.0;

/// Keep-distance dead band: hold anywhere in [preferred - 10, preferred + 45].
pub const KEEP_DISTANCE_NEAR: f32 = 10.0;
pub const KEEP_DISTANCE_FAR: f32 = 45.0;

/// Close enough to a waypoint to count as arrived.
pub const ARRIVE_EPS: f32 = 12.0;

/// Length of one flee step away from a disliked NPC.
pub const FLEE_STEP: f32 = 64.0;

/// Everything the scheduler reads besides the NPC itself. Positions are
/// snapshotted by the tick before stepping, so stepping one NPC never aliases
/// another.
pub struct MoveContext<'a> {
    pub clock: &'a WorldClock,
    pub dt_minutes: f32,
    /// Connected, non-sleeping players.
    pub awake_players: &'a [(PlayerId, Vec2)],
    pub npc_positions: &'a [(NpcId, Vec2)],
    pub relations: &'a RelationStore,
    pub nudge: Option<&'a RoutineNudge>,
}

/// Advance one NPC by one tick.
pub fn step_npc(npc: &mut Npc, ctx: &MoveContext<'_>, draw: &mut dyn FnMut(u32) -> u32) {
    track_nearby_players(npc, ctx);

    let now = ctx.clock.now();
    let has_directive = npc.current_directive(now).is_some();

    // Routine state is only re-derived when nothing overrides it.
    if !has_directive && !npc.is_busy_with_task() {
        npc.routine = routine::resolve(npc.id, npc.role, npc.profile.home, ctx.clock, ctx.nudge);
    }

    if let Some(directive) = npc.directive.clone() {
        follow_directive(npc, &directive.kind, ctx, draw);
        finish_step(npc);
        return;
    }

    if npc.is_busy_with_task() {
        // The task loop drives movement through directives; between stages
        // the NPC stands by.
        npc.velocity = Vec2::ZERO;
        finish_step(npc);
        return;
    }

    // Routine-level movement respects the freeze.
    if npc.frozen_ticks > 0 {
        npc.frozen_ticks -= 1;
        npc.velocity = Vec2::ZERO;
        finish_step(npc);
        return;
    }

    let intended = npc.routine.area;
    if !intended.bounds().contains(npc.pos) {
        npc.wander_target = None;
        step_toward(npc, intended.bounds().center(), ctx.dt_minutes);
        finish_step(npc);
        return;
    }

    if try_avoidance(npc, ctx, draw) {
        finish_step(npc);
        return;
    }

    wander(npc, intended, ctx, draw);
    finish_step(npc);
}

fn track_nearby_players(npc: &mut Npc, ctx: &MoveContext<'_>) {
    let near = ctx
        .awake_players
        .iter()
        .any(|(_, pos)| npc.pos.distance(*pos) <= HOLD_RADIUS);
    if near {
        npc.near_player_ticks += 1;
        if npc.near_player_ticks >= 2 && npc.frozen_ticks == 0 {
            npc.frozen_ticks = FREEZE_TICKS;
        }
    } else {
        npc.near_player_ticks = 0;
    }
}

fn follow_directive(
    npc: &mut Npc,
    kind: &DirectiveKind,
    ctx: &MoveContext<'_>,
    draw: &mut dyn FnMut(u32) -> u32,
) {
    match kind {
        DirectiveKind::FollowPlayer { player } => {
            match player_pos(ctx, *player) {
                Some(target) if npc.pos.distance(target) > FOLLOW_GAP => {
                    step_toward(npc, target, ctx.dt_minutes);
                }
                Some(_) => npc.velocity = Vec2::ZERO,
                // The player left or fell asleep: nothing to follow.
                None => {
                    npc.clear_directive();
                    npc.velocity = Vec2::ZERO;
                }
            }
        }
        DirectiveKind::KeepDistance { player, preferred } => match player_pos(ctx, *player) {
            Some(target) => {
                let dist = npc.pos.distance(target);
                if dist < preferred - KEEP_DISTANCE_NEAR {
                    let away = target.toward(npc.pos).unwrap_or(Vec2::new(1.0, 0.0));
                    step_toward(npc, npc.pos + away * FLEE_STEP, ctx.dt_minutes);
                } else if dist > preferred + KEEP_DISTANCE_FAR {
                    step_toward(npc, target, ctx.dt_minutes);
                } else {
                    npc.velocity = Vec2::ZERO;
                }
            }
            None => {
                npc.clear_directive();
                npc.velocity = Vec2::ZERO;
            }
        },
        DirectiveKind::GoToPoint { point } => {
            if npc.pos.distance(*point) > ARRIVE_EPS {
                step_toward(npc, *point, ctx.dt_minutes);
            } else {
                npc.velocity = Vec2::ZERO;
            }
        }
        DirectiveKind::PatrolArea { area } => {
            if !area.bounds().contains(npc.pos) {
                npc.wander_target = None;
                step_toward(npc, area.bounds().center(), ctx.dt_minutes);
                return;
            }
            let target = match npc.wander_target {
                Some(t) if npc.pos.distance(t) > ARRIVE_EPS => t,
                _ => {
                    let t = area.bounds().sample(draw);
                    npc.wander_target = Some(t);
                    t
                }
            };
            step_toward(npc, target, ctx.dt_minutes);
        }
        DirectiveKind::Hold => npc.velocity = Vec2::ZERO,
    }
}

/// 35% chance to flee directly away from the nearest disliked NPC in range.
fn try_avoidance(npc: &mut Npc, ctx: &MoveContext<'_>, draw: &mut dyn FnMut(u32) -> u32) -> bool {
    let disliked = ctx.relations.disliked_by(npc.id);
    if disliked.is_empty() {
        return false;
    }
    let threat = ctx
        .npc_positions
        .iter()
        .filter(|(id, _)| disliked.contains(id))
        .map(|(_, pos)| *pos)
        .filter(|pos| npc.pos.distance(*pos) <= AVOID_RADIUS)
        .min_by(|a, b| {
            npc.pos
                .distance(*a)
                .total_cmp(&npc.pos.distance(*b))
        });
    let Some(threat) = threat else {
        return false;
    };
    if draw(100) >= AVOID_CHANCE_PERCENT {
        return false;
    }
    let away = threat.toward(npc.pos).unwrap_or(Vec2::new(0.0, -1.0));
    npc.wander_target = None;
    step_toward(npc, npc.pos + away * FLEE_STEP, ctx.dt_minutes);
    true
}

fn wander(npc: &mut Npc, area: Area, ctx: &MoveContext<'_>, draw: &mut dyn FnMut(u32) -> u32) {
    let chance = match (npc.routine.phase, npc.role.template().style) {
        (RoutinePhase::Work, MovementStyle::Stationary) => 0,
        (RoutinePhase::Work, MovementStyle::Patrol) => 100,
        (RoutinePhase::Work, MovementStyle::Loose) => 25,
        _ => 20,
    };

    if let Some(target) = npc.wander_target {
        if npc.pos.distance(target) > ARRIVE_EPS && area.bounds().contains(target) {
            step_toward(npc, target, ctx.dt_minutes);
            return;
        }
        npc.wander_target = None;
    }

    if chance > 0 && draw(100) < chance {
        let target = area.bounds().sample(draw);
        npc.wander_target = Some(target);
        step_toward(npc, target, ctx.dt_minutes);
    } else {
        npc.velocity = Vec2::ZERO;
    }
}

fn player_pos(ctx: &MoveContext<'_>, player: PlayerId) -> Option<Vec2> {
    ctx.awake_players
        .iter()
        .find(|(id, _)| *id == player)
        .map(|(_, pos)| *pos)
}

/// Move toward `target` at the NPC's speed, snapping on arrival so movement
/// never oscillates around the goal.
fn step_toward(npc: &mut Npc, target: Vec2, dt_minutes: f32) {
    let Some(dir) = npc.pos.toward(target) else {
        npc.velocity = Vec2::ZERO;
        return;
    };
    let step = npc.speed * dt_minutes;
    let dist = npc.pos.distance(target);
    if step >= dist {
        npc.pos = target;
        npc.velocity = Vec2::ZERO;
    } else {
        npc.velocity = dir * npc.speed;
        npc.pos = npc.pos + dir * step;
    }
}

fn finish_step(npc: &mut Npc) {
    npc.pos = npc.pos.clamp_to_world();
    npc.refresh_area();
}
