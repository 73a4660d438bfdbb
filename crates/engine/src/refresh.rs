//! The daily rollover pipeline. Once per crossed day the derived social
//! state is redrawn: market plan, factions, world events, the rumor, routine
//! nudges, the story arc when none is running, the shared town mission, and
//! each online player's dynamic mission slot.
//!
//! Every draft call is independent and degrades to its deterministic
//! fallback, so an unreachable generator slows nothing and stops nothing.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use tidemill_domain::social::{self, FactionDraft};
use tidemill_domain::{
    normalize_mission_draft, reputation_label, EconomyPlan, MissionDraft, NpcId, PlayerId, Role,
    RoutineNudge, StoryArc, TownMission, World, WorldHappening,
};

use crate::app::App;
use crate::fallback;
use crate::infrastructure::ports::DraftContext;

/// Yesterday's events fed into the draft context, freshest last.
const CONTEXT_EVENTS: usize = 10;

/// Stock-mission salt for the shared town board.
const TOWN_SALT: u64 = 0x70b7;

#[derive(Debug, Clone, Copy, PartialEq)]
enum ArcState {
    Absent,
    Running,
    Finished,
}

/// Everything the refreshers need, captured under one read lock.
struct Setup {
    ctx: DraftContext,
    previous_economy: EconomyPlan,
    roster: Vec<(String, Role)>,
    arc_state: ArcState,
    town_stale: bool,
}

/// Run the pipeline for the day the clock now shows. Called by the tick
/// after a day crossing; the seed and the snapshot both carry derived
/// state, so startup needs no extra run.
pub async fn run(app: &Arc<App>) {
    let setup = capture(app).await;
    let day = setup.ctx.day;
    info!(day, "daily refresh");

    // Per-day generation keys and assessments go stale at the rollover; the
    // follow-up hints are exactly for the next day and stay.
    app.talk_gate.clear().await;
    app.shift_cache.clear().await;
    app.views.clear();

    let (economy, faction_draft, happenings, rumor, arc, nudges, town_draft) = tokio::join!(
        economy_plan(app, setup.ctx.clone(), setup.previous_economy.clone()),
        faction_draft(app, setup.ctx.clone(), setup.roster.clone()),
        drafted_happenings(app, setup.ctx.clone()),
        rumor_line(app, setup.ctx.clone()),
        next_arc(app, setup.ctx.clone(), setup.arc_state),
        nudge_map(app, setup.ctx.clone()),
        town_mission_draft(app, setup.ctx.clone(), setup.town_stale),
    );

    {
        let mut world = app.world.write().await;
        world.economy = economy;
        world.rumor_of_the_day = rumor;
        world.routine_nudges = nudges;

        let by_name: HashMap<String, NpcId> = world
            .npcs
            .iter()
            .map(|n| (n.name.to_ascii_lowercase(), n.id))
            .collect();
        let resolve = |name: &str| by_name.get(&name.trim().to_ascii_lowercase()).copied();
        world.factions.ingest(faction_draft, &resolve);

        if let Some(arc) = arc {
            let title = arc.title.clone();
            world.story_arc = Some(arc);
            world.log_event(format!("Talk of \"{title}\" starts making the rounds."));
        }

        // Happenings go last: their effects land on the fresh rumor and the
        // fresh market plan.
        world.apply_happenings(happenings);

        if let Some(draft) = town_draft {
            let posted =
                normalize_mission_draft(draft, world.economy.reward_multiplier, world.now());
            let title = posted.spec.title.clone();
            world.town_mission = Some(TownMission {
                id: posted.id,
                spec: posted.spec,
                posted_day: day,
            });
            world.log_event(format!("A new notice is up on the town board: {title}."));
        }
    }

    refresh_dynamic_missions(app, day).await;
    debug!(day, "daily refresh done");
}

async fn capture(app: &Arc<App>) -> Setup {
    let world = app.world.read().await;
    let ctx = base_context(&world);
    let arc_state = match &world.story_arc {
        None => ArcState::Absent,
        Some(arc) if arc.completed => ArcState::Finished,
        Some(_) => ArcState::Running,
    };
    let town_stale = world
        .town_mission
        .as_ref()
        .is_none_or(|m| m.posted_day < ctx.day);
    Setup {
        previous_economy: world.economy.clone(),
        roster: world.npcs.iter().map(|n| (n.name.clone(), n.role)).collect(),
        arc_state,
        town_stale,
        ctx,
    }
}

fn base_context(world: &World) -> DraftContext {
    DraftContext {
        day: world.clock.day(),
        weather: world.weather.to_string(),
        rumor: world.rumor_of_the_day.clone(),
        arc_stage: world
            .story_arc
            .as_ref()
            .and_then(|a| a.current_stage())
            .map(str::to_string),
        recent_events: world
            .events_yesterday
            .iter()
            .rev()
            .take(CONTEXT_EVENTS)
            .rev()
            .map(|e| e.text.clone())
            .collect(),
        roster: world
            .npcs
            .iter()
            .map(|n| format!("{} ({})", n.name, n.role))
            .collect(),
        faction_names: world.factions.factions.iter().map(|f| f.name.clone()).collect(),
        player_name: None,
        player_reputation: None,
    }
}

// =============================================================================
// Refreshers
// =============================================================================

async fn economy_plan(app: &Arc<App>, ctx: DraftContext, previous: EconomyPlan) -> EconomyPlan {
    let day = ctx.day;
    match app.line_gen.draft_economy(ctx).await {
        Ok(draft) => social::normalize_economy(draft, &previous),
        Err(err) => {
            warn!(error = %err, "economy draft failed, using the offline plan");
            social::fallback_economy(day)
        }
    }
}

async fn faction_draft(
    app: &Arc<App>,
    ctx: DraftContext,
    roster: Vec<(String, Role)>,
) -> FactionDraft {
    let day = ctx.day;
    match app.line_gen.draft_factions(ctx).await {
        Ok(draft) => draft,
        Err(err) => {
            warn!(error = %err, "faction draft failed, using the standing split");
            social::fallback_factions(&roster, day)
        }
    }
}

async fn drafted_happenings(app: &Arc<App>, ctx: DraftContext) -> Vec<WorldHappening> {
    let day = ctx.day;
    let draft = match app.line_gen.draft_events(ctx).await {
        Ok(draft) => draft,
        Err(err) => {
            warn!(error = %err, "events draft failed, using the stock table");
            social::fallback_events(day)
        }
    };
    social::normalize_events(draft)
}

async fn rumor_line(app: &Arc<App>, ctx: DraftContext) -> String {
    let day = ctx.day;
    match app.line_gen.draft_rumor(ctx).await {
        Ok(draft) => social::normalize_rumor(draft).unwrap_or_else(|| social::fallback_rumor(day)),
        Err(err) => {
            warn!(error = %err, "rumor draft failed, using the stock pool");
            social::fallback_rumor(day)
        }
    }
}

/// A new arc only when none is running. A finished arc stays on the books
/// until a drafted replacement arrives; a town with no arc at all gets the
/// offline one rather than none.
async fn next_arc(app: &Arc<App>, ctx: DraftContext, state: ArcState) -> Option<StoryArc> {
    if state == ArcState::Running {
        return None;
    }
    match app.line_gen.draft_arc(ctx).await {
        Ok(draft) => match social::normalize_arc(draft) {
            Some(arc) => Some(arc),
            None if state == ArcState::Absent => Some(social::fallback_arc()),
            None => None,
        },
        Err(err) => {
            warn!(error = %err, "arc draft failed");
            (state == ArcState::Absent).then(social::fallback_arc)
        }
    }
}

async fn nudge_map(app: &Arc<App>, ctx: DraftContext) -> HashMap<Role, RoutineNudge> {
    let day = ctx.day;
    let draft = match app.line_gen.draft_routines(ctx).await {
        Ok(draft) => draft,
        Err(err) => {
            warn!(error = %err, "routine draft failed, using the stock shifts");
            social::fallback_routines(day)
        }
    };
    social::normalize_routines(draft)
}

async fn town_mission_draft(
    app: &Arc<App>,
    ctx: DraftContext,
    stale: bool,
) -> Option<MissionDraft> {
    if !stale {
        return None;
    }
    let day = ctx.day;
    match app.line_gen.draft_mission(ctx).await {
        Ok(draft) => Some(draft),
        Err(err) => {
            warn!(error = %err, "town mission draft failed, posting stock work");
            Some(fallback::stock_mission(day, TOWN_SALT))
        }
    }
}

// =============================================================================
// Dynamic mission slots
// =============================================================================

/// Fill or replace the dynamic slot of every online player who is past the
/// chain. Fresh assignments survive; unstarted ones from earlier days are
/// redrawn. Generation runs unlocked, so eligibility is re-checked before
/// the slot is written.
async fn refresh_dynamic_missions(app: &Arc<App>, day: u32) {
    let candidates: Vec<(PlayerId, String, String)> = {
        let world = app.world.read().await;
        world
            .players
            .values()
            .filter(|p| p.connected && p.missions.chain_exhausted())
            .filter(|p| {
                p.missions
                    .dynamic
                    .as_ref()
                    .is_none_or(|d| d.is_stale(day))
            })
            .map(|p| {
                (
                    p.player_id,
                    p.name.clone(),
                    reputation_label(world.reputation.global(p.player_id)).to_string(),
                )
            })
            .collect()
    };

    for (player_id, name, reputation) in candidates {
        let ctx = {
            let world = app.world.read().await;
            let mut ctx = base_context(&world);
            ctx.player_name = Some(name.clone());
            ctx.player_reputation = Some(reputation);
            ctx
        };
        let draft = match app.line_gen.draft_mission(ctx).await {
            Ok(draft) => draft,
            Err(err) => {
                debug!(error = %err, player = %name, "mission draft failed, using stock");
                fallback::stock_mission(day, player_id.to_uuid().as_u128() as u64)
            }
        };

        let mut world = app.world.write().await;
        let (multiplier, now) = (world.economy.reward_multiplier, world.now());
        let Some(player) = world.player_mut(player_id) else {
            continue;
        };
        // Re-check: the player may have left or started the old mission
        // while the draft was in flight.
        if !player.connected
            || !player.missions.chain_exhausted()
            || player
                .missions
                .dynamic
                .as_ref()
                .is_some_and(|d| !d.is_stale(day))
        {
            continue;
        }
        let mission = normalize_mission_draft(draft, multiplier, now);
        let title = mission.spec.title.clone();
        player.missions.counters.reset();
        player.missions.dynamic = Some(mission);
        info!(player = %name, %title, "dynamic mission assigned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Config;
    use crate::infrastructure::clock::{FixedClock, FixedRandom};
    use crate::infrastructure::ollama::NullLineGen;
    use crate::infrastructure::ports::{LineGenError, MockLineGenPort};
    use crate::infrastructure::store::NullStore;
    use chrono::TimeZone;
    use tidemill_domain::missions::CHAIN_LEN;
    use tidemill_domain::social::{ArcDraft, EconomyDraft, RumorDraft};
    use tidemill_domain::{seed_world, CropKind, Moment, PlayerSession, Vec2, WorldClock};

    fn offline_app(world: World) -> Arc<App> {
        App::for_tests(world)
    }

    fn mocked_app(world: World, line_gen: MockLineGenPort) -> Arc<App> {
        App::new(
            world,
            Arc::new(line_gen),
            Arc::new(NullStore),
            Arc::new(FixedClock(
                chrono::Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            )),
            Arc::new(FixedRandom(0)),
            Config::default(),
        )
    }

    fn joined(world: &mut World, name: &str, chain_done: bool) -> PlayerId {
        let id = PlayerId::new();
        let mut session = PlayerSession::new(id, name, true, Vec2::new(1000.0, 1000.0));
        if chain_done {
            session.missions.chain_index = CHAIN_LEN;
        }
        world.players.insert(id, session);
        id
    }

    #[tokio::test]
    async fn offline_rollover_redraws_the_whole_town() {
        let mut world = seed_world();
        world.story_arc = None;
        world.town_mission = None;
        let app = offline_app(world);
        run(&app).await;

        let world = app.world.read().await;
        let day = world.clock.day();
        assert!(!world.happenings.is_empty());
        assert!(!world.events_today.is_empty(), "happenings should be logged");
        assert!(world.story_arc.is_some(), "a town with no arc gets one");
        assert_eq!(world.factions.factions.len(), 2);
        assert!(world.factions.factions.iter().any(|f| !f.members.is_empty()));
        let town = world.town_mission.as_ref().unwrap();
        assert_eq!(town.posted_day, day);
        // The rumor comes from the stock pool, possibly with an appended
        // happening line.
        assert!(world
            .rumor_of_the_day
            .starts_with(&social::fallback_rumor(day)));
    }

    #[tokio::test]
    async fn drafted_state_flows_through_normalization() {
        let mut line_gen = MockLineGenPort::new();
        line_gen.expect_draft_economy().returning(|_| {
            let mut prices = HashMap::new();
            prices.insert("turnip".to_string(), 99);
            Ok(EconomyDraft {
                prices,
                ..Default::default()
            })
        });
        line_gen
            .expect_draft_factions()
            .returning(|_| Err(LineGenError::RateLimited));
        line_gen
            .expect_draft_events()
            .returning(|_| Err(LineGenError::RateLimited));
        line_gen.expect_draft_rumor().returning(|_| {
            Ok(RumorDraft {
                rumor: "The mill wheel jammed at dawn.".to_string(),
            })
        });
        line_gen.expect_draft_arc().returning(|_| {
            Ok(ArcDraft {
                title: "The Low Water".to_string(),
                stages: vec!["The river drops".to_string(), "Old things surface".to_string()],
            })
        });
        line_gen
            .expect_draft_routines()
            .returning(|_| Err(LineGenError::RateLimited));
        line_gen.expect_draft_mission().returning(|_| {
            Ok(MissionDraft {
                title: "Granary Count".to_string(),
                kind: "harvest_count".to_string(),
                count: Some(4),
                ..Default::default()
            })
        });

        let mut world = seed_world();
        world.story_arc = None;
        world.town_mission = None;
        let app = mocked_app(world, line_gen);
        run(&app).await;

        let world = app.world.read().await;
        assert_eq!(world.economy.price_of(CropKind::Turnip), Some(99));
        assert!(world.rumor_of_the_day.starts_with("The mill wheel jammed at dawn."));
        assert_eq!(
            world.story_arc.as_ref().unwrap().current_stage(),
            Some("The river drops")
        );
        assert_eq!(world.town_mission.as_ref().unwrap().spec.title, "Granary Count");
    }

    #[tokio::test]
    async fn running_arc_is_left_alone() {
        let mut world = seed_world();
        world.story_arc = Some(social::fallback_arc());
        let before = world.story_arc.clone();
        let app = offline_app(world);
        run(&app).await;
        let world = app.world.read().await;
        assert_eq!(world.story_arc, before);
    }

    #[tokio::test]
    async fn fresh_town_mission_is_kept_for_the_day() {
        let mut world = seed_world();
        world.town_mission = None;
        let app = offline_app(world);
        run(&app).await;
        let first = {
            let world = app.world.read().await;
            world.town_mission.clone().unwrap()
        };
        // Same day again: no rotation.
        run(&app).await;
        let world = app.world.read().await;
        assert_eq!(world.town_mission.as_ref().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn dynamic_slots_fill_for_online_players_past_the_chain() {
        let mut world = seed_world();
        let veteran = joined(&mut world, "Rook", true);
        let newcomer = joined(&mut world, "Fen", false);
        let away = joined(&mut world, "Tul", true);
        world.player_mut(away).unwrap().connected = false;

        let app = offline_app(world);
        run(&app).await;

        let world = app.world.read().await;
        assert!(world.player(veteran).unwrap().missions.dynamic.is_some());
        assert!(world.player(newcomer).unwrap().missions.dynamic.is_none());
        assert!(world.player(away).unwrap().missions.dynamic.is_none());
    }

    #[tokio::test]
    async fn stale_dynamic_missions_are_redrawn_and_started_ones_kept() {
        let mut world = seed_world();
        world.clock = WorldClock::starting_at(3, 600);
        let idle = joined(&mut world, "Rook", true);
        let busy = joined(&mut world, "Fen", true);
        let yesterday = Moment::new(2, 600);

        let old = normalize_mission_draft(fallback::stock_mission(2, 7), 1.0, yesterday);
        world.player_mut(idle).unwrap().missions.dynamic = Some(old.clone());
        let mut started = normalize_mission_draft(fallback::stock_mission(2, 8), 1.0, yesterday);
        started.progressed = true;
        world.player_mut(busy).unwrap().missions.dynamic = Some(started.clone());

        let app = offline_app(world);
        run(&app).await;

        let world = app.world.read().await;
        let redrawn = world.player(idle).unwrap().missions.dynamic.as_ref().unwrap();
        assert_ne!(redrawn.id, old.id, "untouched mission should be replaced");
        let kept = world.player(busy).unwrap().missions.dynamic.as_ref().unwrap();
        assert_eq!(kept.id, started.id, "started mission should survive");
    }
}
