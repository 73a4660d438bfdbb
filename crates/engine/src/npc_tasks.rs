//! Background NPC errands. The tick loop hands the single errand slot to the
//! first NPC with a due task; the errand task then walks its runner itself,
//! one step per poll, while the tick's own advancement is paused. Scheduled
//! observations stay queued until the world clock reaches their start, since
//! the clock does not move while an errand runs.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use tidemill_domain::{
    Area, Directive, DirectiveKind, Moment, Npc, NpcId, NpcTask, PlayerId, Vec2, World,
};
use tidemill_shared::ServerMessage;

use crate::app::App;
use crate::fallback;
use crate::infrastructure::ports::{LineRequest, MemoryRecord};
use crate::npc_chat::emotion_for;

/// Close enough to the target NPC to have a word.
const TALK_REACH: f32 = 60.0;

/// Close enough to an area's heart to watch it.
const OBSERVE_REACH: f32 = 80.0;

/// Walk polls per tick interval; the runner hustles so a cross-town errand
/// stays short in wall time.
const WALK_POLLS_PER_TICK: u64 = 4;

/// Give up on a walk after this many steps.
const MAX_WALK_STEPS: u32 = 600;

/// Expiry on the walk directive, in case a snapshot catches one mid-errand.
const WALK_EXPIRY_MINUTES: u32 = 180;

/// Wall-clock interval between occupancy samples during an observation.
const SAMPLE_MS: u64 = 1000;

/// Releases the single-errand slot however the errand task exits.
struct TaskSlot {
    app: Arc<App>,
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.app.task_in_progress.store(false, Ordering::SeqCst);
    }
}

/// Called once per tick. Claims the errand slot and spawns the next due
/// task; a no-op when an errand is already running or nothing is due.
pub async fn maybe_start(app: &Arc<App>) {
    if app
        .task_in_progress
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    let claimed = {
        let mut world = app.world.write().await;
        let busy = app.busy_npcs(&world);
        claim_task(&mut world, &busy)
    };

    let Some((npc_id, task)) = claimed else {
        app.task_in_progress.store(false, Ordering::SeqCst);
        return;
    };

    let slot = TaskSlot { app: app.clone() };
    let app = app.clone();
    tokio::spawn(async move {
        run_task(&app, npc_id, task).await;
        drop(slot);
    });
}

/// First NPC with a due task at the front of its queue wins the slot.
/// Scheduled observations are not due until their start moment passes, and
/// stay at the front so queues keep their order.
fn claim_task(world: &mut World, busy: &HashSet<NpcId>) -> Option<(NpcId, NpcTask)> {
    let now = world.now();
    let id = world
        .npcs
        .iter()
        .find(|npc| {
            !busy.contains(&npc.id)
                && !npc.is_busy_with_task()
                && npc.tasks.front().is_some_and(|task| task_is_due(task, now))
        })
        .map(|npc| npc.id)?;
    let task = world.npc_mut(id)?.start_next_task()?;
    Some((id, task))
}

fn task_is_due(task: &NpcTask, now: Moment) -> bool {
    match task {
        NpcTask::ObserveArea { start: Some(at), .. } => now >= *at,
        _ => true,
    }
}

async fn run_task(app: &Arc<App>, npc_id: NpcId, task: NpcTask) {
    match task {
        NpcTask::TalkToNpc {
            target,
            topic,
            requested_by,
        } => run_talk(app, npc_id, target, &topic, requested_by).await,
        NpcTask::ObserveArea {
            area,
            duration_minutes,
            requested_by,
            ..
        } => run_observe(app, npc_id, area, duration_minutes, requested_by).await,
    }

    let mut world = app.world.write().await;
    if let Some(npc) = world.npc_mut(npc_id) {
        npc.clear_directive();
        npc.finish_task();
    }
}

// =============================================================================
// Going for a word
// =============================================================================

async fn run_talk(
    app: &Arc<App>,
    npc_id: NpcId,
    target: NpcId,
    topic: &str,
    requested_by: PlayerId,
) {
    let names = {
        let world = app.world.read().await;
        world
            .npc(npc_id)
            .map(|n| n.name.clone())
            .zip(world.npc(target).map(|n| n.name.clone()))
    };
    let Some((runner_name, target_name)) = names else {
        return;
    };
    info!(runner = %runner_name, target = %target_name, "npc errand: going for a word");

    let arrived = walk_to(app, npc_id, TALK_REACH, |world| {
        world.npc(target).map(|n| n.pos)
    })
    .await;
    if !arrived {
        debug!(runner = %runner_name, "errand walk gave out before reaching the target");
        queue_report(
            app,
            npc_id,
            requested_by,
            format!("I went looking for {target_name} but never caught up with them."),
        );
        announce(app, requested_by, &runner_name).await;
        return;
    }

    // Context and participants captured once; lines generate without the
    // world lock held.
    let staged = {
        let world = app.world.read().await;
        world.npc(npc_id).cloned().zip(world.npc(target).cloned()).map(
            |(runner, mate)| {
                let score = world.relations.score(npc_id, target);
                let ctx = ErrandContext {
                    weather: world.weather.to_string(),
                    rumor: world.rumor_of_the_day.clone(),
                    arc_stage: world
                        .story_arc
                        .as_ref()
                        .and_then(|a| a.current_stage())
                        .map(str::to_string),
                    day: world.clock.day(),
                };
                (runner, mate, score, ctx)
            },
        )
    };
    let Some((runner, mate, score, ctx)) = staged else {
        return;
    };

    let opener = errand_line(app, &ctx, &runner, &mate, topic, score).await;
    speak(app, &runner, &mate, opener, score, 0).await;
    tokio::time::sleep(Duration::from_millis(app.config.turn_delay_ms)).await;

    let reply = fallback::canned_chatter(&mate, &runner.name, score, 1);
    speak(app, &mate, &runner, reply.clone(), score, 1).await;

    settle_talk(app, &runner, &mate, topic, requested_by).await;
    queue_report(
        app,
        npc_id,
        requested_by,
        format!("I had a word with {target_name} about {topic}. They said: \"{reply}\""),
    );
    announce(app, requested_by, &runner_name).await;
}

/// World mood captured once for the errand's one generated line.
struct ErrandContext {
    weather: String,
    rumor: String,
    arc_stage: Option<String>,
    day: u32,
}

async fn errand_line(
    app: &Arc<App>,
    ctx: &ErrandContext,
    runner: &Npc,
    mate: &Npc,
    topic: &str,
    score: i8,
) -> String {
    let gate_key = format!("errand:{}:{}:{}", runner.id, mate.id, ctx.day);
    if !app.talk_gate.try_acquire(&gate_key).await {
        return fallback::canned_chatter(runner, &mate.name, score, 0);
    }
    let request = LineRequest {
        speaker_name: runner.name.clone(),
        speaker_role: runner.role.to_string(),
        speaker_traits: runner.traits.clone(),
        listener_name: mate.name.clone(),
        listener_is_player: false,
        prompt: topic.to_string(),
        turn: 0,
        weather: ctx.weather.clone(),
        rumor: ctx.rumor.clone(),
        arc_stage: ctx.arc_stage.clone(),
        memories: Vec::new(),
    };
    match app.line_gen.generate_line(request).await {
        Ok(generated) => generated.line,
        Err(err) => {
            debug!(error = %err, "errand line generation failed, using canned pool");
            fallback::canned_chatter(runner, &mate.name, score, 0)
        }
    }
}

async fn speak(app: &Arc<App>, speaker: &Npc, listener: &Npc, text: String, score: i8, turn: u32) {
    app.connections
        .broadcast(ServerMessage::DialogueEvent {
            speaker: speaker.id.to_uuid(),
            speaker_name: speaker.name.clone(),
            target: listener.id.to_uuid(),
            target_name: listener.name.clone(),
            text,
            emotion: emotion_for(score).to_string(),
            has_more_chunks: false,
            turn,
        })
        .await;
}

/// Cooldowns, a nudge to the pair's relation, and a memory on each side.
async fn settle_talk(
    app: &Arc<App>,
    runner: &Npc,
    mate: &Npc,
    topic: &str,
    requested_by: PlayerId,
) {
    {
        let mut world = app.world.write().await;
        let now = world.now();
        let cooldown = app.config.talk_cooldown_minutes;
        for id in [runner.id, mate.id] {
            if let Some(npc) = world.npc_mut(id) {
                npc.refresh_talk_cooldown(now, cooldown);
            }
        }
        world
            .relations
            .bump(runner.id, mate.id, 1, "shared a word", now);
    }
    if let Err(err) = app
        .store
        .record_relation_delta(
            runner.id.to_uuid(),
            mate.name.clone(),
            1,
            "shared a word".to_string(),
            app.clock.now(),
        )
        .await
    {
        warn!(error = %err, "relation delta write failed");
    }

    for (owner, other) in [(runner, mate), (mate, runner)] {
        let record = MemoryRecord {
            owner: owner.id,
            kind: "interaction".to_string(),
            content: format!("Talked with {} about {topic}.", other.name),
            importance: 2,
            tags: vec![
                other.id.to_uuid().to_string(),
                other.name.clone(),
                requested_by.to_uuid().to_string(),
            ],
            created_at: app.clock.now(),
        };
        if let Err(err) = app.store.append_memory(record).await {
            warn!(error = %err, "errand memory write failed");
        }
    }
}

// =============================================================================
// Watching an area
// =============================================================================

async fn run_observe(
    app: &Arc<App>,
    npc_id: NpcId,
    area: Area,
    duration_minutes: u32,
    requested_by: PlayerId,
) {
    let runner_name = {
        let world = app.world.read().await;
        world.npc(npc_id).map(|n| n.name.clone())
    };
    let Some(runner_name) = runner_name else {
        return;
    };
    info!(runner = %runner_name, %area, duration_minutes, "npc errand: going to watch");

    let post = area.bounds().center();
    let arrived = walk_to(app, npc_id, OBSERVE_REACH, |_| Some(post)).await;
    if !arrived {
        queue_report(
            app,
            npc_id,
            requested_by,
            format!("I never made it to the {area}; the errand fell through."),
        );
        announce(app, requested_by, &runner_name).await;
        return;
    }

    // The world clock is frozen while the errand holds the slot, so the
    // watch runs in wall time at the configured tick rate. NPCs hold still
    // for the duration; players can still wander through.
    let wall_ms = u64::from(duration_minutes.max(1)) * app.config.tick_millis
        / u64::from(app.config.tick_sim_minutes.max(1));
    let mut remaining = Duration::from_millis(wall_ms.max(1));

    let mut seen_npcs: BTreeSet<String> = BTreeSet::new();
    let mut seen_players: BTreeSet<String> = BTreeSet::new();
    let weather = {
        let world = app.world.read().await;
        sample_area(&world, area, npc_id, &mut seen_npcs, &mut seen_players);
        world.weather.to_string()
    };

    while !remaining.is_zero() {
        let nap = remaining.min(Duration::from_millis(SAMPLE_MS));
        tokio::time::sleep(nap).await;
        remaining -= nap;
        let world = app.world.read().await;
        sample_area(&world, area, npc_id, &mut seen_npcs, &mut seen_players);
    }

    let report = compose_report(area, &seen_npcs, &seen_players, &weather);
    let record = MemoryRecord {
        owner: npc_id,
        kind: "observation".to_string(),
        content: report.clone(),
        importance: 2,
        tags: vec![area.to_string(), requested_by.to_uuid().to_string()],
        created_at: app.clock.now(),
    };
    if let Err(err) = app.store.append_memory(record).await {
        warn!(error = %err, "observation memory write failed");
    }
    queue_report(app, npc_id, requested_by, report);
    announce(app, requested_by, &runner_name).await;
}

fn sample_area(
    world: &World,
    area: Area,
    watcher: NpcId,
    npcs: &mut BTreeSet<String>,
    players: &mut BTreeSet<String>,
) {
    let bounds = area.bounds();
    for npc in &world.npcs {
        if npc.id != watcher && bounds.contains(npc.pos) {
            npcs.insert(npc.name.clone());
        }
    }
    for player in world.players.values() {
        if player.connected && bounds.contains(player.pos) {
            players.insert(player.name.clone());
        }
    }
}

fn compose_report(
    area: Area,
    npcs: &BTreeSet<String>,
    players: &BTreeSet<String>,
    weather: &str,
) -> String {
    let mut report = format!("I kept an eye on the {area} as asked.");
    if npcs.is_empty() && players.is_empty() {
        report.push_str(" Not a soul came through.");
    } else {
        if !npcs.is_empty() {
            report.push_str(&format!(" {} were about.", name_list(npcs)));
        }
        if !players.is_empty() {
            report.push_str(&format!(" {} passed through while I watched.", name_list(players)));
        }
    }
    report.push_str(&format!(" {weather} the whole while."));
    report
}

fn name_list(names: &BTreeSet<String>) -> String {
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    match names.as_slice() {
        [] => String::new(),
        [only] => (*only).to_string(),
        [head @ .., last] => format!("{} and {last}", head.join(", ")),
    }
}

// =============================================================================
// Shared plumbing
// =============================================================================

/// Walk the runner toward a (possibly moving) destination, one step per
/// poll, until within `reach`. Returns false when the destination vanishes
/// or the step limit runs out.
async fn walk_to(
    app: &Arc<App>,
    npc_id: NpcId,
    reach: f32,
    dest: impl Fn(&World) -> Option<Vec2>,
) -> bool {
    let poll = Duration::from_millis((app.config.tick_millis / WALK_POLLS_PER_TICK).max(1));
    let dt_minutes = app.config.tick_sim_minutes as f32;

    for _ in 0..MAX_WALK_STEPS {
        let arrived = {
            let mut world = app.world.write().await;
            let Some(target) = dest(&world) else {
                return false;
            };
            let Some(npc) = world.npc(npc_id) else {
                return false;
            };
            if npc.pos.distance(target) <= reach {
                true
            } else {
                let expiry = world.now().plus_minutes(WALK_EXPIRY_MINUTES);
                if let Some(npc) = world.npc_mut(npc_id) {
                    npc.set_directive(Directive::new(
                        DirectiveKind::GoToPoint { point: target },
                        Some(expiry),
                    ));
                }
                let mut draw = |n: u32| app.random.draw(n);
                world.step_npc_only(npc_id, dt_minutes, &mut draw);
                false
            }
        };
        if arrived {
            let mut world = app.world.write().await;
            if let Some(npc) = world.npc_mut(npc_id) {
                npc.clear_directive();
            }
            return true;
        }
        tokio::time::sleep(poll).await;
    }
    false
}

fn queue_report(app: &Arc<App>, npc: NpcId, requested_by: PlayerId, report: String) {
    app.pending_reports.insert((npc, requested_by), report);
}

/// Let the requester know there is word waiting for them.
async fn announce(app: &Arc<App>, requested_by: PlayerId, runner_name: &str) {
    app.connections
        .send_to_player(
            requested_by,
            ServerMessage::Feedback {
                text: format!("{runner_name} is back and has word for you."),
            },
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Config;
    use crate::infrastructure::clock::{FixedClock, FixedRandom};
    use crate::infrastructure::ollama::NullLineGen;
    use crate::infrastructure::store::NullStore;
    use chrono::TimeZone;
    use tidemill_domain::{seed_world, ConnectionId, PlayerSession};
    use tokio::sync::mpsc;

    fn fast_app(world: World) -> Arc<App> {
        App::new(
            world,
            Arc::new(NullLineGen),
            Arc::new(NullStore),
            Arc::new(FixedClock(
                chrono::Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            )),
            Arc::new(FixedRandom(0)),
            Config {
                tick_millis: 8,
                turn_delay_ms: 1,
                ..Config::default()
            },
        )
    }

    async fn wait_for_slot_release(app: &Arc<App>) {
        for _ in 0..400 {
            if !app.task_in_progress.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("errand never released the slot");
    }

    /// The requester joined in the town square with a live channel.
    async fn app_with_requester(
        mut world: World,
        requester: PlayerId,
    ) -> (Arc<App>, mpsc::Receiver<ServerMessage>) {
        world.players.insert(
            requester,
            PlayerSession::new(requester, "Rook", true, Vec2::new(1000.0, 1000.0)),
        );
        let app = fast_app(world);
        let conn = ConnectionId::new();
        let (tx, rx) = mpsc::channel(64);
        app.connections.register(conn, tx).await;
        app.connections.bind_player(conn, requester).await;
        (app, rx)
    }

    #[test]
    fn scheduled_observation_is_not_due_early() {
        let task = NpcTask::ObserveArea {
            area: Area::Docks,
            start: Some(Moment::new(3, 900)),
            duration_minutes: 30,
            requested_by: PlayerId::new(),
        };
        assert!(!task_is_due(&task, Moment::new(3, 899)));
        assert!(task_is_due(&task, Moment::new(3, 900)));
        assert!(task_is_due(
            &NpcTask::ObserveArea {
                area: Area::Docks,
                start: None,
                duration_minutes: 30,
                requested_by: PlayerId::new(),
            },
            Moment::new(1, 0)
        ));
    }

    #[tokio::test]
    async fn claim_skips_busy_npcs_and_scheduled_tasks() {
        let mut world = seed_world();
        let requester = PlayerId::new();
        let a = world.npcs[0].id;
        let b = world.npcs[1].id;
        let later = world.now().plus_minutes(300);
        world
            .npc_mut(a)
            .unwrap()
            .push_task(NpcTask::ObserveArea {
                area: Area::Docks,
                start: Some(later),
                duration_minutes: 30,
                requested_by: requester,
            })
            .unwrap();
        world
            .npc_mut(b)
            .unwrap()
            .push_task(NpcTask::ObserveArea {
                area: Area::Docks,
                start: None,
                duration_minutes: 30,
                requested_by: requester,
            })
            .unwrap();

        // B is busy: nothing claimable, A's task is not due yet.
        let busy = HashSet::from([b]);
        assert!(claim_task(&mut world, &busy).is_none());
        assert_eq!(world.npc(a).unwrap().tasks.len(), 1);

        // B free: its unscheduled watch is claimed.
        let (claimed, _) = claim_task(&mut world, &HashSet::new()).unwrap();
        assert_eq!(claimed, b);
        assert!(world.npc(b).unwrap().is_busy_with_task());
    }

    #[tokio::test]
    async fn talk_errand_walks_over_speaks_and_reports() {
        let mut world = seed_world();
        for npc in world.npcs.iter_mut() {
            npc.pos = Vec2::new(100.0, 1900.0);
        }
        world.npcs[0].pos = Vec2::new(1000.0, 1000.0);
        world.npcs[1].pos = Vec2::new(1150.0, 1000.0);
        let runner = world.npcs[0].id;
        let target = world.npcs[1].id;
        let requester = PlayerId::new();
        world
            .npc_mut(runner)
            .unwrap()
            .push_task(NpcTask::TalkToNpc {
                target,
                topic: "the harvest".to_string(),
                requested_by: requester,
            })
            .unwrap();
        let (app, mut rx) = app_with_requester(world, requester).await;

        maybe_start(&app).await;
        wait_for_slot_release(&app).await;

        let mut lines = 0;
        let mut announced = false;
        while let Ok(msg) = rx.try_recv() {
            match msg {
                ServerMessage::DialogueEvent { .. } => lines += 1,
                ServerMessage::Feedback { text } => {
                    announced = announced || text.contains("word for you");
                }
                _ => {}
            }
        }
        assert_eq!(lines, 2, "one line each way");
        assert!(announced);

        let report = app
            .pending_reports
            .get(&(runner, requester))
            .map(|entry| entry.clone())
            .unwrap();
        assert!(report.contains("about the harvest"));

        let world = app.world.read().await;
        let now = world.now();
        assert!(!world.npc(runner).unwrap().is_busy_with_task());
        assert!(world.npc(runner).unwrap().directive.is_none());
        assert!(world.npc(runner).unwrap().on_talk_cooldown(now));
        assert_eq!(world.relations.score(runner, target), 1);
        // The runner actually closed the distance.
        let gap = world
            .npc(runner)
            .unwrap()
            .pos
            .distance(world.npc(target).unwrap().pos);
        assert!(gap <= TALK_REACH + 1.0);
    }

    #[tokio::test]
    async fn observation_reports_who_was_around() {
        let mut world = seed_world();
        let post = Area::Docks.bounds().center();
        for npc in world.npcs.iter_mut() {
            npc.pos = Vec2::new(100.0, 100.0);
        }
        world.npcs[0].pos = post + Vec2::new(10.0, 0.0);
        world.npcs[1].pos = post + Vec2::new(-20.0, 8.0);
        let watcher = world.npcs[0].id;
        let bystander = world.npcs[1].name.clone();
        let requester = PlayerId::new();
        world
            .npc_mut(watcher)
            .unwrap()
            .push_task(NpcTask::ObserveArea {
                area: Area::Docks,
                start: None,
                duration_minutes: 2,
                requested_by: requester,
            })
            .unwrap();
        let (app, mut rx) = app_with_requester(world, requester).await;

        maybe_start(&app).await;
        wait_for_slot_release(&app).await;

        let report = app
            .pending_reports
            .get(&(watcher, requester))
            .map(|entry| entry.clone())
            .unwrap();
        assert!(report.contains("docks"));
        assert!(report.contains(&bystander));

        let mut announced = false;
        while let Ok(msg) = rx.try_recv() {
            if let ServerMessage::Feedback { text } = msg {
                announced = announced || text.contains("word for you");
            }
        }
        assert!(announced);

        let world = app.world.read().await;
        assert!(!world.npc(watcher).unwrap().is_busy_with_task());
    }

    #[tokio::test]
    async fn scheduled_watch_stays_queued_until_due() {
        let mut world = seed_world();
        let npc = world.npcs[0].id;
        let requester = PlayerId::new();
        let start = world.now().plus_minutes(240);
        world
            .npc_mut(npc)
            .unwrap()
            .push_task(NpcTask::ObserveArea {
                area: Area::MarketRow,
                start: Some(start),
                duration_minutes: 30,
                requested_by: requester,
            })
            .unwrap();
        let (app, _rx) = app_with_requester(world, requester).await;

        maybe_start(&app).await;
        // Nothing was due: the slot came straight back and the task waits.
        assert!(!app.task_in_progress.load(Ordering::SeqCst));
        let world = app.world.read().await;
        assert!(!world.npc(npc).unwrap().is_busy_with_task());
        assert_eq!(world.npc(npc).unwrap().tasks.len(), 1);
    }

    #[tokio::test]
    async fn a_held_slot_backs_off() {
        let world = seed_world();
        let app = fast_app(world);
        assert!(app
            .task_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok());
        maybe_start(&app).await;
        assert!(app.task_in_progress.load(Ordering::SeqCst));
    }
}
