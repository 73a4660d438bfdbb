//! Ambient NPC-to-NPC banter. At most one conversation runs at a time,
//! started by the tick loop when two acquaintances stand close together
//! within earshot of an awake player. Lines come from the canned pools, with
//! one gated generation attempt for the opener.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use tidemill_domain::{pair_weight_multiplier, Moment, Npc, NpcId, World};
use tidemill_shared::ServerMessage;

use crate::app::App;
use crate::fallback;
use crate::infrastructure::ports::{LineRequest, MemoryRecord, RandomPort};

/// NPCs this close to each other can strike up a conversation.
pub const PAIR_RADIUS: f32 = 110.0;

/// Banter only plays out within this range of an awake player.
const EARSHOT_RADIUS: f32 = 240.0;

/// Weighted candidates kept before the random pick.
const TOP_CANDIDATES: usize = 5;

/// Cooperative cancellation for the running banter task. The dialogue path
/// trips it when a player starts talking; the banter loop polls it at every
/// turn boundary.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
struct BanterPair {
    a: NpcId,
    b: NpcId,
    score: i8,
}

/// Releases the single-conversation slot however the banter task exits.
struct ConvoSlot {
    app: Arc<App>,
    npcs: Vec<NpcId>,
}

impl Drop for ConvoSlot {
    fn drop(&mut self) {
        for id in &self.npcs {
            self.app.chatting.remove(id);
        }
        self.app.convo_in_progress.store(false, Ordering::SeqCst);
    }
}

/// Called once per tick. Claims the conversation slot, picks a pair, and
/// spawns the exchange; a no-op when a conversation is already running or
/// nothing qualifies.
pub async fn maybe_start(app: &Arc<App>) {
    if app
        .convo_in_progress
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    let pair = {
        let world = app.world.read().await;
        if world.any_player_in_dialogue() {
            None
        } else {
            let busy = app.busy_npcs(&world);
            pick_pair(&world, &busy, app.random.as_ref())
        }
    };

    let Some(pair) = pair else {
        app.convo_in_progress.store(false, Ordering::SeqCst);
        return;
    };

    app.chatting.insert(pair.a);
    app.chatting.insert(pair.b);
    app.cancel_chat.reset();

    let slot = ConvoSlot {
        app: app.clone(),
        npcs: vec![pair.a, pair.b],
    };
    let app = app.clone();
    tokio::spawn(async move {
        run_banter(&app, pair).await;
        drop(slot);
    });
}

/// Weighted pair selection: closer pairs and warmer relations are likelier,
/// grudges nearly never. Picks at random among the strongest candidates.
fn pick_pair(
    world: &World,
    busy: &std::collections::HashSet<NpcId>,
    random: &dyn RandomPort,
) -> Option<BanterPair> {
    let awake = world.awake_players();
    if awake.is_empty() {
        return None;
    }
    let now = world.now();

    let eligible: Vec<&Npc> = world
        .npcs
        .iter()
        .filter(|npc| {
            !busy.contains(&npc.id)
                && !npc.on_talk_cooldown(now)
                && !npc.is_busy_with_task()
                && awake
                    .iter()
                    .any(|(_, pos)| npc.pos.distance(*pos) <= EARSHOT_RADIUS)
        })
        .collect();

    let mut candidates: Vec<(f32, BanterPair)> = Vec::new();
    for (i, a) in eligible.iter().enumerate() {
        for b in eligible.iter().skip(i + 1) {
            let dist = a.pos.distance(b.pos);
            if dist > PAIR_RADIUS {
                continue;
            }
            let score = world.relations.score(a.id, b.id);
            let weight = (1.0 / dist.max(1.0)) * pair_weight_multiplier(score);
            if weight <= 0.0 {
                continue;
            }
            candidates.push((
                weight,
                BanterPair {
                    a: a.id,
                    b: b.id,
                    score,
                },
            ));
        }
    }
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(|x, y| y.0.total_cmp(&x.0));
    candidates.truncate(TOP_CANDIDATES);
    let index = random.draw(candidates.len() as u32) as usize;
    Some(candidates.swap_remove(index).1)
}

pub(crate) fn emotion_for(score: i8) -> &'static str {
    if score >= 2 {
        "warm"
    } else if score <= -3 {
        "cold"
    } else {
        "neutral"
    }
}

/// World mood captured once per exchange for the generated opener.
struct BanterContext {
    weather: String,
    rumor: String,
    arc_stage: Option<String>,
    day: u32,
}

async fn run_banter(app: &Arc<App>, pair: BanterPair) {
    let turns = 2 + app.random.draw(2);
    debug!(turns, "starting npc banter");

    let ctx = {
        let world = app.world.read().await;
        BanterContext {
            weather: world.weather.to_string(),
            rumor: world.rumor_of_the_day.clone(),
            arc_stage: world
                .story_arc
                .as_ref()
                .and_then(|a| a.current_stage())
                .map(str::to_string),
            day: world.clock.day(),
        }
    };

    let mut speaker = pair.a;
    let mut listener = pair.b;
    let mut spoke = 0u32;

    for turn in 0..turns {
        if app.cancel_chat.is_cancelled() {
            debug!("banter cancelled mid-exchange");
            break;
        }

        // Clone the pair out so nothing holds the world lock while the
        // opener may be generating.
        let npcs = {
            let world = app.world.read().await;
            world.npc(speaker).cloned().zip(world.npc(listener).cloned())
        };
        let Some((speaker_npc, listener_npc)) = npcs else {
            break;
        };

        let text = if turn == 0 {
            opener_line(app, &ctx, &speaker_npc, &listener_npc, pair.score).await
        } else {
            fallback::canned_chatter(&speaker_npc, &listener_npc.name, pair.score, turn)
        };

        app.connections
            .broadcast(ServerMessage::DialogueEvent {
                speaker: speaker_npc.id.to_uuid(),
                speaker_name: speaker_npc.name.clone(),
                target: listener_npc.id.to_uuid(),
                target_name: listener_npc.name.clone(),
                text,
                emotion: emotion_for(pair.score).to_string(),
                has_more_chunks: false,
                turn,
            })
            .await;
        spoke += 1;
        std::mem::swap(&mut speaker, &mut listener);

        tokio::time::sleep(Duration::from_millis(app.config.turn_delay_ms)).await;
    }

    wind_down(app, &pair, spoke).await;
}

/// One gated generation attempt for the opening line; everything else, and
/// every failure, uses the canned pools.
async fn opener_line(
    app: &Arc<App>,
    ctx: &BanterContext,
    speaker: &Npc,
    listener: &Npc,
    score: i8,
) -> String {
    let gate_key = format!("banter:{}:{}:{}", speaker.id, listener.id, ctx.day);
    if !app.talk_gate.try_acquire(&gate_key).await {
        return fallback::canned_chatter(speaker, &listener.name, score, 0);
    }
    let request = LineRequest {
        speaker_name: speaker.name.clone(),
        speaker_role: speaker.role.to_string(),
        speaker_traits: speaker.traits.clone(),
        listener_name: listener.name.clone(),
        listener_is_player: false,
        prompt: ctx.rumor.clone(),
        turn: 0,
        weather: ctx.weather.clone(),
        rumor: ctx.rumor.clone(),
        arc_stage: ctx.arc_stage.clone(),
        memories: Vec::new(),
    };
    match app.line_gen.generate_line(request).await {
        Ok(generated) => generated.line,
        Err(err) => {
            debug!(error = %err, "banter generation failed, using canned pool");
            fallback::canned_chatter(speaker, &listener.name, score, 0)
        }
    }
}

/// Refresh both cooldowns however the exchange ended, and leave each
/// participant a banter memory when at least one line was spoken.
async fn wind_down(app: &Arc<App>, pair: &BanterPair, spoke: u32) {
    let recorded = {
        let mut world = app.world.write().await;
        let now = world.now();
        let cooldown = app.config.talk_cooldown_minutes;
        refresh_cooldown(&mut world, pair.a, now, cooldown);
        refresh_cooldown(&mut world, pair.b, now, cooldown);
        world
            .npc(pair.a)
            .zip(world.npc(pair.b))
            .map(|(a, b)| {
                (
                    (a.id, a.name.clone(), a.routine.area),
                    (b.id, b.name.clone(), b.routine.area),
                )
            })
    };
    if spoke == 0 {
        return;
    }

    let Some((a, b)) = recorded else {
        return;
    };
    for ((owner, _, area), (other_id, other_name, _)) in [(a.clone(), b.clone()), (b, a)] {
        let record = MemoryRecord {
            owner,
            kind: "banter".to_string(),
            content: format!("Passed the time with {other_name} near the {area}."),
            importance: 1,
            tags: vec![other_id.to_uuid().to_string(), other_name],
            created_at: app.clock.now(),
        };
        if let Err(err) = app.store.append_memory(record).await {
            warn!(error = %err, "banter memory write failed");
        }
    }
}

fn refresh_cooldown(world: &mut World, npc: NpcId, now: Moment, cooldown: u32) {
    if let Some(npc) = world.npc_mut(npc) {
        npc.refresh_talk_cooldown(now, cooldown);
    }
}
