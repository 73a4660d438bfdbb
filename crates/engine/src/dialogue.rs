//! Player-NPC dialogue orchestration: opening lines, chunk delivery,
//! replies, and the end-of-talk relationship assessment. Generation happens
//! outside the world lock; every resume re-checks that the conversation is
//! still standing.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use tidemill_domain::{
    ConnectionId, DialogueState, MissionEvent, Moment, NpcId, PlayerId, Role,
};
use tidemill_shared::ServerMessage;

use crate::app::App;
use crate::commands::note_mission_event;
use crate::fallback;
use crate::infrastructure::ports::{GeneratedLine, LineRequest, MemoryRecord, ShiftRequest};

/// How close a player must stand to open a conversation.
pub const INTERACT_RADIUS: f32 = 64.0;

/// Memory lines handed to the generator per request.
const MEMORY_LIMIT: u32 = 6;

/// Transcript lines kept per dialogue for the shift assessment.
const TRANSCRIPT_KEPT: usize = 12;

/// Everything generation needs, captured under the lock so no borrow
/// outlives it.
struct TalkContext {
    npc_id: NpcId,
    npc_name: String,
    npc_role: Role,
    npc_traits: Vec<String>,
    player_uuid: Uuid,
    player_name: String,
    weather: String,
    rumor: String,
    arc_stage: Option<String>,
    day: u32,
}

fn push_transcript(app: &App, player: PlayerId, line: String) {
    let mut entry = app.transcripts.entry(player).or_default();
    entry.push(line);
    if entry.len() > TRANSCRIPT_KEPT {
        entry.remove(0);
    }
}

fn take_transcript(app: &App, player: PlayerId) -> Vec<String> {
    app.transcripts
        .remove(&player)
        .map(|(_, lines)| lines)
        .unwrap_or_default()
}

fn take_pending_report(app: &App, npc: NpcId, player: PlayerId) -> Option<String> {
    app.pending_reports
        .remove(&(npc, player))
        .map(|(_, report)| report)
}

async fn dialogue_event(
    app: &App,
    ctx: &TalkContext,
    text: String,
    emotion: String,
    has_more_chunks: bool,
    turn: u32,
) {
    app.connections
        .broadcast(ServerMessage::DialogueEvent {
            speaker: ctx.npc_id.to_uuid(),
            speaker_name: ctx.npc_name.clone(),
            target: ctx.player_uuid,
            target_name: ctx.player_name.clone(),
            text,
            emotion,
            has_more_chunks,
            turn,
        })
        .await;
}

// =============================================================================
// Interact
// =============================================================================

/// Handle an interact tap on an NPC: open a conversation, or pull the next
/// chunk of one already running.
pub async fn interact(app: &Arc<App>, conn: ConnectionId, npc_uuid: Uuid) {
    let Some(player_id) = app.connections.player_of(conn).await else {
        app.connections
            .send_to_conn(
                conn,
                ServerMessage::Feedback {
                    text: "Join the town before talking to anyone.".to_string(),
                },
            )
            .await;
        return;
    };
    let npc_id = NpcId::from_uuid(npc_uuid);

    // Phase one, under the lock: resolve the situation and capture context.
    enum Plan {
        Deliver {
            npc_name: String,
            player_name: String,
            chunk: String,
            has_more: bool,
            turn: u32,
        },
        Feedback(String),
        Open {
            ctx: TalkContext,
            report: Option<String>,
        },
        Nothing,
    }

    let plan = {
        let mut world = app.world.write().await;
        let Some((npc_name, npc_role, npc_traits, npc_pos, npc_on_errand)) = world
            .npc(npc_id)
            .map(|n| (n.name.clone(), n.role, n.traits.clone(), n.pos, n.is_busy_with_task()))
        else {
            drop(world);
            app.connections
                .send_to_conn(
                    conn,
                    ServerMessage::Feedback {
                        text: "No one by that name around here.".to_string(),
                    },
                )
                .await;
            return;
        };
        let npc_busy_elsewhere = app.busy_npcs(&world).contains(&npc_id)
            && !world
                .player(player_id)
                .is_some_and(|p| p.dialogue.talking_with() == Some(npc_id));
        let weather = world.weather.to_string();
        let rumor = world.rumor_of_the_day.clone();
        let arc_stage = world
            .story_arc
            .as_ref()
            .and_then(|a| a.current_stage())
            .map(str::to_string);
        let day = world.clock.day();

        let Some(player) = world.player_mut(player_id) else {
            return;
        };
        let player_name = player.name.clone();

        match player.dialogue.talking_with() {
            Some(current) if current == npc_id => {
                if player.dialogue.is_awaiting_reply() {
                    Plan::Feedback(format!("{npc_name} is waiting on your answer."))
                } else {
                    let turn = match &player.dialogue {
                        DialogueState::Talking { turns, .. } => *turns,
                        DialogueState::Idle => 0,
                    };
                    match player.next_chunk() {
                        Some(chunk) => {
                            let has_more = matches!(
                                &player.dialogue,
                                DialogueState::Talking { chunks, .. } if !chunks.is_empty()
                            );
                            Plan::Deliver {
                                npc_name,
                                player_name,
                                chunk,
                                has_more,
                                turn,
                            }
                        }
                        None => Plan::Nothing,
                    }
                }
            }
            Some(_) => Plan::Feedback("Finish the talk you're in first.".to_string()),
            None => {
                if npc_on_errand {
                    Plan::Feedback(format!("{npc_name} is out on an errand right now."))
                } else if npc_busy_elsewhere {
                    Plan::Feedback(format!("{npc_name} is in the middle of a conversation."))
                } else if npc_pos.distance(player.pos) > INTERACT_RADIUS {
                    Plan::Feedback(format!("{npc_name} is too far away."))
                } else {
                    let ctx = TalkContext {
                        npc_id,
                        npc_name,
                        npc_role,
                        npc_traits,
                        player_uuid: player_id.to_uuid(),
                        player_name,
                        weather,
                        rumor,
                        arc_stage,
                        day,
                    };
                    let report = take_pending_report(app, npc_id, player_id);
                    Plan::Open { ctx, report }
                }
            }
        }
    };

    match plan {
        Plan::Nothing => {}
        Plan::Feedback(text) => {
            app.connections
                .send_to_conn(conn, ServerMessage::Feedback { text })
                .await;
        }
        Plan::Deliver {
            npc_name,
            player_name,
            chunk,
            has_more,
            turn,
        } => {
            app.connections
                .broadcast(ServerMessage::DialogueEvent {
                    speaker: npc_uuid,
                    speaker_name: npc_name,
                    target: player_id.to_uuid(),
                    target_name: player_name,
                    text: chunk,
                    emotion: "neutral".to_string(),
                    has_more_chunks: has_more,
                    turn,
                })
                .await;
        }
        Plan::Open { ctx, report } => {
            open_conversation(app, conn, player_id, ctx, report).await;
        }
    }
}

async fn open_conversation(
    app: &Arc<App>,
    conn: ConnectionId,
    player_id: PlayerId,
    ctx: TalkContext,
    report: Option<String>,
) {
    // Anything here may suspend; the world lock is not held.
    let generated = if let Some(report) = report {
        GeneratedLine {
            line: format!("About that errand of yours. {report}"),
            emotion: "earnest".to_string(),
            memory_note: None,
        }
    } else {
        opening_line(app, &ctx).await
    };

    // Optimistic resume: the player may have left, slept, or started another
    // conversation while we were generating.
    let outcome = {
        let mut world = app.world.write().await;
        let now = world.now();
        let still_close = world
            .npc(ctx.npc_id)
            .zip(world.player(player_id))
            .is_some_and(|(npc, player)| {
                player.connected
                    && !player.in_dialogue()
                    && player.is_awake()
                    && npc.pos.distance(player.pos) <= INTERACT_RADIUS * 1.5
            });
        if !still_close {
            None
        } else {
            let cooldown = app.config.talk_cooldown_minutes;
            if let Some(npc) = world.npc_mut(ctx.npc_id) {
                npc.refresh_talk_cooldown(now, cooldown);
            }
            let mut feedback = Vec::new();
            let event = MissionEvent::TalkedToNpc {
                npc: ctx.npc_id,
                name: ctx.npc_name.clone(),
                role: ctx.npc_role,
            };
            feedback.extend(note_mission_event(&mut world, player_id, &event));
            let chunkinfo = world.player_mut(player_id).and_then(|player| {
                player.start_dialogue(ctx.npc_id, &generated.line);
                let chunk = player.next_chunk()?;
                let has_more = matches!(
                    &player.dialogue,
                    DialogueState::Talking { chunks, .. } if !chunks.is_empty()
                );
                Some((chunk, has_more))
            });
            Some((chunkinfo, feedback))
        }
    };

    let Some((chunkinfo, feedback)) = outcome else {
        return;
    };

    // Player dialogue takes the floor; any ambient banter winds down.
    app.cancel_chat.cancel();

    push_transcript(app, player_id, format!("{}: {}", ctx.npc_name, generated.line));

    if let Some(note) = generated.memory_note.as_ref() {
        remember(app, &ctx, "interaction", note.clone(), 2).await;
    }

    if let Some((chunk, has_more)) = chunkinfo {
        dialogue_event(app, &ctx, chunk, generated.emotion.clone(), has_more, 0).await;
    }
    for text in feedback {
        app.connections
            .send_to_conn(conn, ServerMessage::Feedback { text })
            .await;
    }
    app.push_view_to(player_id).await;
}

/// First contact gets a canned introduction and an intro memory; known pairs
/// get a generated opener, rate-limited and fallback-backed.
async fn opening_line(
    app: &Arc<App>,
    ctx: &TalkContext,
) -> GeneratedLine {
    let first_contact = match app
        .store
        .pair_memories(ctx.npc_id, ctx.player_uuid, 1)
        .await
    {
        Ok(memories) => memories.is_empty(),
        Err(err) => {
            warn!(npc = %ctx.npc_name, error = %err, "pair memory lookup failed");
            false
        }
    };

    if first_contact {
        let line = {
            let world = app.world.read().await;
            world
                .npc(ctx.npc_id)
                .map(|npc| fallback::canned_intro(npc, &ctx.player_name))
        };
        if let Some(line) = line {
            let content = format!("First met {}.", ctx.player_name);
            remember(app, ctx, "intro", content, 3).await;
            return line;
        }
    }

    generate_line(app, ctx, 0, String::new()).await
}

/// Ask the generator for a line, gated per pair+day+turn, falling back to
/// the canned pool on denial or failure.
async fn generate_line(
    app: &Arc<App>,
    ctx: &TalkContext,
    turn: u32,
    prompt: String,
) -> GeneratedLine {
    let gate_key = format!(
        "line:{}:{}:{}:{}",
        ctx.npc_id, ctx.player_uuid, ctx.day, turn
    );
    if !app.talk_gate.try_acquire(&gate_key).await {
        return canned(app, ctx, turn).await;
    }

    let memories = match app
        .store
        .pair_memories(ctx.npc_id, ctx.player_uuid, MEMORY_LIMIT)
        .await
    {
        Ok(records) => records.into_iter().map(|m| m.content).collect(),
        Err(err) => {
            warn!(npc = %ctx.npc_name, error = %err, "pair memory lookup failed");
            Vec::new()
        }
    };

    let prompt = if prompt.is_empty() {
        let followup_key = format!("follow:{}:{}", ctx.npc_id, ctx.player_uuid);
        match app.followup_cache.get(&followup_key).await {
            Some(hint) => format!("Last time the talk ended on: {hint}"),
            None => String::new(),
        }
    } else {
        prompt
    };

    let request = LineRequest {
        speaker_name: ctx.npc_name.clone(),
        speaker_role: ctx.npc_role.to_string(),
        speaker_traits: ctx.npc_traits.clone(),
        listener_name: ctx.player_name.clone(),
        listener_is_player: true,
        prompt,
        turn,
        weather: ctx.weather.clone(),
        rumor: ctx.rumor.clone(),
        arc_stage: ctx.arc_stage.clone(),
        memories,
    };

    match app.line_gen.generate_line(request).await {
        Ok(line) => line,
        Err(err) => {
            warn!(npc = %ctx.npc_name, error = %err, "line generation failed, using canned line");
            canned(app, ctx, turn).await
        }
    }
}

async fn canned(
    app: &Arc<App>,
    ctx: &TalkContext,
    turn: u32,
) -> GeneratedLine {
    let world = app.world.read().await;
    match world.npc(ctx.npc_id) {
        Some(npc) => fallback::canned_line(npc, &ctx.player_name, turn, world.weather),
        None => GeneratedLine {
            line: "...".to_string(),
            emotion: "neutral".to_string(),
            memory_note: None,
        },
    }
}

async fn remember(app: &Arc<App>, ctx: &TalkContext, kind: &str, content: String, importance: i32) {
    let record = MemoryRecord {
        owner: ctx.npc_id,
        kind: kind.to_string(),
        content,
        importance,
        tags: vec![ctx.player_uuid.to_string(), ctx.player_name.clone()],
        created_at: app.clock.now(),
    };
    if let Err(err) = app.store.append_memory(record).await {
        warn!(npc = %ctx.npc_name, error = %err, "memory write failed");
    }
}

// =============================================================================
// Replies
// =============================================================================

/// Treat a chat message as the player's dialogue reply. Returns `false` when
/// the player isn't mid-dialogue awaiting one, so the caller can route the
/// text as ordinary chat.
pub async fn player_reply(app: &Arc<App>, player_id: PlayerId, text: &str) -> bool {
    let ctx = {
        let world = app.world.read().await;
        let Some(player) = world.player(player_id) else {
            return false;
        };
        if !player.dialogue.is_awaiting_reply() {
            return false;
        }
        let Some(npc_id) = player.dialogue.talking_with() else {
            return false;
        };
        let Some(npc) = world.npc(npc_id) else {
            return false;
        };
        TalkContext {
            npc_id,
            npc_name: npc.name.clone(),
            npc_role: npc.role,
            npc_traits: npc.traits.clone(),
            player_uuid: player_id.to_uuid(),
            player_name: player.name.clone(),
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

    push_transcript(app, player_id, format!("{}: {}", ctx.player_name, text));

    let turn = {
        let world = app.world.read().await;
        match world.player(player_id).map(|p| &p.dialogue) {
            Some(DialogueState::Talking { turns, .. }) => *turns + 1,
            _ => return true,
        }
    };
    let generated = generate_line(app, &ctx, turn, text.to_string()).await;

    // Resume: the player may have wandered off or dropped mid-generation.
    let delivery = {
        let mut world = app.world.write().await;
        let now = world.now();
        let cooldown = app.config.talk_cooldown_minutes;
        if let Some(npc) = world.npc_mut(ctx.npc_id) {
            npc.refresh_talk_cooldown(now, cooldown);
        }
        world.player_mut(player_id).and_then(|player| {
            if player.dialogue.talking_with() != Some(ctx.npc_id) || !player.connected {
                return None;
            }
            player.queue_reply_line(&generated.line);
            let chunk = player.next_chunk()?;
            let has_more = matches!(
                &player.dialogue,
                DialogueState::Talking { chunks, .. } if !chunks.is_empty()
            );
            let turn = match &player.dialogue {
                DialogueState::Talking { turns, .. } => *turns,
                DialogueState::Idle => 0,
            };
            Some((chunk, has_more, turn))
        })
    };

    if let Some((chunk, has_more, turn)) = delivery {
        push_transcript(app, player_id, format!("{}: {}", ctx.npc_name, generated.line));
        if let Some(note) = generated.memory_note.as_ref() {
            remember(app, &ctx, "interaction", note.clone(), 2).await;
        }
        dialogue_event(app, &ctx, chunk, generated.emotion.clone(), has_more, turn).await;
    }
    true
}

// =============================================================================
// Ending
// =============================================================================

/// End any dialogue the player is in and assess the relationship shift.
/// Safe to call when idle.
pub async fn end_for_player(app: &Arc<App>, player_id: PlayerId) {
    let ended = {
        let mut world = app.world.write().await;
        let now = world.now();
        let npc_id = world
            .player_mut(player_id)
            .and_then(|player| player.end_dialogue());
        npc_id.and_then(|npc_id| {
            world.npc(npc_id).map(|npc| {
                (
                    npc_id,
                    npc.name.clone(),
                    npc.role,
                    world
                        .player(player_id)
                        .map(|p| p.name.clone())
                        .unwrap_or_default(),
                    now,
                )
            })
        })
    };

    let Some((npc_id, npc_name, npc_role, player_name, now)) = ended else {
        return;
    };

    let transcript = take_transcript(app, player_id);
    if let Some(last) = transcript.last() {
        let followup_key = format!("follow:{}:{}", npc_id, player_id.to_uuid());
        app.followup_cache
            .insert(followup_key, last.clone())
            .await;
    }

    let delta = assess_shift(
        app,
        npc_id,
        &npc_name,
        npc_role,
        player_id,
        &player_name,
        transcript,
        now,
    )
    .await;
    if delta != 0 {
        apply_shift(app, &npc_name, npc_role, player_id, delta, now).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn assess_shift(
    app: &Arc<App>,
    npc_id: NpcId,
    npc_name: &str,
    npc_role: Role,
    player_id: PlayerId,
    player_name: &str,
    transcript: Vec<String>,
    now: Moment,
) -> i8 {
    if transcript.is_empty() {
        return 0;
    }
    let cache_key = format!("shift:{}:{}:{}", npc_id, player_id, now.day);
    if let Some(delta) = app.shift_cache.get(&cache_key).await {
        return delta;
    }
    let request = ShiftRequest {
        npc_name: npc_name.to_string(),
        npc_role: npc_role.to_string(),
        player_name: player_name.to_string(),
        transcript,
    };
    let delta = match app.line_gen.assess_shift(request).await {
        Ok(shift) => shift.delta.clamp(-2, 2),
        Err(err) => {
            warn!(npc = %npc_name, error = %err, "shift assessment failed");
            0
        }
    };
    app.shift_cache.insert(cache_key, delta).await;
    delta
}

async fn apply_shift(
    app: &Arc<App>,
    npc_name: &str,
    npc_role: Role,
    player_id: PlayerId,
    delta: i8,
    now: Moment,
) {
    {
        let mut world = app.world.write().await;
        world.reputation.apply(
            player_id,
            Some(npc_role),
            delta as i16,
            format!("after a talk with {npc_name}"),
            now,
        );
    }
    if let Err(err) = app
        .store
        .record_relation_delta(
            player_id.to_uuid(),
            npc_name.to_string(),
            delta as i32,
            "end-of-talk assessment".to_string(),
            app.clock.now(),
        )
        .await
    {
        warn!(npc = %npc_name, error = %err, "relation delta write failed");
    }
}
