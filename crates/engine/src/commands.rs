//! Client command dispatch: join, movement, sleep, chat (replies, NPC
//! orders, local talk), and farm work. Commands answer through the push
//! channel only.

use std::sync::Arc;

use tracing::info;

use tidemill_domain::{
    apply_action, apply_event, chain_mission, Area, ArcStep, ConnectionId, CropKind, Directive,
    DirectiveKind, FarmAction, MissionAdvance, MissionEvent, Moment, NpcId, NpcTask, PlayerId,
    PlayerSession, Vec2, World, FARM_REACH, PLOTS_PER_FARM,
};
use tidemill_shared::{ClientCommand, ServerMessage};

use crate::app::App;
use crate::dialogue;
use crate::infrastructure::ports::RandomPort;

/// Hearing range for orders that don't name an NPC.
const ORDER_RADIUS: f32 = 160.0;

/// Default standoff for "keep your distance".
const KEEP_DISTANCE_PREFERRED: f32 = 96.0;

/// Observation length when the order doesn't give one.
const OBSERVE_DEFAULT_MINUTES: u32 = 60;

/// Reputation granted on mission completion, town-wide and with the giver's
/// trade.
const MISSION_GLOBAL_REP: i16 = 4;
const MISSION_ROLE_REP: i16 = 6;

const GUEST_NAMES: [&str; 8] = [
    "Wren", "Ash", "Sparrow", "Moss", "Finch", "Briar", "Sage", "Rowan",
];

pub async fn handle(app: &Arc<App>, conn: ConnectionId, cmd: ClientCommand) {
    match cmd {
        ClientCommand::Join { name, gender } => join(app, conn, name, gender).await,
        ClientCommand::Move { x, y } => move_to(app, conn, Vec2::new(x, y)).await,
        ClientCommand::ToggleSleep => toggle_sleep(app, conn).await,
        ClientCommand::Chat { text } => chat(app, conn, text).await,
        ClientCommand::Interact { npc } => dialogue::interact(app, conn, npc).await,
        ClientCommand::FarmAction { plot, action, crop } => {
            farm_action(app, conn, plot, action, crop).await
        }
    }
}

async fn require_player(app: &Arc<App>, conn: ConnectionId) -> Option<PlayerId> {
    let player = app.connections.player_of(conn).await;
    if player.is_none() {
        app.connections
            .send_to_conn(
                conn,
                ServerMessage::Feedback {
                    text: "Join the town first.".to_string(),
                },
            )
            .await;
    }
    player
}

// =============================================================================
// Join
// =============================================================================

fn guest_name(random: &dyn RandomPort) -> String {
    let base = GUEST_NAMES[random.draw(GUEST_NAMES.len() as u32) as usize];
    format!("{base}-{:02}", random.draw(100))
}

async fn join(app: &Arc<App>, conn: ConnectionId, name: String, gender: Option<String>) {
    let name = name.trim().to_string();

    enum Outcome {
        AlreadyOnline(String),
        Admitted {
            player_id: PlayerId,
            display: String,
            resumed: bool,
        },
    }

    let outcome = {
        let mut world = app.world.write().await;
        if name.is_empty() {
            // Nameless visitors get a throwaway guest identity.
            let display = guest_name(app.random.as_ref());
            let player_id = PlayerId::new();
            let spawn = Area::TownSquare.bounds().center();
            let mut session = PlayerSession::new(player_id, display.clone(), false, spawn);
            session.gender = gender;
            world.players.insert(player_id, session);
            world.ensure_farm(player_id);
            Outcome::Admitted {
                player_id,
                display,
                resumed: false,
            }
        } else if let Some(existing) = world.registered_player_by_name(&name) {
            if existing.connected {
                Outcome::AlreadyOnline(existing.name.clone())
            } else {
                let player_id = existing.player_id;
                let display = existing.name.clone();
                if let Some(player) = world.player_mut(player_id) {
                    player.connected = true;
                    player.sleeping = false;
                    if gender.is_some() {
                        player.gender = gender;
                    }
                }
                world.ensure_farm(player_id);
                world.log_event(format!("{display} is back in town."));
                Outcome::Admitted {
                    player_id,
                    display,
                    resumed: true,
                }
            }
        } else {
            let player_id = PlayerId::new();
            let spawn = Area::TownSquare.bounds().center();
            let mut session = PlayerSession::new(player_id, name.clone(), true, spawn);
            session.gender = gender;
            world.players.insert(player_id, session);
            world.ensure_farm(player_id);
            world.log_event(format!("{name} arrived in town."));
            Outcome::Admitted {
                player_id,
                display: name,
                resumed: false,
            }
        }
    };

    match outcome {
        Outcome::AlreadyOnline(display) => {
            app.connections
                .send_to_conn(
                    conn,
                    ServerMessage::Feedback {
                        text: format!("Someone is already in town as {display}."),
                    },
                )
                .await;
        }
        Outcome::Admitted {
            player_id,
            // Renamed binding: a local named `display` collides with the
            // `use tracing::field::display` inside tracing's event macros.
            display: display_name,
            resumed,
        } => {
            app.connections.bind_player(conn, player_id).await;
            info!(player = %display_name, resumed, "player joined");
            app.connections
                .send_to_conn(
                    conn,
                    ServerMessage::Joined {
                        player_id: player_id.to_uuid(),
                        name: display_name.clone(),
                        resumed,
                    },
                )
                .await;
            app.connections
                .broadcast_except(
                    player_id,
                    ServerMessage::PlayerJoined {
                        player_id: player_id.to_uuid(),
                        name: display_name,
                    },
                )
                .await;
            app.push_view_to(player_id).await;
        }
    }
}

// =============================================================================
// Movement and sleep
// =============================================================================

async fn move_to(app: &Arc<App>, conn: ConnectionId, target: Vec2) {
    let Some(player_id) = require_player(app, conn).await else {
        return;
    };
    let target = target.clamp_to_world();

    let (wandered, feedback) = {
        let mut world = app.world.write().await;
        let asleep = match world.player_mut(player_id) {
            Some(player) if player.sleeping => true,
            Some(player) => {
                player.pos = target;
                false
            }
            None => return,
        };
        if asleep {
            drop(world);
            app.connections
                .send_to_conn(
                    conn,
                    ServerMessage::Feedback {
                        text: "You're asleep. Wake up first.".to_string(),
                    },
                )
                .await;
            return;
        }
        let wandered = world
            .player(player_id)
            .is_some_and(|p| p.wandered_off());

        let mut feedback =
            note_mission_event(&mut world, player_id, &MissionEvent::Moved { pos: target });
        if let Some(area) = Area::containing(target) {
            feedback.extend(note_mission_event(
                &mut world,
                player_id,
                &MissionEvent::VisitedArea { area },
            ));
        }
        (wandered, feedback)
    };

    // Drifting past the anchor ends the talk, with the usual assessment.
    if wandered {
        dialogue::end_for_player(app, player_id).await;
    }
    for text in feedback {
        app.connections
            .send_to_conn(conn, ServerMessage::Feedback { text })
            .await;
    }
    app.push_view_to(player_id).await;
}

async fn toggle_sleep(app: &Arc<App>, conn: ConnectionId) {
    let Some(player_id) = require_player(app, conn).await else {
        return;
    };

    let in_dialogue = {
        let world = app.world.read().await;
        world.player(player_id).is_some_and(|p| p.in_dialogue())
    };
    if in_dialogue {
        dialogue::end_for_player(app, player_id).await;
    }

    let now_sleeping = {
        let mut world = app.world.write().await;
        match world.player_mut(player_id) {
            Some(player) => {
                player.sleeping = !player.sleeping;
                Some(player.sleeping)
            }
            None => None,
        }
    };

    if let Some(sleeping) = now_sleeping {
        let text = if sleeping {
            "You tuck in. The town will carry on without you.".to_string()
        } else {
            "You're up and about again.".to_string()
        };
        app.connections
            .send_to_conn(conn, ServerMessage::Feedback { text })
            .await;
        app.push_view_to(player_id).await;
    }
}

// =============================================================================
// Chat: replies, orders, local talk
// =============================================================================

async fn chat(app: &Arc<App>, conn: ConnectionId, text: String) {
    let text = text.trim().to_string();
    if text.is_empty() {
        return;
    }
    let Some(player_id) = require_player(app, conn).await else {
        return;
    };

    // Mid-dialogue, chat is the player's reply.
    if dialogue::player_reply(app, player_id, &text).await {
        app.push_view_to(player_id).await;
        return;
    }

    // A recognized order goes to the named or nearest NPC.
    if let Some(feedback) = give_order(app, player_id, &text).await {
        for line in feedback {
            app.connections
                .send_to_conn(conn, ServerMessage::Feedback { text: line })
                .await;
        }
        app.push_view_to(player_id).await;
        return;
    }

    // Otherwise it's town chat.
    let speaker = {
        let world = app.world.read().await;
        world
            .player(player_id)
            .map(|p| (p.player_id.to_uuid(), p.name.clone()))
    };
    if let Some((player_uuid, name)) = speaker {
        app.connections
            .broadcast(ServerMessage::PlayerChat {
                player_id: player_uuid,
                name,
                text,
            })
            .await;
    }
}

/// A parsed spoken order, before NPC resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Order {
    Follow,
    Hold,
    KeepDistance,
    GoTo(Area),
    Patrol(Area),
    TalkTask { target: String, topic: String },
    Observe {
        area: Area,
        start_minute: Option<u32>,
        duration_minutes: u32,
    },
}

fn parse_area_name(text: &str) -> Option<Area> {
    let t = text.trim().trim_end_matches('.');
    let t = t.strip_prefix("the ").unwrap_or(t);
    Area::parse(t)
}

fn parse_clock(text: &str) -> Option<u32> {
    let (h, m) = text.trim().split_once(':')?;
    let hour: u32 = h.trim().parse().ok()?;
    let minute: u32 = m.trim().parse().ok()?;
    if hour < 24 && minute < 60 {
        Some(hour * 60 + minute)
    } else {
        None
    }
}

/// Recognize a spoken order, with an optional leading addressee
/// ("Odo, follow me"). Returns `None` for plain chat.
pub fn parse_order(text: &str) -> Option<(Option<String>, Order)> {
    let (addressee, rest) = match text.split_once(',') {
        Some((head, tail))
            if !head.trim().is_empty()
                && head.split_whitespace().count() <= 2
                && !tail.trim().is_empty() =>
        {
            (Some(head.trim().to_string()), tail.trim())
        }
        _ => (None, text.trim()),
    };
    let lower = rest.trim_end_matches(['.', '!']).to_lowercase();

    let order = match lower.as_str() {
        "follow me" | "follow" | "come with me" => Order::Follow,
        "wait here" | "hold" | "stay here" | "stay" | "stop" => Order::Hold,
        "keep your distance" | "keep back" | "back off" | "give me space" => Order::KeepDistance,
        _ => {
            if let Some(rest) = lower.strip_prefix("go to ") {
                Order::GoTo(parse_area_name(rest)?)
            } else if let Some(rest) = lower.strip_prefix("patrol ") {
                Order::Patrol(parse_area_name(rest)?)
            } else if let Some(rest) = lower.strip_prefix("talk to ") {
                let (target, topic) = rest.split_once(" about ")?;
                let target = target.trim();
                let topic = topic.trim();
                if target.is_empty() || topic.is_empty() {
                    return None;
                }
                Order::TalkTask {
                    target: target.to_string(),
                    topic: topic.to_string(),
                }
            } else if let Some(rest) = lower.strip_prefix("observe ") {
                let mut rest = rest.trim();
                let mut duration_minutes = OBSERVE_DEFAULT_MINUTES;
                if let Some((head, tail)) = rest.split_once(" for ") {
                    let count: u32 = tail.split_whitespace().next()?.parse().ok()?;
                    duration_minutes = count.clamp(5, 240);
                    rest = head.trim();
                }
                let mut start_minute = None;
                if let Some((head, tail)) = rest.split_once(" at ") {
                    start_minute = Some(parse_clock(tail)?);
                    rest = head.trim();
                }
                Order::Observe {
                    area: parse_area_name(rest)?,
                    start_minute,
                    duration_minutes,
                }
            } else {
                return None;
            }
        }
    };
    Some((addressee, order))
}

/// Route a spoken order to an NPC. `None` means the text wasn't an order and
/// should fall through to chat.
async fn give_order(app: &Arc<App>, player_id: PlayerId, text: &str) -> Option<Vec<String>> {
    let (addressee, order) = parse_order(text)?;

    let mut world = app.world.write().await;
    let now = world.now();
    let player_pos = world.player(player_id)?.pos;

    let npc_id = match &addressee {
        Some(name) => match world.npc_by_name(name) {
            Some(npc) => npc.id,
            // The comma phrase named nobody real, so treat it as chat.
            None => return None,
        },
        None => match world.nearest_npc(player_pos) {
            Some((npc, dist)) if dist <= ORDER_RADIUS => npc.id,
            _ => {
                return Some(vec![
                    "No one close enough heard that.".to_string(),
                ])
            }
        },
    };
    let npc_name = world.npc(npc_id)?.name.clone();

    let feedback = match order {
        Order::Follow => {
            set_directive(&mut world, npc_id, DirectiveKind::FollowPlayer { player: player_id })
        }
        Order::Hold => set_directive(&mut world, npc_id, DirectiveKind::Hold),
        Order::KeepDistance => set_directive(
            &mut world,
            npc_id,
            DirectiveKind::KeepDistance {
                player: player_id,
                preferred: KEEP_DISTANCE_PREFERRED,
            },
        ),
        Order::GoTo(area) => set_directive(
            &mut world,
            npc_id,
            DirectiveKind::GoToPoint {
                point: area.bounds().center(),
            },
        ),
        Order::Patrol(area) => {
            set_directive(&mut world, npc_id, DirectiveKind::PatrolArea { area })
        }
        Order::TalkTask { target, topic } => {
            let Some(target_npc) = world.npc_by_name(&target) else {
                return Some(vec![format!("There's no {target} in town.")]);
            };
            if target_npc.id == npc_id {
                return Some(vec![format!("{npc_name} can hardly talk to themselves.")]);
            }
            let target_id = target_npc.id;
            let target_name = target_npc.name.clone();
            let task = NpcTask::TalkToNpc {
                target: target_id,
                topic,
                requested_by: player_id,
            };
            let accepted = format!("{npc_name} will go have a word with {target_name}.");
            queue_task(&mut world, npc_id, &npc_name, task, accepted)
        }
        Order::Observe {
            area,
            start_minute,
            duration_minutes,
        } => {
            let start = start_minute.map(|m| {
                if m > now.minute {
                    Moment::new(now.day, m)
                } else {
                    Moment::new(now.day + 1, m)
                }
            });
            let task = NpcTask::ObserveArea {
                area,
                start,
                duration_minutes,
                requested_by: player_id,
            };
            let accepted = match start {
                Some(at) => format!(
                    "{npc_name} will watch the {area} from {:02}:{:02}.",
                    at.minute / 60,
                    at.minute % 60
                ),
                None => format!("{npc_name} will go watch the {area}."),
            };
            queue_task(&mut world, npc_id, &npc_name, task, accepted)
        }
    };
    Some(feedback)
}

fn set_directive(world: &mut World, npc_id: NpcId, kind: DirectiveKind) -> Vec<String> {
    let directive = Directive::new(kind, None);
    let described = directive.describe();
    match world.npc_mut(npc_id) {
        Some(npc) => {
            let name = npc.name.clone();
            npc.set_directive(directive);
            vec![format!("{name} is now {described}.")]
        }
        None => Vec::new(),
    }
}

fn queue_task(
    world: &mut World,
    npc_id: NpcId,
    npc_name: &str,
    task: NpcTask,
    accepted: String,
) -> Vec<String> {
    match world.npc_mut(npc_id) {
        Some(npc) => match npc.push_task(task) {
            Ok(()) => vec![accepted],
            Err(_) => vec![format!("{npc_name} has enough on their plate already.")],
        },
        None => Vec::new(),
    }
}

// =============================================================================
// Farming
// =============================================================================

async fn farm_action(
    app: &Arc<App>,
    conn: ConnectionId,
    plot: usize,
    action: String,
    crop: Option<String>,
) {
    let Some(player_id) = require_player(app, conn).await else {
        return;
    };

    let action = match action.as_str() {
        "sow" => match crop.as_deref().and_then(CropKind::parse) {
            Some(kind) => FarmAction::Sow(kind),
            None => {
                app.connections
                    .send_to_conn(
                        conn,
                        ServerMessage::Feedback {
                            text: "Name a seed to sow: turnip, potato, carrot, or pumpkin."
                                .to_string(),
                        },
                    )
                    .await;
                return;
            }
        },
        "water" => FarmAction::Water,
        "harvest" => FarmAction::Harvest,
        other => {
            app.connections
                .send_to_conn(
                    conn,
                    ServerMessage::Feedback {
                        text: format!("No such farm action: {other}."),
                    },
                )
                .await;
            return;
        }
    };

    let feedback = {
        let mut world = app.world.write().await;
        let now = world.now();
        let Some(player_pos) = world.player(player_id).map(|p| p.pos) else {
            return;
        };
        let economy = world.economy.clone();
        let market = |kind: CropKind| economy.price_of(kind);
        let mut draw = |n: u32| app.random.draw(n);

        let farm = world.ensure_farm(player_id);
        if plot < PLOTS_PER_FARM && farm.plot_position(plot).distance(player_pos) > FARM_REACH {
            vec!["You're too far from that plot to work it.".to_string()]
        } else {
            match apply_action(farm, plot, action, now, &market, &mut draw) {
                Ok(outcome) => {
                    let mut feedback = vec![outcome.message];
                    if let Some(report) = outcome.harvested {
                        feedback.extend(note_mission_event(
                            &mut world,
                            player_id,
                            &MissionEvent::Harvested {
                                count: report.count,
                            },
                        ));
                    }
                    feedback
                }
                Err(err) => vec![err.to_string()],
            }
        }
    };

    for text in feedback {
        app.connections
            .send_to_conn(conn, ServerMessage::Feedback { text })
            .await;
    }
    app.push_view_to(player_id).await;
}

// =============================================================================
// Mission bookkeeping
// =============================================================================

fn scaled_reward(base: u32, multiplier: f32) -> u32 {
    (base as f32 * multiplier).round() as u32
}

/// Feed one gameplay event into the player's missions and settle every
/// completion it caused: coins, reputation, the story arc, and the town log.
/// Returns feedback lines for the acting player.
pub(crate) fn note_mission_event(
    world: &mut World,
    player_id: PlayerId,
    event: &MissionEvent,
) -> Vec<String> {
    let town = world.town_mission.clone();
    let now = world.now();
    let Some(player) = world.player_mut(player_id) else {
        return Vec::new();
    };
    let player_name = player.name.clone();
    let advances = apply_event(&mut player.missions, event, town.as_ref());
    if advances.is_empty() {
        return Vec::new();
    }

    let multiplier = world.economy.reward_multiplier;
    let mut feedback = Vec::new();
    for advance in advances {
        let mission = advance.mission().clone();
        // Dynamic rewards were already scaled when the draft was normalized.
        let coins = match &advance {
            MissionAdvance::Dynamic { .. } => mission.reward_coins,
            _ => scaled_reward(mission.reward_coins, multiplier),
        };
        world.ensure_farm(player_id).coins += coins;
        world.reputation.reward(
            player_id,
            mission.giver_role,
            MISSION_GLOBAL_REP,
            MISSION_ROLE_REP,
            format!("finished \"{}\"", mission.title),
            now,
        );
        if let MissionAdvance::Dynamic { .. } = &advance {
            *world.completed_dynamic.entry(player_id).or_insert(0) += 1;
        }
        world.log_event(format!("{player_name} completed \"{}\".", mission.title));

        // Every completion pushes the town's story forward a step.
        let step = world.story_arc.as_mut().map(|arc| arc.advance());
        match step {
            Some(ArcStep::NowAt(stage)) => {
                world.log_event(format!("Word around town: {stage}"));
            }
            Some(ArcStep::Completed) => {
                world.log_event("The tale that had the town talking has run its course.");
            }
            _ => {}
        }

        feedback.push(format!(
            "Mission complete: {} (+{coins} coins)",
            mission.title
        ));
        if let MissionAdvance::Chain { index, .. } = &advance {
            if let Some(next) = chain_mission(index + 1) {
                feedback.push(format!("New mission: {}", next.title));
            }
        }
    }
    feedback
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemill_domain::{seed_world, DialogueState, NpcId, FOREST_SHRINE, STARTING_COINS};
    use tokio::sync::mpsc;

    async fn joined_app() -> (
        Arc<App>,
        ConnectionId,
        PlayerId,
        mpsc::Receiver<ServerMessage>,
    ) {
        let app = App::for_tests(seed_world());
        let conn = ConnectionId::new();
        let (tx, mut rx) = mpsc::channel(64);
        app.connections.register(conn, tx).await;
        handle(
            &app,
            conn,
            ClientCommand::Join {
                name: "Rook".to_string(),
                gender: None,
            },
        )
        .await;
        let player_id = app.connections.player_of(conn).await.unwrap();
        // Swallow the join burst so tests start from a quiet channel.
        while rx.try_recv().is_ok() {}
        (app, conn, player_id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn feedback_lines(messages: &[ServerMessage]) -> Vec<String> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::Feedback { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn joining_registers_a_player_with_a_farm() {
        let (app, _conn, player_id, _rx) = joined_app().await;
        let world = app.world.read().await;
        let player = world.player(player_id).unwrap();
        assert!(player.registered);
        assert_eq!(player.name, "Rook");
        assert!(world.farms.contains_key(&player_id));
    }

    #[tokio::test]
    async fn a_name_already_online_is_refused() {
        let (app, _conn, _player_id, _rx) = joined_app().await;
        let conn2 = ConnectionId::new();
        let (tx, mut rx2) = mpsc::channel(64);
        app.connections.register(conn2, tx).await;
        handle(
            &app,
            conn2,
            ClientCommand::Join {
                name: "rook".to_string(),
                gender: None,
            },
        )
        .await;
        assert!(app.connections.player_of(conn2).await.is_none());
        let lines = feedback_lines(&drain(&mut rx2));
        assert!(lines.iter().any(|l| l.contains("already in town")));
    }

    #[tokio::test]
    async fn rejoining_after_a_drop_resumes_the_same_player() {
        let (app, conn, player_id, _rx) = joined_app().await;
        {
            let mut world = app.world.write().await;
            world.player_mut(player_id).unwrap().connected = false;
        }
        app.connections.unregister(conn).await;

        let conn2 = ConnectionId::new();
        let (tx, mut rx2) = mpsc::channel(64);
        app.connections.register(conn2, tx).await;
        handle(
            &app,
            conn2,
            ClientCommand::Join {
                name: "Rook".to_string(),
                gender: None,
            },
        )
        .await;
        assert_eq!(app.connections.player_of(conn2).await, Some(player_id));
        let resumed = drain(&mut rx2).iter().any(|m| {
            matches!(m, ServerMessage::Joined { resumed: true, .. })
        });
        assert!(resumed);
    }

    #[tokio::test]
    async fn blank_names_join_as_guests() {
        let app = App::for_tests(seed_world());
        let conn = ConnectionId::new();
        let (tx, _rx) = mpsc::channel(64);
        app.connections.register(conn, tx).await;
        handle(
            &app,
            conn,
            ClientCommand::Join {
                name: "   ".to_string(),
                gender: None,
            },
        )
        .await;
        let player_id = app.connections.player_of(conn).await.unwrap();
        let world = app.world.read().await;
        let player = world.player(player_id).unwrap();
        assert!(!player.registered);
        assert!(!player.name.is_empty());
    }

    #[tokio::test]
    async fn reaching_the_shrine_completes_the_first_chain_mission() {
        let (app, conn, player_id, mut rx) = joined_app().await;
        handle(
            &app,
            conn,
            ClientCommand::Move {
                x: FOREST_SHRINE.x,
                y: FOREST_SHRINE.y,
            },
        )
        .await;

        let lines = feedback_lines(&drain(&mut rx));
        assert!(lines.iter().any(|l| l.contains("The Standing Stone")));

        let world = app.world.read().await;
        let player = world.player(player_id).unwrap();
        assert_eq!(player.missions.chain_index, 1);
        assert_eq!(
            world.farms[&player_id].coins,
            STARTING_COINS + 12,
            "reward lands at the base rate while the multiplier is 1.0"
        );
        assert_eq!(world.reputation.global(player_id), MISSION_GLOBAL_REP);
        assert!(world
            .events_today
            .iter()
            .any(|e| e.text.contains("Standing Stone")));
    }

    #[tokio::test]
    async fn moves_are_clamped_to_the_world() {
        let (app, conn, player_id, _rx) = joined_app().await;
        handle(
            &app,
            conn,
            ClientCommand::Move {
                x: -500.0,
                y: 99999.0,
            },
        )
        .await;
        let world = app.world.read().await;
        let pos = world.player(player_id).unwrap().pos;
        assert!(pos.x >= 0.0 && pos.y <= 2048.0);
    }

    #[tokio::test]
    async fn wandering_off_ends_the_dialogue() {
        let (app, conn, player_id, _rx) = joined_app().await;
        {
            let mut world = app.world.write().await;
            let npc_id = world.npcs[0].id;
            let player = world.player_mut(player_id).unwrap();
            player.start_dialogue(npc_id, "A word.");
            player.next_chunk();
            assert!(player.dialogue.is_awaiting_reply());
        }
        handle(
            &app,
            conn,
            ClientCommand::Move {
                x: 2000.0,
                y: 2000.0,
            },
        )
        .await;
        let world = app.world.read().await;
        let player = world.player(player_id).unwrap();
        assert_eq!(player.dialogue, DialogueState::Idle);
    }

    #[tokio::test]
    async fn sleep_toggles_and_blocks_movement() {
        let (app, conn, player_id, mut rx) = joined_app().await;
        handle(&app, conn, ClientCommand::ToggleSleep).await;
        {
            let world = app.world.read().await;
            assert!(world.player(player_id).unwrap().sleeping);
        }
        drain(&mut rx);
        let before = {
            let world = app.world.read().await;
            world.player(player_id).unwrap().pos
        };
        handle(&app, conn, ClientCommand::Move { x: 10.0, y: 10.0 }).await;
        let lines = feedback_lines(&drain(&mut rx));
        assert!(lines.iter().any(|l| l.contains("asleep")));
        let world = app.world.read().await;
        assert_eq!(world.player(player_id).unwrap().pos, before);
    }

    // ------------------------------------------------------------------
    // Order grammar
    // ------------------------------------------------------------------

    #[test]
    fn plain_orders_parse() {
        assert_eq!(parse_order("follow me"), Some((None, Order::Follow)));
        assert_eq!(parse_order("Wait here."), Some((None, Order::Hold)));
        assert_eq!(
            parse_order("keep your distance"),
            Some((None, Order::KeepDistance))
        );
        assert_eq!(
            parse_order("go to the docks"),
            Some((None, Order::GoTo(Area::Docks)))
        );
        assert_eq!(
            parse_order("patrol market row"),
            Some((None, Order::Patrol(Area::MarketRow)))
        );
    }

    #[test]
    fn addressed_orders_carry_the_name() {
        let (addressee, order) = parse_order("Odo, follow me").unwrap();
        assert_eq!(addressee.as_deref(), Some("Odo"));
        assert_eq!(order, Order::Follow);
    }

    #[test]
    fn talk_task_splits_target_and_topic() {
        let (_, order) = parse_order("talk to Odo about the broken plough").unwrap();
        assert_eq!(
            order,
            Order::TalkTask {
                target: "odo".to_string(),
                topic: "the broken plough".to_string(),
            }
        );
    }

    #[test]
    fn observe_orders_take_time_qualifiers() {
        let (_, order) = parse_order("observe the docks at 21:00 for 45 minutes").unwrap();
        assert_eq!(
            order,
            Order::Observe {
                area: Area::Docks,
                start_minute: Some(21 * 60),
                duration_minutes: 45,
            }
        );
        let (_, order) = parse_order("observe forest").unwrap();
        assert_eq!(
            order,
            Order::Observe {
                area: Area::Forest,
                start_minute: None,
                duration_minutes: OBSERVE_DEFAULT_MINUTES,
            }
        );
    }

    #[test]
    fn ordinary_chatter_is_not_an_order() {
        assert!(parse_order("lovely weather today").is_none());
        assert!(parse_order("go to bed early, me").is_none());
        assert!(parse_order("talk to me").is_none());
        assert!(parse_order("observe").is_none());
    }

    #[tokio::test]
    async fn follow_order_lands_on_the_nearest_npc() {
        let (app, conn, player_id, mut rx) = joined_app().await;
        let npc_id = {
            let mut world = app.world.write().await;
            let npc_id = world.npcs[0].id;
            let npc_pos = world.npcs[0].pos;
            world.player_mut(player_id).unwrap().pos = npc_pos + Vec2::new(20.0, 0.0);
            npc_id
        };
        handle(
            &app,
            conn,
            ClientCommand::Chat {
                text: "follow me".to_string(),
            },
        )
        .await;
        let world = app.world.read().await;
        let npc = world.npc(npc_id).unwrap();
        assert!(matches!(
            npc.directive.as_ref().map(|d| &d.kind),
            Some(DirectiveKind::FollowPlayer { player }) if *player == player_id
        ));
        let lines = feedback_lines(&drain(&mut rx));
        assert!(lines.iter().any(|l| l.contains("following you")));
    }

    #[tokio::test]
    async fn addressed_orders_reach_a_distant_npc_by_name() {
        let (app, conn, _player_id, _rx) = joined_app().await;
        let (npc_id, npc_name) = {
            let world = app.world.read().await;
            (world.npcs[2].id, world.npcs[2].name.clone())
        };
        handle(
            &app,
            conn,
            ClientCommand::Chat {
                text: format!("{npc_name}, wait here"),
            },
        )
        .await;
        let world = app.world.read().await;
        let npc = world.npc(npc_id).unwrap();
        assert!(matches!(
            npc.directive.as_ref().map(|d| &d.kind),
            Some(DirectiveKind::Hold)
        ));
    }

    #[tokio::test]
    async fn orders_with_no_npc_in_earshot_get_feedback() {
        let (app, conn, player_id, mut rx) = joined_app().await;
        {
            let mut world = app.world.write().await;
            // Empty corner, far from every routine venue.
            world.player_mut(player_id).unwrap().pos = Vec2::new(2040.0, 8.0);
            for npc in &mut world.npcs {
                npc.pos = Vec2::new(8.0, 2040.0);
            }
        }
        handle(
            &app,
            conn,
            ClientCommand::Chat {
                text: "follow me".to_string(),
            },
        )
        .await;
        let lines = feedback_lines(&drain(&mut rx));
        assert!(lines.iter().any(|l| l.contains("No one close enough")));
    }

    #[tokio::test]
    async fn a_full_task_queue_is_refused() {
        let (app, conn, player_id, mut rx) = joined_app().await;
        let npc_name = {
            let mut world = app.world.write().await;
            let other = world.npcs[1].id;
            let npc_pos = world.npcs[0].pos;
            world.player_mut(player_id).unwrap().pos = npc_pos + Vec2::new(10.0, 0.0);
            let npc = &mut world.npcs[0];
            for _ in 0..tidemill_domain::MAX_TASKS {
                npc.push_task(NpcTask::TalkToNpc {
                    target: other,
                    topic: "nothing much".to_string(),
                    requested_by: player_id,
                })
                .unwrap();
            }
            npc.name.clone()
        };
        handle(
            &app,
            conn,
            ClientCommand::Chat {
                text: "observe the docks".to_string(),
            },
        )
        .await;
        let lines = feedback_lines(&drain(&mut rx));
        assert!(
            lines
                .iter()
                .any(|l| l.contains("enough on their plate")),
            "expected a refusal mentioning {npc_name}, got {lines:?}"
        );
    }

    // ------------------------------------------------------------------
    // Farming
    // ------------------------------------------------------------------

    async fn stand_at_farm(app: &Arc<App>, player_id: PlayerId) {
        let mut world = app.world.write().await;
        let home = world.ensure_farm(player_id).home;
        world.player_mut(player_id).unwrap().pos = home;
    }

    #[tokio::test]
    async fn sowing_within_reach_seeds_the_plot() {
        let (app, conn, player_id, mut rx) = joined_app().await;
        stand_at_farm(&app, player_id).await;
        handle(
            &app,
            conn,
            ClientCommand::FarmAction {
                plot: 0,
                action: "sow".to_string(),
                crop: Some("turnip".to_string()),
            },
        )
        .await;
        let lines = feedback_lines(&drain(&mut rx));
        assert!(lines.iter().any(|l| l.contains("Sowed a turnip seed")));
        let world = app.world.read().await;
        assert!(world.farms[&player_id].plots[0].crop.is_some());
    }

    #[tokio::test]
    async fn farm_work_from_across_town_is_refused() {
        let (app, conn, player_id, mut rx) = joined_app().await;
        {
            let mut world = app.world.write().await;
            world.ensure_farm(player_id);
            world.player_mut(player_id).unwrap().pos = Area::Chapel.bounds().center();
        }
        handle(
            &app,
            conn,
            ClientCommand::FarmAction {
                plot: 0,
                action: "water".to_string(),
                crop: None,
            },
        )
        .await;
        let lines = feedback_lines(&drain(&mut rx));
        assert!(lines.iter().any(|l| l.contains("too far")));
    }

    #[tokio::test]
    async fn sowing_without_naming_a_crop_is_guided() {
        let (app, conn, player_id, mut rx) = joined_app().await;
        stand_at_farm(&app, player_id).await;
        handle(
            &app,
            conn,
            ClientCommand::FarmAction {
                plot: 0,
                action: "sow".to_string(),
                crop: None,
            },
        )
        .await;
        let lines = feedback_lines(&drain(&mut rx));
        assert!(lines.iter().any(|l| l.contains("Name a seed")));
    }

    #[tokio::test]
    async fn farm_errors_reach_the_player_as_feedback() {
        let (app, conn, player_id, mut rx) = joined_app().await;
        stand_at_farm(&app, player_id).await;
        handle(
            &app,
            conn,
            ClientCommand::FarmAction {
                plot: 0,
                action: "harvest".to_string(),
                crop: None,
            },
        )
        .await;
        let lines = feedback_lines(&drain(&mut rx));
        assert!(lines.iter().any(|l| l.contains("Plot must be")));
    }

    #[tokio::test]
    async fn plain_chat_broadcasts_to_the_town() {
        let (app, conn, _player_id, mut rx) = joined_app().await;
        handle(
            &app,
            conn,
            ClientCommand::Chat {
                text: "anyone seen my trowel?".to_string(),
            },
        )
        .await;
        let got_chat = drain(&mut rx).iter().any(|m| {
            matches!(m, ServerMessage::PlayerChat { text, .. } if text.contains("trowel"))
        });
        assert!(got_chat);
    }
}
