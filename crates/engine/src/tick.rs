//! The world tick. One periodic pass advances the clock, moves NPCs, grows
//! crops, and kicks the daily refresh on a dawn crossing. While an autonomous
//! conversation, an NPC errand, or any player dialogue is running the
//! advancement is skipped whole, so simulated time stands still during talk.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

use tidemill_domain::tick_growth;

use crate::app::App;
use crate::{npc_chat, npc_tasks, persistence, refresh};

/// Drive the world until shutdown. Spawned once at startup.
pub async fn run(app: Arc<App>) {
    let mut ticker = time::interval(Duration::from_millis(app.config.tick_millis));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks_since_save: u32 = 0;

    loop {
        ticker.tick().await;

        if advance(&app).await {
            refresh::run(&app).await;
        }

        npc_chat::maybe_start(&app).await;
        npc_tasks::maybe_start(&app).await;

        ticks_since_save += 1;
        if ticks_since_save >= app.config.autosave_ticks {
            ticks_since_save = 0;
            let app = Arc::clone(&app);
            tokio::spawn(async move { persistence::autosave(&app).await });
        }

        app.push_world_views().await;
    }
}

/// One advancement step. Returns whether a dawn boundary was crossed.
///
/// Inside the overnight window the clock jumps straight to 06:00; movement
/// still runs at the ordinary step so nobody teleports, while growth gets
/// the full jump.
async fn advance(app: &Arc<App>) -> bool {
    if app.convo_in_progress.load(Ordering::SeqCst) || app.task_in_progress.load(Ordering::SeqCst) {
        return false;
    }
    let mut world = app.world.write().await;
    if world.any_player_in_dialogue() {
        return false;
    }

    let delta = if world.clock.in_night_skip_window() {
        let jump = world.clock.minutes_until_dawn();
        debug!(jump, "overnight skip");
        jump
    } else {
        app.config.tick_sim_minutes
    };

    let crossings = world.advance_clock(delta);
    world.step_all_npcs(app.config.tick_sim_minutes as f32, &mut |n| {
        app.random.draw(n)
    });
    for farm in world.farms.values_mut() {
        tick_growth(farm, delta as f32);
    }
    crossings > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use tidemill_domain::{
        apply_action, seed_world, CropKind, DialogueState, FarmAction, PlayerId, PlayerSession,
        Vec2, World, WorldClock,
    };

    fn world_with_player() -> (World, PlayerId) {
        let mut world = seed_world();
        let id = PlayerId::new();
        world
            .players
            .insert(id, PlayerSession::new(id, "Rook", true, Vec2::new(900.0, 900.0)));
        (world, id)
    }

    #[tokio::test]
    async fn a_tick_moves_the_clock_and_grows_crops() {
        let (mut world, player) = world_with_player();
        let now = world.now();
        let farm = world.ensure_farm(player);
        apply_action(
            farm,
            0,
            FarmAction::Sow(CropKind::Turnip),
            now,
            &|_| None,
            &mut |_| 0,
        )
        .unwrap();
        let minute = world.clock.minute();

        let app = App::for_tests(world);
        let crossed = advance(&app).await;

        let world = app.world.read().await;
        assert!(!crossed);
        assert_eq!(world.clock.minute(), minute + app.config.tick_sim_minutes);
        assert!(world.farms[&player].plots[0].growth > 0.0);
    }

    #[tokio::test]
    async fn dialogue_pauses_the_world() {
        let (mut world, player) = world_with_player();
        let npc = world.npcs[0].id;
        let anchor = world.player(player).unwrap().pos;
        world.player_mut(player).unwrap().dialogue = DialogueState::Talking {
            npc,
            turns: 0,
            chunks: VecDeque::new(),
            awaiting_reply: true,
            anchor,
        };
        let minute = world.clock.minute();

        let app = App::for_tests(world);
        assert!(!advance(&app).await);
        assert_eq!(app.world.read().await.clock.minute(), minute);
    }

    #[tokio::test]
    async fn a_running_errand_pauses_the_world() {
        let (world, _) = world_with_player();
        let minute = world.clock.minute();

        let app = App::for_tests(world);
        app.task_in_progress.store(true, Ordering::SeqCst);
        assert!(!advance(&app).await);
        assert_eq!(app.world.read().await.clock.minute(), minute);
    }

    #[tokio::test]
    async fn the_night_window_jumps_to_dawn() {
        let (mut world, _) = world_with_player();
        world.clock = WorldClock::starting_at(2, 150);

        let app = App::for_tests(world);
        let crossed = advance(&app).await;

        let world = app.world.read().await;
        assert!(crossed, "passing 06:00 is a day crossing");
        assert_eq!(world.clock.minute(), 6 * 60);
        assert_eq!(world.clock.day(), 3);
    }
}
