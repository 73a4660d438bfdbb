//! Snapshot persistence. The whole world serializes to one JSON blob; the
//! tick autosaves it on a counter, shutdown writes it once more, and startup
//! restores it or seeds a fresh town.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use tidemill_domain::{seed_world, World};

use crate::app::App;
use crate::infrastructure::ports::StorePort;

/// Write the current world to the store, unless a save is already in
/// flight. The snapshot is cloned under the read lock; serialization and
/// the write happen outside it.
pub async fn autosave(app: &Arc<App>) {
    if app
        .autosave_in_progress
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!("autosave skipped, previous save still running");
        return;
    }
    let snap = {
        let world = app.world.read().await;
        world.snapshot_clone()
    };
    match serde_json::to_string(&snap) {
        Ok(blob) => match app.store.save_snapshot(blob).await {
            Ok(()) => debug!(day = snap.clock.day(), "world saved"),
            Err(err) => error!(error = %err, "snapshot write failed"),
        },
        Err(err) => error!(error = %err, "snapshot serialization failed"),
    }
    app.autosave_in_progress.store(false, Ordering::SeqCst);
}

/// The world to run: the stored snapshot when one loads cleanly, a fresh
/// seeded town otherwise. A snapshot that fails to parse is left in place
/// and overwritten by the next autosave.
pub async fn load_or_seed(store: &dyn StorePort) -> World {
    match store.load_snapshot().await {
        Ok(Some(blob)) => match serde_json::from_str::<World>(&blob) {
            Ok(mut world) => {
                world.rehydrate();
                info!(
                    day = world.clock.day(),
                    npcs = world.npcs.len(),
                    players = world.players.len(),
                    "world restored from snapshot"
                );
                world
            }
            Err(err) => {
                error!(error = %err, "snapshot did not parse, seeding a fresh town");
                seed_world()
            }
        },
        Ok(None) => {
            info!("no snapshot on record, seeding a fresh town");
            seed_world()
        }
        Err(err) => {
            error!(error = %err, "snapshot load failed, seeding a fresh town");
            seed_world()
        }
    }
}
