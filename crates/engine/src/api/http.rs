//! HTTP routes.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;

use crate::app::App;

/// Create all HTTP routes.
pub fn routes() -> Router<Arc<App>> {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/town", get(town_status))
}

async fn health() -> &'static str {
    "OK"
}

/// Out-of-band town status for dashboards and smoke checks.
async fn town_status(State(app): State<Arc<App>>) -> Json<serde_json::Value> {
    let world = app.world.read().await;
    let online: Vec<&str> = world
        .players
        .values()
        .filter(|p| p.connected)
        .map(|p| p.name.as_str())
        .collect();
    Json(json!({
        "day": world.clock.day(),
        "time": world.clock.label(),
        "weather": world.weather.to_string(),
        "npcs": world.npcs.len(),
        "online": online,
    }))
}
