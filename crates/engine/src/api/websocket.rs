//! WebSocket endpoint: one socket per client, a bounded outbound channel,
//! and a forwarder task between them. Malformed commands are dropped here
//! so the dispatcher only ever sees well-formed ones.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tidemill_domain::ConnectionId;
use tidemill_shared::{ClientCommand, ServerMessage};

use crate::app::App;
use crate::commands;

/// Outbound buffer per connection; when it fills, messages are dropped
/// rather than stalling the tick.
const CHANNEL_BUFFER: usize = 256;

/// Upgrade entry point for new connections.
pub async fn ws_handler(ws: WebSocketUpgrade, State(app): State<Arc<App>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

async fn handle_socket(socket: WebSocket, app: Arc<App>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let conn = ConnectionId::new();

    let (tx, mut rx) = mpsc::channel::<ServerMessage>(CHANNEL_BUFFER);
    app.connections.register(conn, tx).await;
    info!(connection = %conn, "websocket connected");

    // Forward queued server messages out over the wire.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(cmd) => commands::handle(&app, conn, cmd).await,
                Err(err) => {
                    debug!(connection = %conn, error = %err, "dropping malformed command");
                }
            },
            Ok(Message::Close(_)) => break,
            Err(err) => {
                warn!(connection = %conn, error = %err, "websocket error");
                break;
            }
            _ => {}
        }
    }

    disconnect(&app, conn).await;
    send_task.abort();
}

/// Tear down a closed connection: the player goes offline, any dialogue
/// they were holding ends, and the rest of the town hears they left.
pub async fn disconnect(app: &Arc<App>, conn: ConnectionId) {
    let Some(player_id) = app.connections.unregister(conn).await else {
        info!(connection = %conn, "websocket closed before joining");
        return;
    };
    let name = {
        let mut world = app.world.write().await;
        let Some(player) = world.player_mut(player_id) else {
            return;
        };
        player.connected = false;
        let _ = player.end_dialogue();
        player.name.clone()
    };
    app.connections
        .broadcast(ServerMessage::PlayerLeft {
            player_id: player_id.to_uuid(),
            name: name.clone(),
        })
        .await;
    info!(player = %player_id, name = %name, "player disconnected");
}
