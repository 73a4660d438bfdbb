//! Connection registry: live sockets, who they speak for, and how to reach
//! them. Senders are bounded; a slow client loses messages rather than
//! stalling the simulation.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tracing::warn;

use tidemill_domain::{ConnectionId, PlayerId};
use tidemill_shared::ServerMessage;

struct Entry {
    /// Set once the connection has joined as a player.
    player: Option<PlayerId>,
    sender: mpsc::Sender<ServerMessage>,
}

#[derive(Default)]
pub struct ConnectionManager {
    entries: RwLock<HashMap<ConnectionId, Entry>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, conn: ConnectionId, sender: mpsc::Sender<ServerMessage>) {
        self.entries
            .write()
            .await
            .insert(conn, Entry { player: None, sender });
    }

    /// Drop the connection, returning the player it spoke for, if any.
    pub async fn unregister(&self, conn: ConnectionId) -> Option<PlayerId> {
        self.entries
            .write()
            .await
            .remove(&conn)
            .and_then(|e| e.player)
    }

    /// Attach a player identity after a successful join.
    pub async fn bind_player(&self, conn: ConnectionId, player: PlayerId) {
        if let Some(entry) = self.entries.write().await.get_mut(&conn) {
            entry.player = Some(player);
        }
    }

    pub async fn player_of(&self, conn: ConnectionId) -> Option<PlayerId> {
        self.entries.read().await.get(&conn).and_then(|e| e.player)
    }

    /// Every player currently bound to a live connection.
    pub async fn bound_players(&self) -> Vec<PlayerId> {
        self.entries
            .read()
            .await
            .values()
            .filter_map(|e| e.player)
            .collect()
    }

    pub async fn send_to_conn(&self, conn: ConnectionId, message: ServerMessage) {
        if let Some(entry) = self.entries.read().await.get(&conn) {
            if let Err(err) = entry.sender.try_send(message) {
                warn!(connection = %conn, error = %err, "dropping message for slow connection");
            }
        }
    }

    pub async fn send_to_player(&self, player: PlayerId, message: ServerMessage) {
        for (conn, entry) in self.entries.read().await.iter() {
            if entry.player == Some(player) {
                if let Err(err) = entry.sender.try_send(message) {
                    warn!(connection = %conn, error = %err, "dropping message for slow connection");
                }
                return;
            }
        }
    }

    /// Send to every joined connection.
    pub async fn broadcast(&self, message: ServerMessage) {
        for (conn, entry) in self.entries.read().await.iter() {
            if entry.player.is_none() {
                continue;
            }
            if let Err(err) = entry.sender.try_send(message.clone()) {
                warn!(connection = %conn, error = %err, "dropping broadcast for slow connection");
            }
        }
    }

    /// Send to every joined connection except `skip` (their copy is tailored
    /// or already delivered).
    pub async fn broadcast_except(&self, skip: PlayerId, message: ServerMessage) {
        for (conn, entry) in self.entries.read().await.iter() {
            match entry.player {
                Some(player) if player != skip => {
                    if let Err(err) = entry.sender.try_send(message.clone()) {
                        warn!(connection = %conn, error = %err, "dropping broadcast for slow connection");
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feedback(text: &str) -> ServerMessage {
        ServerMessage::Feedback {
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn messages_reach_the_bound_player() {
        let manager = ConnectionManager::new();
        let conn = ConnectionId::new();
        let player = PlayerId::new();
        let (tx, mut rx) = mpsc::channel(8);

        manager.register(conn, tx).await;
        manager.bind_player(conn, player).await;
        assert_eq!(manager.player_of(conn).await, Some(player));

        manager.send_to_player(player, feedback("hello")).await;
        match rx.recv().await.unwrap() {
            ServerMessage::Feedback { text } => assert_eq!(text, "hello"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_skips_unjoined_connections() {
        let manager = ConnectionManager::new();

        let joined = ConnectionId::new();
        let (tx_joined, mut rx_joined) = mpsc::channel(8);
        manager.register(joined, tx_joined).await;
        manager.bind_player(joined, PlayerId::new()).await;

        let lurker = ConnectionId::new();
        let (tx_lurker, mut rx_lurker) = mpsc::channel(8);
        manager.register(lurker, tx_lurker).await;

        manager.broadcast(feedback("town news")).await;
        assert!(rx_joined.recv().await.is_some());
        assert!(rx_lurker.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_except_spares_the_named_player() {
        let manager = ConnectionManager::new();
        let (a_conn, a_player) = (ConnectionId::new(), PlayerId::new());
        let (b_conn, b_player) = (ConnectionId::new(), PlayerId::new());
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        manager.register(a_conn, tx_a).await;
        manager.bind_player(a_conn, a_player).await;
        manager.register(b_conn, tx_b).await;
        manager.bind_player(b_conn, b_player).await;

        manager.broadcast_except(a_player, feedback("for the rest")).await;
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn unregister_reports_the_former_player() {
        let manager = ConnectionManager::new();
        let conn = ConnectionId::new();
        let player = PlayerId::new();
        let (tx, _rx) = mpsc::channel(8);
        manager.register(conn, tx).await;
        manager.bind_player(conn, player).await;

        assert_eq!(manager.unregister(conn).await, Some(player));
        assert_eq!(manager.player_of(conn).await, None);
        // Sends to a gone connection are a quiet no-op.
        manager.send_to_conn(conn, feedback("late")).await;
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let manager = ConnectionManager::new();
        let conn = ConnectionId::new();
        let player = PlayerId::new();
        let (tx, _rx) = mpsc::channel(1);
        manager.register(conn, tx).await;
        manager.bind_player(conn, player).await;

        manager.send_to_player(player, feedback("first")).await;
        // Channel is full now; this one is dropped with a warning.
        manager.send_to_player(player, feedback("second")).await;
    }
}
