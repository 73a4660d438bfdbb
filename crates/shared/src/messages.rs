//! Messages from engine to clients.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::views::WorldView;

/// Messages from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Sent once after a successful `Join`.
    Joined {
        player_id: Uuid,
        name: String,
        /// True when the name matched a registered player and their state
        /// was resumed.
        resumed: bool,
    },
    /// Periodic full view of the world from this player's seat.
    WorldView { view: Box<WorldView> },
    /// A spoken line: NPC to player, or NPC to NPC within earshot.
    DialogueEvent {
        speaker: Uuid,
        speaker_name: String,
        target: Uuid,
        target_name: String,
        text: String,
        emotion: String,
        /// More chunks of this line remain; interact again to hear the rest.
        has_more_chunks: bool,
        turn: u32,
    },
    /// Validation or action feedback addressed to one player.
    Feedback { text: String },
    /// Local chat from another player.
    PlayerChat {
        player_id: Uuid,
        name: String,
        text: String,
    },
    /// A player entered the town (broadcast to others).
    PlayerJoined { player_id: Uuid, name: String },
    /// A player left (broadcast to others).
    PlayerLeft { player_id: Uuid, name: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialogue_event_serializes_with_a_type_tag() {
        let msg = ServerMessage::DialogueEvent {
            speaker: Uuid::nil(),
            speaker_name: "Odo".to_string(),
            target: Uuid::nil(),
            target_name: "Rook".to_string(),
            text: "The forge waits for no one.".to_string(),
            emotion: "gruff".to_string(),
            has_more_chunks: false,
            turn: 1,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "DialogueEvent");
        assert_eq!(json["speaker_name"], "Odo");
        assert_eq!(json["has_more_chunks"], false);
    }

    #[test]
    fn feedback_round_trips() {
        let msg = ServerMessage::Feedback {
            text: "That plot is already seeded.".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ServerMessage::Feedback { ref text } if text.contains("seeded")));
    }
}
