//! Commands from client to engine.
//!
//! Fire-and-forget: the engine never replies to a command directly, it
//! answers through the push channel (`ServerMessage`). Unknown or malformed
//! commands are dropped at the socket.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    /// Enter the town. A name matching a registered player resumes that
    /// player; anything else joins as a guest.
    Join {
        name: String,
        #[serde(default)]
        gender: Option<String>,
    },
    /// Walk toward a point. The engine clamps to the world bounds.
    Move { x: f32, y: f32 },
    /// Go to bed or get up. Sleeping players are invisible to NPCs.
    ToggleSleep,
    /// Free text. In dialogue this is the reply; near an NPC it may be an
    /// order ("follow me", "go to the docks"); otherwise it is local chat.
    Chat { text: String },
    /// Poke an NPC: start a conversation or pull the next chunk of one.
    Interact { npc: Uuid },
    /// Work a farm plot. `action` is one of `sow`, `water`, `harvest`;
    /// `crop` names the seed for `sow`.
    FarmAction {
        plot: usize,
        action: String,
        #[serde(default)]
        crop: Option<String>,
    },
}
