//! Player sessions and the dialogue state machine.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::geom::Vec2;
use crate::ids::{NpcId, PlayerId};
use crate::missions::MissionProgress;

/// Lines longer than this many words are delivered in chunks.
pub const CHUNK_WORDS: usize = 36;

/// Size of each delivered chunk once a line is split.
pub const CHUNK_SIZE: usize = 28;

/// Moving this far from the dialogue anchor silently ends the conversation.
pub const ANCHOR_SLACK: f32 = 40.0;

// =============================================================================
// Dialogue state
// =============================================================================

/// Where a player stands in the turn-based dialogue protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum DialogueState {
    #[default]
    Idle,
    Talking {
        npc: NpcId,
        /// Completed exchange count, used as generation context.
        turns: u32,
        /// Undelivered chunks of the NPC's current line, FIFO.
        chunks: VecDeque<String>,
        /// True once all chunks are delivered and the NPC waits on the player.
        awaiting_reply: bool,
        /// Player position when the wait began; wandering off ends the talk.
        anchor: Vec2,
    },
}

impl DialogueState {
    pub fn talking_with(&self) -> Option<NpcId> {
        match self {
            DialogueState::Talking { npc, .. } => Some(*npc),
            DialogueState::Idle => None,
        }
    }

    pub fn is_awaiting_reply(&self) -> bool {
        matches!(
            self,
            DialogueState::Talking {
                awaiting_reply: true,
                ..
            }
        )
    }
}

/// Split a generated line into deliverable chunks. Short lines stay whole;
/// long ones are cut into word groups that reassemble with single spaces.
pub fn split_line(text: &str) -> VecDeque<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return VecDeque::new();
    }
    if words.len() <= CHUNK_WORDS {
        return VecDeque::from([words.join(" ")]);
    }
    words
        .chunks(CHUNK_SIZE)
        .map(|chunk| chunk.join(" "))
        .collect()
}

// =============================================================================
// Session
// =============================================================================

/// One player's live state. The id is stable for registered names across
/// reconnects; guests get a fresh one per visit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSession {
    pub player_id: PlayerId,
    pub name: String,
    pub gender: Option<String>,
    pub pos: Vec2,
    pub sleeping: bool,
    pub connected: bool,
    /// Registered players survive in the snapshot; guests are dropped.
    pub registered: bool,
    pub dialogue: DialogueState,
    pub missions: MissionProgress,
}

impl PlayerSession {
    pub fn new(player_id: PlayerId, name: impl Into<String>, registered: bool, pos: Vec2) -> Self {
        Self {
            player_id,
            name: name.into(),
            gender: None,
            pos,
            sleeping: false,
            connected: true,
            registered,
            dialogue: DialogueState::Idle,
            missions: MissionProgress::default(),
        }
    }

    /// Awake and connected: the only players NPCs react to.
    pub fn is_awake(&self) -> bool {
        self.connected && !self.sleeping
    }

    pub fn in_dialogue(&self) -> bool {
        self.dialogue.talking_with().is_some()
    }

    /// Begin a dialogue with `npc`, queueing the NPC's opening line.
    pub fn start_dialogue(&mut self, npc: NpcId, line: &str) {
        self.dialogue = DialogueState::Talking {
            npc,
            turns: 0,
            chunks: split_line(line),
            awaiting_reply: false,
            anchor: self.pos,
        };
    }

    /// Pull the next chunk of the NPC's line. When the last chunk goes out
    /// the state flips to awaiting the player's reply, anchored here.
    pub fn next_chunk(&mut self) -> Option<String> {
        let pos = self.pos;
        if let DialogueState::Talking {
            chunks,
            awaiting_reply,
            anchor,
            ..
        } = &mut self.dialogue
        {
            let chunk = chunks.pop_front();
            if chunks.is_empty() {
                *awaiting_reply = true;
                *anchor = pos;
            }
            chunk
        } else {
            None
        }
    }

    /// Replace the pending line (the NPC spoke again) and count the exchange.
    pub fn queue_reply_line(&mut self, line: &str) {
        if let DialogueState::Talking {
            turns,
            chunks,
            awaiting_reply,
            ..
        } = &mut self.dialogue
        {
            *turns += 1;
            *chunks = split_line(line);
            *awaiting_reply = false;
        }
    }

    /// True when the player drifted beyond the anchor slack while the NPC
    /// was waiting on a reply.
    pub fn wandered_off(&self) -> bool {
        match &self.dialogue {
            DialogueState::Talking {
                awaiting_reply: true,
                anchor,
                ..
            } => self.pos.distance(*anchor) > ANCHOR_SLACK,
            _ => false,
        }
    }

    /// End any dialogue, returning the NPC that was involved.
    pub fn end_dialogue(&mut self) -> Option<NpcId> {
        let npc = self.dialogue.talking_with();
        self.dialogue = DialogueState::Idle;
        npc
    }
}
