//! NPC-to-NPC relations and player reputation.
//!
//! Relations use an order-independent pair key. The store keeps records in a
//! flat list rather than a pair-keyed map so snapshots serialize as plain
//! JSON (struct keys are not valid JSON object keys).

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::clock::Moment;
use crate::ids::{NpcId, PlayerId};
use crate::routine::Role;

/// Relation score bounds.
pub const RELATION_MIN: i8 = -10;
pub const RELATION_MAX: i8 = 10;

/// Relation at or below this triggers movement avoidance.
pub const AVOID_THRESHOLD: i8 = -5;

/// How many reputation deltas each player's recent ring keeps.
pub const RECENT_DELTAS: usize = 16;

// =============================================================================
// Relations
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationEntry {
    pub score: i8,
    pub reason: String,
    pub at: Moment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRecord {
    /// Canonical pair: `a < b` by id ordering.
    pub a: NpcId,
    pub b: NpcId,
    pub entry: RelationEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationStore {
    records: Vec<RelationRecord>,
}

impl RelationStore {
    fn key(a: NpcId, b: NpcId) -> (NpcId, NpcId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Current score for a pair; unacquainted pairs are 0.
    pub fn score(&self, a: NpcId, b: NpcId) -> i8 {
        let (a, b) = Self::key(a, b);
        self.records
            .iter()
            .find(|r| r.a == a && r.b == b)
            .map(|r| r.entry.score)
            .unwrap_or(0)
    }

    pub fn entry(&self, a: NpcId, b: NpcId) -> Option<&RelationEntry> {
        let (a, b) = Self::key(a, b);
        self.records
            .iter()
            .find(|r| r.a == a && r.b == b)
            .map(|r| &r.entry)
    }

    /// Shift a pair's score by `delta`, clamped, recording the latest reason.
    pub fn bump(&mut self, a: NpcId, b: NpcId, delta: i8, reason: impl Into<String>, at: Moment) {
        let (a, b) = Self::key(a, b);
        match self.records.iter_mut().find(|r| r.a == a && r.b == b) {
            Some(record) => {
                record.entry.score = record
                    .entry
                    .score
                    .saturating_add(delta)
                    .clamp(RELATION_MIN, RELATION_MAX);
                record.entry.reason = reason.into();
                record.entry.at = at;
            }
            None => self.records.push(RelationRecord {
                a,
                b,
                entry: RelationEntry {
                    score: delta.clamp(RELATION_MIN, RELATION_MAX),
                    reason: reason.into(),
                    at,
                },
            }),
        }
    }

    /// Everyone `npc` holds a grudge against (score at or below the avoid
    /// threshold).
    pub fn disliked_by(&self, npc: NpcId) -> Vec<NpcId> {
        self.records
            .iter()
            .filter(|r| r.entry.score <= AVOID_THRESHOLD)
            .filter_map(|r| {
                if r.a == npc {
                    Some(r.b)
                } else if r.b == npc {
                    Some(r.a)
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelationRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Bucket a relation score into its display label.
pub fn relation_label(score: i8) -> &'static str {
    match score {
        s if s >= 6 => "ally",
        2..=5 => "friendly",
        -2..=1 => "neutral",
        -5..=-3 => "cold",
        _ => "grudge",
    }
}

/// Multiplier applied to autonomous-conversation pair weights. Allied pairs
/// chat often; grudges almost never.
pub fn pair_weight_multiplier(score: i8) -> f32 {
    match relation_label(score) {
        "ally" => 3.0,
        "friendly" => 2.0,
        "neutral" => 1.0,
        "cold" => 0.35,
        _ => 0.05,
    }
}

// =============================================================================
// Reputation
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationDelta {
    pub delta: i16,
    pub role: Option<Role>,
    pub note: String,
    pub at: Moment,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerReputation {
    pub global: i16,
    pub by_role: HashMap<Role, i16>,
    pub recent: VecDeque<ReputationDelta>,
}

/// Per-player standing with the town as a whole and with each trade.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReputationBook {
    by_player: HashMap<PlayerId, PlayerReputation>,
}

impl ReputationBook {
    pub fn apply(
        &mut self,
        player: PlayerId,
        role: Option<Role>,
        delta: i16,
        note: impl Into<String>,
        at: Moment,
    ) {
        self.reward(player, role, delta, delta, note, at);
    }

    /// Mission payout: a global bump and a (usually larger) bump with the
    /// giver's trade, recorded as one entry.
    pub fn reward(
        &mut self,
        player: PlayerId,
        role: Option<Role>,
        global_delta: i16,
        role_delta: i16,
        note: impl Into<String>,
        at: Moment,
    ) {
        let rep = self.by_player.entry(player).or_default();
        rep.global = (rep.global + global_delta).clamp(-100, 100);
        if let Some(role) = role {
            let toward = rep.by_role.entry(role).or_insert(0);
            *toward = (*toward + role_delta).clamp(-60, 60);
        }
        rep.recent.push_back(ReputationDelta {
            delta: global_delta,
            role,
            note: note.into(),
            at,
        });
        while rep.recent.len() > RECENT_DELTAS {
            rep.recent.pop_front();
        }
    }

    pub fn global(&self, player: PlayerId) -> i16 {
        self.by_player.get(&player).map(|r| r.global).unwrap_or(0)
    }

    pub fn toward_role(&self, player: PlayerId, role: Role) -> i16 {
        self.by_player
            .get(&player)
            .and_then(|r| r.by_role.get(&role))
            .copied()
            .unwrap_or(0)
    }

    pub fn of(&self, player: PlayerId) -> Option<&PlayerReputation> {
        self.by_player.get(&player)
    }

    /// Drop a guest's reputation when their session is discarded.
    pub fn forget(&mut self, player: PlayerId) {
        self.by_player.remove(&player);
    }
}

/// Bucket a global reputation score into its display label.
pub fn reputation_label(global: i16) -> &'static str {
    match global {
        s if s < -60 => "notorious",
        -60..=-26 => "despised",
        -25..=-6 => "disliked",
        -5..=5 => "neutral",
        6..=25 => "liked",
        26..=60 => "respected",
        _ => "beloved",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> Moment {
        Moment::new(1, 500)
    }

    #[test]
    fn relation_key_is_order_independent() {
        let (a, b) = (NpcId::new(), NpcId::new());
        let mut store = RelationStore::default();
        store.bump(a, b, 3, "shared a drink", at());
        assert_eq!(store.score(b, a), 3);
        store.bump(b, a, -1, "argument", at());
        assert_eq!(store.score(a, b), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn relation_scores_clamp_at_both_ends() {
        let (a, b) = (NpcId::new(), NpcId::new());
        let mut store = RelationStore::default();
        for _ in 0..20 {
            store.bump(a, b, 2, "good turn", at());
        }
        assert_eq!(store.score(a, b), RELATION_MAX);
        for _ in 0..40 {
            store.bump(a, b, -2, "bad turn", at());
        }
        assert_eq!(store.score(a, b), RELATION_MIN);
    }

    #[test]
    fn unacquainted_pairs_are_neutral() {
        let store = RelationStore::default();
        assert_eq!(store.score(NpcId::new(), NpcId::new()), 0);
        assert_eq!(relation_label(0), "neutral");
    }

    #[test]
    fn disliked_by_respects_the_threshold() {
        let (a, b, c) = (NpcId::new(), NpcId::new(), NpcId::new());
        let mut store = RelationStore::default();
        store.bump(a, b, -5, "feud", at());
        store.bump(a, c, -4, "cool", at());
        assert_eq!(store.disliked_by(a), vec![b]);
        assert_eq!(store.disliked_by(b), vec![a]);
        assert!(store.disliked_by(c).is_empty());
    }

    #[test]
    fn relation_labels_bucket_correctly() {
        assert_eq!(relation_label(10), "ally");
        assert_eq!(relation_label(6), "ally");
        assert_eq!(relation_label(5), "friendly");
        assert_eq!(relation_label(2), "friendly");
        assert_eq!(relation_label(1), "neutral");
        assert_eq!(relation_label(-2), "neutral");
        assert_eq!(relation_label(-3), "cold");
        assert_eq!(relation_label(-5), "cold");
        assert_eq!(relation_label(-6), "grudge");
        assert_eq!(relation_label(-10), "grudge");
    }

    #[test]
    fn pair_multiplier_suppresses_grudges() {
        assert!(pair_weight_multiplier(7) > pair_weight_multiplier(3));
        assert!(pair_weight_multiplier(3) > pair_weight_multiplier(0));
        assert!(pair_weight_multiplier(0) > pair_weight_multiplier(-4));
        assert!(pair_weight_multiplier(-4) > pair_weight_multiplier(-7));
        assert!((pair_weight_multiplier(-7) - 0.05).abs() < f32::EPSILON);
    }

    #[test]
    fn reputation_clamps_global_and_role_independently() {
        let player = PlayerId::new();
        let mut book = ReputationBook::default();
        for _ in 0..30 {
            book.apply(player, Some(Role::Farmer), 6, "mission", at());
        }
        assert_eq!(book.global(player), 100);
        assert_eq!(book.toward_role(player, Role::Farmer), 60);
        assert_eq!(book.toward_role(player, Role::Guard), 0);
    }

    #[test]
    fn reward_splits_global_and_role_deltas() {
        let player = PlayerId::new();
        let mut book = ReputationBook::default();
        book.reward(player, Some(Role::Blacksmith), 4, 6, "a favor done", at());
        assert_eq!(book.global(player), 4);
        assert_eq!(book.toward_role(player, Role::Blacksmith), 6);
        let rep = book.of(player).unwrap();
        assert_eq!(rep.recent.len(), 1);
        assert_eq!(rep.recent[0].delta, 4);
    }

    #[test]
    fn recent_ring_is_bounded() {
        let player = PlayerId::new();
        let mut book = ReputationBook::default();
        for i in 0..40 {
            book.apply(player, None, 1, format!("note {i}"), at());
        }
        let rep = book.of(player).unwrap();
        assert_eq!(rep.recent.len(), RECENT_DELTAS);
        assert_eq!(rep.recent.back().unwrap().note, "note 39");
        assert_eq!(rep.recent.front().unwrap().note, "note 24");
    }

    #[test]
    fn reputation_labels_bucket_correctly() {
        assert_eq!(reputation_label(-61), "notorious");
        assert_eq!(reputation_label(-60), "despised");
        assert_eq!(reputation_label(-26), "despised");
        assert_eq!(reputation_label(-25), "disliked");
        assert_eq!(reputation_label(-6), "disliked");
        assert_eq!(reputation_label(0), "neutral");
        assert_eq!(reputation_label(5), "neutral");
        assert_eq!(reputation_label(6), "liked");
        assert_eq!(reputation_label(25), "liked");
        assert_eq!(reputation_label(26), "respected");
        assert_eq!(reputation_label(60), "respected");
        assert_eq!(reputation_label(61), "beloved");
    }
}
