//! The NPC entity: identity, position, directives, and the bounded task
//! queue. NPCs are created once at world start and never destroyed.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::clock::Moment;
use crate::error::DomainError;
use crate::geom::{Area, Vec2};
use crate::ids::{NpcId, PlayerId};
use crate::routine::{Role, RoutinePhase, RoutineState};

/// Maximum queued player-assigned tasks per NPC.
pub const MAX_TASKS: usize = 4;

/// Ticks an NPC stays frozen after lingering next to an awake player.
pub const FREEZE_TICKS: u32 = 3;

// =============================================================================
// Directives
// =============================================================================

/// A movement order that overrides the NPC's routine until it expires or is
/// replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DirectiveKind {
    FollowPlayer { player: PlayerId },
    KeepDistance { player: PlayerId, preferred: f32 },
    GoToPoint { point: Vec2 },
    PatrolArea { area: Area },
    Hold,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub kind: DirectiveKind,
    /// A directive lapses once `now >= expires`; `None` means until replaced.
    pub expires: Option<Moment>,
}

impl Directive {
    pub fn new(kind: DirectiveKind, expires: Option<Moment>) -> Self {
        Self { kind, expires }
    }

    pub fn is_expired(&self, now: Moment) -> bool {
        self.expires.is_some_and(|at| now >= at)
    }

    /// Short description for player feedback, e.g. "following you".
    pub fn describe(&self) -> String {
        match &self.kind {
            DirectiveKind::FollowPlayer { .. } => "following you".to_string(),
            DirectiveKind::KeepDistance { .. } => "keeping a distance".to_string(),
            DirectiveKind::GoToPoint { .. } => "heading over".to_string(),
            DirectiveKind::PatrolArea { area } => format!("patrolling the {area}"),
            DirectiveKind::Hold => "waiting here".to_string(),
        }
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// A player-assigned errand, processed one at a time by the background task
/// loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NpcTask {
    TalkToNpc {
        target: NpcId,
        topic: String,
        requested_by: PlayerId,
    },
    ObserveArea {
        area: Area,
        start: Option<Moment>,
        duration_minutes: u32,
        requested_by: PlayerId,
    },
}

impl NpcTask {
    pub fn requested_by(&self) -> PlayerId {
        match self {
            NpcTask::TalkToNpc { requested_by, .. } => *requested_by,
            NpcTask::ObserveArea { requested_by, .. } => *requested_by,
        }
    }
}

// =============================================================================
// Profile and entity
// =============================================================================

/// Static facts about an NPC fixed at seed time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcProfile {
    pub home: Area,
    /// Weekday (0..7) on which this NPC rests, derived from its id.
    pub holiday_weekday: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Npc {
    pub id: NpcId,
    pub name: String,
    pub role: Role,
    pub traits: Vec<String>,
    pub pos: Vec2,
    pub velocity: Vec2,
    pub speed: f32,
    pub profile: NpcProfile,
    pub routine: RoutineState,
    pub directive: Option<Directive>,
    pub tasks: VecDeque<NpcTask>,
    /// Task currently being driven by the background loop, if any.
    pub active_task: Option<NpcTask>,
    pub talk_cooldown_until: Option<Moment>,
    /// Consecutive ticks spent within hold radius of an awake player.
    pub near_player_ticks: u32,
    /// Remaining ticks of the anti-jitter freeze.
    pub frozen_ticks: u32,
    /// Current wander or patrol waypoint, if any.
    #[serde(default)]
    pub wander_target: Option<Vec2>,
}

impl Npc {
    pub fn new(name: impl Into<String>, role: Role, home: Area, pos: Vec2, speed: f32) -> Self {
        let id = NpcId::new();
        Self {
            id,
            name: name.into(),
            role,
            traits: Vec::new(),
            pos,
            velocity: Vec2::ZERO,
            speed,
            profile: NpcProfile {
                home,
                holiday_weekday: crate::routine::holiday_weekday(id),
            },
            routine: RoutineState {
                phase: RoutinePhase::Rest,
                venue: None,
                area: home,
                holiday: false,
            },
            directive: None,
            tasks: VecDeque::new(),
            active_task: None,
            talk_cooldown_until: None,
            near_player_ticks: 0,
            frozen_ticks: 0,
            wander_target: None,
        }
    }

    /// The directive currently in force, dropping it first if expired.
    pub fn current_directive(&mut self, now: Moment) -> Option<&Directive> {
        if self.directive.as_ref().is_some_and(|d| d.is_expired(now)) {
            self.directive = None;
        }
        self.directive.as_ref()
    }

    pub fn set_directive(&mut self, directive: Directive) {
        self.directive = Some(directive);
    }

    pub fn clear_directive(&mut self) {
        self.directive = None;
    }

    /// Queue a task, rejecting when the queue is full.
    pub fn push_task(&mut self, task: NpcTask) -> Result<(), DomainError> {
        if self.tasks.len() >= MAX_TASKS {
            return Err(DomainError::container_full(
                self.tasks.len() as u32,
                MAX_TASKS as u32,
            ));
        }
        self.tasks.push_back(task);
        Ok(())
    }

    /// Pop the next queued task and mark it active. The background loop owns
    /// the active slot until it calls [`Npc::finish_task`].
    pub fn start_next_task(&mut self) -> Option<NpcTask> {
        if self.active_task.is_some() {
            return None;
        }
        let task = self.tasks.pop_front()?;
        self.active_task = Some(task.clone());
        Some(task)
    }

    pub fn finish_task(&mut self) {
        self.active_task = None;
    }

    pub fn is_busy_with_task(&self) -> bool {
        self.active_task.is_some()
    }

    pub fn on_talk_cooldown(&self, now: Moment) -> bool {
        self.talk_cooldown_until.is_some_and(|until| now < until)
    }

    pub fn refresh_talk_cooldown(&mut self, now: Moment, cooldown_minutes: u32) {
        self.talk_cooldown_until = Some(now.plus_minutes(cooldown_minutes));
    }

    /// Re-derive area membership after a move.
    pub fn refresh_area(&mut self) {
        self.routine.area = Area::containing(self.pos).unwrap_or(self.routine.area);
    }
}
