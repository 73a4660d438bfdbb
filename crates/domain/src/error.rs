//! Unified error type for the domain layer.
//!
//! Every failed precondition in the simulation rules maps onto one of these
//! variants, so callers can report user-facing feedback without stringly
//! typed errors leaking across the boundary.

use thiserror::Error;

/// Unified error type for domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Validation failed (e.g., invalid field values)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Entity not found
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Business rule violation
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// State transition not allowed
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Container is at capacity
    #[error("Container full: {current}/{max} items")]
    ContainerFull { current: u32, max: u32 },

    /// Not enough coins or items to pay a cost
    #[error("Cannot afford: need {need}, have {have}")]
    CannotAfford { need: u32, have: u32 },

    /// Target exists but is too far away to interact with
    #[error("Out of range: {0}")]
    OutOfRange(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    pub fn invalid_state_transition(msg: impl Into<String>) -> Self {
        Self::InvalidStateTransition(msg.into())
    }

    pub fn container_full(current: u32, max: u32) -> Self {
        Self::ContainerFull { current, max }
    }

    pub fn cannot_afford(need: u32, have: u32) -> Self {
        Self::CannotAfford { need, have }
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::OutOfRange(msg.into())
    }

    /// Short message suitable for sending to a player as feedback.
    pub fn player_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::Constraint(msg) => msg.clone(),
            Self::NotFound { entity_type, .. } => format!("No such {entity_type} here."),
            Self::InvalidStateTransition(msg) => msg.clone(),
            Self::ContainerFull { max, .. } => format!("Already carrying {max} of those."),
            Self::CannotAfford { need, have } => {
                format!("That costs {need} coins and you have {have}.")
            }
            Self::OutOfRange(msg) => msg.clone(),
        }
    }
}
