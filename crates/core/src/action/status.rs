//! Action status vocabulary

use serde::{Deserialize, Serialize};

/// Lifecycle status of an action
///
/// Serialized with the schema.org `ActionStatusType` names. Short forms
/// (`Active`, `active`) are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ActionStatus {
    /// Declared but not started
    #[default]
    #[serde(
        rename = "PotentialActionStatus",
        alias = "Potential",
        alias = "potential"
    )]
    Potential,

    /// Currently running
    #[serde(rename = "ActiveActionStatus", alias = "Active", alias = "active")]
    Active,

    /// Finished successfully
    #[serde(
        rename = "CompletedActionStatus",
        alias = "Completed",
        alias = "completed"
    )]
    Completed,

    /// Finished with an error
    #[serde(rename = "FailedActionStatus", alias = "Failed", alias = "failed")]
    Failed,

    /// Suspended by an operator; may resume
    #[serde(rename = "PausedActionStatus", alias = "Paused", alias = "paused")]
    Paused,
}

impl ActionStatus {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check whether moving to `next` is allowed
    ///
    /// Status only moves forward, except Active and Paused which may
    /// alternate. Re-asserting the current status is always allowed.
    pub fn can_transition_to(&self, next: ActionStatus) -> bool {
        if *self == next {
            return true;
        }

        match self {
            Self::Potential => matches!(next, Self::Active | Self::Completed | Self::Failed),
            Self::Active => matches!(next, Self::Paused | Self::Completed | Self::Failed),
            Self::Paused => matches!(next, Self::Active | Self::Failed),
            Self::Completed | Self::Failed => false,
        }
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(self, next: ActionStatus) -> Result<ActionStatus, StatusTransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StatusTransitionError {
                from: self,
                to: next,
            })
        }
    }

    /// Schema.org name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Potential => "PotentialActionStatus",
            Self::Active => "ActiveActionStatus",
            Self::Completed => "CompletedActionStatus",
            Self::Failed => "FailedActionStatus",
            Self::Paused => "PausedActionStatus",
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal action status transition: {from} -> {to}")]
pub struct StatusTransitionError {
    pub from: ActionStatus,
    pub to: ActionStatus,
}
