//! Action model
//!
//! This module contains the typed representation of a workflow action:
//! - [`SemanticAction`] / [`SemanticScheduledAction`] for the action itself
//! - [`ActionStatus`] for its lifecycle
//! - [`Schedule`] and [`ControlMetadata`] for scheduling and execution control

mod control;
pub(crate) mod references;
mod schedule;
mod semantic;
mod status;

pub use control::{BackoffStrategy, ControlMetadata};
pub use schedule::Schedule;
pub use semantic::{SemanticAction, SemanticScheduledAction, TargetRoute};
pub use status::{ActionStatus, StatusTransitionError};
