use std::time::SystemTime;

use thiserror::Error;

use crate::dao::models::{SessionEntity, SessionStatus, StatusUpdate};

/// Error returned when a status change is not allowed from the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot move session from {from} to {to}")]
pub struct InvalidTransition {
    /// Current status.
    pub from: SessionStatus,
    /// Requested status.
    pub to: SessionStatus,
}

/// Whether the lifecycle allows moving from `from` to `to`.
///
/// draft → lobby → active ⇄ paused → completed, with cancellation allowed
/// from every non-terminal status.
pub fn can_transition(from: SessionStatus, to: SessionStatus) -> bool {
    use SessionStatus::*;

    matches!(
        (from, to),
        (Draft, Lobby)
            | (Lobby, Active)
            | (Active, Paused)
            | (Paused, Active)
            | (Active, Completed)
            | (Paused, Completed)
            | (Draft | Lobby | Active | Paused, Cancelled)
    )
}

/// Compute the store update for moving `session` to `to` at `at`.
pub fn plan_transition(
    session: &SessionEntity,
    to: SessionStatus,
    at: SystemTime,
) -> Result<StatusUpdate, InvalidTransition> {
    let from = session.status;
    if !can_transition(from, to) {
        return Err(InvalidTransition { from, to });
    }

    Ok(StatusUpdate {
        to,
        at,
        // Resuming from pause keeps the original start time.
        stamp_started: to == SessionStatus::Active && session.started_at.is_none(),
        stamp_completed: to == SessionStatus::Completed,
    })
}
