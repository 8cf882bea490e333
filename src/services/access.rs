//! Lookups shared by the team-facing services, each mapping a missing or
//! mismatched entity to the matching [`ServiceError`].

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    dao::{
        models::{CheckpointEntity, SessionEntity, SessionStatus, TeamEntity},
        session_store::SessionStore,
    },
    error::ServiceError,
};

pub(crate) async fn load_session(
    store: &Arc<dyn SessionStore>,
    session_id: Uuid,
) -> Result<SessionEntity, ServiceError> {
    store
        .find_session(session_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}`")))
}

/// Fail unless the session is in one of `allowed`.
pub(crate) fn ensure_status(
    session: &SessionEntity,
    allowed: &[SessionStatus],
) -> Result<(), ServiceError> {
    if allowed.contains(&session.status) {
        return Ok(());
    }
    Err(ServiceError::State(format!(
        "session is {}, operation requires {}",
        session.status,
        allowed
            .iter()
            .map(|status| status.as_str())
            .collect::<Vec<_>>()
            .join(" or ")
    )))
}

/// Resolve a team token within the session.
pub(crate) async fn resolve_team(
    store: &Arc<dyn SessionStore>,
    session_id: Uuid,
    token: &str,
) -> Result<TeamEntity, ServiceError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ServiceError::Auth("missing team token".into()));
    }
    store
        .find_team_by_token(session_id, token.to_owned())
        .await?
        .ok_or_else(|| ServiceError::Auth("unknown team token".into()))
}

/// Load a checkpoint and make sure it belongs to the session's tour.
pub(crate) async fn load_tour_checkpoint(
    store: &Arc<dyn SessionStore>,
    session: &SessionEntity,
    checkpoint_id: Uuid,
) -> Result<CheckpointEntity, ServiceError> {
    store
        .find_checkpoint(checkpoint_id)
        .await?
        .filter(|checkpoint| checkpoint.tour_id == session.tour_id)
        .ok_or_else(|| ServiceError::NotFound(format!("checkpoint `{checkpoint_id}`")))
}
