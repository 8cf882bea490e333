//! Sequential checkpoint gating.

use std::time::SystemTime;

use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::SessionStatus,
    dto::{
        play::{UnlockRequest, UnlockResponse},
        sse::CheckpointUnlockedEvent,
    },
    error::{DuplicateKind, ServiceError},
    services::{
        access::{ensure_status, load_session, load_tour_checkpoint, resolve_team},
        geometry::{self, GeoPoint},
        sse_events,
    },
    state::SharedState,
};

/// Unlock the team's next checkpoint when it stands close enough to it.
pub async fn attempt_unlock(
    state: &SharedState,
    session_id: Uuid,
    request: UnlockRequest,
) -> Result<UnlockResponse, ServiceError> {
    request.validate()?;

    let store = state.require_store().await?;
    let session = load_session(&store, session_id).await?;
    ensure_status(&session, &[SessionStatus::Active])?;
    let team = resolve_team(&store, session_id, &request.team_token).await?;
    let checkpoint = load_tour_checkpoint(&store, &session, request.checkpoint_id).await?;

    // Revisiting a completed checkpoint fails the ordering gate first.
    if checkpoint.order_index != team.current_checkpoint_index {
        return Err(ServiceError::Ordering {
            expected: team.current_checkpoint_index,
            requested: checkpoint.order_index,
        });
    }
    if team.has_unlocked(checkpoint.id) {
        return Err(ServiceError::Duplicate(DuplicateKind::Unlock));
    }

    let distance = geometry::distance(GeoPoint::new(request.lat, request.lng), checkpoint.location);
    let distance_m = distance.round() as u64;
    if session.is_test_mode {
        debug!(%session_id, team_id = %team.id, distance_m, "test mode; skipping distance check");
    } else if distance > checkpoint.unlock_radius_m {
        return Err(ServiceError::Geometry {
            distance_m,
            required_m: checkpoint.unlock_radius_m.round() as u64,
        });
    }

    let advanced = store
        .advance_team_checkpoint(
            team.id,
            team.current_checkpoint_index,
            checkpoint.id,
            SystemTime::now(),
        )
        .await?;

    if !advanced {
        // Another request moved the team first; report what it did.
        let current = store
            .find_team(team.id)
            .await?
            .ok_or_else(|| ServiceError::Auth("unknown team token".into()))?;
        return Err(if current.current_checkpoint_index != checkpoint.order_index {
            ServiceError::Ordering {
                expected: current.current_checkpoint_index,
                requested: checkpoint.order_index,
            }
        } else {
            ServiceError::Duplicate(DuplicateKind::Unlock)
        });
    }

    let current_checkpoint_index = team.current_checkpoint_index + 1;
    info!(
        %session_id,
        team_id = %team.id,
        checkpoint_id = %checkpoint.id,
        order_index = checkpoint.order_index,
        distance_m,
        "checkpoint unlocked"
    );

    sse_events::broadcast_checkpoint_unlocked(
        state,
        &CheckpointUnlockedEvent {
            session_id,
            team_id: team.id,
            team_name: team.name.clone(),
            checkpoint_id: checkpoint.id,
            order_index: checkpoint.order_index,
            current_checkpoint_index,
        },
    );

    Ok(UnlockResponse {
        checkpoint: (&checkpoint).into(),
        distance_m,
        current_checkpoint_index,
    })
}
