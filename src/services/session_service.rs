//! Session entry, operator status changes and the team snapshot.

use std::{collections::HashMap, time::SystemTime};

use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{SessionStatus, TeamEntity},
    dto::{
        session::{
            CheckpointView, JoinRequest, JoinResponse, MissionView, ScoreboardEntry,
            SessionHeader, SessionSnapshot, TeamProgress,
        },
        sse::SessionStatusEvent,
    },
    error::ServiceError,
    services::{
        access::{ensure_status, load_session, resolve_team},
        sse_events,
    },
    state::{SharedState, lifecycle},
};

/// Attempts at generating a unique team token before giving up.
const TOKEN_ATTEMPTS: usize = 3;

/// Create a team in the session identified by `join_code`.
pub async fn join(state: &SharedState, request: JoinRequest) -> Result<JoinResponse, ServiceError> {
    request.validate()?;

    let store = state.require_store().await?;
    let join_code = request.join_code.trim().to_uppercase();
    let session = store
        .find_session_by_join_code(join_code)
        .await?
        .ok_or_else(|| ServiceError::NotFound("session for join code".into()))?;
    ensure_status(&session, &[SessionStatus::Lobby, SessionStatus::Active])?;

    let name = request.team_name.trim().to_owned();
    for _ in 0..TOKEN_ATTEMPTS {
        let token = Uuid::new_v4().simple().to_string();
        let team = TeamEntity::new(session.id, name.clone(), token, SystemTime::now());
        match store.insert_team(team.clone()).await {
            Ok(()) => {
                info!(session_id = %session.id, team_id = %team.id, name = %team.name, "team joined");
                return Ok(JoinResponse {
                    session_id: session.id,
                    team_id: team.id,
                    token: team.token,
                });
            }
            Err(err) if err.is_duplicate() => {
                warn!(session_id = %session.id, "team token collision; regenerating");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(ServiceError::State("could not allocate a team token".into()))
}

/// Move the session to `to`, broadcasting the change.
pub async fn change_status(
    state: &SharedState,
    session_id: Uuid,
    to: SessionStatus,
) -> Result<SessionHeader, ServiceError> {
    let store = state.require_store().await?;
    let session = load_session(&store, session_id).await?;
    let previous = session.status;

    let update = lifecycle::plan_transition(&session, to, SystemTime::now())
        .map_err(|err| ServiceError::State(err.to_string()))?;
    let updated = store
        .transition_session_status(session_id, previous, update)
        .await?
        .ok_or_else(|| {
            ServiceError::State(format!("session status changed concurrently from {previous}"))
        })?;

    info!(%session_id, from = %previous, to = %updated.status, "session status changed");
    sse_events::broadcast_session_status(
        state,
        &SessionStatusEvent {
            session_id,
            status: updated.status,
            previous: Some(previous),
        },
    );

    Ok((&updated).into())
}

/// Everything a team client renders, also served to polling clients.
pub async fn snapshot(
    state: &SharedState,
    session_id: Uuid,
    team_token: &str,
) -> Result<SessionSnapshot, ServiceError> {
    let store = state.require_store().await?;
    let session = load_session(&store, session_id).await?;
    let team = resolve_team(&store, session_id, team_token).await?;

    let checkpoints = store.list_checkpoints(session.tour_id).await?;
    let mut results: HashMap<Uuid, _> = store
        .list_submissions(session_id)
        .await?
        .into_iter()
        .filter(|submission| submission.team_id == team.id)
        .map(|submission| (submission.checkpoint_id, submission))
        .collect();

    let checkpoints = checkpoints
        .into_iter()
        .map(|checkpoint| {
            // Missions beyond the team's current checkpoint stay hidden.
            let accessible = checkpoint.order_index <= team.current_checkpoint_index;
            let result = results.remove(&checkpoint.id).map(|submission| (&submission).into());
            CheckpointView {
                id: checkpoint.id,
                order_index: checkpoint.order_index,
                name: checkpoint.name,
                location: checkpoint.location,
                unlock_radius_m: checkpoint.unlock_radius_m,
                accessible,
                mission: accessible.then(|| MissionView {
                    title: checkpoint.mission.title,
                    description: checkpoint.mission.description,
                    hints: checkpoint.mission.hints,
                }),
                result,
            }
        })
        .collect();

    let mut scoreboard: Vec<ScoreboardEntry> = store
        .list_teams(session_id)
        .await?
        .into_iter()
        .map(|team| ScoreboardEntry {
            team_id: team.id,
            name: team.name,
            total_gms: team.total_gms_score,
            bonus_points: team.bonus_points,
            checkpoints_completed: team.completed_checkpoints.len() as u32,
        })
        .collect();
    scoreboard.sort_by(|a, b| {
        (b.total_gms + b.bonus_points)
            .cmp(&(a.total_gms + a.bonus_points))
            .then_with(|| a.name.cmp(&b.name))
    });

    Ok(SessionSnapshot {
        session: (&session).into(),
        team: TeamProgress {
            id: team.id,
            name: team.name,
            current_checkpoint_index: team.current_checkpoint_index,
            completed_checkpoints: team.completed_checkpoints,
            total_gms: team.total_gms_score,
            bonus_points: team.bonus_points,
            is_outside_geofence: team.is_outside_geofence,
        },
        checkpoints,
        scoreboard,
    })
}
