//! Team position reports: geofence classification, exit alerts and the
//! throttled operator position feed.

use std::time::SystemTime;

use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::SessionStatus,
    dto::{
        format_system_time,
        play::{PositionRequest, PositionResponse},
        sse::{GeofenceAlertEvent, TeamPositionEvent},
    },
    error::ServiceError,
    services::{
        access::{ensure_status, load_session, resolve_team},
        geometry::{self, GeoPoint},
        sse_events,
    },
    state::SharedState,
};

/// Whether `position` lies outside the session play area.
///
/// Sessions without a usable polygon never report a team outside.
pub fn is_outside(geofence: &[GeoPoint], position: GeoPoint) -> bool {
    geometry::geofence_enabled(geofence) && !geometry::in_polygon(position, geofence)
}

/// Record a team position, alert on geofence exits and feed the operator map.
pub async fn update_position(
    state: &SharedState,
    session_id: Uuid,
    request: PositionRequest,
) -> Result<PositionResponse, ServiceError> {
    request.validate()?;

    let store = state.require_store().await?;
    let session = load_session(&store, session_id).await?;
    ensure_status(&session, &[SessionStatus::Active, SessionStatus::Paused])?;
    let team = resolve_team(&store, session_id, &request.team_token).await?;

    let position = GeoPoint::new(request.lat, request.lng);
    let outside = is_outside(&session.geofence, position);
    let now = SystemTime::now();

    let previous = store
        .record_team_position(team.id, position, outside, now)
        .await?
        .ok_or_else(|| ServiceError::Auth("unknown team token".into()))?;

    let at = format_system_time(now);
    if outside && !previous.is_outside_geofence {
        warn!(%session_id, team_id = %team.id, lat = position.lat, lng = position.lng, "team left the play area");
        sse_events::broadcast_geofence_alert(
            state,
            &GeofenceAlertEvent {
                session_id,
                team_id: team.id,
                team_name: team.name.clone(),
                position,
                at: at.clone(),
            },
        );
    } else if !outside && previous.is_outside_geofence {
        info!(%session_id, team_id = %team.id, "team back inside the play area");
    }

    let claimed = store
        .claim_position_broadcast(team.id, now, state.config().position_broadcast_interval)
        .await?;
    if claimed {
        sse_events::broadcast_team_position(
            state,
            &TeamPositionEvent {
                session_id,
                team_id: team.id,
                team_name: team.name,
                position,
                is_outside_geofence: outside,
                at,
            },
        );
    }

    Ok(PositionResponse {
        is_outside_geofence: outside,
        throttled: !claimed,
    })
}
