use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dto::sse::{
        CheckpointUnlockedEvent, GeofenceAlertEvent, ScoreUpdateEvent, ServerEvent,
        SessionStatusEvent, TeamPositionEvent,
    },
    state::{Channel, SharedState},
};

/// Sent to everyone when a team unlocks a checkpoint.
pub const EVENT_CHECKPOINT_UNLOCKED: &str = "checkpoint-unlocked";
/// Sent to everyone when a team score changes.
pub const EVENT_SCORE_UPDATE: &str = "score-update";
/// Sent to everyone when the session status changes.
pub const EVENT_SESSION_STATUS: &str = "session-status";
/// Operator-only throttled team position.
pub const EVENT_TEAM_POSITION: &str = "team-position";
/// Operator-only alert for a team leaving the play area.
pub const EVENT_GEOFENCE_ALERT: &str = "geofence-alert";
/// First operator stream event, carrying the operator token.
pub const EVENT_OPERATOR_TOKEN: &str = "operator_token";

const EVERYONE: &[Channel] = &[Channel::Public, Channel::Operator];
const OPERATOR_ONLY: &[Channel] = &[Channel::Operator];

/// Broadcast that a team unlocked a checkpoint.
pub fn broadcast_checkpoint_unlocked(state: &SharedState, payload: &CheckpointUnlockedEvent) {
    publish_detached(state, payload.session_id, EVERYONE, EVENT_CHECKPOINT_UNLOCKED, payload);
}

/// Broadcast a team's new totals.
pub fn broadcast_score_update(state: &SharedState, payload: &ScoreUpdateEvent) {
    publish_detached(state, payload.session_id, EVERYONE, EVENT_SCORE_UPDATE, payload);
}

/// Broadcast a session status change.
pub fn broadcast_session_status(state: &SharedState, payload: &SessionStatusEvent) {
    publish_detached(state, payload.session_id, EVERYONE, EVENT_SESSION_STATUS, payload);
}

/// Broadcast a throttled team position to operators.
pub fn broadcast_team_position(state: &SharedState, payload: &TeamPositionEvent) {
    publish_detached(state, payload.session_id, OPERATOR_ONLY, EVENT_TEAM_POSITION, payload);
}

/// Alert operators that a team left the play area.
pub fn broadcast_geofence_alert(state: &SharedState, payload: &GeofenceAlertEvent) {
    publish_detached(state, payload.session_id, OPERATOR_ONLY, EVENT_GEOFENCE_ALERT, payload);
}

/// Serialize once and hand the event to the publisher from detached tasks.
///
/// Callers never wait for delivery; failures are logged and dropped.
fn publish_detached(
    state: &SharedState,
    session_id: Uuid,
    channels: &[Channel],
    event: &'static str,
    payload: &impl Serialize,
) {
    let message = match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(message) => message,
        Err(err) => {
            warn!(event, %session_id, error = %err, "failed to serialize SSE payload");
            return;
        }
    };

    for &channel in channels {
        let publisher = state.publisher();
        let message = message.clone();
        tokio::spawn(async move {
            if let Err(err) = publisher.publish(session_id, channel, message).await {
                warn!(event, %session_id, ?channel, error = %err, "failed to publish realtime event");
            }
        });
    }
}
