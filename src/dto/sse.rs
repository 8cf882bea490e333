use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{dao::models::SessionStatus, services::geometry::GeoPoint};

#[derive(Clone, Debug, PartialEq)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    /// SSE event name; `None` sends an unnamed message.
    pub event: Option<String>,
    /// Serialized payload.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// First event of an operator stream, carrying the token for operator routes.
pub struct OperatorHandshake {
    /// Value for the `x-operator-token` header.
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
/// A team unlocked its next checkpoint.
pub struct CheckpointUnlockedEvent {
    /// Session of the team.
    pub session_id: Uuid,
    /// Unlocking team.
    pub team_id: Uuid,
    /// Team name.
    pub team_name: String,
    /// Unlocked checkpoint.
    pub checkpoint_id: Uuid,
    /// Position of the unlocked checkpoint.
    pub order_index: u32,
    /// Index of the next checkpoint to unlock.
    pub current_checkpoint_index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
/// A team score changed.
pub struct ScoreUpdateEvent {
    /// Session of the team.
    pub session_id: Uuid,
    /// Scoring team.
    pub team_id: Uuid,
    /// Team name.
    pub team_name: String,
    /// New dimension point total.
    pub total_gms: u32,
    /// New photo bonus total.
    pub bonus_points: u32,
    /// Unlocked checkpoint count.
    pub checkpoints_completed: u32,
    /// Checkpoint that produced the change; absent when derived from a snapshot diff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
/// The session moved to a new status.
pub struct SessionStatusEvent {
    /// Session that changed.
    pub session_id: Uuid,
    /// New status.
    pub status: SessionStatus,
    /// Status before the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<SessionStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
/// Throttled live position of a team, operator channel only.
pub struct TeamPositionEvent {
    /// Session of the team.
    pub session_id: Uuid,
    /// Reporting team.
    pub team_id: Uuid,
    /// Team name.
    pub team_name: String,
    /// Reported position.
    pub position: GeoPoint,
    /// Geofence classification of `position`.
    pub is_outside_geofence: bool,
    /// RFC 3339 timestamp of the report.
    pub at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
/// A team left the allowed play area.
pub struct GeofenceAlertEvent {
    /// Session of the team.
    pub session_id: Uuid,
    /// Team that left the area.
    pub team_id: Uuid,
    /// Team name.
    pub team_name: String,
    /// Position outside the area.
    pub position: GeoPoint,
    /// RFC 3339 timestamp of the report.
    pub at: String,
}
