use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::{
    dao::models::{
        CheckpointResultEntity, DimensionScores, ScoreAggregateEntity, ScoringMethod,
        SessionEntity, SessionStatus, SessionVariant, SubmissionEntity,
    },
    dto::{
        format_system_time,
        validation::{validate_not_blank, validate_team_name},
    },
    services::geometry::GeoPoint,
};

/// Request used by a team to enter a session.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct JoinRequest {
    /// Code announced by the operator.
    pub join_code: String,
    /// Display name, unique enough for the scoreboard.
    pub team_name: String,
}

impl Validate for JoinRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_not_blank(&self.join_code) {
            errors.add("join_code", e);
        }
        if let Err(e) = validate_team_name(&self.team_name) {
            errors.add("team_name", e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Credentials handed to a freshly created team.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JoinResponse {
    /// Joined session.
    pub session_id: Uuid,
    /// Created team.
    pub team_id: Uuid,
    /// Opaque token presented on every team request.
    pub token: String,
}

/// Operator request moving the session to a new status.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct StatusChangeRequest {
    /// Target status.
    pub status: SessionStatus,
}

/// Public description of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SessionHeader {
    /// Session identifier.
    pub id: Uuid,
    /// Tour played in this session.
    pub tour_id: Uuid,
    /// Display name.
    pub name: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Audience variant.
    pub variant: SessionVariant,
    /// Whether unlock distance checks are skipped.
    pub is_test_mode: bool,
    /// Play area polygon; empty when geofencing is disabled.
    pub geofence: Vec<GeoPoint>,
    /// RFC 3339 time of the first activation.
    pub started_at: Option<String>,
    /// RFC 3339 completion time.
    pub completed_at: Option<String>,
}

impl From<&SessionEntity> for SessionHeader {
    fn from(session: &SessionEntity) -> Self {
        Self {
            id: session.id,
            tour_id: session.tour_id,
            name: session.name.clone(),
            status: session.status,
            variant: session.variant,
            is_test_mode: session.is_test_mode,
            geofence: session.geofence.clone(),
            started_at: session.started_at.map(format_system_time),
            completed_at: session.completed_at.map(format_system_time),
        }
    }
}

/// Progress of the requesting team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TeamProgress {
    /// Team identifier.
    pub id: Uuid,
    /// Team name.
    pub name: String,
    /// Index of the next checkpoint to unlock.
    pub current_checkpoint_index: u32,
    /// Unlocked checkpoints, in unlock order.
    pub completed_checkpoints: Vec<Uuid>,
    /// Dimension points so far.
    pub total_gms: u32,
    /// Photo bonus so far.
    pub bonus_points: u32,
    /// Classification of the last reported position.
    pub is_outside_geofence: bool,
}

/// Mission content of an accessible checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MissionView {
    /// Mission heading.
    pub title: String,
    /// Task the team has to complete.
    pub description: String,
    /// Optional hints.
    pub hints: Vec<String>,
}

/// Scoring outcome of the team's own submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SubmissionResultView {
    /// Dimension points awarded.
    pub gms_earned: u32,
    /// Photo bonus awarded.
    pub bonus_earned: u32,
    /// Points per dimension.
    pub gms_breakdown: DimensionScores,
    /// Scoring path used.
    pub scoring_method: ScoringMethod,
    /// Feedback shown to the team.
    pub feedback: String,
    /// RFC 3339 submission time.
    pub submitted_at: String,
}

impl From<&SubmissionEntity> for SubmissionResultView {
    fn from(submission: &SubmissionEntity) -> Self {
        Self {
            gms_earned: submission.gms_earned,
            bonus_earned: submission.bonus_earned,
            gms_breakdown: submission.breakdown.earned,
            scoring_method: submission.breakdown.method,
            feedback: submission.feedback.clone(),
            submitted_at: format_system_time(submission.created_at),
        }
    }
}

/// Checkpoint as seen by a team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckpointView {
    /// Checkpoint identifier.
    pub id: Uuid,
    /// Position in the tour.
    pub order_index: u32,
    /// Checkpoint name.
    pub name: String,
    /// Checkpoint location.
    pub location: GeoPoint,
    /// Unlock radius, in meters.
    pub unlock_radius_m: f64,
    /// False for checkpoints past the team's current index.
    pub accessible: bool,
    /// Present only when `accessible`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission: Option<MissionView>,
    /// The team's scored submission, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<SubmissionResultView>,
}

/// One row of the live scoreboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ScoreboardEntry {
    /// Team identifier.
    pub team_id: Uuid,
    /// Team name.
    pub name: String,
    /// Dimension points.
    pub total_gms: u32,
    /// Photo bonus.
    pub bonus_points: u32,
    /// Unlocked checkpoint count.
    pub checkpoints_completed: u32,
}

/// Full state a team client needs to render, also used by the polling fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SessionSnapshot {
    /// Session header.
    pub session: SessionHeader,
    /// Requesting team's progress.
    pub team: TeamProgress,
    /// Tour checkpoints in order.
    pub checkpoints: Vec<CheckpointView>,
    /// All teams, highest score first.
    pub scoreboard: Vec<ScoreboardEntry>,
}

/// Where a report row was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    /// Denormalized aggregate row.
    Cache,
    /// Recomputed from raw submissions.
    Scan,
}

/// Per-checkpoint line of a team report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckpointResultView {
    /// Scored checkpoint.
    pub checkpoint_id: Uuid,
    /// Dimension points awarded.
    pub gms_earned: u32,
    /// Points per dimension.
    pub earned: DimensionScores,
    /// Photo bonus awarded.
    pub bonus_earned: u32,
    /// Scoring path used.
    pub method: ScoringMethod,
    /// RFC 3339 submission time.
    pub submitted_at: String,
}

impl From<&CheckpointResultEntity> for CheckpointResultView {
    fn from(result: &CheckpointResultEntity) -> Self {
        Self {
            checkpoint_id: result.checkpoint_id,
            gms_earned: result.gms_earned,
            earned: result.earned,
            bonus_earned: result.bonus_earned,
            method: result.method,
            submitted_at: format_system_time(result.submitted_at),
        }
    }
}

/// Aggregated scores of one team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TeamReport {
    /// Team identifier.
    pub team_id: Uuid,
    /// Team name.
    pub team_name: String,
    /// Whether the row came from the aggregate or a scan.
    pub source: ReportSource,
    /// Summed points per dimension.
    pub totals: DimensionScores,
    /// Summed dimension points.
    pub total_gms: u32,
    /// Summed photo bonus.
    pub bonus_points: u32,
    /// Scored checkpoint count.
    pub checkpoints_count: u32,
    /// Per-checkpoint lines.
    pub results: Vec<CheckpointResultView>,
    /// Narrative summary, when one was written.
    pub insight: Option<String>,
}

impl TeamReport {
    /// Build a report row from an aggregate, whichever way it was produced.
    pub fn from_aggregate(
        team_name: String,
        source: ReportSource,
        aggregate: &ScoreAggregateEntity,
    ) -> Self {
        Self {
            team_id: aggregate.team_id,
            team_name,
            source,
            totals: aggregate.totals,
            total_gms: aggregate.total_gms,
            bonus_points: aggregate.bonus_points,
            checkpoints_count: aggregate.checkpoints_count,
            results: aggregate.results.iter().map(Into::into).collect(),
            insight: aggregate.insight.clone(),
        }
    }
}

/// Operator-facing score report of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SessionReport {
    /// Session header.
    pub session: SessionHeader,
    /// Teams, highest score first.
    pub teams: Vec<TeamReport>,
}
