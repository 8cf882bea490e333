use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::geometry::GeoPoint;

/// Upper bound of a single GMS dimension, both for checkpoint weights and oracle scores.
pub const MAX_DIMENSION_POINTS: u32 = 25;

/// Lifecycle status of a played session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Booked but not yet opened to teams.
    Draft,
    /// Teams may join, play has not started.
    Lobby,
    /// Play in progress.
    Active,
    /// Play temporarily halted by the operator.
    Paused,
    /// Play finished normally.
    Completed,
    /// Session abandoned.
    Cancelled,
}

impl SessionStatus {
    /// Terminal statuses accept no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    /// Wire name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Draft => "draft",
            SessionStatus::Lobby => "lobby",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Product variant of a session, driving content-safety rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionVariant {
    /// General audience.
    #[default]
    Standard,
    /// Corporate team-building.
    Corporate,
    /// Children's party.
    Kids,
    /// School outing.
    School,
}

impl SessionVariant {
    /// Variants whose photos must be scheduled for deletion.
    pub fn is_kids_safe(self) -> bool {
        matches!(self, SessionVariant::Kids | SessionVariant::School)
    }
}

/// One played instance of a tour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEntity {
    /// Stable identifier for the session.
    pub id: Uuid,
    /// Tour whose checkpoints are played.
    pub tour_id: Uuid,
    /// Display name.
    pub name: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Product variant.
    pub variant: SessionVariant,
    /// Skips unlock distance checks when set.
    pub is_test_mode: bool,
    /// Allowed play area; fewer than three vertices disables geofencing.
    pub geofence: Vec<GeoPoint>,
    /// Short code teams use to join.
    pub join_code: String,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// First time the session entered `active`.
    pub started_at: Option<SystemTime>,
    /// Time the session entered `completed`.
    pub completed_at: Option<SystemTime>,
    /// Last status change.
    pub updated_at: SystemTime,
}

/// Mission text revealed once the checkpoint is unlocked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissionEntity {
    /// Mission heading.
    pub title: String,
    /// Task the team has to complete.
    pub description: String,
    /// Optional hints, in reveal order.
    pub hints: Vec<String>,
}

/// Geofenced point of interest gating a mission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointEntity {
    /// Stable identifier for the checkpoint.
    pub id: Uuid,
    /// Tour the checkpoint belongs to.
    pub tour_id: Uuid,
    /// Zero-based position in the tour sequence.
    pub order_index: u32,
    /// Public name shown before unlock.
    pub name: String,
    /// Checkpoint location.
    pub location: GeoPoint,
    /// Maximum unlock distance, in meters.
    pub unlock_radius_m: f64,
    /// Per-dimension caps, each in `0..=25`.
    pub weights: DimensionScores,
    /// Extra points awarded when a photo is submitted.
    pub bonus_photo_points: u32,
    /// Mission content.
    pub mission: MissionEntity,
}

/// Values for the four GMS dimensions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
pub struct DimensionScores {
    /// Connection points.
    pub connection: u32,
    /// Meaning points.
    pub meaning: u32,
    /// Joy points.
    pub joy: u32,
    /// Growth points.
    pub growth: u32,
}

impl DimensionScores {
    /// Build a set of scores from the four dimension values.
    pub const fn new(connection: u32, meaning: u32, joy: u32, growth: u32) -> Self {
        Self {
            connection,
            meaning,
            joy,
            growth,
        }
    }

    /// Sum of the four dimensions.
    pub fn total(&self) -> u32 {
        self.connection + self.meaning + self.joy + self.growth
    }

    /// Whether every dimension is within `0..=25`.
    pub fn within_dimension_cap(&self) -> bool {
        [self.connection, self.meaning, self.joy, self.growth]
            .iter()
            .all(|value| *value <= MAX_DIMENSION_POINTS)
    }

    /// Apply `f` to every dimension.
    pub fn map(self, mut f: impl FnMut(u32) -> u32) -> Self {
        Self {
            connection: f(self.connection),
            meaning: f(self.meaning),
            joy: f(self.joy),
            growth: f(self.growth),
        }
    }

    /// Combine two score sets dimension by dimension.
    pub fn zip_with(self, other: Self, mut f: impl FnMut(u32, u32) -> u32) -> Self {
        Self {
            connection: f(self.connection, other.connection),
            meaning: f(self.meaning, other.meaning),
            joy: f(self.joy, other.joy),
            growth: f(self.growth, other.growth),
        }
    }
}

/// Unrounded oracle verdict per dimension, each in `0.0..=25.0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct OracleDimensions {
    /// Connection verdict.
    pub connection: f64,
    /// Meaning verdict.
    pub meaning: f64,
    /// Joy verdict.
    pub joy: f64,
    /// Growth verdict.
    pub growth: f64,
}

impl OracleDimensions {
    /// Scale each dimension by its weight cap, rounding only the result.
    pub fn scale(&self, weights: DimensionScores) -> DimensionScores {
        let cap = f64::from(MAX_DIMENSION_POINTS);
        let earned = |d: f64, w: u32| (d / cap * f64::from(w)).round() as u32;
        DimensionScores {
            connection: earned(self.connection, weights.connection),
            meaning: earned(self.meaning, weights.meaning),
            joy: earned(self.joy, weights.joy),
            growth: earned(self.growth, weights.growth),
        }
    }
}

impl std::ops::Add for DimensionScores {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.zip_with(rhs, |a, b| a + b)
    }
}

/// Participant unit identified by an opaque token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamEntity {
    /// Stable identifier for the team.
    pub id: Uuid,
    /// Session the team plays in.
    pub session_id: Uuid,
    /// Display name.
    pub name: String,
    /// Opaque credential presented on every request.
    pub token: String,
    /// Order index of the next checkpoint to unlock.
    pub current_checkpoint_index: u32,
    /// Unlocked checkpoints, in unlock order.
    pub completed_checkpoints: Vec<Uuid>,
    /// Sum of GMS earned across submissions.
    pub total_gms_score: u32,
    /// Sum of photo bonuses.
    pub bonus_points: u32,
    /// Last reported position.
    pub last_position: Option<GeoPoint>,
    /// Whether the last position was outside the geofence.
    pub is_outside_geofence: bool,
    /// Time of the last position report.
    pub last_position_at: Option<SystemTime>,
    /// Time of the last accepted submission attempt.
    pub last_submission_at: Option<SystemTime>,
    /// Time of the last pushed position broadcast.
    pub last_position_broadcast_at: Option<SystemTime>,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last time this team was updated.
    pub updated_at: SystemTime,
}

impl TeamEntity {
    /// Fresh team positioned before the first checkpoint.
    pub fn new(session_id: Uuid, name: String, token: String, now: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            name,
            token,
            current_checkpoint_index: 0,
            completed_checkpoints: Vec::new(),
            total_gms_score: 0,
            bonus_points: 0,
            last_position: None,
            is_outside_geofence: false,
            last_position_at: None,
            last_submission_at: None,
            last_position_broadcast_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the team already unlocked the checkpoint.
    pub fn has_unlocked(&self, checkpoint_id: Uuid) -> bool {
        self.completed_checkpoints.contains(&checkpoint_id)
    }
}

/// How the points of a submission were computed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    /// Scaled from the scoring oracle verdict.
    Oracle,
    /// Fixed proportional fallback.
    Fallback,
}

impl ScoringMethod {
    /// Wire name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ScoringMethod::Oracle => "oracle",
            ScoringMethod::Fallback => "fallback",
        }
    }
}

/// Scoring details stored with each submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringBreakdown {
    /// Which scoring path produced the points.
    pub method: ScoringMethod,
    /// Oracle overall score, 0..=100.
    pub ai_score: Option<u32>,
    /// Raw oracle per-dimension verdict, 0..=25 each, as returned.
    pub oracle: Option<OracleDimensions>,
    /// Points actually awarded per dimension.
    pub earned: DimensionScores,
}

/// Write-once answer/photo submission for a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionEntity {
    /// Submission identifier.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Submitting team.
    pub team_id: Uuid,
    /// Checkpoint answered; unique per team.
    pub checkpoint_id: Uuid,
    /// Normalized text answer.
    pub answer: Option<String>,
    /// Uploaded photo location.
    pub photo_url: Option<String>,
    /// How the points were computed.
    pub breakdown: ScoringBreakdown,
    /// Dimension points awarded.
    pub gms_earned: u32,
    /// Photo bonus awarded.
    pub bonus_earned: u32,
    /// Feedback shown to the team.
    pub feedback: String,
    /// Acceptance time.
    pub created_at: SystemTime,
    /// Set for kids-safety variants; the photo is purged by external housekeeping.
    pub scheduled_deletion_at: Option<SystemTime>,
}

/// Entry appended to the aggregate for each scored checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct CheckpointResultEntity {
    /// Scored checkpoint.
    pub checkpoint_id: Uuid,
    /// Dimension points awarded.
    pub gms_earned: u32,
    /// Per-dimension split of `gms_earned`.
    pub earned: DimensionScores,
    /// Photo bonus awarded.
    pub bonus_earned: u32,
    /// Scoring path used.
    pub method: ScoringMethod,
    /// Submission time.
    #[schema(value_type = String)]
    pub submitted_at: SystemTime,
}

/// Denormalized running totals for one team in one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreAggregateEntity {
    /// Session the totals belong to.
    pub session_id: Uuid,
    /// Team the totals belong to.
    pub team_id: Uuid,
    /// Running sums per dimension.
    pub totals: DimensionScores,
    /// Sum of `gms_earned`.
    pub total_gms: u32,
    /// Sum of photo bonuses.
    pub bonus_points: u32,
    /// Number of scored checkpoints.
    pub checkpoints_count: u32,
    /// One entry per scored checkpoint, in arrival order.
    pub results: Vec<CheckpointResultEntity>,
    /// Narrative summary written by the reporting collaborator.
    pub insight: Option<String>,
    /// First upsert time.
    pub created_at: SystemTime,
    /// Last upsert time.
    pub updated_at: SystemTime,
}

/// Increment applied to a team aggregate for one new submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateDelta {
    /// Target session.
    pub session_id: Uuid,
    /// Target team.
    pub team_id: Uuid,
    /// Entry to append and add to the totals.
    pub result: CheckpointResultEntity,
}

impl From<&SubmissionEntity> for AggregateDelta {
    fn from(submission: &SubmissionEntity) -> Self {
        Self {
            session_id: submission.session_id,
            team_id: submission.team_id,
            result: CheckpointResultEntity {
                checkpoint_id: submission.checkpoint_id,
                gms_earned: submission.gms_earned,
                earned: submission.breakdown.earned,
                bonus_earned: submission.bonus_earned,
                method: submission.breakdown.method,
                submitted_at: submission.created_at,
            },
        }
    }
}

/// Timestamps written alongside a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    /// New status.
    pub to: SessionStatus,
    /// Transition time.
    pub at: SystemTime,
    /// Write `started_at` at `at`.
    pub stamp_started: bool,
    /// Write `completed_at` at `at`.
    pub stamp_completed: bool,
}
