use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::{
    dao::models::{
        CheckpointEntity, CheckpointResultEntity, DimensionScores, MissionEntity,
        ScoreAggregateEntity, ScoringBreakdown, SessionEntity, SessionStatus, SessionVariant,
        SubmissionEntity, TeamEntity,
    },
    services::geometry::GeoPoint,
};

// Collection names; the index set in `connection` refers to the same names.
pub const SESSION_COLLECTION_NAME: &str = "sessions";
pub const CHECKPOINT_COLLECTION_NAME: &str = "checkpoints";
pub const TEAM_COLLECTION_NAME: &str = "teams";
pub const SUBMISSION_COLLECTION_NAME: &str = "submissions";
pub const AGGREGATE_COLLECTION_NAME: &str = "score_aggregates";

fn parse_id(collection: &'static str, raw: &str) -> MongoResult<Uuid> {
    Uuid::parse_str(raw).map_err(|source| MongoDaoError::MalformedId { collection, source })
}

/// Filter matching a document by its UUID `_id`.
pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

/// Stored form of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    tour_id: String,
    name: String,
    status: SessionStatus,
    variant: SessionVariant,
    is_test_mode: bool,
    geofence: Vec<GeoPoint>,
    join_code: String,
    created_at: DateTime,
    started_at: Option<DateTime>,
    completed_at: Option<DateTime>,
    updated_at: DateTime,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            tour_id: value.tour_id.to_string(),
            name: value.name,
            status: value.status,
            variant: value.variant,
            is_test_mode: value.is_test_mode,
            geofence: value.geofence,
            join_code: value.join_code,
            created_at: DateTime::from_system_time(value.created_at),
            started_at: value.started_at.map(DateTime::from_system_time),
            completed_at: value.completed_at.map(DateTime::from_system_time),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(SESSION_COLLECTION_NAME, &value.id)?,
            tour_id: parse_id(SESSION_COLLECTION_NAME, &value.tour_id)?,
            name: value.name,
            status: value.status,
            variant: value.variant,
            is_test_mode: value.is_test_mode,
            geofence: value.geofence,
            join_code: value.join_code,
            created_at: value.created_at.to_system_time(),
            started_at: value.started_at.map(DateTime::to_system_time),
            completed_at: value.completed_at.map(DateTime::to_system_time),
            updated_at: value.updated_at.to_system_time(),
        })
    }
}

/// Stored form of a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoCheckpointDocument {
    #[serde(rename = "_id")]
    id: String,
    tour_id: String,
    order_index: u32,
    name: String,
    location: GeoPoint,
    unlock_radius_m: f64,
    weights: DimensionScores,
    bonus_photo_points: u32,
    mission: MissionEntity,
}

impl From<CheckpointEntity> for MongoCheckpointDocument {
    fn from(value: CheckpointEntity) -> Self {
        Self {
            id: value.id.to_string(),
            tour_id: value.tour_id.to_string(),
            order_index: value.order_index,
            name: value.name,
            location: value.location,
            unlock_radius_m: value.unlock_radius_m,
            weights: value.weights,
            bonus_photo_points: value.bonus_photo_points,
            mission: value.mission,
        }
    }
}

impl TryFrom<MongoCheckpointDocument> for CheckpointEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoCheckpointDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(CHECKPOINT_COLLECTION_NAME, &value.id)?,
            tour_id: parse_id(CHECKPOINT_COLLECTION_NAME, &value.tour_id)?,
            order_index: value.order_index,
            name: value.name,
            location: value.location,
            unlock_radius_m: value.unlock_radius_m,
            weights: value.weights,
            bonus_photo_points: value.bonus_photo_points,
            mission: value.mission,
        })
    }
}

/// Stored form of a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoTeamDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    name: String,
    token: String,
    current_checkpoint_index: u32,
    completed_checkpoints: Vec<String>,
    total_gms_score: u32,
    bonus_points: u32,
    last_position: Option<GeoPoint>,
    is_outside_geofence: bool,
    last_position_at: Option<DateTime>,
    last_submission_at: Option<DateTime>,
    last_position_broadcast_at: Option<DateTime>,
    created_at: DateTime,
    updated_at: DateTime,
}

impl From<TeamEntity> for MongoTeamDocument {
    fn from(value: TeamEntity) -> Self {
        Self {
            id: value.id.to_string(),
            session_id: value.session_id.to_string(),
            name: value.name,
            token: value.token,
            current_checkpoint_index: value.current_checkpoint_index,
            completed_checkpoints: value
                .completed_checkpoints
                .iter()
                .map(Uuid::to_string)
                .collect(),
            total_gms_score: value.total_gms_score,
            bonus_points: value.bonus_points,
            last_position: value.last_position,
            is_outside_geofence: value.is_outside_geofence,
            last_position_at: value.last_position_at.map(DateTime::from_system_time),
            last_submission_at: value.last_submission_at.map(DateTime::from_system_time),
            last_position_broadcast_at: value
                .last_position_broadcast_at
                .map(DateTime::from_system_time),
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl TryFrom<MongoTeamDocument> for TeamEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoTeamDocument) -> MongoResult<Self> {
        let completed_checkpoints = value
            .completed_checkpoints
            .iter()
            .map(|raw| parse_id(TEAM_COLLECTION_NAME, raw))
            .collect::<MongoResult<Vec<_>>>()?;

        Ok(Self {
            id: parse_id(TEAM_COLLECTION_NAME, &value.id)?,
            session_id: parse_id(TEAM_COLLECTION_NAME, &value.session_id)?,
            name: value.name,
            token: value.token,
            current_checkpoint_index: value.current_checkpoint_index,
            completed_checkpoints,
            total_gms_score: value.total_gms_score,
            bonus_points: value.bonus_points,
            last_position: value.last_position,
            is_outside_geofence: value.is_outside_geofence,
            last_position_at: value.last_position_at.map(DateTime::to_system_time),
            last_submission_at: value.last_submission_at.map(DateTime::to_system_time),
            last_position_broadcast_at: value
                .last_position_broadcast_at
                .map(DateTime::to_system_time),
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        })
    }
}

/// Stored form of a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSubmissionDocument {
    #[serde(rename = "_id")]
    id: String,
    session_id: String,
    team_id: String,
    checkpoint_id: String,
    answer: Option<String>,
    photo_url: Option<String>,
    breakdown: ScoringBreakdown,
    gms_earned: u32,
    bonus_earned: u32,
    feedback: String,
    created_at: DateTime,
    scheduled_deletion_at: Option<DateTime>,
}

impl From<SubmissionEntity> for MongoSubmissionDocument {
    fn from(value: SubmissionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            session_id: value.session_id.to_string(),
            team_id: value.team_id.to_string(),
            checkpoint_id: value.checkpoint_id.to_string(),
            answer: value.answer,
            photo_url: value.photo_url,
            breakdown: value.breakdown,
            gms_earned: value.gms_earned,
            bonus_earned: value.bonus_earned,
            feedback: value.feedback,
            created_at: DateTime::from_system_time(value.created_at),
            scheduled_deletion_at: value.scheduled_deletion_at.map(DateTime::from_system_time),
        }
    }
}

impl TryFrom<MongoSubmissionDocument> for SubmissionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSubmissionDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_id(SUBMISSION_COLLECTION_NAME, &value.id)?,
            session_id: parse_id(SUBMISSION_COLLECTION_NAME, &value.session_id)?,
            team_id: parse_id(SUBMISSION_COLLECTION_NAME, &value.team_id)?,
            checkpoint_id: parse_id(SUBMISSION_COLLECTION_NAME, &value.checkpoint_id)?,
            answer: value.answer,
            photo_url: value.photo_url,
            breakdown: value.breakdown,
            gms_earned: value.gms_earned,
            bonus_earned: value.bonus_earned,
            feedback: value.feedback,
            created_at: value.created_at.to_system_time(),
            scheduled_deletion_at: value.scheduled_deletion_at.map(DateTime::to_system_time),
        })
    }
}

/// Stored form of one aggregate result entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoResultDocument {
    checkpoint_id: String,
    gms_earned: u32,
    earned: DimensionScores,
    bonus_earned: u32,
    method: crate::dao::models::ScoringMethod,
    submitted_at: DateTime,
}

impl MongoResultDocument {
    /// Build the BSON form pushed by the aggregate upsert.
    pub fn to_document(result: &CheckpointResultEntity) -> Document {
        doc! {
            "checkpoint_id": result.checkpoint_id.to_string(),
            "gms_earned": i64::from(result.gms_earned),
            "earned": dimensions_document(&result.earned),
            "bonus_earned": i64::from(result.bonus_earned),
            "method": result.method.as_str(),
            "submitted_at": DateTime::from_system_time(result.submitted_at),
        }
    }
}

impl TryFrom<MongoResultDocument> for CheckpointResultEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoResultDocument) -> MongoResult<Self> {
        Ok(Self {
            checkpoint_id: parse_id(AGGREGATE_COLLECTION_NAME, &value.checkpoint_id)?,
            gms_earned: value.gms_earned,
            earned: value.earned,
            bonus_earned: value.bonus_earned,
            method: value.method,
            submitted_at: value.submitted_at.to_system_time(),
        })
    }
}

fn dimensions_document(scores: &DimensionScores) -> Document {
    doc! {
        "connection": i64::from(scores.connection),
        "meaning": i64::from(scores.meaning),
        "joy": i64::from(scores.joy),
        "growth": i64::from(scores.growth),
    }
}

/// Stored form of a team score aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAggregateDocument {
    session_id: String,
    team_id: String,
    totals: DimensionScores,
    total_gms: u32,
    bonus_points: u32,
    checkpoints_count: u32,
    results: Vec<MongoResultDocument>,
    insight: Option<String>,
    created_at: DateTime,
    updated_at: DateTime,
}

impl TryFrom<MongoAggregateDocument> for ScoreAggregateEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoAggregateDocument) -> MongoResult<Self> {
        let results = value
            .results
            .into_iter()
            .map(CheckpointResultEntity::try_from)
            .collect::<MongoResult<Vec<_>>>()?;

        Ok(Self {
            session_id: parse_id(AGGREGATE_COLLECTION_NAME, &value.session_id)?,
            team_id: parse_id(AGGREGATE_COLLECTION_NAME, &value.team_id)?,
            totals: value.totals,
            total_gms: value.total_gms,
            bonus_points: value.bonus_points,
            checkpoints_count: value.checkpoints_count,
            results,
            insight: value.insight,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        })
    }
}
