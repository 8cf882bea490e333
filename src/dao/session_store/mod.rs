pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::{Duration, SystemTime};

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{
    AggregateDelta, CheckpointEntity, ScoreAggregateEntity, SessionEntity, SessionStatus,
    StatusUpdate, SubmissionEntity, TeamEntity,
};
use crate::dao::storage::StorageResult;
use crate::services::geometry::GeoPoint;

/// Abstraction over the durable store backing sessions, teams and scores.
///
/// Every mutating operation that can race between concurrent requests is a
/// single store-side statement (compare-and-set, atomic increment, upsert or
/// unique insert) so correctness never depends on application-level locks.
pub trait SessionStore: Send + Sync {
    /// Insert a session; duplicate join codes are rejected.
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Session by id.
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Session by its join code.
    fn find_session_by_join_code(
        &self,
        join_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Move the session from `from` to `update.to`; `None` when the status no longer matches.
    fn transition_session_status(
        &self,
        id: Uuid,
        from: SessionStatus,
        update: StatusUpdate,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;

    /// Insert or replace a checkpoint.
    fn save_checkpoint(&self, checkpoint: CheckpointEntity)
    -> BoxFuture<'static, StorageResult<()>>;
    /// Checkpoint by id.
    fn find_checkpoint(&self, id: Uuid)
    -> BoxFuture<'static, StorageResult<Option<CheckpointEntity>>>;
    /// Checkpoints of a tour ordered by `order_index`.
    fn list_checkpoints(&self, tour_id: Uuid)
    -> BoxFuture<'static, StorageResult<Vec<CheckpointEntity>>>;

    /// Insert a team; duplicate tokens are rejected.
    fn insert_team(&self, team: TeamEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Team by id.
    fn find_team(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>>;
    /// Team holding `token` within the session.
    fn find_team_by_token(
        &self,
        session_id: Uuid,
        token: String,
    ) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>>;
    /// Teams that joined the session.
    fn list_teams(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<TeamEntity>>>;
    /// Increment the checkpoint index and append the id, only when the team is
    /// still at `expected_index` and has not unlocked the checkpoint yet.
    fn advance_team_checkpoint(
        &self,
        team_id: Uuid,
        expected_index: u32,
        checkpoint_id: Uuid,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Persist the last position and classification, returning the team as it was before.
    fn record_team_position(
        &self,
        team_id: Uuid,
        position: GeoPoint,
        outside: bool,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>>;
    /// Stamp `last_position_broadcast_at` when the previous stamp is older than `window`
    /// or `window` is zero.
    fn claim_position_broadcast(
        &self,
        team_id: Uuid,
        at: SystemTime,
        window: Duration,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Stamp `last_submission_at` when the previous stamp is older than `window`
    /// or `window` is zero.
    fn claim_submission_slot(
        &self,
        team_id: Uuid,
        at: SystemTime,
        window: Duration,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Atomically add to the team score and bonus counters.
    fn increment_team_score(
        &self,
        team_id: Uuid,
        gms: u32,
        bonus: u32,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Insert a submission; a second one for the same (team, checkpoint) is a duplicate.
    fn insert_submission(&self, submission: SubmissionEntity)
    -> BoxFuture<'static, StorageResult<()>>;
    /// The team's submission for a checkpoint, if any.
    fn find_submission(
        &self,
        team_id: Uuid,
        checkpoint_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SubmissionEntity>>>;
    /// Number of submissions the team has made.
    fn count_team_submissions(&self, team_id: Uuid) -> BoxFuture<'static, StorageResult<u64>>;
    /// Submissions of a session ordered by creation time.
    fn list_submissions(&self, session_id: Uuid)
    -> BoxFuture<'static, StorageResult<Vec<SubmissionEntity>>>;

    /// Insert-or-increment the (session, team) aggregate in one statement.
    fn upsert_score_aggregate(&self, delta: AggregateDelta)
    -> BoxFuture<'static, StorageResult<()>>;
    /// Aggregates of every scored team in the session.
    fn list_score_aggregates(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoreAggregateEntity>>>;

    /// Short backend name reported by the health endpoint.
    fn backend(&self) -> &'static str;
    /// Cheap round trip to the backend.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Whether a stamp leaves room for a new claim at `at`.
pub(crate) fn window_elapsed(last: Option<SystemTime>, at: SystemTime, window: Duration) -> bool {
    match last {
        None => true,
        Some(_) if window.is_zero() => true,
        Some(last) => at
            .duration_since(last)
            .map(|elapsed| elapsed >= window)
            // A stamp in the future (clock skew between instances) blocks the claim.
            .unwrap_or(false),
    }
}
