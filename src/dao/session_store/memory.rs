//! In-process store backed by [`DashMap`] shards.
//!
//! Each operation runs under the shard lock of the entry it touches, which
//! gives the same single-statement atomicity the MongoDB backend gets from
//! its update operators. State is lost on restart and not shared between
//! instances, so this backend is meant for single-instance deployments and
//! tests.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use uuid::Uuid;

use super::{SessionStore, window_elapsed};
use crate::{
    dao::{
        models::{
            AggregateDelta, CheckpointEntity, DimensionScores, ScoreAggregateEntity,
            SessionEntity, SessionStatus, StatusUpdate, SubmissionEntity, TeamEntity,
        },
        storage::{StorageError, StorageResult},
    },
    services::geometry::GeoPoint,
};

#[derive(Default)]
struct MemoryInner {
    sessions: DashMap<Uuid, SessionEntity>,
    join_codes: DashMap<String, Uuid>,
    checkpoints: DashMap<Uuid, CheckpointEntity>,
    teams: DashMap<Uuid, TeamEntity>,
    team_tokens: DashMap<String, Uuid>,
    submissions: DashMap<(Uuid, Uuid), SubmissionEntity>,
    aggregates: DashMap<(Uuid, Uuid), ScoreAggregateEntity>,
}

/// Store keeping every entity in memory.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_session(&self, session: SessionEntity) -> StorageResult<()> {
        match self.inner.join_codes.entry(session.join_code.clone()) {
            Entry::Occupied(_) => return Err(StorageError::Duplicate { what: "join code" }),
            Entry::Vacant(slot) => {
                slot.insert(session.id);
            }
        }
        self.inner.sessions.insert(session.id, session);
        Ok(())
    }

    fn find_session_by_join_code(&self, join_code: &str) -> Option<SessionEntity> {
        let id = *self.inner.join_codes.get(join_code)?;
        self.inner.sessions.get(&id).map(|entry| entry.clone())
    }

    fn transition_session_status(
        &self,
        id: Uuid,
        from: SessionStatus,
        update: StatusUpdate,
    ) -> Option<SessionEntity> {
        let mut session = self.inner.sessions.get_mut(&id)?;
        if session.status != from {
            return None;
        }
        session.status = update.to;
        session.updated_at = update.at;
        if update.stamp_started {
            session.started_at = Some(update.at);
        }
        if update.stamp_completed {
            session.completed_at = Some(update.at);
        }
        Some(session.clone())
    }

    fn list_checkpoints(&self, tour_id: Uuid) -> Vec<CheckpointEntity> {
        let mut checkpoints: Vec<CheckpointEntity> = self
            .inner
            .checkpoints
            .iter()
            .filter(|entry| entry.tour_id == tour_id)
            .map(|entry| entry.clone())
            .collect();
        checkpoints.sort_by_key(|checkpoint| checkpoint.order_index);
        checkpoints
    }

    fn insert_team(&self, team: TeamEntity) -> StorageResult<()> {
        match self.inner.team_tokens.entry(team.token.clone()) {
            Entry::Occupied(_) => return Err(StorageError::Duplicate { what: "team token" }),
            Entry::Vacant(slot) => {
                slot.insert(team.id);
            }
        }
        self.inner.teams.insert(team.id, team);
        Ok(())
    }

    fn find_team_by_token(&self, session_id: Uuid, token: &str) -> Option<TeamEntity> {
        let id = *self.inner.team_tokens.get(token)?;
        self.inner
            .teams
            .get(&id)
            .filter(|team| team.session_id == session_id)
            .map(|team| team.clone())
    }

    fn list_teams(&self, session_id: Uuid) -> Vec<TeamEntity> {
        let mut teams: Vec<TeamEntity> = self
            .inner
            .teams
            .iter()
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.clone())
            .collect();
        teams.sort_by_key(|team| (team.created_at, team.id));
        teams
    }

    fn advance_team_checkpoint(
        &self,
        team_id: Uuid,
        expected_index: u32,
        checkpoint_id: Uuid,
        at: SystemTime,
    ) -> bool {
        let Some(mut team) = self.inner.teams.get_mut(&team_id) else {
            return false;
        };
        if team.current_checkpoint_index != expected_index || team.has_unlocked(checkpoint_id) {
            return false;
        }
        team.current_checkpoint_index += 1;
        team.completed_checkpoints.push(checkpoint_id);
        team.updated_at = at;
        true
    }

    fn record_team_position(
        &self,
        team_id: Uuid,
        position: GeoPoint,
        outside: bool,
        at: SystemTime,
    ) -> Option<TeamEntity> {
        let mut team = self.inner.teams.get_mut(&team_id)?;
        let previous = team.clone();
        team.last_position = Some(position);
        team.is_outside_geofence = outside;
        team.last_position_at = Some(at);
        team.updated_at = at;
        Some(previous)
    }

    fn claim_stamp(
        &self,
        team_id: Uuid,
        at: SystemTime,
        window: Duration,
        slot: impl FnOnce(&mut TeamEntity) -> &mut Option<SystemTime>,
    ) -> bool {
        let Some(mut team) = self.inner.teams.get_mut(&team_id) else {
            return false;
        };
        let stamp = slot(&mut *team);
        if !window_elapsed(*stamp, at, window) {
            return false;
        }
        *stamp = Some(at);
        true
    }

    fn increment_team_score(&self, team_id: Uuid, gms: u32, bonus: u32, at: SystemTime) {
        if let Some(mut team) = self.inner.teams.get_mut(&team_id) {
            team.total_gms_score += gms;
            team.bonus_points += bonus;
            team.updated_at = at;
        }
    }

    fn insert_submission(&self, submission: SubmissionEntity) -> StorageResult<()> {
        match self
            .inner
            .submissions
            .entry((submission.team_id, submission.checkpoint_id))
        {
            Entry::Occupied(_) => Err(StorageError::Duplicate { what: "submission" }),
            Entry::Vacant(slot) => {
                slot.insert(submission);
                Ok(())
            }
        }
    }

    fn count_team_submissions(&self, team_id: Uuid) -> u64 {
        self.inner
            .submissions
            .iter()
            .filter(|entry| entry.key().0 == team_id)
            .count() as u64
    }

    fn list_submissions(&self, session_id: Uuid) -> Vec<SubmissionEntity> {
        let mut submissions: Vec<SubmissionEntity> = self
            .inner
            .submissions
            .iter()
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.clone())
            .collect();
        submissions.sort_by_key(|submission| (submission.created_at, submission.id));
        submissions
    }

    fn upsert_score_aggregate(&self, delta: AggregateDelta) {
        let AggregateDelta {
            session_id,
            team_id,
            result,
        } = delta;
        let at = result.submitted_at;
        let mut aggregate = self
            .inner
            .aggregates
            .entry((session_id, team_id))
            .or_insert_with(|| ScoreAggregateEntity {
                session_id,
                team_id,
                totals: DimensionScores::default(),
                total_gms: 0,
                bonus_points: 0,
                checkpoints_count: 0,
                results: Vec::new(),
                insight: None,
                created_at: at,
                updated_at: at,
            });
        aggregate.totals = aggregate.totals + result.earned;
        aggregate.total_gms += result.gms_earned;
        aggregate.bonus_points += result.bonus_earned;
        aggregate.checkpoints_count += 1;
        aggregate.updated_at = at;
        aggregate.results.push(result);
    }

    fn list_score_aggregates(&self, session_id: Uuid) -> Vec<ScoreAggregateEntity> {
        let mut aggregates: Vec<ScoreAggregateEntity> = self
            .inner
            .aggregates
            .iter()
            .filter(|entry| entry.key().0 == session_id)
            .map(|entry| entry.clone())
            .collect();
        aggregates.sort_by_key(|aggregate| aggregate.team_id);
        aggregates
    }
}

fn ready<T: Send + 'static>(value: T) -> BoxFuture<'static, StorageResult<T>> {
    Box::pin(futures::future::ready(Ok(value)))
}

fn ready_result<T: Send + 'static>(value: StorageResult<T>) -> BoxFuture<'static, StorageResult<T>> {
    Box::pin(futures::future::ready(value))
}

impl SessionStore for MemorySessionStore {
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        ready_result(self.insert_session(session))
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        ready(self.inner.sessions.get(&id).map(|entry| entry.clone()))
    }

    fn find_session_by_join_code(
        &self,
        join_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        ready(self.find_session_by_join_code(&join_code))
    }

    fn transition_session_status(
        &self,
        id: Uuid,
        from: SessionStatus,
        update: StatusUpdate,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        ready(self.transition_session_status(id, from, update))
    }

    fn save_checkpoint(
        &self,
        checkpoint: CheckpointEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.checkpoints.insert(checkpoint.id, checkpoint);
        ready(())
    }

    fn find_checkpoint(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<CheckpointEntity>>> {
        ready(self.inner.checkpoints.get(&id).map(|entry| entry.clone()))
    }

    fn list_checkpoints(
        &self,
        tour_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<CheckpointEntity>>> {
        ready(self.list_checkpoints(tour_id))
    }

    fn insert_team(&self, team: TeamEntity) -> BoxFuture<'static, StorageResult<()>> {
        ready_result(self.insert_team(team))
    }

    fn find_team(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>> {
        ready(self.inner.teams.get(&id).map(|entry| entry.clone()))
    }

    fn find_team_by_token(
        &self,
        session_id: Uuid,
        token: String,
    ) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>> {
        ready(self.find_team_by_token(session_id, &token))
    }

    fn list_teams(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<TeamEntity>>> {
        ready(self.list_teams(session_id))
    }

    fn advance_team_checkpoint(
        &self,
        team_id: Uuid,
        expected_index: u32,
        checkpoint_id: Uuid,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        ready(self.advance_team_checkpoint(team_id, expected_index, checkpoint_id, at))
    }

    fn record_team_position(
        &self,
        team_id: Uuid,
        position: GeoPoint,
        outside: bool,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>> {
        ready(self.record_team_position(team_id, position, outside, at))
    }

    fn claim_position_broadcast(
        &self,
        team_id: Uuid,
        at: SystemTime,
        window: Duration,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        ready(self.claim_stamp(team_id, at, window, |team| {
            &mut team.last_position_broadcast_at
        }))
    }

    fn claim_submission_slot(
        &self,
        team_id: Uuid,
        at: SystemTime,
        window: Duration,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        ready(self.claim_stamp(team_id, at, window, |team| &mut team.last_submission_at))
    }

    fn increment_team_score(
        &self,
        team_id: Uuid,
        gms: u32,
        bonus: u32,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.increment_team_score(team_id, gms, bonus, at);
        ready(())
    }

    fn insert_submission(
        &self,
        submission: SubmissionEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        ready_result(self.insert_submission(submission))
    }

    fn find_submission(
        &self,
        team_id: Uuid,
        checkpoint_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SubmissionEntity>>> {
        ready(
            self.inner
                .submissions
                .get(&(team_id, checkpoint_id))
                .map(|entry| entry.clone()),
        )
    }

    fn count_team_submissions(&self, team_id: Uuid) -> BoxFuture<'static, StorageResult<u64>> {
        ready(self.count_team_submissions(team_id))
    }

    fn list_submissions(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SubmissionEntity>>> {
        ready(self.list_submissions(session_id))
    }

    fn upsert_score_aggregate(
        &self,
        delta: AggregateDelta,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.upsert_score_aggregate(delta);
        ready(())
    }

    fn list_score_aggregates(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoreAggregateEntity>>> {
        ready(self.list_score_aggregates(session_id))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        ready(())
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{CheckpointResultEntity, ScoringMethod};

    fn team(session_id: Uuid, token: &str) -> TeamEntity {
        TeamEntity::new(session_id, "Owls".into(), token.into(), SystemTime::UNIX_EPOCH)
    }

    #[tokio::test]
    async fn duplicate_team_tokens_are_rejected() {
        let store = MemorySessionStore::new();
        let session_id = Uuid::new_v4();
        SessionStore::insert_team(&store, team(session_id, "tok")).await.unwrap();
        let err = SessionStore::insert_team(&store, team(session_id, "tok"))
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn token_lookup_is_scoped_to_the_session() {
        let store = MemorySessionStore::new();
        let session_id = Uuid::new_v4();
        SessionStore::insert_team(&store, team(session_id, "tok")).await.unwrap();

        let found = SessionStore::find_team_by_token(&store, session_id, "tok".into())
            .await
            .unwrap();
        assert!(found.is_some());
        let other = SessionStore::find_team_by_token(&store, Uuid::new_v4(), "tok".into())
            .await
            .unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn advance_only_applies_at_expected_index() {
        let store = MemorySessionStore::new();
        let team = team(Uuid::new_v4(), "tok");
        let team_id = team.id;
        SessionStore::insert_team(&store, team).await.unwrap();
        let first = Uuid::new_v4();
        let now = SystemTime::now();

        assert!(store.advance_team_checkpoint(team_id, 0, first, now));
        assert!(!store.advance_team_checkpoint(team_id, 0, first, now));
        assert!(!store.advance_team_checkpoint(team_id, 1, first, now));

        let team = store.inner.teams.get(&team_id).unwrap().clone();
        assert_eq!(team.current_checkpoint_index, 1);
        assert_eq!(team.completed_checkpoints, vec![first]);
    }

    #[tokio::test]
    async fn claims_respect_the_window() {
        let store = MemorySessionStore::new();
        let team = team(Uuid::new_v4(), "tok");
        let team_id = team.id;
        SessionStore::insert_team(&store, team).await.unwrap();
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let window = Duration::from_secs(5);

        assert!(SessionStore::claim_submission_slot(&store, team_id, t0, window).await.unwrap());
        let early = t0 + Duration::from_secs(4);
        assert!(!SessionStore::claim_submission_slot(&store, team_id, early, window).await.unwrap());
        let later = t0 + Duration::from_secs(5);
        assert!(SessionStore::claim_submission_slot(&store, team_id, later, window).await.unwrap());
    }

    #[tokio::test]
    async fn zero_window_always_claims() {
        let store = MemorySessionStore::new();
        let team = team(Uuid::new_v4(), "tok");
        let team_id = team.id;
        SessionStore::insert_team(&store, team).await.unwrap();
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);

        assert!(SessionStore::claim_submission_slot(&store, team_id, t0, Duration::ZERO).await.unwrap());
        let earlier = t0 - Duration::from_millis(3);
        assert!(SessionStore::claim_submission_slot(&store, team_id, earlier, Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn aggregate_upsert_seeds_then_increments() {
        let store = MemorySessionStore::new();
        let session_id = Uuid::new_v4();
        let team_id = Uuid::new_v4();
        let delta = |gms: u32| AggregateDelta {
            session_id,
            team_id,
            result: CheckpointResultEntity {
                checkpoint_id: Uuid::new_v4(),
                gms_earned: gms,
                earned: DimensionScores::new(gms, 0, 0, 0),
                bonus_earned: 2,
                method: ScoringMethod::Oracle,
                submitted_at: SystemTime::now(),
            },
        };

        store.upsert_score_aggregate(delta(10));
        store.upsert_score_aggregate(delta(7));

        let aggregates = store.list_score_aggregates(session_id);
        assert_eq!(aggregates.len(), 1);
        let aggregate = &aggregates[0];
        assert_eq!(aggregate.total_gms, 17);
        assert_eq!(aggregate.totals.connection, 17);
        assert_eq!(aggregate.bonus_points, 4);
        assert_eq!(aggregate.checkpoints_count, 2);
        assert_eq!(aggregate.results.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_aggregate_upserts_keep_every_increment() {
        const WRITERS: u32 = 16;
        let store = Arc::new(MemorySessionStore::new());
        let session_id = Uuid::new_v4();
        let team_id = Uuid::new_v4();

        let tasks: Vec<_> = (1..=WRITERS)
            .map(|gms| {
                let store = store.clone();
                tokio::spawn(async move {
                    let delta = AggregateDelta {
                        session_id,
                        team_id,
                        result: CheckpointResultEntity {
                            checkpoint_id: Uuid::new_v4(),
                            gms_earned: gms,
                            earned: DimensionScores::new(gms, 0, 0, 0),
                            bonus_earned: 1,
                            method: ScoringMethod::Fallback,
                            submitted_at: SystemTime::now(),
                        },
                    };
                    SessionStore::upsert_score_aggregate(&*store, delta).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let aggregates = store.list_score_aggregates(session_id);
        assert_eq!(aggregates.len(), 1);
        let aggregate = &aggregates[0];
        assert_eq!(aggregate.total_gms, (1..=WRITERS).sum::<u32>());
        assert_eq!(aggregate.bonus_points, WRITERS);
        assert_eq!(aggregate.checkpoints_count, WRITERS);
        assert_eq!(aggregate.results.len(), WRITERS as usize);
    }
}
