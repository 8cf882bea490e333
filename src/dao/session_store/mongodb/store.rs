use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Collection, Database,
    bson::{Bson, DateTime, Document, doc},
    options::ReturnDocument,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::{self, MongoConnection},
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{
        AGGREGATE_COLLECTION_NAME, CHECKPOINT_COLLECTION_NAME, MongoAggregateDocument,
        MongoCheckpointDocument, MongoResultDocument, MongoSessionDocument,
        MongoSubmissionDocument, MongoTeamDocument, SESSION_COLLECTION_NAME,
        SUBMISSION_COLLECTION_NAME, TEAM_COLLECTION_NAME, doc_id,
    },
};
use crate::{
    dao::{
        models::{
            AggregateDelta, CheckpointEntity, ScoreAggregateEntity, SessionEntity, SessionStatus,
            StatusUpdate, SubmissionEntity, TeamEntity,
        },
        session_store::SessionStore,
        storage::StorageResult,
    },
    services::geometry::GeoPoint,
};

/// `SessionStore` backed by MongoDB; reconnects swap the connection in place.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoConnection>,
    config: MongoConfig,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.state.read().await.database.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    /// Swap in a fresh connection; the old client is dropped once in-flight calls finish.
    async fn reconnect(&self) -> MongoResult<()> {
        let fresh = connection::open(&self.config).await?;
        *self.state.write().await = fresh;
        Ok(())
    }
}

fn stamp_window_filter(team_id: Uuid, field: &str, at: SystemTime, window: Duration) -> Document {
    if window.is_zero() {
        return doc_id(team_id);
    }
    let threshold = at.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);
    doc! {
        "_id": team_id.to_string(),
        "$or": [
            { field: Bson::Null },
            { field: { "$lte": DateTime::from_system_time(threshold) } },
        ],
    }
}

impl MongoSessionStore {
    /// Connect to MongoDB with the configured ping policy and bootstrap the indexes.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let connection = connection::open(&config).await?;
        Ok(Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(connection),
                config,
            }),
        })
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        self.database().await.collection(SESSION_COLLECTION_NAME)
    }

    async fn checkpoints(&self) -> Collection<MongoCheckpointDocument> {
        self.database().await.collection(CHECKPOINT_COLLECTION_NAME)
    }

    async fn teams(&self) -> Collection<MongoTeamDocument> {
        self.database().await.collection(TEAM_COLLECTION_NAME)
    }

    async fn submissions(&self) -> Collection<MongoSubmissionDocument> {
        self.database().await.collection(SUBMISSION_COLLECTION_NAME)
    }

    async fn aggregates(&self) -> Collection<MongoAggregateDocument> {
        self.database().await.collection(AGGREGATE_COLLECTION_NAME)
    }

    async fn insert_session(&self, session: SessionEntity) -> MongoResult<()> {
        let id = session.id;
        let document: MongoSessionDocument = session.into();
        self.sessions()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| {
                if is_duplicate_key(&source) {
                    MongoDaoError::Duplicate { what: "join code" }
                } else {
                    MongoDaoError::Write {
                        collection: SESSION_COLLECTION_NAME,
                        id,
                        source,
                    }
                }
            })?;
        Ok(())
    }

    async fn find_session_where(&self, filter: Document) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .sessions()
            .await
            .find_one(filter)
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: SESSION_COLLECTION_NAME,
                source,
            })?;
        document.map(SessionEntity::try_from).transpose()
    }

    async fn transition_session_status(
        &self,
        id: Uuid,
        from: SessionStatus,
        update: StatusUpdate,
    ) -> MongoResult<Option<SessionEntity>> {
        let at = DateTime::from_system_time(update.at);
        let mut set = doc! {
            "status": update.to.as_str(),
            "updated_at": at,
        };
        if update.stamp_started {
            set.insert("started_at", at);
        }
        if update.stamp_completed {
            set.insert("completed_at", at);
        }

        let document = self
            .sessions()
            .await
            .find_one_and_update(
                doc! { "_id": id.to_string(), "status": from.as_str() },
                doc! { "$set": set },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: SESSION_COLLECTION_NAME,
                id,
                source,
            })?;
        document.map(SessionEntity::try_from).transpose()
    }

    async fn save_checkpoint(&self, checkpoint: CheckpointEntity) -> MongoResult<()> {
        let id = checkpoint.id;
        let document: MongoCheckpointDocument = checkpoint.into();
        self.checkpoints()
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: CHECKPOINT_COLLECTION_NAME,
                id,
                source,
            })?;
        Ok(())
    }

    async fn find_checkpoint(&self, id: Uuid) -> MongoResult<Option<CheckpointEntity>> {
        let document = self
            .checkpoints()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: CHECKPOINT_COLLECTION_NAME,
                source,
            })?;
        document.map(CheckpointEntity::try_from).transpose()
    }

    async fn list_checkpoints(&self, tour_id: Uuid) -> MongoResult<Vec<CheckpointEntity>> {
        let read_err = |source| MongoDaoError::Read {
            collection: CHECKPOINT_COLLECTION_NAME,
            source,
        };
        let documents: Vec<MongoCheckpointDocument> = self
            .checkpoints()
            .await
            .find(doc! { "tour_id": tour_id.to_string() })
            .sort(doc! { "order_index": 1 })
            .await
            .map_err(read_err)?
            .try_collect()
            .await
            .map_err(read_err)?;
        documents.into_iter().map(CheckpointEntity::try_from).collect()
    }

    async fn insert_team(&self, team: TeamEntity) -> MongoResult<()> {
        let id = team.id;
        let document: MongoTeamDocument = team.into();
        self.teams()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| {
                if is_duplicate_key(&source) {
                    MongoDaoError::Duplicate { what: "team token" }
                } else {
                    MongoDaoError::Write {
                        collection: TEAM_COLLECTION_NAME,
                        id,
                        source,
                    }
                }
            })?;
        Ok(())
    }

    async fn find_team_where(&self, filter: Document) -> MongoResult<Option<TeamEntity>> {
        let document = self
            .teams()
            .await
            .find_one(filter)
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: TEAM_COLLECTION_NAME,
                source,
            })?;
        document.map(TeamEntity::try_from).transpose()
    }

    async fn list_teams(&self, session_id: Uuid) -> MongoResult<Vec<TeamEntity>> {
        let read_err = |source| MongoDaoError::Read {
            collection: TEAM_COLLECTION_NAME,
            source,
        };
        let documents: Vec<MongoTeamDocument> = self
            .teams()
            .await
            .find(doc! { "session_id": session_id.to_string() })
            .sort(doc! { "created_at": 1, "_id": 1 })
            .await
            .map_err(read_err)?
            .try_collect()
            .await
            .map_err(read_err)?;
        documents.into_iter().map(TeamEntity::try_from).collect()
    }

    async fn update_team(&self, team_id: Uuid, filter: Document, update: Document) -> MongoResult<bool> {
        let result = self
            .teams()
            .await
            .update_one(filter, update)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: TEAM_COLLECTION_NAME,
                id: team_id,
                source,
            })?;
        Ok(result.matched_count > 0)
    }

    async fn advance_team_checkpoint(
        &self,
        team_id: Uuid,
        expected_index: u32,
        checkpoint_id: Uuid,
        at: SystemTime,
    ) -> MongoResult<bool> {
        let checkpoint = checkpoint_id.to_string();
        self.update_team(
            team_id,
            doc! {
                "_id": team_id.to_string(),
                "current_checkpoint_index": i64::from(expected_index),
                "completed_checkpoints": { "$ne": &checkpoint },
            },
            doc! {
                "$inc": { "current_checkpoint_index": 1 },
                "$push": { "completed_checkpoints": &checkpoint },
                "$set": { "updated_at": DateTime::from_system_time(at) },
            },
        )
        .await
    }

    async fn record_team_position(
        &self,
        team_id: Uuid,
        position: GeoPoint,
        outside: bool,
        at: SystemTime,
    ) -> MongoResult<Option<TeamEntity>> {
        let at = DateTime::from_system_time(at);
        let previous = self
            .teams()
            .await
            .find_one_and_update(
                doc_id(team_id),
                doc! {
                    "$set": {
                        "last_position": { "lat": position.lat, "lng": position.lng },
                        "is_outside_geofence": outside,
                        "last_position_at": at,
                        "updated_at": at,
                    }
                },
            )
            .return_document(ReturnDocument::Before)
            .await
            .map_err(|source| MongoDaoError::Write {
                collection: TEAM_COLLECTION_NAME,
                id: team_id,
                source,
            })?;
        previous.map(TeamEntity::try_from).transpose()
    }

    async fn claim_stamp(
        &self,
        team_id: Uuid,
        field: &str,
        at: SystemTime,
        window: Duration,
    ) -> MongoResult<bool> {
        let mut set = Document::new();
        set.insert(field, DateTime::from_system_time(at));
        self.update_team(
            team_id,
            stamp_window_filter(team_id, field, at, window),
            doc! { "$set": set },
        )
        .await
    }

    async fn increment_team_score(
        &self,
        team_id: Uuid,
        gms: u32,
        bonus: u32,
        at: SystemTime,
    ) -> MongoResult<()> {
        self.update_team(
            team_id,
            doc_id(team_id),
            doc! {
                "$inc": {
                    "total_gms_score": i64::from(gms),
                    "bonus_points": i64::from(bonus),
                },
                "$set": { "updated_at": DateTime::from_system_time(at) },
            },
        )
        .await?;
        Ok(())
    }

    async fn insert_submission(&self, submission: SubmissionEntity) -> MongoResult<()> {
        let id = submission.id;
        let document: MongoSubmissionDocument = submission.into();
        self.submissions()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| {
                if is_duplicate_key(&source) {
                    MongoDaoError::Duplicate { what: "submission" }
                } else {
                    MongoDaoError::Write {
                        collection: SUBMISSION_COLLECTION_NAME,
                        id,
                        source,
                    }
                }
            })?;
        Ok(())
    }

    async fn find_submission(
        &self,
        team_id: Uuid,
        checkpoint_id: Uuid,
    ) -> MongoResult<Option<SubmissionEntity>> {
        let document = self
            .submissions()
            .await
            .find_one(doc! {
                "team_id": team_id.to_string(),
                "checkpoint_id": checkpoint_id.to_string(),
            })
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: SUBMISSION_COLLECTION_NAME,
                source,
            })?;
        document.map(SubmissionEntity::try_from).transpose()
    }

    async fn count_team_submissions(&self, team_id: Uuid) -> MongoResult<u64> {
        self.submissions()
            .await
            .count_documents(doc! { "team_id": team_id.to_string() })
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: SUBMISSION_COLLECTION_NAME,
                source,
            })
    }

    async fn list_submissions(&self, session_id: Uuid) -> MongoResult<Vec<SubmissionEntity>> {
        let read_err = |source| MongoDaoError::Read {
            collection: SUBMISSION_COLLECTION_NAME,
            source,
        };
        let documents: Vec<MongoSubmissionDocument> = self
            .submissions()
            .await
            .find(doc! { "session_id": session_id.to_string() })
            .sort(doc! { "created_at": 1, "_id": 1 })
            .await
            .map_err(read_err)?
            .try_collect()
            .await
            .map_err(read_err)?;
        documents.into_iter().map(SubmissionEntity::try_from).collect()
    }

    async fn upsert_score_aggregate(&self, delta: AggregateDelta) -> MongoResult<()> {
        let AggregateDelta {
            session_id,
            team_id,
            result,
        } = delta;
        let at = DateTime::from_system_time(result.submitted_at);
        let filter = doc! {
            "session_id": session_id.to_string(),
            "team_id": team_id.to_string(),
        };
        // Increments seed the counters on insert, so both paths share one statement.
        let update = doc! {
            "$inc": {
                "totals.connection": i64::from(result.earned.connection),
                "totals.meaning": i64::from(result.earned.meaning),
                "totals.joy": i64::from(result.earned.joy),
                "totals.growth": i64::from(result.earned.growth),
                "total_gms": i64::from(result.gms_earned),
                "bonus_points": i64::from(result.bonus_earned),
                "checkpoints_count": 1_i64,
            },
            "$push": { "results": MongoResultDocument::to_document(&result) },
            "$set": { "updated_at": at },
            "$setOnInsert": { "insight": Bson::Null, "created_at": at },
        };

        let collection = self.aggregates().await;
        let mut attempt = 0;
        loop {
            match collection
                .update_one(filter.clone(), update.clone())
                .upsert(true)
                .await
            {
                Ok(_) => return Ok(()),
                // Two concurrent first upserts race on the unique index; the loser retries as an update.
                Err(source) if is_duplicate_key(&source) && attempt == 0 => attempt += 1,
                Err(source) => {
                    return Err(MongoDaoError::Write {
                        collection: AGGREGATE_COLLECTION_NAME,
                        id: team_id,
                        source,
                    });
                }
            }
        }
    }

    async fn list_score_aggregates(&self, session_id: Uuid) -> MongoResult<Vec<ScoreAggregateEntity>> {
        let read_err = |source| MongoDaoError::Read {
            collection: AGGREGATE_COLLECTION_NAME,
            source,
        };
        let documents: Vec<MongoAggregateDocument> = self
            .aggregates()
            .await
            .find(doc! { "session_id": session_id.to_string() })
            .sort(doc! { "team_id": 1 })
            .await
            .map_err(read_err)?
            .try_collect()
            .await
            .map_err(read_err)?;
        documents
            .into_iter()
            .map(ScoreAggregateEntity::try_from)
            .collect()
    }
}

impl SessionStore for MongoSessionStore {
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session).await.map_err(Into::into) })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session_where(doc_id(id)).await.map_err(Into::into) })
    }

    fn find_session_by_join_code(
        &self,
        join_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_session_where(doc! { "join_code": join_code })
                .await
                .map_err(Into::into)
        })
    }

    fn transition_session_status(
        &self,
        id: Uuid,
        from: SessionStatus,
        update: StatusUpdate,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .transition_session_status(id, from, update)
                .await
                .map_err(Into::into)
        })
    }

    fn save_checkpoint(
        &self,
        checkpoint: CheckpointEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_checkpoint(checkpoint).await.map_err(Into::into) })
    }

    fn find_checkpoint(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<CheckpointEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_checkpoint(id).await.map_err(Into::into) })
    }

    fn list_checkpoints(
        &self,
        tour_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<CheckpointEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_checkpoints(tour_id).await.map_err(Into::into) })
    }

    fn insert_team(&self, team: TeamEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_team(team).await.map_err(Into::into) })
    }

    fn find_team(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_team_where(doc_id(id)).await.map_err(Into::into) })
    }

    fn find_team_by_token(
        &self,
        session_id: Uuid,
        token: String,
    ) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_team_where(doc! { "session_id": session_id.to_string(), "token": token })
                .await
                .map_err(Into::into)
        })
    }

    fn list_teams(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<TeamEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_teams(session_id).await.map_err(Into::into) })
    }

    fn advance_team_checkpoint(
        &self,
        team_id: Uuid,
        expected_index: u32,
        checkpoint_id: Uuid,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .advance_team_checkpoint(team_id, expected_index, checkpoint_id, at)
                .await
                .map_err(Into::into)
        })
    }

    fn record_team_position(
        &self,
        team_id: Uuid,
        position: GeoPoint,
        outside: bool,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Option<TeamEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .record_team_position(team_id, position, outside, at)
                .await
                .map_err(Into::into)
        })
    }

    fn claim_position_broadcast(
        &self,
        team_id: Uuid,
        at: SystemTime,
        window: Duration,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .claim_stamp(team_id, "last_position_broadcast_at", at, window)
                .await
                .map_err(Into::into)
        })
    }

    fn claim_submission_slot(
        &self,
        team_id: Uuid,
        at: SystemTime,
        window: Duration,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .claim_stamp(team_id, "last_submission_at", at, window)
                .await
                .map_err(Into::into)
        })
    }

    fn increment_team_score(
        &self,
        team_id: Uuid,
        gms: u32,
        bonus: u32,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .increment_team_score(team_id, gms, bonus, at)
                .await
                .map_err(Into::into)
        })
    }

    fn insert_submission(
        &self,
        submission: SubmissionEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.insert_submission(submission).await.map_err(Into::into) })
    }

    fn find_submission(
        &self,
        team_id: Uuid,
        checkpoint_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SubmissionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_submission(team_id, checkpoint_id)
                .await
                .map_err(Into::into)
        })
    }

    fn count_team_submissions(&self, team_id: Uuid) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.count_team_submissions(team_id).await.map_err(Into::into) })
    }

    fn list_submissions(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SubmissionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_submissions(session_id).await.map_err(Into::into) })
    }

    fn upsert_score_aggregate(
        &self,
        delta: AggregateDelta,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.upsert_score_aggregate(delta).await.map_err(Into::into) })
    }

    fn list_score_aggregates(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ScoreAggregateEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_score_aggregates(session_id)
                .await
                .map_err(Into::into)
        })
    }

    fn backend(&self) -> &'static str {
        "mongodb"
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
