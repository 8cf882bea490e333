//! Shared fixtures for service tests: an in-memory store seeded with one
//! session, a three-checkpoint tour and a team, plus a recording publisher.

use std::{
    sync::{Arc, Mutex},
    time::SystemTime,
};

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        models::{
            CheckpointEntity, DimensionScores, MissionEntity, SessionEntity, SessionStatus,
            SessionVariant, TeamEntity,
        },
        session_store::{SessionStore, memory::MemorySessionStore},
    },
    dto::sse::ServerEvent,
    services::{
        geometry::{EARTH_RADIUS_M, GeoPoint},
        scoring::{DisabledOracle, ScoringOracle},
    },
    state::{AppState, Channel, EventPublisher, PublishError, SharedState},
};

pub(crate) const BASE: GeoPoint = GeoPoint::new(48.8566, 2.3522);
pub(crate) const WEIGHTS: DimensionScores = DimensionScores::new(20, 15, 10, 20);
pub(crate) const BONUS: u32 = 5;
pub(crate) const RADIUS_M: f64 = 50.0;

/// Point `meters` north of `origin` along its meridian.
pub(crate) fn north_of(origin: GeoPoint, meters: f64) -> GeoPoint {
    GeoPoint::new(origin.lat + (meters / EARTH_RADIUS_M).to_degrees(), origin.lng)
}

#[derive(Debug, Clone)]
pub(crate) struct Published {
    pub session_id: Uuid,
    pub channel: Channel,
    pub event: ServerEvent,
}

/// Publisher keeping every event, optionally failing each publish afterwards.
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    published: Mutex<Vec<Published>>,
    fail: bool,
}

impl RecordingPublisher {
    pub(crate) fn failing() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Events with the given name, in publish order.
    pub(crate) fn named(&self, name: &str) -> Vec<Published> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|item| item.event.event.as_deref() == Some(name))
            .cloned()
            .collect()
    }

    /// Payloads with the given name on one channel, parsed as JSON.
    pub(crate) fn payloads(&self, name: &str, channel: Channel) -> Vec<serde_json::Value> {
        self.named(name)
            .into_iter()
            .filter(|item| item.channel == channel)
            .map(|item| serde_json::from_str(&item.event.data).unwrap())
            .collect()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(
        &self,
        session_id: Uuid,
        channel: Channel,
        event: ServerEvent,
    ) -> BoxFuture<'static, Result<(), PublishError>> {
        self.published.lock().unwrap().push(Published {
            session_id,
            channel,
            event,
        });
        let fail = self.fail;
        Box::pin(async move {
            if fail {
                Err(PublishError::Provider("pub/sub offline".into()))
            } else {
                Ok(())
            }
        })
    }
}

/// Let detached publish tasks run.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub(crate) fn session_entity(tour_id: Uuid, status: SessionStatus) -> SessionEntity {
    let now = SystemTime::now();
    SessionEntity {
        id: Uuid::new_v4(),
        tour_id,
        name: "Old town hunt".into(),
        status,
        variant: SessionVariant::Standard,
        is_test_mode: false,
        geofence: Vec::new(),
        join_code: format!("J{}", &Uuid::new_v4().simple().to_string()[..6]).to_uppercase(),
        created_at: now,
        started_at: None,
        completed_at: None,
        updated_at: now,
    }
}

fn checkpoint_entity(tour_id: Uuid, order_index: u32) -> CheckpointEntity {
    CheckpointEntity {
        id: Uuid::new_v4(),
        tour_id,
        order_index,
        name: format!("Checkpoint {order_index}"),
        location: north_of(BASE, 500.0 * f64::from(order_index)),
        unlock_radius_m: RADIUS_M,
        weights: WEIGHTS,
        bonus_photo_points: BONUS,
        mission: MissionEntity {
            title: format!("Mission {order_index}"),
            description: "Take a picture together".into(),
            hints: vec!["Look up".into()],
        },
    }
}

/// Knobs for [`Setup::build`].
pub(crate) struct Setup {
    pub config: AppConfig,
    pub oracle: Arc<dyn ScoringOracle>,
    pub publisher: Arc<RecordingPublisher>,
    pub status: SessionStatus,
    pub variant: SessionVariant,
    pub test_mode: bool,
    pub geofence: Vec<GeoPoint>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            config: AppConfig::default(),
            oracle: Arc::new(DisabledOracle),
            publisher: Arc::new(RecordingPublisher::default()),
            status: SessionStatus::Active,
            variant: SessionVariant::Standard,
            test_mode: false,
            geofence: Vec::new(),
        }
    }
}

pub(crate) struct Fixture {
    pub state: SharedState,
    pub store: Arc<dyn SessionStore>,
    pub session: SessionEntity,
    pub checkpoints: Vec<CheckpointEntity>,
    pub team: TeamEntity,
    pub events: Arc<RecordingPublisher>,
}

impl Setup {
    pub(crate) async fn build(self) -> Fixture {
        let state = AppState::with_publisher(self.config, self.oracle, self.publisher.clone());
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        state.set_store(store.clone()).await;

        let tour_id = Uuid::new_v4();
        let mut session = session_entity(tour_id, self.status);
        session.variant = self.variant;
        session.is_test_mode = self.test_mode;
        session.geofence = self.geofence;
        store.insert_session(session.clone()).await.unwrap();

        let mut checkpoints = Vec::new();
        // Inserted out of order to exercise sorting.
        for order_index in [2, 0, 1] {
            let checkpoint = checkpoint_entity(tour_id, order_index);
            store.save_checkpoint(checkpoint.clone()).await.unwrap();
            checkpoints.push(checkpoint);
        }
        checkpoints.sort_by_key(|checkpoint| checkpoint.order_index);

        let mut fixture = Fixture {
            state,
            store,
            session,
            checkpoints,
            team: TeamEntity::new(Uuid::nil(), String::new(), String::new(), SystemTime::now()),
            events: self.publisher,
        };
        fixture.team = fixture.add_team("Owls").await;
        fixture
    }
}

impl Fixture {
    pub(crate) async fn add_team(&self, name: &str) -> TeamEntity {
        let team = TeamEntity::new(
            self.session.id,
            name.into(),
            format!("token-{}", Uuid::new_v4().simple()),
            SystemTime::now(),
        );
        self.store.insert_team(team.clone()).await.unwrap();
        team
    }

    pub(crate) async fn reload_team(&self, team_id: Uuid) -> TeamEntity {
        self.store.find_team(team_id).await.unwrap().unwrap()
    }
}
