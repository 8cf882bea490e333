pub mod lifecycle;
pub mod publisher;
mod sse;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use uuid::Uuid;

use crate::{
    config::AppConfig, dao::session_store::SessionStore, error::ServiceError,
    services::scoring::ScoringOracle,
};

pub use self::publisher::{Channel, EventPublisher, HubPublisher, PublishError};
pub use self::sse::{SessionChannels, SseHub, SseState};

/// Application state shared by handlers and background tasks.
pub type SharedState = Arc<AppState>;

/// Per-stream broadcast capacity; slow subscribers skip lagged events.
const SSE_CHANNEL_CAPACITY: usize = 64;

/// Central application state: storage handle, realtime hubs and collaborators.
///
/// Nothing here is authoritative for session progress; all of it lives in the store.
pub struct AppState {
    store: RwLock<Option<Arc<dyn SessionStore>>>,
    degraded: watch::Sender<bool>,
    sse: Arc<SseState>,
    publisher: Arc<dyn EventPublisher>,
    oracle: Arc<dyn ScoringOracle>,
    config: AppConfig,
}

impl AppState {
    /// Construct a new [`AppState`] publishing over the in-process SSE hubs.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig, oracle: Arc<dyn ScoringOracle>) -> SharedState {
        let sse = Arc::new(SseState::new(SSE_CHANNEL_CAPACITY, SSE_CHANNEL_CAPACITY));
        let publisher = Arc::new(HubPublisher::new(sse.clone()));
        Self::build(config, oracle, sse, publisher)
    }

    /// Same as [`AppState::new`] with an external pub/sub provider.
    pub fn with_publisher(
        config: AppConfig,
        oracle: Arc<dyn ScoringOracle>,
        publisher: Arc<dyn EventPublisher>,
    ) -> SharedState {
        let sse = Arc::new(SseState::new(SSE_CHANNEL_CAPACITY, SSE_CHANNEL_CAPACITY));
        Self::build(config, oracle, sse, publisher)
    }

    fn build(
        config: AppConfig,
        oracle: Arc<dyn ScoringOracle>,
        sse: Arc<SseState>,
        publisher: Arc<dyn EventPublisher>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            store: RwLock::new(None),
            degraded: degraded_tx,
            sse,
            publisher,
            oracle,
            config,
        })
    }

    /// Obtain the current store or fail with [`ServiceError::Degraded`].
    pub async fn require_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        let guard = self.store.read().await;
        guard.as_ref().cloned().ok_or(ServiceError::Degraded)
    }

    /// Install a store implementation and leave degraded mode.
    pub async fn set_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Realtime hubs of a session.
    pub fn channels(&self, session_id: Uuid) -> Arc<SessionChannels> {
        self.sse.channels(session_id)
    }

    /// Publisher used for realtime events.
    pub fn publisher(&self) -> Arc<dyn EventPublisher> {
        self.publisher.clone()
    }

    /// External scoring oracle.
    pub fn oracle(&self) -> &dyn ScoringOracle {
        self.oracle.as_ref()
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
