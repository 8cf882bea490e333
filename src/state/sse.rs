use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::dto::sse::ServerEvent;

/// SSE-specific sub-state carved out from [`AppState`](super::AppState).
///
/// Channels are created lazily the first time a session is published to or
/// subscribed to, and live as long as the process.
pub struct SseState {
    sessions: DashMap<Uuid, Arc<SessionChannels>>,
    public_capacity: usize,
    operator_capacity: usize,
}

impl SseState {
    /// Build the SSE sub-tree with per-stream channel capacities.
    pub fn new(public_capacity: usize, operator_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            public_capacity,
            operator_capacity,
        }
    }

    /// Channels of a session, created on first access.
    pub fn channels(&self, session_id: Uuid) -> Arc<SessionChannels> {
        self.sessions
            .entry(session_id)
            .or_insert_with(|| {
                Arc::new(SessionChannels::new(
                    self.public_capacity,
                    self.operator_capacity,
                ))
            })
            .clone()
    }
}

/// Public and operator hubs of a single session.
pub struct SessionChannels {
    public: SseHub,
    operator: SseHub,
    operator_token: Mutex<Option<String>>,
}

impl SessionChannels {
    fn new(public_capacity: usize, operator_capacity: usize) -> Self {
        Self {
            public: SseHub::new(public_capacity),
            operator: SseHub::new(operator_capacity),
            operator_token: Mutex::new(None),
        }
    }

    /// Team-facing hub: unlocks, scores and status changes.
    pub fn public(&self) -> &SseHub {
        &self.public
    }

    /// Operator hub: everything public plus positions and geofence alerts.
    pub fn operator(&self) -> &SseHub {
        &self.operator
    }

    /// Token guard that ensures a single operator stream per session.
    pub fn operator_token(&self) -> &Mutex<Option<String>> {
        &self.operator_token
    }
}

/// Simple broadcast hub wrapper used by the SSE services.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, returning how many received it.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        // No subscriber is not a failure: events are best effort.
        self.sender.send(event).unwrap_or(0)
    }
}
