//! Pub/sub seam between the services and the realtime transport.

use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

use crate::{dto::sse::ServerEvent, state::sse::SseState};

/// Audience of a realtime event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Team-facing stream.
    Public,
    /// Operator dashboard stream.
    Operator,
}

/// Reasons an event could not be handed to the transport.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The payload did not serialize.
    #[error("failed to serialize `{event}` payload")]
    Serialize {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
    /// The transport refused the event.
    #[error("pub/sub provider rejected the event: {0}")]
    Provider(String),
}

/// Best-effort publisher; delivery is at most once and never replayed.
pub trait EventPublisher: Send + Sync {
    /// Deliver `event` to the session's `channel` subscribers.
    fn publish(
        &self,
        session_id: Uuid,
        channel: Channel,
        event: ServerEvent,
    ) -> BoxFuture<'static, Result<(), PublishError>>;
}

/// In-process publisher fanning out over the per-session SSE hubs.
pub struct HubPublisher {
    sse: Arc<SseState>,
}

impl HubPublisher {
    /// Publish through the given hubs.
    pub fn new(sse: Arc<SseState>) -> Self {
        Self { sse }
    }
}

impl EventPublisher for HubPublisher {
    fn publish(
        &self,
        session_id: Uuid,
        channel: Channel,
        event: ServerEvent,
    ) -> BoxFuture<'static, Result<(), PublishError>> {
        let channels = self.sse.channels(session_id);
        match channel {
            Channel::Public => channels.public().broadcast(event),
            Channel::Operator => channels.operator().broadcast(event),
        };
        Box::pin(async { Ok(()) })
    }
}
