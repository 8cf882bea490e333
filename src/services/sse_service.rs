use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::sse::{OperatorHandshake, ServerEvent},
    error::ServiceError,
    services::{access::load_session, sse_events::EVENT_OPERATOR_TOKEN},
    state::{SessionChannels, SharedState},
};

/// Subscribe to the team-facing stream of a session.
pub async fn subscribe_public(
    state: &SharedState,
    session_id: Uuid,
) -> Result<broadcast::Receiver<ServerEvent>, ServiceError> {
    let store = state.require_store().await?;
    load_session(&store, session_id).await?;
    Ok(state.channels(session_id).public().subscribe())
}

/// Subscribe to the operator stream of a session, claiming its operator token.
///
/// The token is queued as the first event of the returned receiver.
pub async fn subscribe_operator(
    state: &SharedState,
    session_id: Uuid,
) -> Result<(broadcast::Receiver<ServerEvent>, Arc<SessionChannels>), ServiceError> {
    let store = state.require_store().await?;
    load_session(&store, session_id).await?;

    let channels = state.channels(session_id);
    let token = claim_operator_token(&channels).await?;
    let receiver = channels.operator().subscribe();
    send_operator_handshake(&channels, &token);
    Ok((receiver, channels))
}

/// Check a token presented on an operator route.
pub async fn verify_operator_token(
    state: &SharedState,
    session_id: Uuid,
    presented: &str,
) -> Result<(), ServiceError> {
    let channels = state.channels(session_id);
    let guard = channels.operator_token().lock().await;
    match guard.as_deref() {
        Some(token) if token == presented => Ok(()),
        Some(_) => Err(ServiceError::Auth("invalid operator token".into())),
        None => Err(ServiceError::Auth("no operator stream connected".into())),
    }
}

/// Identifies the target SSE stream so teardown can release what it holds.
pub enum StreamKind {
    /// Team stream of the session.
    Public(Uuid),
    /// Keeps the session channels alive so the operator token is reset on disconnect.
    Operator(Uuid, Arc<SessionChannels>),
}

/// Convert a broadcast receiver into an SSE response, forwarding events and
/// cleaning up once the client disconnects.
pub fn to_sse_stream(
    mut receiver: broadcast::Receiver<ServerEvent>,
    kind: StreamKind,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "SSE subscriber lagging; events dropped");
                            continue;
                        }
                    }
                }
            }
        }

        match kind {
            StreamKind::Public(session_id) => info!(%session_id, "public SSE stream disconnected"),
            StreamKind::Operator(session_id, channels) => {
                channels.operator_token().lock().await.take();
                info!(%session_id, "operator SSE stream disconnected");
            }
        }
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// Reserve the operator token of a session, failing while another stream holds it.
async fn claim_operator_token(channels: &SessionChannels) -> Result<String, ServiceError> {
    let mut guard = channels.operator_token().lock().await;
    match &mut *guard {
        slot @ None => {
            let token = Uuid::new_v4().simple().to_string();
            slot.replace(token.clone());
            Ok(token)
        }
        Some(_) => Err(ServiceError::Auth(
            "another operator stream is already active".into(),
        )),
    }
}

fn send_operator_handshake(channels: &SessionChannels, token: &str) {
    match ServerEvent::json(
        Some(EVENT_OPERATOR_TOKEN.to_string()),
        &OperatorHandshake {
            token: token.to_string(),
        },
    ) {
        Ok(event) => {
            channels.operator().broadcast(event);
        }
        Err(err) => warn!(error = %err, "failed to serialize operator handshake"),
    }
}
