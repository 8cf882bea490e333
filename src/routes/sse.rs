use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::AppError,
    services::sse_service::{self, StreamKind},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sessions/{id}/sse/public",
    tag = "sse",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses((status = 200, description = "Team-facing SSE stream", content_type = "text/event-stream", body = String))
)]
/// Stream unlocks, score updates and status changes of a session.
pub async fn public_stream(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let receiver = sse_service::subscribe_public(&state, id).await?;
    info!(session_id = %id, "new public SSE connection");
    Ok(sse_service::to_sse_stream(receiver, StreamKind::Public(id)))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/sse/operator",
    tag = "sse",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Operator SSE stream; the first `operator_token` event carries the operator token", content_type = "text/event-stream", body = String),
        (status = 401, description = "Another operator stream is connected")
    )
)]
/// Stream every session event, including positions and geofence alerts.
pub async fn operator_stream(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (receiver, channels) = sse_service::subscribe_operator(&state, id).await?;
    info!(session_id = %id, "new operator SSE connection");
    Ok(sse_service::to_sse_stream(
        receiver,
        StreamKind::Operator(id, channels),
    ))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sessions/{id}/sse/public", get(public_stream))
        .route("/sessions/{id}/sse/operator", get(operator_stream))
}
