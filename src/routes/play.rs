use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use uuid::Uuid;

use crate::{
    dto::play::{
        PositionRequest, PositionResponse, SubmitRequest, SubmitResponse, UnlockRequest,
        UnlockResponse,
    },
    error::{AppError, ErrorBody},
    services::{geofence_service, submission_service, unlock_service},
    state::SharedState,
};

/// Team-facing endpoints: unlocks, submissions and position reports.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions/{id}/unlock", post(unlock))
        .route("/sessions/{id}/submissions", post(submit))
        .route("/sessions/{id}/position", post(position))
}

/// Unlock the team's next checkpoint from its current location.
#[utoipa::path(
    post,
    path = "/sessions/{id}/unlock",
    tag = "play",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = UnlockRequest,
    responses(
        (status = 200, description = "Checkpoint unlocked", body = UnlockResponse),
        (status = 401, description = "Missing or unknown team token", body = ErrorBody),
        (status = 409, description = "Out of order, already unlocked or session not active", body = ErrorBody),
        (status = 422, description = "Team too far from the checkpoint", body = ErrorBody)
    )
)]
pub async fn unlock(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UnlockRequest>,
) -> Result<Json<UnlockResponse>, AppError> {
    Ok(Json(unlock_service::attempt_unlock(&state, id, payload).await?))
}

/// Submit an answer and/or photo for an unlocked checkpoint.
#[utoipa::path(
    post,
    path = "/sessions/{id}/submissions",
    tag = "play",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = SubmitRequest,
    responses(
        (status = 200, description = "Submission scored", body = SubmitResponse),
        (status = 401, description = "Missing or unknown team token", body = ErrorBody),
        (status = 409, description = "Already submitted or checkpoint locked", body = ErrorBody),
        (status = 429, description = "Submission cooldown still running", body = ErrorBody)
    )
)]
pub async fn submit(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, AppError> {
    Ok(Json(submission_service::submit(&state, id, payload).await?))
}

/// Report the team's current position.
#[utoipa::path(
    post,
    path = "/sessions/{id}/position",
    tag = "play",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = PositionRequest,
    responses(
        (status = 200, description = "Position recorded", body = PositionResponse),
        (status = 401, description = "Missing or unknown team token", body = ErrorBody)
    )
)]
pub async fn position(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PositionRequest>,
) -> Result<Json<PositionResponse>, AppError> {
    Ok(Json(geofence_service::update_position(&state, id, payload).await?))
}
