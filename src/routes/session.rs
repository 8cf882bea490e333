use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::session::{
        JoinRequest, JoinResponse, SessionHeader, SessionReport, SessionSnapshot,
        StatusChangeRequest,
    },
    error::{AppError, ErrorBody},
    services::{score_cache, session_service, sse_service},
    state::SharedState,
};

const TEAM_TOKEN_HEADER: &str = "x-team-token";
const OPERATOR_TOKEN_HEADER: &str = "x-operator-token";

/// Session entry and snapshot routes, plus the operator-only subtree.
pub fn router(state: SharedState) -> Router<SharedState> {
    let operator = Router::new()
        .route("/sessions/{id}/status", post(change_status))
        .route("/sessions/{id}/report", get(report))
        .route_layer(middleware::from_fn_with_state(state, require_operator_token));

    Router::new()
        .route("/sessions/join", post(join))
        .route("/sessions/{id}/snapshot", get(snapshot))
        .merge(operator)
}

/// Join a session with its join code.
#[utoipa::path(
    post,
    path = "/sessions/join",
    tag = "session",
    request_body = JoinRequest,
    responses(
        (status = 200, description = "Team created", body = JoinResponse),
        (status = 404, description = "Unknown join code", body = ErrorBody),
        (status = 409, description = "Session not open to new teams", body = ErrorBody)
    )
)]
pub async fn join(
    State(state): State<SharedState>,
    Json(payload): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, AppError> {
    Ok(Json(session_service::join(&state, payload).await?))
}

/// Full session state for the requesting team.
#[utoipa::path(
    get,
    path = "/sessions/{id}/snapshot",
    tag = "session",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("X-Team-Token" = String, Header, description = "Token returned when joining")
    ),
    responses(
        (status = 200, description = "Session snapshot", body = SessionSnapshot),
        (status = 401, description = "Missing or unknown team token", body = ErrorBody)
    )
)]
pub async fn snapshot(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<SessionSnapshot>, AppError> {
    let token = header_value(&headers, TEAM_TOKEN_HEADER)
        .ok_or_else(|| AppError::Unauthorized("missing team token header `X-Team-Token`".into()))?;
    Ok(Json(session_service::snapshot(&state, id, token).await?))
}

/// Move the session to a new status.
#[utoipa::path(
    post,
    path = "/sessions/{id}/status",
    tag = "operator",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("X-Operator-Token" = String, Header, description = "Token issued by the operator SSE stream")
    ),
    request_body = StatusChangeRequest,
    responses(
        (status = 200, description = "Status changed", body = SessionHeader),
        (status = 409, description = "Transition not allowed", body = ErrorBody)
    )
)]
pub async fn change_status(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusChangeRequest>,
) -> Result<Json<SessionHeader>, AppError> {
    Ok(Json(
        session_service::change_status(&state, id, payload.status).await?,
    ))
}

/// Per-team score report of the session.
#[utoipa::path(
    get,
    path = "/sessions/{id}/report",
    tag = "operator",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("X-Operator-Token" = String, Header, description = "Token issued by the operator SSE stream")
    ),
    responses((status = 200, description = "Score report", body = SessionReport))
)]
pub async fn report(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionReport>, AppError> {
    Ok(Json(score_cache::session_report(&state, id).await?))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

async fn require_operator_token(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = header_value(req.headers(), OPERATOR_TOKEN_HEADER)
        .map(str::to_owned)
        .ok_or_else(|| {
            AppError::Unauthorized("missing operator token header `X-Operator-Token`".into())
        })?;

    sse_service::verify_operator_token(&state, id, &provided).await?;
    Ok(next.run(req).await)
}
