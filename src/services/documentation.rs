use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for Trailhunt Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::public_stream,
        crate::routes::sse::operator_stream,
        crate::routes::play::unlock,
        crate::routes::play::submit,
        crate::routes::play::position,
        crate::routes::session::join,
        crate::routes::session::snapshot,
        crate::routes::session::change_status,
        crate::routes::session::report,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::play::UnlockRequest,
            crate::dto::play::UnlockResponse,
            crate::dto::play::UnlockedCheckpoint,
            crate::dto::play::SubmitRequest,
            crate::dto::play::SubmitResponse,
            crate::dto::play::PositionRequest,
            crate::dto::play::PositionResponse,
            crate::dto::session::JoinRequest,
            crate::dto::session::JoinResponse,
            crate::dto::session::StatusChangeRequest,
            crate::dto::session::SessionHeader,
            crate::dto::session::SessionSnapshot,
            crate::dto::session::SessionReport,
            crate::dto::sse::OperatorHandshake,
            crate::dto::sse::CheckpointUnlockedEvent,
            crate::dto::sse::ScoreUpdateEvent,
            crate::dto::sse::SessionStatusEvent,
            crate::dto::sse::TeamPositionEvent,
            crate::dto::sse::GeofenceAlertEvent,
            crate::error::ErrorBody,
            crate::dao::models::SessionStatus,
            crate::dao::models::ScoringMethod,
            crate::dao::models::DimensionScores,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "session", description = "Joining sessions and reading snapshots"),
        (name = "play", description = "Unlocks, submissions and position reports"),
        (name = "operator", description = "Operator-only session control, authenticated by the operator stream token"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
/// OpenAPI document of the session API.
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_session_routes() {
        let doc = ApiDoc::openapi();
        for path in [
            "/sessions/{id}/unlock",
            "/sessions/{id}/submissions",
            "/sessions/{id}/position",
            "/sessions/join",
            "/sessions/{id}/report",
            "/sessions/{id}/sse/operator",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
