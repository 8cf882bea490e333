use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Name of the installed storage backend, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<&'static str>,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(store: &'static str) -> Self {
        Self {
            status: "ok".to_string(),
            store: Some(store),
        }
    }

    /// Create a health response indicating the system is in degraded mode.
    pub fn degraded() -> Self {
        Self {
            status: "degraded".to_string(),
            store: None,
        }
    }
}
