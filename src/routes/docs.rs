use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{services::documentation::ApiDoc, state::SharedState};

/// Path of the interactive API explorer.
pub const SWAGGER_UI_PATH: &str = "/docs";
/// Path serving the raw OpenAPI document consumed by the explorer and client generators.
pub const OPENAPI_JSON_PATH: &str = "/api-doc/openapi.json";

/// Serve the Swagger UI and the session API's OpenAPI document.
pub fn router(state: SharedState) -> Router<SharedState> {
    let explorer: Router<SharedState> = SwaggerUi::new(SWAGGER_UI_PATH)
        .url(OPENAPI_JSON_PATH, ApiDoc::openapi())
        .into();

    explorer.with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Setup;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    #[tokio::test]
    async fn openapi_document_is_served() {
        let fixture = Setup::default().build().await;
        let app = router(fixture.state.clone()).with_state(fixture.state.clone());

        let response = app
            .oneshot(Request::get(OPENAPI_JSON_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let document: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(document["paths"]["/sessions/{id}/snapshot"].is_object());
    }
}
