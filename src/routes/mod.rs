use axum::Router;

use crate::state::SharedState;

pub mod docs;
pub mod health;
pub mod play;
pub mod session;
pub mod sse;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sse::router())
        .merge(session::router(state.clone()))
        .merge(play::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::models::SessionStatus,
        services::sse_service,
        test_support::{Fixture, Setup},
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header::CONTENT_TYPE},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn call(fixture: &Fixture, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(fixture.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: String, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn too_far_unlock_maps_to_422_with_distances() {
        let fixture = Setup::default().build().await;
        let checkpoint = &fixture.checkpoints[0];
        let far = crate::test_support::north_of(checkpoint.location, 60.0);

        let (status, body) = call(
            &fixture,
            post_json(
                format!("/sessions/{}/unlock", fixture.session.id),
                json!({
                    "team_token": fixture.team.token,
                    "checkpoint_id": checkpoint.id,
                    "lat": far.lat,
                    "lng": far.lng,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], "too_far");
        assert_eq!(body["details"]["distance_m"], 60);
        assert_eq!(body["details"]["required_m"], 50);
        assert_eq!(body["details"]["remaining_m"], 10);
    }

    #[tokio::test]
    async fn position_without_team_token_is_unauthorized() {
        let fixture = Setup::default().build().await;
        let (status, body) = call(
            &fixture,
            post_json(
                format!("/sessions/{}/position", fixture.session.id),
                json!({ "lat": 48.8566, "lng": 2.3522 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthorized");
    }

    #[tokio::test]
    async fn snapshot_requires_team_token_header() {
        let fixture = Setup::default().build().await;
        let uri = format!("/sessions/{}/snapshot", fixture.session.id);

        let (status, body) = call(&fixture, Request::get(&uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthorized");

        let (status, body) = call(
            &fixture,
            Request::get(&uri)
                .header("x-team-token", fixture.team.token.as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["team"]["name"], "Owls");
    }

    #[tokio::test]
    async fn operator_routes_require_the_stream_token() {
        let fixture = Setup {
            status: SessionStatus::Lobby,
            ..Default::default()
        }
        .build()
        .await;
        let uri = format!("/sessions/{}/status", fixture.session.id);

        let (status, _) = call(&fixture, post_json(uri.clone(), json!({ "status": "active" }))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (mut receiver, _channels) =
            sse_service::subscribe_operator(&fixture.state, fixture.session.id)
                .await
                .unwrap();
        let handshake: Value = serde_json::from_str(&receiver.recv().await.unwrap().data).unwrap();
        let token = handshake["token"].as_str().unwrap();

        let mut request = post_json(uri, json!({ "status": "active" }));
        request
            .headers_mut()
            .insert("x-operator-token", token.parse().unwrap());
        let (status, body) = call(&fixture, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "active");
    }

    #[tokio::test]
    async fn healthcheck_reports_backend() {
        let fixture = Setup::default().build().await;
        let (status, body) = call(
            &fixture,
            Request::get("/healthcheck").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok", "store": "memory" }));
    }
}
