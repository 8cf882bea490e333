use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report liveness along with the storage backend, logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let backend = match state.require_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(backend = store.backend(), error = %err, "session store health check failed");
            }
            Some(store.backend())
        }
        Err(_) => {
            warn!("session store unavailable (degraded mode)");
            None
        }
    };

    match backend {
        Some(store) if !state.is_degraded().await => HealthResponse::ok(store),
        _ => HealthResponse::degraded(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, services::scoring::DisabledOracle, state::AppState, test_support::Setup};
    use std::sync::Arc;

    #[tokio::test]
    async fn reports_backend_once_connected() {
        let fixture = Setup::default().build().await;
        let health = health_status(&fixture.state).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.store, Some("memory"));
    }

    #[tokio::test]
    async fn degraded_without_store() {
        let state = AppState::new(AppConfig::default(), Arc::new(DisabledOracle));
        let health = health_status(&state).await;
        assert_eq!(health.status, "degraded");
        assert_eq!(health.store, None);
    }
}
