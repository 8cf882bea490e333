use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{session_store::SessionStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

fn backoff(delay: Duration) -> Duration {
    (delay * 2).min(MAX_DELAY)
}

/// Connect to the session store, then watch its health, toggling degraded mode
/// whenever it becomes unreachable.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SessionStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                info!(backend = store.backend(), "session store connected; leaving degraded mode");
                state.set_store(store.clone()).await;
                delay = INITIAL_DELAY;

                watch_health(&state, store.as_ref()).await;

                sleep(delay).await;
                delay = backoff(delay);
            }
            Err(err) => {
                warn!(error = %err, "session store connection attempt failed");
                sleep(delay).await;
                delay = backoff(delay);
            }
        }
    }
}

/// Poll the store until it fails and cannot be reconnected.
async fn watch_health(state: &SharedState, store: &dyn SessionStore) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded().await {
                    info!("session store healthy again; leaving degraded mode");
                    state.update_degraded(false).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "session store health check failed");
                if !reconnect(state, store).await {
                    warn!("exhausted session store reconnect attempts; staying in degraded mode");
                    return;
                }
                state.update_degraded(false).await;
            }
        }
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

async fn reconnect(state: &SharedState, store: &dyn SessionStore) -> bool {
    let mut delay = INITIAL_DELAY;
    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "session store reconnected");
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(attempt, error = %err, "session store reconnect failed; entering degraded mode");
                    state.update_degraded(true).await;
                } else {
                    warn!(attempt, error = %err, "session store reconnect attempt failed");
                }
                sleep(delay).await;
                delay = backoff(delay);
            }
        }
    }
    false
}
