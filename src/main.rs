//! Trailhunt Back binary entrypoint wiring REST, SSE, scoring and storage layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trailhunt_back::{
    config::AppConfig,
    dao::session_store::{SessionStore, memory::MemorySessionStore},
    routes,
    services::{
        scoring::{DisabledOracle, HttpScoringOracle, ScoringOracle},
        seed,
    },
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let oracle: Arc<dyn ScoringOracle> = match config.oracle_url.clone() {
        Some(url) => {
            info!(%url, "scoring oracle configured");
            Arc::new(HttpScoringOracle::new(url))
        }
        None => {
            warn!("no scoring oracle configured; every submission uses fallback scoring");
            Arc::new(DisabledOracle)
        }
    };
    let app_state = AppState::new(config, oracle);

    let backend = env::var("STORE").unwrap_or_else(|_| "mongo".into());
    match backend.as_str() {
        "memory" => install_memory_store(&app_state).await?,
        _ => spawn_mongo_supervisor(app_state.clone()).await?,
    }

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Install a seeded in-memory store; state is lost on restart.
async fn install_memory_store(state: &SharedState) -> anyhow::Result<()> {
    let store = MemorySessionStore::new();
    seed::load_seed_file(&store)
        .await
        .context("loading seed file")?;
    state.set_store(Arc::new(store) as Arc<dyn SessionStore>).await;
    info!("using in-memory session store");
    Ok(())
}

/// Connect to MongoDB in the background; the server runs degraded until it succeeds.
#[cfg(feature = "mongo-store")]
async fn spawn_mongo_supervisor(state: SharedState) -> anyhow::Result<()> {
    use trailhunt_back::{
        dao::{
            session_store::mongodb::{MongoConfig, MongoSessionStore},
            storage::StorageError,
        },
        services::storage_supervisor,
    };

    let mongo_config = MongoConfig::from_env()
        .await
        .context("parsing MONGO_URI")?;
    info!(database = %mongo_config.database_name, "connecting to mongodb in the background");

    tokio::spawn(storage_supervisor::run(state, move || {
        let config = mongo_config.clone();
        async move {
            let store = MongoSessionStore::connect(config)
                .await
                .map_err(StorageError::from)?;
            Ok(Arc::new(store) as Arc<dyn SessionStore>)
        }
    }));
    Ok(())
}

#[cfg(not(feature = "mongo-store"))]
async fn spawn_mongo_supervisor(state: SharedState) -> anyhow::Result<()> {
    warn!("built without the mongo-store feature; falling back to the in-memory store");
    install_memory_store(&state).await
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
