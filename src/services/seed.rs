//! Loading sessions and their tours from a JSON seed file.
//!
//! Authoring tours is handled by an external admin tool; the seed file lets a
//! standalone deployment (typically the in-memory store) start with playable
//! sessions.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::SystemTime};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            CheckpointEntity, DimensionScores, MissionEntity, SessionEntity, SessionStatus,
            SessionVariant,
        },
        session_store::SessionStore,
        storage::StorageError,
    },
    services::geometry::GeoPoint,
};

const DEFAULT_SEED_PATH: &str = "config/seed.json";
const SEED_PATH_ENV: &str = "TRAILHUNT_BACK_SEED_PATH";
const DEFAULT_UNLOCK_RADIUS_M: f64 = 50.0;

/// Failures while loading the seed file.
#[derive(Debug, Error)]
pub enum SeedError {
    /// The file could not be read.
    #[error("failed to read seed file")]
    Io(#[from] std::io::Error),
    /// The file is not valid seed JSON.
    #[error("failed to parse seed file")]
    Parse(#[from] serde_json::Error),
    /// The content parsed but breaks a seed rule.
    #[error("invalid seed: {0}")]
    Invalid(String),
    /// Writing the seed to the store failed.
    #[error("failed to store seed")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    sessions: Vec<SeedSession>,
}

#[derive(Debug, Deserialize)]
struct SeedSession {
    #[serde(default)]
    id: Option<Uuid>,
    name: String,
    join_code: String,
    #[serde(default = "default_status")]
    status: SessionStatus,
    #[serde(default)]
    variant: SessionVariant,
    #[serde(default)]
    is_test_mode: bool,
    #[serde(default)]
    geofence: Vec<GeoPoint>,
    #[serde(default)]
    tour_id: Option<Uuid>,
    checkpoints: Vec<SeedCheckpoint>,
}

#[derive(Debug, Deserialize)]
struct SeedCheckpoint {
    #[serde(default)]
    id: Option<Uuid>,
    name: String,
    lat: f64,
    lng: f64,
    #[serde(default = "default_radius")]
    unlock_radius_m: f64,
    weights: DimensionScores,
    #[serde(default)]
    bonus_photo_points: u32,
    title: String,
    description: String,
    #[serde(default)]
    hints: Vec<String>,
}

fn default_status() -> SessionStatus {
    SessionStatus::Lobby
}

fn default_radius() -> f64 {
    DEFAULT_UNLOCK_RADIUS_M
}

/// Counts of what a seed file added to the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    /// Sessions inserted.
    pub sessions: usize,
    /// Checkpoints saved.
    pub checkpoints: usize,
}

/// Seed file path, honouring `TRAILHUNT_BACK_SEED_PATH`.
pub fn resolve_seed_path() -> PathBuf {
    env::var_os(SEED_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SEED_PATH))
}

/// Load the seed file into `store`; a missing file seeds nothing.
pub async fn load_seed_file(store: &dyn SessionStore) -> Result<SeedSummary, SeedError> {
    let path = resolve_seed_path();
    match fs::read_to_string(&path) {
        Ok(contents) => {
            let summary = apply_seed(store, &contents).await?;
            info!(
                path = %path.display(),
                sessions = summary.sessions,
                checkpoints = summary.checkpoints,
                "seeded session store"
            );
            Ok(summary)
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "no seed file; starting empty");
            Ok(SeedSummary::default())
        }
        Err(err) => Err(err.into()),
    }
}

/// Parse a seed document and write its sessions and checkpoints.
pub async fn apply_seed(store: &dyn SessionStore, contents: &str) -> Result<SeedSummary, SeedError> {
    let seed: SeedFile = serde_json::from_str(contents)?;
    let now = SystemTime::now();
    let mut summary = SeedSummary::default();

    for session in seed.sessions {
        let tour_id = session.tour_id.unwrap_or_else(Uuid::new_v4);
        let checkpoints = session
            .checkpoints
            .into_iter()
            .enumerate()
            .map(|(index, checkpoint)| build_checkpoint(tour_id, index, checkpoint))
            .collect::<Result<Vec<_>, _>>()?;

        let entity = SessionEntity {
            id: session.id.unwrap_or_else(Uuid::new_v4),
            tour_id,
            name: session.name,
            status: session.status,
            variant: session.variant,
            is_test_mode: session.is_test_mode,
            geofence: session.geofence,
            join_code: session.join_code.trim().to_uppercase(),
            created_at: now,
            started_at: (session.status == SessionStatus::Active).then_some(now),
            completed_at: None,
            updated_at: now,
        };
        if entity.join_code.is_empty() {
            return Err(SeedError::Invalid(format!(
                "session `{}` has an empty join code",
                entity.name
            )));
        }

        for checkpoint in checkpoints {
            store.save_checkpoint(checkpoint).await?;
            summary.checkpoints += 1;
        }
        store.insert_session(entity).await?;
        summary.sessions += 1;
    }
    Ok(summary)
}

fn build_checkpoint(
    tour_id: Uuid,
    index: usize,
    seed: SeedCheckpoint,
) -> Result<CheckpointEntity, SeedError> {
    let location = GeoPoint::new(seed.lat, seed.lng);
    if !location.is_valid() {
        return Err(SeedError::Invalid(format!(
            "checkpoint `{}` has invalid coordinates",
            seed.name
        )));
    }
    if !seed.weights.within_dimension_cap() {
        return Err(SeedError::Invalid(format!(
            "checkpoint `{}` has a weight above the dimension cap",
            seed.name
        )));
    }
    if !(seed.unlock_radius_m.is_finite() && seed.unlock_radius_m > 0.0) {
        return Err(SeedError::Invalid(format!(
            "checkpoint `{}` needs a positive unlock radius",
            seed.name
        )));
    }
    let order_index = u32::try_from(index)
        .map_err(|_| SeedError::Invalid("too many checkpoints in one tour".into()))?;

    Ok(CheckpointEntity {
        id: seed.id.unwrap_or_else(Uuid::new_v4),
        tour_id,
        order_index,
        name: seed.name,
        location,
        unlock_radius_m: seed.unlock_radius_m,
        weights: seed.weights,
        bonus_photo_points: seed.bonus_photo_points,
        mission: MissionEntity {
            title: seed.title,
            description: seed.description,
            hints: seed.hints,
        },
    })
}
