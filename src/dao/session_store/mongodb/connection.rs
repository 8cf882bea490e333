use mongodb::{
    Client, Database, IndexModel,
    bson::{Document, doc},
    options::IndexOptions,
};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{
    config::{ConnectPolicy, MongoConfig},
    error::{MongoDaoError, MongoResult},
    models::{
        AGGREGATE_COLLECTION_NAME, CHECKPOINT_COLLECTION_NAME, SESSION_COLLECTION_NAME,
        SUBMISSION_COLLECTION_NAME, TEAM_COLLECTION_NAME,
    },
};

/// Index definition backing one of the store's uniqueness or lookup guarantees.
struct IndexSpec {
    collection: &'static str,
    name: &'static str,
    keys: &'static [&'static str],
    unique: bool,
}

const fn index(
    collection: &'static str,
    name: &'static str,
    keys: &'static [&'static str],
    unique: bool,
) -> IndexSpec {
    IndexSpec {
        collection,
        name,
        keys,
        unique,
    }
}

/// Unique indexes carry the exactly-once guarantees; plain ones serve session scans.
const INDEXES: &[IndexSpec] = &[
    index(SESSION_COLLECTION_NAME, "session_join_code_idx", &["join_code"], true),
    index(CHECKPOINT_COLLECTION_NAME, "checkpoint_tour_order_idx", &["tour_id", "order_index"], true),
    index(TEAM_COLLECTION_NAME, "team_token_idx", &["token"], true),
    index(TEAM_COLLECTION_NAME, "team_session_idx", &["session_id"], false),
    index(SUBMISSION_COLLECTION_NAME, "submission_team_checkpoint_idx", &["team_id", "checkpoint_id"], true),
    index(SUBMISSION_COLLECTION_NAME, "submission_session_idx", &["session_id", "created_at"], false),
    index(AGGREGATE_COLLECTION_NAME, "aggregate_session_team_idx", &["session_id", "team_id"], true),
];

/// Live driver handle for the session database; it owns a clone of the client pool.
pub(super) struct MongoConnection {
    pub database: Database,
}

/// Connect, wait for the server to answer, then make sure every index exists.
///
/// Used for the first connection and for reconnects; index creation is idempotent.
pub(super) async fn open(config: &MongoConfig) -> MongoResult<MongoConnection> {
    let client = Client::with_options(config.options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(&config.database_name);

    wait_for_ping(&database, config.connect).await?;
    ensure_indexes(&database).await?;
    debug!(database = %config.database_name, "mongodb session database ready");

    Ok(MongoConnection { database })
}

async fn wait_for_ping(database: &Database, policy: ConnectPolicy) -> MongoResult<()> {
    let mut delay = policy.initial_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => return Ok(()),
            Err(source) if attempts >= policy.max_pings => {
                return Err(MongoDaoError::InitialPing { attempts, source });
            }
            Err(err) => {
                warn!(attempts, error = %err, retry_in = ?delay, "mongodb ping failed");
                sleep(delay).await;
                delay = policy.next_delay(delay);
            }
        }
    }
}

fn index_model(spec: &IndexSpec) -> IndexModel {
    let mut keys = Document::new();
    for key in spec.keys {
        keys.insert(*key, 1);
    }
    IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .name(Some(spec.name.to_owned()))
                .unique(Some(spec.unique))
                .build(),
        )
        .build()
}

async fn ensure_indexes(database: &Database) -> MongoResult<()> {
    for spec in INDEXES {
        database
            .collection::<Document>(spec.collection)
            .create_index(index_model(spec))
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: spec.collection,
                index: spec.name,
                source,
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_once_guarantees_have_unique_indexes() {
        let unique = |collection: &str, keys: &[&str]| {
            INDEXES
                .iter()
                .any(|spec| spec.collection == collection && spec.keys == keys && spec.unique)
        };
        assert!(unique(SUBMISSION_COLLECTION_NAME, &["team_id", "checkpoint_id"]));
        assert!(unique(AGGREGATE_COLLECTION_NAME, &["session_id", "team_id"]));
        assert!(unique(TEAM_COLLECTION_NAME, &["token"]));
        assert!(unique(SESSION_COLLECTION_NAME, &["join_code"]));
    }

    #[test]
    fn index_keys_are_ascending_in_declared_order() {
        let spec = &INDEXES[1];
        let model = index_model(spec);
        let keys: Vec<_> = model.keys.keys().cloned().collect();
        assert_eq!(keys, ["tour_id", "order_index"]);
        assert_eq!(model.keys.get_i32("order_index").ok(), Some(1));
        let options = model.options.unwrap();
        assert_eq!(options.name.as_deref(), Some("checkpoint_tour_order_idx"));
        assert_eq!(options.unique, Some(true));
    }
}
