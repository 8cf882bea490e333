use std::{env, time::Duration};

use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};

const DEFAULT_URI: &str = "mongodb://localhost:27017";
const DEFAULT_DB: &str = "trailhunt";
const APP_NAME: &str = "trailhunt-back";
const URI_ENV: &str = "MONGO_URI";
const DB_ENV: &str = "MONGO_DB";

/// How hard a single connection attempt pings before giving up.
///
/// The storage supervisor retries whole attempts on top of this, so the
/// defaults stay short enough for a stalled server to surface as degraded mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    /// Pings tried before the attempt fails.
    pub max_pings: u32,
    /// Delay after the first failed ping.
    pub initial_delay: Duration,
    /// Upper bound for the doubling delay.
    pub max_delay: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            max_pings: 5,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl ConnectPolicy {
    /// Delay following `current`, doubled and capped.
    pub fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_delay)
    }
}

/// Connection settings for the MongoDB session store.
#[derive(Clone)]
pub struct MongoConfig {
    /// Driver options parsed from the URI, tagged with the application name.
    pub options: ClientOptions,
    /// Database holding the session collections.
    pub database_name: String,
    /// Ping retry policy for each connection attempt.
    pub connect: ConnectPolicy,
}

impl MongoConfig {
    /// Parse `uri`; the database defaults to `trailhunt`.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let mut options =
            ClientOptions::parse(uri)
                .await
                .map_err(|source| MongoDaoError::InvalidUri {
                    uri: uri.to_owned(),
                    source,
                })?;
        if options.app_name.is_none() {
            options.app_name = Some(APP_NAME.to_owned());
        }

        Ok(Self {
            options,
            database_name: db_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(DEFAULT_DB)
                .to_owned(),
            connect: ConnectPolicy::default(),
        })
    }

    /// Read `MONGO_URI` and `MONGO_DB`, falling back to a local server.
    pub async fn from_env() -> MongoResult<Self> {
        let uri = env::var(URI_ENV).unwrap_or_else(|_| DEFAULT_URI.to_owned());
        let db = env::var(DB_ENV).ok();
        Self::from_uri(&uri, db.as_deref()).await
    }

    /// Replace the ping retry policy.
    pub fn with_connect_policy(mut self, connect: ConnectPolicy) -> Self {
        self.connect = connect;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_delay_doubles_up_to_the_cap() {
        let policy = ConnectPolicy::default();
        let delays: Vec<_> = std::iter::successors(Some(policy.initial_delay), |delay| {
            Some(policy.next_delay(*delay))
        })
        .take(6)
        .collect();
        assert_eq!(
            delays,
            [250, 500, 1_000, 2_000, 2_000, 2_000].map(Duration::from_millis)
        );
    }

    #[tokio::test]
    async fn uri_parsing_tags_the_client_and_defaults_the_database() {
        let config = MongoConfig::from_uri("mongodb://localhost:27017", Some(" "))
            .await
            .unwrap();
        assert_eq!(config.database_name, DEFAULT_DB);
        assert_eq!(config.options.app_name.as_deref(), Some(APP_NAME));

        let named = MongoConfig::from_uri("mongodb://localhost:27017/?appName=ops", Some("hunts"))
            .await
            .unwrap();
        assert_eq!(named.database_name, "hunts");
        assert_eq!(named.options.app_name.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn malformed_uris_are_rejected() {
        let err = MongoConfig::from_uri("postgres://nope", None).await.err();
        assert!(matches!(err, Some(MongoDaoError::InvalidUri { .. })));
    }
}
