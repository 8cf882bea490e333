use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;
use uuid::Uuid;

/// Result alias for MongoDB store operations.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// MongoDB server error code for unique index violations.
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Failures of the MongoDB session store.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// The connection string did not parse.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    /// The driver rejected the parsed options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    /// The server never answered while connecting.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    /// A health check ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    /// Index bootstrap failed.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    /// A write was rejected or lost.
    #[error("failed to write to `{collection}` for `{id}`")]
    Write {
        collection: &'static str,
        id: Uuid,
        #[source]
        source: MongoError,
    },
    /// A query or cursor failed.
    #[error("failed to read from `{collection}`")]
    Read {
        collection: &'static str,
        #[source]
        source: MongoError,
    },
    /// A stored identifier is not a UUID.
    #[error("malformed identifier in `{collection}` document")]
    MalformedId {
        collection: &'static str,
        #[source]
        source: uuid::Error,
    },
    /// A unique index rejected the write.
    #[error("duplicate {what}")]
    Duplicate { what: &'static str },
}

/// Whether the driver error reports a unique index violation.
pub fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY_CODE
    )
}
