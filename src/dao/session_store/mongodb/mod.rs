mod config;
mod connection;
mod error;
mod models;
pub mod store;

pub use config::{ConnectPolicy, MongoConfig};
pub use error::MongoDaoError;
pub use store::MongoSessionStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::Duplicate { what } => StorageError::Duplicate { what },
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
