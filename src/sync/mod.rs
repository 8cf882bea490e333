//! Client-side synchronisation helpers for consumers of the session API.

pub mod poller;

pub use poller::{
    HttpSnapshotSource, PollError, PollingFallback, SnapshotSource, SyncEvent, TransportStatus,
    diff_snapshots,
};
