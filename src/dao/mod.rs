/// Database model definitions.
pub mod models;
/// Session store abstraction and its backends.
pub mod session_store;
/// Storage error types shared by every backend.
pub mod storage;
