/// Shared lookups for team-facing operations.
pub(crate) mod access;
/// OpenAPI documentation generation.
pub mod documentation;
/// Position reports and geofence alerts.
pub mod geofence_service;
/// Great-circle distance and polygon membership.
pub mod geometry;
/// Health check service.
pub mod health_service;
/// Aggregate reads and the operator score report.
pub mod score_cache;
/// Submission scoring with the oracle and its fallback.
pub mod scoring;
/// Seed file loading for standalone deployments.
pub mod seed;
/// Session entry, lifecycle and snapshots.
pub mod session_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events subscription service.
pub mod sse_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
/// Answer and photo submissions.
pub mod submission_service;
/// Sequential checkpoint unlocking.
pub mod unlock_service;
