use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::IntoResponse,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::dao::storage::StorageError;

/// Which write-once action was replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKind {
    /// The checkpoint was already unlocked by the team.
    Unlock,
    /// The team already submitted for the checkpoint.
    Submission,
}

impl std::fmt::Display for DuplicateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DuplicateKind::Unlock => "unlocked",
            DuplicateKind::Submission => "submitted",
        })
    }
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Malformed or out-of-range input.
    #[error("invalid input: {0}")]
    Validation(String),
    /// Missing or unknown credential.
    #[error("unauthorized: {0}")]
    Auth(String),
    /// Operation cannot be performed in the current session status.
    #[error("invalid state: {0}")]
    State(String),
    /// Checkpoint requested out of sequence.
    #[error("checkpoint {requested} requested while checkpoint {expected} is next")]
    Ordering { expected: u32, requested: u32 },
    /// Write-once action replayed.
    #[error("checkpoint already {0}")]
    Duplicate(DuplicateKind),
    /// Submission attempted inside the cooldown window.
    #[error("too many submissions, retry in {retry_after_ms} ms")]
    Rate { retry_after_ms: u64 },
    /// Team is too far from the checkpoint.
    #[error("{distance_m} m away from the checkpoint, {required_m} m required")]
    Geometry { distance_m: u64, required_m: u64 },
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::Validation(format!("validation failed: {err}"))
    }
}

/// Structured context attached to some error responses.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(untagged)]
pub enum ErrorDetails {
    /// Distance rejection; `remaining_m` is what the team still has to walk.
    Distance {
        distance_m: u64,
        required_m: u64,
        remaining_m: u64,
    },
    /// Cooldown rejection.
    RetryAfter { retry_after_ms: u64 },
    /// Sequence rejection.
    Ordering { expected: u32, requested: u32 },
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {message}")]
    Conflict {
        code: &'static str,
        message: String,
        details: Option<ErrorDetails>,
    },
    /// Request understood but the team is out of range.
    #[error("unprocessable: {message}")]
    Unprocessable {
        message: String,
        details: ErrorDetails,
    },
    /// Cooldown window still open.
    #[error("too many requests: retry in {retry_after_ms} ms")]
    TooManyRequests { retry_after_ms: u64 },
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Validation(message) => AppError::BadRequest(message),
            ServiceError::Auth(message) => AppError::Unauthorized(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::State(message) => AppError::Conflict {
                code: "invalid_state",
                message,
                details: None,
            },
            ServiceError::Ordering {
                expected,
                requested,
            } => AppError::Conflict {
                code: "out_of_order",
                message,
                details: Some(ErrorDetails::Ordering {
                    expected,
                    requested,
                }),
            },
            ServiceError::Duplicate(kind) => AppError::Conflict {
                code: match kind {
                    DuplicateKind::Unlock => "already_unlocked",
                    DuplicateKind::Submission => "already_submitted",
                },
                message,
                details: None,
            },
            ServiceError::Rate { retry_after_ms } => AppError::TooManyRequests { retry_after_ms },
            ServiceError::Geometry {
                distance_m,
                required_m,
            } => AppError::Unprocessable {
                message,
                details: ErrorDetails::Distance {
                    distance_m,
                    required_m,
                    remaining_m: distance_m.saturating_sub(required_m),
                },
            },
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub code: &'static str,
    /// Human-readable description.
    pub message: String,
    /// Distance, ordering or retry context, when the error carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn body(&self) -> ErrorBody {
        let (code, details) = match self {
            AppError::BadRequest(_) => ("validation_error", None),
            AppError::Unauthorized(_) => ("unauthorized", None),
            AppError::NotFound(_) => ("not_found", None),
            AppError::Conflict { code, details, .. } => (*code, details.clone()),
            AppError::Unprocessable { details, .. } => ("too_far", Some(details.clone())),
            AppError::TooManyRequests { retry_after_ms } => (
                "rate_limited",
                Some(ErrorDetails::RetryAfter {
                    retry_after_ms: *retry_after_ms,
                }),
            ),
            AppError::ServiceUnavailable(_) => ("unavailable", None),
        };

        ErrorBody {
            code,
            message: self.to_string(),
            details,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let payload = Json(self.body());
        let mut response = (status, payload).into_response();

        if let AppError::TooManyRequests { retry_after_ms } = self {
            // Header granularity is whole seconds.
            let seconds = retry_after_ms.div_ceil(1_000).max(1);
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
        }

        response
    }
}
