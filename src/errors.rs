use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ride::RideState;

/// Main error type for the ride orchestration core
#[derive(Debug, Error)]
pub enum DispatchError {
    // Validation errors: rejected synchronously, nothing changed
    #[error("Location ({latitude}, {longitude}) is outside the service region")]
    InvalidLocation { latitude: f64, longitude: f64 },

    #[error("Pickup and destination are the same point")]
    DegenerateRoute,

    #[error("Rider {0} already has an active ride request")]
    DuplicateRequest(String),

    #[error("Validation failed: {} errors", .0.len())]
    ValidationFailed(Vec<ValidationError>),

    #[error("Driver {0} is already registered")]
    DriverAlreadyRegistered(String),

    // Conflict errors: re-fetch and retry once
    #[error("Driver no longer available, retry")]
    MatchConflict,

    #[error("Ride {ride_id} cannot '{event}' from state {state}")]
    InvalidTransition {
        ride_id: String,
        state: RideState,
        event: String,
    },

    #[error("Ride {ride_id} cannot '{event}': {reason}")]
    GuardRejected {
        ride_id: String,
        event: String,
        reason: String,
    },

    #[error("Concurrent modification of {collection} {id}, retry")]
    ConcurrentModification { collection: String, id: String },

    #[error("Driver {0} has an active ride")]
    ActiveRideConflict(String),

    // Not-found errors
    #[error("Ride not found: {0}")]
    RideNotFound(String),

    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    // Infrastructure errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Notification delivery failed: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Error taxonomy exposed to callers deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Conflict,
    NotFound,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    category: ErrorCategory,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl DispatchError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DispatchError::InvalidLocation { .. }
            | DispatchError::DegenerateRoute
            | DispatchError::DuplicateRequest(_)
            | DispatchError::ValidationFailed(_)
            | DispatchError::DriverAlreadyRegistered(_) => ErrorCategory::Validation,

            DispatchError::MatchConflict
            | DispatchError::InvalidTransition { .. }
            | DispatchError::GuardRejected { .. }
            | DispatchError::ConcurrentModification { .. }
            | DispatchError::ActiveRideConflict(_) => ErrorCategory::Conflict,

            DispatchError::RideNotFound(_) | DispatchError::DriverNotFound(_) => {
                ErrorCategory::NotFound
            }

            DispatchError::Storage(_)
            | DispatchError::Serialization(_)
            | DispatchError::Notification(_)
            | DispatchError::Configuration(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the same call may succeed after re-fetching current state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::MatchConflict
                | DispatchError::ConcurrentModification { .. }
                | DispatchError::Storage(_)
        )
    }

    fn code(&self) -> &'static str {
        match self {
            DispatchError::InvalidLocation { .. } => "invalid_location",
            DispatchError::DegenerateRoute => "degenerate_route",
            DispatchError::DuplicateRequest(_) => "duplicate_request",
            DispatchError::ValidationFailed(_) => "validation_failed",
            DispatchError::DriverAlreadyRegistered(_) => "driver_already_registered",
            DispatchError::MatchConflict => "match_conflict",
            DispatchError::InvalidTransition { .. } => "invalid_transition",
            DispatchError::GuardRejected { .. } => "guard_rejected",
            DispatchError::ConcurrentModification { .. } => "concurrent_modification",
            DispatchError::ActiveRideConflict(_) => "active_ride_conflict",
            DispatchError::RideNotFound(_) => "ride_not_found",
            DispatchError::DriverNotFound(_) => "driver_not_found",
            DispatchError::Storage(_) => "storage_error",
            DispatchError::Serialization(_) => "serialization_error",
            DispatchError::Notification(_) => "notification_error",
            DispatchError::Configuration(_) => "configuration_error",
        }
    }

    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        DispatchError::ValidationFailed(vec![ValidationError {
            field: field.into(),
            message: message.into(),
        }])
    }

    pub fn ride_not_found(ride_id: impl Into<String>) -> Self {
        DispatchError::RideNotFound(ride_id.into())
    }

    pub fn driver_not_found(driver_id: impl Into<String>) -> Self {
        DispatchError::DriverNotFound(driver_id.into())
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let category = self.category();
        let status = match category {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::Conflict => StatusCode::CONFLICT,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if category == ErrorCategory::Internal {
            tracing::error!("Request failed: {}", self);
        }

        let details = match &self {
            DispatchError::ValidationFailed(errors) => serde_json::to_value(errors).ok(),
            _ => None,
        };

        let error_response = ErrorResponse {
            error: self.code().to_string(),
            category,
            message: self.to_string(),
            details,
        };

        (status, axum::Json(error_response)).into_response()
    }
}

// Convenience type alias for Results
pub type DispatchResult<T> = Result<T, DispatchError>;

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DispatchError::Notification("request timed out".to_string())
        } else {
            DispatchError::Notification(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        DispatchError::Serialization(err.to_string())
    }
}
