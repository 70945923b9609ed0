//! HTTP status code mapping for error codes

use super::codes::ErrorCode;
use http::StatusCode;

impl ErrorCode {
    /// Get the appropriate HTTP status code for this error code
    pub fn http_status(&self) -> StatusCode {
        match self {
            // Success
            Self::Success => StatusCode::OK,

            // 404 Not Found
            Self::SubscriptionNotFound => StatusCode::NOT_FOUND,

            // 409 Conflict (illegal transition or concurrent write)
            Self::SubscriptionTerminal
            | Self::TrialAlreadyUsed
            | Self::SubscriptionSuspended
            | Self::SubscriptionNotSuspended
            | Self::SubscriptionAlreadySuspended
            | Self::SubscriptionNotCancelable
            | Self::InvalidTransition
            | Self::SubscriptionVersionConflict => StatusCode::CONFLICT,

            // 422 Unprocessable Entity
            Self::InvalidDayCount => StatusCode::UNPROCESSABLE_ENTITY,

            // 401 Unauthorized
            Self::NotAuthenticated => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            Self::AdminRequired => StatusCode::FORBIDDEN,

            // 503 Service Unavailable (transient errors, client can retry)
            Self::TimeoutError => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            Self::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,

            // 400 Bad Request (default for validation errors)
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
