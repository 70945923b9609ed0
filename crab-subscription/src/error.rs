//! Service-layer error type
//!
//! `ServiceError` bridges store errors and state-machine rejections to the
//! API-layer `AppError`, so handlers can use `?` throughout.

use axum::response::IntoResponse;
use shared::error::{AppError, ErrorCode};
use thiserror::Error;

use crate::db::StoreError;
use crate::lifecycle::Rejection;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Store/infrastructure failure (logged, retryable)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Intent refused by the state machine
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("subscription not found")]
    NotFound,

    /// Version CAS lost on every attempt
    #[error("concurrent update conflict after {attempts} attempts")]
    Conflict { attempts: u32 },
}

impl ServiceError {
    /// Transient: the same call may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Conflict { .. })
    }
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Store(StoreError::Timeout) => {
                tracing::warn!("Store operation timed out");
                AppError::new(ErrorCode::TimeoutError)
            }
            ServiceError::Store(StoreError::NotFound) => AppError::new(ErrorCode::SubscriptionNotFound),
            ServiceError::Store(err) => {
                tracing::error!(error = %err, "Service store error");
                AppError::new(ErrorCode::DatabaseError)
            }
            ServiceError::Rejected(rejection) => {
                AppError::with_message(rejection.error_code(), rejection.to_string())
            }
            ServiceError::Validation(msg) => AppError::validation(msg),
            ServiceError::NotFound => AppError::new(ErrorCode::SubscriptionNotFound),
            ServiceError::Conflict { attempts } => AppError::new(ErrorCode::SubscriptionVersionConflict)
                .with_detail("attempts", attempts)
                .with_detail("retryable", true),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> axum::response::Response {
        let app_error: AppError = self.into();
        app_error.into_response()
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use shared::SubscriptionStatus;

    #[test]
    fn test_rejection_maps_to_conflict() {
        let err: AppError =
            ServiceError::Rejected(Rejection::Terminal(SubscriptionStatus::Canceled)).into();
        assert_eq!(err.code, ErrorCode::SubscriptionTerminal);
        assert_eq!(err.http_status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_invalid_days_maps_to_unprocessable() {
        let err: AppError = ServiceError::Rejected(Rejection::InvalidDays(0)).into();
        assert_eq!(err.http_status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_timeout_is_service_unavailable() {
        let err: AppError = ServiceError::Store(StoreError::Timeout).into();
        assert_eq!(err.code, ErrorCode::TimeoutError);
        assert_eq!(err.http_status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_conflict_carries_attempts() {
        let err: AppError = ServiceError::Conflict { attempts: 3 }.into();
        assert_eq!(err.code, ErrorCode::SubscriptionVersionConflict);
        assert_eq!(err.http_status(), StatusCode::CONFLICT);
        let details = err.details.expect("details");
        assert_eq!(details["attempts"], 3);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ServiceError::Conflict { attempts: 1 }.is_retryable());
        assert!(ServiceError::Store(StoreError::Timeout).is_retryable());
        assert!(!ServiceError::NotFound.is_retryable());
        assert!(!ServiceError::Rejected(Rejection::TrialAlreadyUsed).is_retryable());
    }
}
