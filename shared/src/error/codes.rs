//! Unified error codes
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Permission errors
//! - 3xxx: Subscription errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values for efficient serialization
/// and cross-language compatibility (Rust, TypeScript, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Validation failed
    ValidationFailed = 2,

    // ==================== 1xxx: Auth ====================
    /// Caller identity missing
    NotAuthenticated = 1001,

    // ==================== 2xxx: Permission ====================
    /// Admin role required
    AdminRequired = 2003,

    // ==================== 3xxx: Subscription ====================
    /// No subscription for restaurant
    SubscriptionNotFound = 3011,
    /// Subscription is EXPIRED or CANCELED
    SubscriptionTerminal = 3030,
    /// One-time trial already consumed
    TrialAlreadyUsed = 3031,
    /// Operation not allowed while suspended
    SubscriptionSuspended = 3033,
    /// Unsuspend on a subscription that is not suspended
    SubscriptionNotSuspended = 3034,
    /// Suspend on an already suspended subscription
    SubscriptionAlreadySuspended = 3035,
    /// Cancel-at-period-end requires an active paid period
    SubscriptionNotCancelable = 3036,
    /// Transition not permitted from the current status
    InvalidTransition = 3037,
    /// Day count must be a positive integer
    InvalidDayCount = 3038,
    /// Concurrent modification, retry from a fresh read
    SubscriptionVersionConflict = 3039,

    // ==================== 9xxx: System ====================
    /// Database error
    DatabaseError = 9002,
    /// Operation timeout
    TimeoutError = 9004,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Can the caller retry the same request unchanged?
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::SubscriptionVersionConflict
                | ErrorCode::TimeoutError
                | ErrorCode::DatabaseError
        )
    }

    /// Get the developer-facing English message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::ValidationFailed => "Validation failed",

            // Auth
            ErrorCode::NotAuthenticated => "Caller identity is missing",

            // Permission
            ErrorCode::AdminRequired => "Administrator role is required",

            // Subscription
            ErrorCode::SubscriptionNotFound => "Subscription not found",
            ErrorCode::SubscriptionTerminal => "Subscription is in a terminal state",
            ErrorCode::TrialAlreadyUsed => "Trial already used",
            ErrorCode::SubscriptionSuspended => "Subscription is suspended",
            ErrorCode::SubscriptionNotSuspended => "Subscription is not suspended",
            ErrorCode::SubscriptionAlreadySuspended => "Subscription is already suspended",
            ErrorCode::SubscriptionNotCancelable => {
                "Subscription cannot be canceled at period end"
            }
            ErrorCode::InvalidTransition => "Transition not allowed from current status",
            ErrorCode::InvalidDayCount => "Day count must be a positive integer",
            ErrorCode::SubscriptionVersionConflict => {
                "Subscription was modified concurrently, please retry"
            }

            // System
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::TimeoutError => "Operation timed out",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            0 => Ok(ErrorCode::Success),
            2 => Ok(ErrorCode::ValidationFailed),

            // Auth
            1001 => Ok(ErrorCode::NotAuthenticated),

            // Permission
            2003 => Ok(ErrorCode::AdminRequired),

            // Subscription
            3011 => Ok(ErrorCode::SubscriptionNotFound),
            3030 => Ok(ErrorCode::SubscriptionTerminal),
            3031 => Ok(ErrorCode::TrialAlreadyUsed),
            3033 => Ok(ErrorCode::SubscriptionSuspended),
            3034 => Ok(ErrorCode::SubscriptionNotSuspended),
            3035 => Ok(ErrorCode::SubscriptionAlreadySuspended),
            3036 => Ok(ErrorCode::SubscriptionNotCancelable),
            3037 => Ok(ErrorCode::InvalidTransition),
            3038 => Ok(ErrorCode::InvalidDayCount),
            3039 => Ok(ErrorCode::SubscriptionVersionConflict),

            // System
            9002 => Ok(ErrorCode::DatabaseError),
            9004 => Ok(ErrorCode::TimeoutError),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
