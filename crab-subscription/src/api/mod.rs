//! HTTP API
//!
//! | Scope | Prefix | Identity |
//! |---|---|---|
//! | owner | `/api/subscription` | `x-restaurant-id`, optional `x-actor-id` |
//! | admin | `/api/admin` | `x-admin-id` |
//! | internal | `/api/internal` | trusted network (onboarding, payment signal) |

pub mod admin;
pub mod health;
pub mod identity;
pub mod internal;
pub mod owner;

use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use serde::Deserialize;
use shared::error::{ApiResponse, AppError, ErrorCode};
use tower_http::trace::TraceLayer;
use validator::Validate;

use crate::state::AppState;

pub type ApiResult<T> = Result<ApiResponse<T>, AppError>;

/// Default page size for event listings
const DEFAULT_EVENT_LIMIT: i64 = 50;

/// Body for grant / set-trial-days / set-paid-days
#[derive(Debug, Deserialize, Validate)]
pub struct DaysRequest {
    #[validate(range(min = 1, max = 3650, message = "days must be between 1 and 3650"))]
    pub days: u32,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct SuspendRequest {
    #[serde(default)]
    #[validate(length(max = 500, message = "reason must be at most 500 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub at_period_end: bool,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

/// Run `validator` checks, mapping failures to `code`
pub fn validate<T: Validate>(body: &T, code: ErrorCode) -> Result<(), AppError> {
    body.validate()
        .map_err(|e| AppError::with_message(code, e.to_string()))
}

/// Bodies that may be omitted entirely (no content type) fall back to defaults
pub fn body_or_default<T: Default>(body: Option<Json<T>>) -> T {
    body.map(|Json(body)| body).unwrap_or_default()
}

/// Create the combined router
pub fn create_router(state: AppState) -> Router {
    let owner = Router::new()
        .route("/api/subscription", get(owner::status))
        .route("/api/subscription/start-trial", post(owner::start_trial))
        .route("/api/subscription/cancel", post(owner::cancel))
        .route("/api/subscription/events", get(owner::events))
        .layer(middleware::from_fn(identity::owner_identity));

    let admin = Router::new()
        .route(
            "/api/admin/restaurants/{restaurant_id}/subscription",
            get(admin::status),
        )
        .route(
            "/api/admin/restaurants/{restaurant_id}/subscription/start-trial",
            post(admin::start_trial),
        )
        .route(
            "/api/admin/restaurants/{restaurant_id}/subscription/grant",
            post(admin::grant),
        )
        .route(
            "/api/admin/restaurants/{restaurant_id}/subscription/set-trial-days",
            post(admin::set_trial_days),
        )
        .route(
            "/api/admin/restaurants/{restaurant_id}/subscription/set-paid-days",
            post(admin::set_paid_days),
        )
        .route(
            "/api/admin/restaurants/{restaurant_id}/subscription/suspend",
            post(admin::suspend),
        )
        .route(
            "/api/admin/restaurants/{restaurant_id}/subscription/unsuspend",
            post(admin::unsuspend),
        )
        .route(
            "/api/admin/restaurants/{restaurant_id}/subscription/cancel",
            post(admin::cancel),
        )
        .route(
            "/api/admin/restaurants/{restaurant_id}/subscription/events",
            get(admin::events),
        )
        .route("/api/admin/reconciliation/run", post(admin::run_reconciliation))
        .route("/api/admin/reconciliation/runs", get(admin::list_runs))
        .layer(middleware::from_fn(identity::admin_identity));

    let internal = Router::new()
        .route(
            "/api/internal/restaurants/{restaurant_id}/subscription",
            post(internal::onboard),
        )
        .route("/api/internal/payments", post(internal::payment));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(owner)
        .merge(admin)
        .merge(internal)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
