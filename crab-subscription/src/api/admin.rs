//! Admin endpoints: any restaurant's subscription, reconciliation control

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use shared::error::{ApiResponse, ErrorCode};
use shared::{SubscriptionEvent, SubscriptionView};

use crate::db::{ReconcileRun, RunTrigger};
use crate::reconciler::RunOutcome;
use crate::state::AppState;

use super::identity::AdminIdentity;
use super::{
    ApiResult, CancelRequest, DEFAULT_EVENT_LIMIT, DaysRequest, LimitQuery, SuspendRequest,
    body_or_default, validate,
};

/// GET /api/admin/restaurants/{restaurant_id}/subscription
pub async fn status(
    State(state): State<AppState>,
    Path(restaurant_id): Path<i64>,
) -> ApiResult<SubscriptionView> {
    let view = state.service.status(restaurant_id).await?;
    Ok(ApiResponse::success(view))
}

/// POST /api/admin/restaurants/{restaurant_id}/subscription/start-trial
pub async fn start_trial(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Path(restaurant_id): Path<i64>,
) -> ApiResult<SubscriptionView> {
    let view = state
        .service
        .start_trial(restaurant_id, admin.actor())
        .await?;
    Ok(ApiResponse::success(view))
}

/// POST /api/admin/restaurants/{restaurant_id}/subscription/grant
pub async fn grant(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Path(restaurant_id): Path<i64>,
    Json(req): Json<DaysRequest>,
) -> ApiResult<SubscriptionView> {
    validate(&req, ErrorCode::InvalidDayCount)?;
    tracing::info!(restaurant_id, admin_id = %admin.admin_id, days = req.days, "Admin grant");
    let view = state
        .service
        .grant(restaurant_id, req.days, admin.actor())
        .await?;
    Ok(ApiResponse::success(view))
}

/// POST /api/admin/restaurants/{restaurant_id}/subscription/set-trial-days
pub async fn set_trial_days(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Path(restaurant_id): Path<i64>,
    Json(req): Json<DaysRequest>,
) -> ApiResult<SubscriptionView> {
    validate(&req, ErrorCode::InvalidDayCount)?;
    tracing::info!(restaurant_id, admin_id = %admin.admin_id, days = req.days, "Admin set trial days");
    let view = state
        .service
        .set_trial_days(restaurant_id, req.days, admin.actor())
        .await?;
    Ok(ApiResponse::success(view))
}

/// POST /api/admin/restaurants/{restaurant_id}/subscription/set-paid-days
pub async fn set_paid_days(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Path(restaurant_id): Path<i64>,
    Json(req): Json<DaysRequest>,
) -> ApiResult<SubscriptionView> {
    validate(&req, ErrorCode::InvalidDayCount)?;
    tracing::info!(restaurant_id, admin_id = %admin.admin_id, days = req.days, "Admin set paid days");
    let view = state
        .service
        .set_paid_days(restaurant_id, req.days, admin.actor())
        .await?;
    Ok(ApiResponse::success(view))
}

/// POST /api/admin/restaurants/{restaurant_id}/subscription/suspend
pub async fn suspend(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Path(restaurant_id): Path<i64>,
    body: Option<Json<SuspendRequest>>,
) -> ApiResult<SubscriptionView> {
    let req = body_or_default(body);
    validate(&req, ErrorCode::ValidationFailed)?;
    let view = state
        .service
        .suspend(restaurant_id, req.reason, admin.actor())
        .await?;
    Ok(ApiResponse::success(view))
}

/// POST /api/admin/restaurants/{restaurant_id}/subscription/unsuspend
pub async fn unsuspend(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Path(restaurant_id): Path<i64>,
) -> ApiResult<SubscriptionView> {
    let view = state
        .service
        .unsuspend(restaurant_id, admin.actor())
        .await?;
    Ok(ApiResponse::success(view))
}

/// POST /api/admin/restaurants/{restaurant_id}/subscription/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
    Path(restaurant_id): Path<i64>,
    body: Option<Json<CancelRequest>>,
) -> ApiResult<SubscriptionView> {
    let req = body_or_default(body);
    let view = state
        .service
        .cancel(restaurant_id, req.at_period_end, admin.actor())
        .await?;
    Ok(ApiResponse::success(view))
}

/// GET /api/admin/restaurants/{restaurant_id}/subscription/events
pub async fn events(
    State(state): State<AppState>,
    Path(restaurant_id): Path<i64>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<SubscriptionEvent>> {
    let events = state
        .service
        .events(restaurant_id, query.limit.unwrap_or(DEFAULT_EVENT_LIMIT))
        .await?;
    Ok(ApiResponse::success(events))
}

/// POST /api/admin/reconciliation/run
pub async fn run_reconciliation(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminIdentity>,
) -> ApiResult<RunOutcome> {
    tracing::info!(admin_id = %admin.admin_id, "Manual reconciliation requested");
    let outcome = state.reconciler.run_once(RunTrigger::Manual).await?;
    Ok(ApiResponse::success(outcome))
}

/// GET /api/admin/reconciliation/runs
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<ReconcileRun>> {
    let limit = query.limit.unwrap_or(20).clamp(1, 200);
    let runs = state.service.timed(state.store.list_runs(limit)).await?;
    Ok(ApiResponse::success(runs))
}
