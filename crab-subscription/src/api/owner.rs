//! Owner endpoints: the caller's own restaurant subscription

use axum::{
    Extension, Json,
    extract::{Query, State},
};
use shared::error::ApiResponse;
use shared::{SubscriptionEvent, SubscriptionView};

use crate::state::AppState;

use super::identity::OwnerIdentity;
use super::{ApiResult, CancelRequest, DEFAULT_EVENT_LIMIT, LimitQuery, body_or_default};

/// GET /api/subscription
pub async fn status(
    State(state): State<AppState>,
    Extension(identity): Extension<OwnerIdentity>,
) -> ApiResult<SubscriptionView> {
    let view = state.service.status(identity.restaurant_id).await?;
    Ok(ApiResponse::success(view))
}

/// POST /api/subscription/start-trial
pub async fn start_trial(
    State(state): State<AppState>,
    Extension(identity): Extension<OwnerIdentity>,
) -> ApiResult<SubscriptionView> {
    let view = state
        .service
        .start_trial(identity.restaurant_id, identity.actor())
        .await?;
    Ok(ApiResponse::success(view))
}

/// POST /api/subscription/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Extension(identity): Extension<OwnerIdentity>,
    body: Option<Json<CancelRequest>>,
) -> ApiResult<SubscriptionView> {
    let req = body_or_default(body);
    let view = state
        .service
        .cancel(identity.restaurant_id, req.at_period_end, identity.actor())
        .await?;
    Ok(ApiResponse::success(view))
}

/// GET /api/subscription/events
pub async fn events(
    State(state): State<AppState>,
    Extension(identity): Extension<OwnerIdentity>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<SubscriptionEvent>> {
    let events = state
        .service
        .events(
            identity.restaurant_id,
            query.limit.unwrap_or(DEFAULT_EVENT_LIMIT),
        )
        .await?;
    Ok(ApiResponse::success(events))
}
