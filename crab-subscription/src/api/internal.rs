//! Internal collaborator endpoints (onboarding, payment signal)

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use shared::error::{ApiResponse, ErrorCode};
use shared::{Plan, SubscriptionView};
use validator::Validate;

use crate::service::{PaymentOutcome, PaymentSignal};
use crate::state::AppState;

use super::{ApiResult, validate};

/// "Payment approved" signal from the billing side
#[derive(Debug, Deserialize, Validate)]
pub struct PaymentRequest {
    #[validate(length(min = 1, max = 128, message = "payment_id must be 1-128 characters"))]
    pub payment_id: String,
    pub restaurant_id: i64,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    #[validate(range(min = 1, max = 3650, message = "period_days must be between 1 and 3650"))]
    pub period_days: Option<u32>,
}

/// POST /api/internal/restaurants/{restaurant_id}/subscription
pub async fn onboard(
    State(state): State<AppState>,
    Path(restaurant_id): Path<i64>,
) -> ApiResult<SubscriptionView> {
    let view = state.service.onboard(restaurant_id).await?;
    Ok(ApiResponse::success(view))
}

/// POST /api/internal/payments
pub async fn payment(
    State(state): State<AppState>,
    Json(req): Json<PaymentRequest>,
) -> ApiResult<PaymentOutcome> {
    validate(&req, ErrorCode::ValidationFailed)?;
    tracing::info!(
        payment_id = %req.payment_id,
        restaurant_id = req.restaurant_id,
        "Payment signal received"
    );
    let outcome = state
        .service
        .apply_payment(PaymentSignal {
            payment_id: req.payment_id,
            restaurant_id: req.restaurant_id,
            plan: req.plan,
            period_days: req.period_days,
        })
        .await?;
    Ok(ApiResponse::success(outcome))
}
