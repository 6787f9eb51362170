//! Proration routes (SPEC_FULL §6): `POST /proration/calculate` (pure,
//! stateless preview) and `POST /subscriptions/{id}/proration/cancellation-refund`
//! (reads the live subscription to compute a refund).

use axum::extract::{Extension, Path, State};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use billing_core::engines::{
    calculate_cancellation_refund, calculate_price_change_proration, CancellationRefundBehavior,
    CancellationRefundResult, ProrationBreakdown,
};
use billing_core::VerifiedTenant;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/proration/calculate", post(calculate_proration))
        .route(
            "/subscriptions/:id/proration/cancellation-refund",
            post(cancellation_refund),
        )
}

#[derive(Debug, Deserialize)]
struct CalculateProrationRequest {
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    change_date: DateTime<Utc>,
    old_price_cents: i64,
    old_quantity: i32,
    new_price_cents: i64,
    new_quantity: i32,
}

/// Pure preview endpoint: no subscription is read or written, matching
/// `calculate_price_change_proration`'s role as stateless arithmetic
/// (SPEC_FULL §4.7). Useful for a billing UI to show a quote before the
/// caller commits via `PUT /subscriptions/{id}`.
async fn calculate_proration(
    Extension(_tenant): Extension<VerifiedTenant>,
    Json(request): Json<CalculateProrationRequest>,
) -> Result<Json<ProrationBreakdown>, ApiError> {
    let breakdown = calculate_price_change_proration(
        request.period_start,
        request.period_end,
        request.change_date,
        request.old_price_cents,
        request.old_quantity,
        request.new_price_cents,
        request.new_quantity,
    )?;
    Ok(Json(breakdown))
}

#[derive(Debug, Deserialize)]
struct CancellationRefundRequest {
    change_date: DateTime<Utc>,
    total_paid_cents: i64,
    behavior: CancellationRefundBehavior,
}

async fn cancellation_refund(
    State(state): State<AppState>,
    Extension(tenant): Extension<VerifiedTenant>,
    Path(id): Path<Uuid>,
    Json(request): Json<CancellationRefundRequest>,
) -> Result<Json<CancellationRefundResult>, ApiError> {
    let subscription = state
        .subscription_repo
        .find_by_id(&tenant.app_id, id)
        .await?
        .ok_or_else(|| billing_core::Error::not_found("Subscription not found"))?;

    let result = calculate_cancellation_refund(
        subscription.current_period_start,
        subscription.current_period_end,
        request.change_date,
        request.total_paid_cents,
        request.behavior,
    )?;
    Ok(Json(result))
}
