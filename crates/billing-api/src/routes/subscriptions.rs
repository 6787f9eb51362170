//! Subscription routes (SPEC_FULL §6): `POST /subscriptions`,
//! `GET/PUT /subscriptions/{id}`, `DELETE /subscriptions/{id}?at_period_end=bool`,
//! `POST /subscriptions/{id}/proration/apply`.
//!
//! `PUT /subscriptions/{id}` only ever changes *future* cycles (SPEC_FULL
//! §4.6: "Update of price_cents affects future cycles only — immediate
//! changes go through the Proration Engine"); the dedicated
//! `proration/apply` route is the only path that runs
//! `apply_subscription_change` and writes proration charges.

use axum::extract::{Extension, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use billing_core::engines::ProrationBreakdown;
use billing_core::models::{CancelSubscriptionRequest, CancellationMode, CreateSubscriptionRequest, Subscription};
use billing_core::VerifiedTenant;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/subscriptions", post(create_subscription))
        .route(
            "/subscriptions/:id",
            get(get_subscription).put(update_subscription_future_cycle).delete(cancel_subscription),
        )
        .route("/subscriptions/:id/proration/apply", post(apply_proration))
}

/// Resolves the customer's processor id and default payment method's
/// processor id, both required by the processor gateway's narrow,
/// tokenized-only surface (SPEC_FULL §4.4).
async fn resolve_processor_refs(
    state: &AppState,
    app_id: &str,
    customer_id: Uuid,
) -> Result<(String, String), ApiError> {
    let customer = state
        .customer_repo
        .find_by_id(app_id, customer_id)
        .await?
        .ok_or_else(|| billing_core::Error::not_found("Customer not found"))?;
    let customer_processor_id = customer
        .processor_id
        .ok_or_else(|| billing_core::Error::conflict("Customer is not yet confirmed with the processor"))?;

    let payment_method = state
        .payment_method_repo
        .find_default(app_id, customer_id)
        .await?
        .ok_or_else(|| billing_core::Error::conflict("Customer has no default payment method"))?;

    Ok((customer_processor_id, payment_method.processor_id))
}

async fn create_subscription(
    State(state): State<AppState>,
    Extension(tenant): Extension<VerifiedTenant>,
    Json(mut request): Json<CreateSubscriptionRequest>,
) -> Result<Json<Subscription>, ApiError> {
    request.app_id = tenant.app_id.clone();
    let (customer_processor_id, payment_method_processor_id) =
        resolve_processor_refs(&state, &tenant.app_id, request.customer_id).await?;

    let subscription = state
        .subscriptions
        .create_subscription(request, &tenant.app_id, &customer_processor_id, &payment_method_processor_id)
        .await?;
    Ok(Json(subscription))
}

async fn get_subscription(
    State(state): State<AppState>,
    Extension(tenant): Extension<VerifiedTenant>,
    Path(id): Path<Uuid>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription = state
        .subscription_repo
        .find_by_id(&tenant.app_id, id)
        .await?
        .ok_or_else(|| billing_core::Error::not_found("Subscription not found"))?;
    Ok(Json(subscription))
}

#[derive(Debug, Deserialize)]
struct UpdateSubscriptionFutureCycleRequest {
    price_cents: i64,
    quantity: i32,
}

/// Plain field update — takes effect on the subscription's *next*
/// billing cycle, no proration charges are written (SPEC_FULL §4.6).
async fn update_subscription_future_cycle(
    State(state): State<AppState>,
    Extension(tenant): Extension<VerifiedTenant>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSubscriptionFutureCycleRequest>,
) -> Result<Json<Subscription>, ApiError> {
    let mut subscription = state
        .subscription_repo
        .find_by_id(&tenant.app_id, id)
        .await?
        .ok_or_else(|| billing_core::Error::not_found("Subscription not found"))?;

    subscription.price_cents = request.price_cents;
    subscription.quantity = request.quantity;
    subscription.updated_at = chrono::Utc::now();
    let updated = state.subscription_repo.update(subscription).await?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
struct ApplyProrationRequest {
    price_cents: i64,
    quantity: i32,
    behavior: billing_core::engines::ProrationBehavior,
    #[serde(default)]
    change_date: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Serialize)]
struct ApplyProrationResponse {
    subscription: Subscription,
    breakdown: Option<ProrationBreakdown>,
}

/// Applies an immediate mid-cycle price/quantity change (SPEC_FULL §4.7):
/// the only route that writes proration charge rows.
async fn apply_proration(
    State(state): State<AppState>,
    Extension(tenant): Extension<VerifiedTenant>,
    Path(id): Path<Uuid>,
    Json(request): Json<ApplyProrationRequest>,
) -> Result<Json<ApplyProrationResponse>, ApiError> {
    let subscription = state
        .subscription_repo
        .find_by_id(&tenant.app_id, id)
        .await?
        .ok_or_else(|| billing_core::Error::not_found("Subscription not found"))?;

    let change_date = request.change_date.unwrap_or_else(chrono::Utc::now);
    let (updated, breakdown) = billing_core::apply_subscription_change(
        state.charge_repo.as_ref(),
        state.subscription_repo.as_ref(),
        state.event_repo.as_ref(),
        subscription,
        change_date,
        request.price_cents,
        request.quantity,
        request.behavior,
    )
    .await?;

    Ok(Json(ApplyProrationResponse {
        subscription: updated,
        breakdown,
    }))
}

#[derive(Debug, Deserialize)]
struct CancelQuery {
    #[serde(default)]
    at_period_end: bool,
}

async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(tenant): Extension<VerifiedTenant>,
    Path(id): Path<Uuid>,
    Query(query): Query<CancelQuery>,
) -> Result<Json<Subscription>, ApiError> {
    let mode = if query.at_period_end {
        CancellationMode::AtPeriodEnd
    } else {
        CancellationMode::Immediate
    };
    let subscription = state
        .subscriptions
        .cancel_subscription(CancelSubscriptionRequest {
            app_id: tenant.app_id.clone(),
            subscription_id: id,
            mode,
        })
        .await?;
    Ok(Json(subscription))
}
