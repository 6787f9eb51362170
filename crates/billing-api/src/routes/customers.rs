//! Customer routes (SPEC_FULL §6): `GET/POST /customers`,
//! `PUT /customers/{id}`, `POST /customers/{id}/default-payment-method`.

use axum::extract::{Extension, Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use billing_core::models::CreateCustomerRequest;
use billing_core::VerifiedTenant;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/customers", post(create_customer))
        .route("/customers/:id", get(get_customer).put(update_customer))
        .route("/customers/:id/default-payment-method", post(set_default_payment_method))
}

async fn create_customer(
    State(state): State<AppState>,
    Extension(tenant): Extension<VerifiedTenant>,
    Json(mut request): Json<CreateCustomerRequest>,
) -> Result<Json<billing_core::models::Customer>, ApiError> {
    // The Tenant Gate's verified value is the only app_id ever trusted;
    // anything the body carried is overwritten here.
    request.app_id = tenant.app_id.clone();
    let customer = state.customers.create_customer(request, &tenant.app_id).await?;
    Ok(Json(customer))
}

async fn get_customer(
    State(state): State<AppState>,
    Extension(tenant): Extension<VerifiedTenant>,
    Path(id): Path<Uuid>,
) -> Result<Json<billing_core::models::Customer>, ApiError> {
    let customer = state
        .customer_repo
        .find_by_id(&tenant.app_id, id)
        .await?
        .ok_or_else(|| billing_core::Error::not_found("Customer not found"))?;
    Ok(Json(customer))
}

async fn update_customer(
    State(state): State<AppState>,
    Extension(tenant): Extension<VerifiedTenant>,
    Path(id): Path<Uuid>,
    Json(request): Json<billing_core::models::UpdateCustomerRequest>,
) -> Result<Json<billing_core::models::Customer>, ApiError> {
    let mut customer = state
        .customer_repo
        .find_by_id(&tenant.app_id, id)
        .await?
        .ok_or_else(|| billing_core::Error::not_found("Customer not found"))?;

    if let Some(email) = request.email {
        customer.email = email;
    }
    if let Some(name) = request.name {
        customer.name = name;
    }
    if let Some(default_payment_method_id) = request.default_payment_method_id {
        customer.default_payment_method_id = Some(default_payment_method_id);
    }
    if let Some(metadata) = request.metadata {
        customer.metadata = metadata;
    }
    customer.updated_at = chrono::Utc::now();

    let updated = state.customer_repo.update(customer).await?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
struct SetDefaultPaymentMethodRequest {
    payment_method_id: Uuid,
}

async fn set_default_payment_method(
    State(state): State<AppState>,
    Extension(tenant): Extension<VerifiedTenant>,
    Path(id): Path<Uuid>,
    Json(request): Json<SetDefaultPaymentMethodRequest>,
) -> Result<Json<billing_core::models::Customer>, ApiError> {
    let mut customer = state
        .customer_repo
        .find_by_id(&tenant.app_id, id)
        .await?
        .ok_or_else(|| billing_core::Error::not_found("Customer not found"))?;

    state.payment_method_repo.clear_default(&tenant.app_id, id).await?;
    state.payment_method_repo.set_default(&tenant.app_id, request.payment_method_id).await?;

    customer.default_payment_method_id = Some(request.payment_method_id);
    customer.updated_at = chrono::Utc::now();
    let updated = state.customer_repo.update(customer).await?;
    Ok(Json(updated))
}
