//! One-time charge routes (SPEC_FULL §6): `POST /charges/one-time`,
//! `GET /charges/{id}`.

use axum::extract::{Extension, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use billing_core::models::{Charge, CreateOneTimeChargeRequest};
use billing_core::VerifiedTenant;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/charges/one-time", post(create_one_time_charge))
        .route("/charges/:id", get(get_charge))
}

async fn create_one_time_charge(
    State(state): State<AppState>,
    Extension(tenant): Extension<VerifiedTenant>,
    Json(mut request): Json<CreateOneTimeChargeRequest>,
) -> Result<Json<Charge>, ApiError> {
    request.app_id = tenant.app_id.clone();
    let charge = state.charges_refunds.create_one_time_charge(request).await?;
    Ok(Json(charge))
}

async fn get_charge(
    State(state): State<AppState>,
    Extension(tenant): Extension<VerifiedTenant>,
    Path(id): Path<Uuid>,
) -> Result<Json<Charge>, ApiError> {
    let charge = state
        .charge_repo
        .find_by_id(&tenant.app_id, id)
        .await?
        .ok_or_else(|| billing_core::Error::not_found("Charge not found"))?;
    Ok(Json(charge))
}
