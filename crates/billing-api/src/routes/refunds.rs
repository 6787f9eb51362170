//! Refund routes (SPEC_FULL §6): `POST /refunds`.

use axum::extract::{Extension, State};
use axum::routing::post;
use axum::{Json, Router};

use billing_core::models::{CreateRefundRequest, Refund};
use billing_core::VerifiedTenant;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/refunds", post(create_refund))
}

async fn create_refund(
    State(state): State<AppState>,
    Extension(tenant): Extension<VerifiedTenant>,
    Json(mut request): Json<CreateRefundRequest>,
) -> Result<Json<Refund>, ApiError> {
    request.app_id = tenant.app_id.clone();
    let refund = state.charges_refunds.create_refund(request).await?;
    Ok(Json(refund))
}
