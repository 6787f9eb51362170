//! Accounting period close routes (SPEC_FULL §4.14, §6):
//! `POST /periods/{id}/validate-close`, `POST /periods/{id}/close`,
//! `GET /periods/{id}/close-status`.

use axum::extract::{Extension, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use billing_core::gl::{CloseStatus, ValidateCloseResult};
use billing_core::VerifiedTenant;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/periods/:id/validate-close", post(validate_close))
        .route("/periods/:id/close", post(close_period))
        .route("/periods/:id/close-status", get(close_status))
}

async fn validate_close(
    State(state): State<AppState>,
    Extension(tenant): Extension<VerifiedTenant>,
    Path(id): Path<Uuid>,
) -> Result<Json<ValidateCloseResult>, ApiError> {
    let result = state.period_close.validate_close(&tenant.app_id, id).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct ClosePeriodRequest {
    closed_by: String,
    #[serde(default)]
    close_reason: Option<String>,
}

async fn close_period(
    State(state): State<AppState>,
    Extension(tenant): Extension<VerifiedTenant>,
    Path(id): Path<Uuid>,
    Json(request): Json<ClosePeriodRequest>,
) -> Result<Json<CloseStatusResponse>, ApiError> {
    let status = state
        .period_close
        .close(&tenant.app_id, id, &request.closed_by, request.close_reason.as_deref())
        .await?;
    Ok(Json(CloseStatusResponse::from(status)))
}

async fn close_status(
    State(state): State<AppState>,
    Extension(tenant): Extension<VerifiedTenant>,
    Path(id): Path<Uuid>,
) -> Result<Json<CloseStatusResponse>, ApiError> {
    let validation = state.period_close.validate_close(&tenant.app_id, id).await?;
    if validation.issues.iter().any(|i| i == "PERIOD_NOT_FOUND") {
        return Err(billing_core::Error::not_found("Accounting period not found").into());
    }
    if !validation.issues.iter().any(|i| i == "PERIOD_ALREADY_CLOSED") {
        return Ok(Json(CloseStatusResponse::from(CloseStatus::Open)));
    }

    // Already closed: `close` is idempotent and returns the recorded
    // status without mutating anything, so it doubles as the status read.
    let status = state
        .period_close
        .close(&tenant.app_id, id, "status-read", None)
        .await?;
    Ok(Json(CloseStatusResponse::from(status)))
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
enum CloseStatusResponse {
    Open,
    Closed {
        closed_at: chrono::DateTime<chrono::Utc>,
        closed_by: String,
        close_reason: Option<String>,
        close_hash: String,
    },
}

impl From<CloseStatus> for CloseStatusResponse {
    fn from(status: CloseStatus) -> Self {
        match status {
            CloseStatus::Open => CloseStatusResponse::Open,
            CloseStatus::Closed { closed_at, closed_by, close_reason, close_hash } => {
                CloseStatusResponse::Closed { closed_at, closed_by, close_reason, close_hash }
            }
        }
    }
}
