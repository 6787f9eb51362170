//! Webhook ingress route (SPEC_FULL §4.9, §6): `POST /webhooks/{app_id}`.
//! Deliberately outside the Tenant Gate / Idempotency Store stack — the
//! processor is not an authenticated tenant caller, and dedupe here runs
//! on `event_id`, not an `Idempotency-Key` header. Mounted behind
//! [`crate::middleware::capture_raw_body`] only, so the signature check
//! sees the exact bytes the processor signed.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ApiError;
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "x-webhook-signature";

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/:app_id", post(receive_webhook))
}

/// Minimal envelope fields every processor event carries; the rest of the
/// payload is passed through to the handler untouched.
#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    received: bool,
    duplicate: bool,
}

async fn receive_webhook(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
    headers: HeaderMap,
    raw_body: Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    let envelope: WebhookEnvelope = serde_json::from_slice(&raw_body)
        .map_err(|_| billing_core::Error::validation("unknown_event_type"))?;
    let payload: JsonValue = serde_json::from_slice(&raw_body)
        .map_err(|_| billing_core::Error::validation("unknown_event_type"))?;

    let signature = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok());

    let outcome = state
        .webhook_ingress
        .ingest(&app_id, &envelope.id, &envelope.event_type, &raw_body, signature, payload)
        .await?;

    Ok(Json(IngestResponse {
        received: outcome.received,
        duplicate: outcome.duplicate,
    }))
}
