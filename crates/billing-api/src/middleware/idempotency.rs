//! Idempotency Store middleware (SPEC_FULL §4.2, §6 AMBIENT STACK):
//! composed onto the routes whose effects are externally observable
//! (charges, refunds, subscription mutations) so replayed requests never
//! re-invoke the processor. Thin wrapper around
//! [`billing_core::IdempotencyStore::begin`]/`finalize` — this module
//! owns only the HTTP-shaped plumbing (header, response capture).

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use billing_core::idempotency::IdempotencyOutcome;
use billing_core::VerifiedTenant;

use crate::error::ApiError;
use crate::state::AppState;

const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

pub async fn idempotency_gate(State(state): State<AppState>, headers: HeaderMap, request: Request, next: Next) -> Result<Response, ApiError> {
    // Reads carry no side effect to deduplicate; only unsafe methods are
    // gated (SPEC_FULL §4.2 scopes the Idempotency Store to writes).
    if request.method() == axum::http::Method::GET {
        return Ok(next.run(request).await);
    }

    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| billing_core::Error::validation("Missing Idempotency-Key header"))?
        .to_string();

    // The tenant gate runs ahead of this layer and inserts the verified
    // tenant into the request extensions.
    let tenant = request
        .extensions()
        .get::<VerifiedTenant>()
        .cloned()
        .ok_or_else(|| billing_core::Error::internal("Tenant gate did not run before idempotency gate"))?;

    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let (parts, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| billing_core::Error::validation(format!("Invalid request body: {e}")))?;

    let mut hash_input = Vec::with_capacity(method.len() + path.len() + body_bytes.len() + 2);
    hash_input.extend_from_slice(method.as_bytes());
    hash_input.push(b'\n');
    hash_input.extend_from_slice(path.as_bytes());
    hash_input.push(b'\n');
    hash_input.extend_from_slice(&body_bytes);
    let request_hash = billing_core::idempotency::IdempotencyStore::hash_request(&hash_input);

    match state.idempotency.begin(&tenant.app_id, &key, &request_hash).await? {
        IdempotencyOutcome::Replay { status_code, body } => {
            let status = StatusCode::from_u16(status_code as u16).unwrap_or(StatusCode::OK);
            return Ok((status, axum::Json(body)).into_response());
        }
        IdempotencyOutcome::Fresh => {}
    }

    let request = Request::from_parts(parts, Body::from(body_bytes));
    let response = next.run(request).await;

    let status = response.status();
    if status.is_success() {
        let (resp_parts, resp_body) = response.into_parts();
        let resp_bytes = axum::body::to_bytes(resp_body, usize::MAX)
            .await
            .unwrap_or_default();
        let json_body: serde_json::Value = serde_json::from_slice(&resp_bytes).unwrap_or(serde_json::Value::Null);
        state
            .idempotency
            .finalize(&tenant.app_id, &key, &request_hash, status.as_u16() as i32, json_body)
            .await?;
        Ok(Response::from_parts(resp_parts, Body::from(resp_bytes)))
    } else {
        Ok(response)
    }
}
