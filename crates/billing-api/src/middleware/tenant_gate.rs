//! Tenant Gate middleware (SPEC_FULL §4.1, §6 AMBIENT STACK): picks the
//! requested `app_id` from path, then body, then query; matches it
//! against an authorized context header; rejects PCI-sensitive field
//! names in the raw body before any handler runs. Composed onto mutating
//! routes via `axum::middleware::from_fn`, never re-implemented per
//! handler.

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::collections::HashMap;

use billing_core::{pick_requested_app_id, scan_for_pci_violation, verify_tenant, VerifiedTenant};

use crate::error::ApiError;

/// Header carrying the caller's authorized tenant, set by whatever
/// upstream auth layer issues the request credential. This crate does
/// not implement authn itself (out of scope per SPEC_FULL §1) — it only
/// enforces that the authorized value, once present, matches the
/// requested one.
const AUTHORIZED_APP_ID_HEADER: &str = "x-authorized-app-id";

/// Runs before any `Json<T>` extraction: buffers the body once, scans it
/// for PCI-sensitive substrings, resolves and verifies the tenant, then
/// reassembles the request so the downstream handler's extractors still
/// see the original body.
pub async fn tenant_gate(
    Path(path_params): Path<HashMap<String, String>>,
    Query(query_params): Query<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ApiError::from(billing_core::Error::validation(format!("Invalid request body: {e}"))))?;

    let body_str = std::str::from_utf8(&bytes).unwrap_or("");
    scan_for_pci_violation(body_str).map_err(ApiError::from)?;

    let body_app_id = serde_json::from_str::<serde_json::Value>(body_str)
        .ok()
        .and_then(|v| v.get("app_id").and_then(|a| a.as_str()).map(|s| s.to_string()));

    let requested = pick_requested_app_id(
        path_params.get("app_id").map(|s| s.as_str()),
        body_app_id.as_deref(),
        query_params.get("app_id").map(|s| s.as_str()),
    )
    .map(|s| s.to_string());

    let authorized = parts
        .headers
        .get(AUTHORIZED_APP_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());

    let tenant: VerifiedTenant = verify_tenant(requested.as_deref(), authorized.as_deref()).map_err(ApiError::from)?;

    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(tenant);
    Ok(next.run(request).await)
}

/// Captures the raw body bytes verbatim ahead of any JSON extraction, for
/// the webhook ingress route (SPEC_FULL §4.9, §6, §9): signature
/// verification must see the original bytes, not a re-serialized body.
pub async fn capture_raw_body(request: Request, next: Next) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let bytes: Bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ApiError::from(billing_core::Error::validation(format!("Invalid request body: {e}"))))?;

    let mut request = Request::from_parts(parts, Body::from(bytes.clone()));
    request.extensions_mut().insert(bytes);
    Ok(next.run(request).await)
}
