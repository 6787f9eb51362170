//! HTTP error mapping (SPEC_FULL §4.3, §7 AMBIENT STACK). The only place
//! a [`billing_core::Error`] becomes a transport artifact — domain code
//! never constructs a status code directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use billing_core::Error;

/// Wraps a domain error with the production flag needed to decide how
/// much detail the response body carries (SPEC_FULL §7: stack traces and
/// relational-engine internals are suppressed in production).
pub struct ApiError {
    pub inner: Error,
    pub production: bool,
}

impl ApiError {
    pub fn new(inner: Error, production: bool) -> Self {
        Self { inner, production }
    }
}

impl From<Error> for ApiError {
    /// Defaults to production-safe redaction; handlers that need verbose
    /// local errors should build `ApiError::new(err, false)` explicitly.
    fn from(inner: Error) -> Self {
        Self { inner, production: true }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = self.inner.safe_message(self.production);
        tracing::error!(error_kind = self.inner.category(), message = %self.inner, "request failed");
        (
            status,
            Json(json!({
                "error": {
                    "kind": self.inner.category(),
                    "message": message,
                }
            })),
        )
            .into_response()
    }
}
