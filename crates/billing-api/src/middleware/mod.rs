//! Tenant Gate and Idempotency Store as axum middleware (SPEC_FULL §6
//! AMBIENT STACK): composed onto routes via `from_fn`/`from_fn_with_state`,
//! never re-implemented per handler.

pub mod idempotency;
pub mod tenant_gate;

pub use idempotency::idempotency_gate;
pub use tenant_gate::{capture_raw_body, tenant_gate};
