//! Route aggregation (SPEC_FULL §6 AMBIENT STACK): merges each resource's
//! router, then layers the Tenant Gate and Idempotency Store on top of
//! the mutating surface.

pub mod charges;
pub mod customers;
pub mod periods;
pub mod proration;
pub mod refunds;
pub mod subscriptions;
pub mod webhooks;

use axum::middleware;
use axum::routing::Router;
use tower_http::trace::TraceLayer;

use crate::middleware::{capture_raw_body, idempotency_gate, tenant_gate};
use crate::state::AppState;

/// Mutating, tenant-scoped routes every one of which must pass through
/// the Tenant Gate, and every one of which is safe to retry behind an
/// `Idempotency-Key` (SPEC_FULL §4.1, §4.2).
pub fn build_router(state: AppState) -> Router {
    let tenant_scoped = Router::new()
        .merge(customers::router())
        .merge(subscriptions::router())
        .merge(charges::router())
        .merge(refunds::router())
        .merge(proration::router())
        .merge(periods::router())
        .layer(middleware::from_fn_with_state(state.clone(), idempotency_gate))
        .layer(middleware::from_fn(tenant_gate));

    // Webhook ingress is unauthenticated (the processor, not a tenant
    // caller, is on the other end) and never replays through the
    // Idempotency Store — dedupe runs on `event_id` instead (§4.9).
    let webhook_routes = webhooks::router().layer(middleware::from_fn(capture_raw_body));

    let api_v1 = Router::new().merge(tenant_scoped).merge(webhook_routes);

    Router::new()
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
