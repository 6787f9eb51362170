//! Thin axum glue over `billing-core` (SPEC_FULL §6 AMBIENT STACK): one
//! `routes/*.rs` module per resource, a `state.rs` holding `Arc`-wrapped
//! engines/repositories, and the Tenant Gate / Idempotency Store
//! middleware composed onto the mutating surface. Business rules never
//! live here — every handler is a thin translation between HTTP and a
//! `billing-core` call, keeping the same split between HTTP framing and
//! domain logic as the rest of this workspace.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::build_router;
pub use state::AppState;
