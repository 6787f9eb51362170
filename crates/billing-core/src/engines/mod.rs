//! Billing engines (SPEC_FULL §4.5-§4.8): the domain logic layer sitting
//! between the HTTP surface and the repository/processor traits. Each
//! engine owns one aggregate's lifecycle and is constructed from `Arc`
//! trait objects so the API crate can wire either the in-memory or the
//! Postgres-backed repositories without the engines knowing which.

pub mod charge_refund;
pub mod customer_lifecycle;
pub mod proration;
pub mod subscription_engine;

pub use charge_refund::ChargeRefundEngine;
pub use customer_lifecycle::{CustomerLifecycle, ReconciliationOutcome};
pub use proration::{
    apply_subscription_change, calculate_cancellation_refund, calculate_price_change_proration,
    calculate_time_proration, CancellationRefundAction, CancellationRefundBehavior,
    CancellationRefundResult, NetChangeType, ProrationBehavior, ProrationBreakdown, TimeProration,
};
pub use subscription_engine::SubscriptionEngine;
