//! Transactional billing core (SPEC_FULL §1-§2): tenant isolation,
//! idempotent writes, processor reconciliation, proration, webhook
//! ingress, dunning/renewal jobs, and GL posting/period close.
//!
//! HTTP framing, per-entity CRUD, catalog management, tax, and reporting
//! are explicit non-goals (SPEC_FULL §1) and live outside this crate —
//! this crate is independently testable without an HTTP stack, driven by
//! `billing-api` but never depending on it.

pub mod config;
pub mod engines;
pub mod error;
pub mod event_log;
pub mod gl;
pub mod idempotency;
pub mod jobs;
pub mod migrate;
pub mod models;
pub mod processor;
pub mod repository;
pub mod tenant;
pub mod webhooks;

pub use config::Config;
pub use error::{Error, Result};
pub use event_log::EventLog;
pub use idempotency::{IdempotencyOutcome, IdempotencyStore};
pub use tenant::{pick_requested_app_id, scan_for_pci_violation, verify_tenant, VerifiedTenant};

pub use engines::{
    apply_subscription_change, calculate_cancellation_refund, calculate_price_change_proration,
    calculate_time_proration, ChargeRefundEngine, CustomerLifecycle, ProrationBehavior,
    ReconciliationOutcome, SubscriptionEngine,
};
pub use gl::{CloseStatus, GlPostingConsumer, PeriodCloseWorkflow, ValidateCloseResult};
pub use migrate::Migrator;
pub use jobs::{DunningController, JobSupervisor, RenewalJob, RetentionJob, TickReport};
pub use processor::{FakeProcessorGateway, ProcessorGateway, ProcessorGatewayFactory, StaticProcessorGatewayFactory};
pub use webhooks::{WebhookHandlers, WebhookIngress};

/// Current version of billing-core.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
    }
}
