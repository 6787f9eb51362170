//! Shared application state (SPEC_FULL §6 AMBIENT STACK): `Arc`-wrapped
//! engines and repositories, built once at startup and cloned into each
//! request. Business logic lives entirely in `billing-core` — this
//! struct only wires repositories and a processor gateway into the
//! engines the routes call.

use std::sync::Arc;

use billing_core::engines::{ChargeRefundEngine, CustomerLifecycle, SubscriptionEngine};
use billing_core::gl::{GlPostingConsumer, PeriodCloseWorkflow};
use billing_core::idempotency::IdempotencyStore;
use billing_core::processor::ProcessorGateway;
use billing_core::repository::{
    ChargeRepository, CustomerRepository, DisputeRepository, DunningConfigRepository,
    EventRepository, FailedGlEventRepository, IdempotencyRepository, InvoiceRepository,
    JournalRepository, PaymentMethodRepository, PeriodRepository, PeriodSummaryRepository,
    RefundRepository, SubscriptionRepository, TenantConfigRepository, WebhookRepository,
};
use billing_core::webhooks::{WebhookHandlers, WebhookIngress};
use billing_core::EventLog;

#[derive(Clone)]
pub struct AppState {
    pub customers: Arc<CustomerLifecycle>,
    pub subscriptions: Arc<SubscriptionEngine>,
    pub charges_refunds: Arc<ChargeRefundEngine>,
    pub webhook_ingress: Arc<WebhookIngress>,
    pub period_close: Arc<PeriodCloseWorkflow>,
    pub gl_consumer: Arc<GlPostingConsumer>,
    pub idempotency: Arc<IdempotencyStore>,
    pub events: Arc<EventLog>,

    // Repositories handlers read directly for lookups that don't belong
    // to a single engine's write path (e.g. GET /customers/{id}).
    pub customer_repo: Arc<dyn CustomerRepository>,
    pub subscription_repo: Arc<dyn SubscriptionRepository>,
    pub payment_method_repo: Arc<dyn PaymentMethodRepository>,
    pub charge_repo: Arc<dyn ChargeRepository>,
    pub refund_repo: Arc<dyn RefundRepository>,
    pub event_repo: Arc<dyn EventRepository>,
}

#[allow(clippy::too_many_arguments)]
impl AppState {
    pub fn new(
        customer_repo: Arc<dyn CustomerRepository>,
        payment_method_repo: Arc<dyn PaymentMethodRepository>,
        subscription_repo: Arc<dyn SubscriptionRepository>,
        charge_repo: Arc<dyn ChargeRepository>,
        refund_repo: Arc<dyn RefundRepository>,
        dispute_repo: Arc<dyn DisputeRepository>,
        invoice_repo: Arc<dyn InvoiceRepository>,
        webhook_repo: Arc<dyn WebhookRepository>,
        idempotency_repo: Arc<dyn IdempotencyRepository>,
        event_repo: Arc<dyn EventRepository>,
        journal_repo: Arc<dyn JournalRepository>,
        period_repo: Arc<dyn PeriodRepository>,
        period_summary_repo: Arc<dyn PeriodSummaryRepository>,
        failed_gl_event_repo: Arc<dyn FailedGlEventRepository>,
        tenant_config_repo: Arc<dyn TenantConfigRepository>,
        dunning_config_repo: Arc<dyn DunningConfigRepository>,
        gateway: Arc<dyn ProcessorGateway>,
        idempotency_ttl_hours: i64,
        default_grace_days: i32,
    ) -> Self {
        let events = Arc::new(EventLog::new(event_repo.clone()));

        let customers = Arc::new(CustomerLifecycle::new(
            customer_repo.clone(),
            gateway.clone(),
            events.clone(),
        ));
        let subscriptions = Arc::new(SubscriptionEngine::new(subscription_repo.clone(), gateway.clone()));
        let charges_refunds = Arc::new(ChargeRefundEngine::new(
            charge_repo.clone(),
            refund_repo.clone(),
            customer_repo.clone(),
            payment_method_repo.clone(),
            gateway.clone(),
        ));

        let handlers = Arc::new(WebhookHandlers::new(
            subscription_repo.clone(),
            customer_repo.clone(),
            charge_repo.clone(),
            refund_repo.clone(),
            dispute_repo,
            dunning_config_repo,
            default_grace_days,
            events.clone(),
        ));
        let webhook_ingress = Arc::new(WebhookIngress::new(
            webhook_repo,
            tenant_config_repo,
            gateway,
            handlers,
            events.clone(),
        ));

        let period_close = Arc::new(PeriodCloseWorkflow::new(
            period_repo.clone(),
            journal_repo.clone(),
            period_summary_repo,
        ));
        let gl_consumer = Arc::new(GlPostingConsumer::new(journal_repo, period_repo, failed_gl_event_repo));

        let idempotency = Arc::new(IdempotencyStore::new(idempotency_repo, idempotency_ttl_hours));

        // `invoice_repo` has no dedicated engine yet (renewal writes invoices
        // directly); kept on state for the future `GET /invoices/{id}` read path.
        let _ = invoice_repo;

        Self {
            customers,
            subscriptions,
            charges_refunds,
            webhook_ingress,
            period_close,
            gl_consumer,
            idempotency,
            events,
            customer_repo,
            subscription_repo,
            payment_method_repo,
            charge_repo,
            refund_repo,
            event_repo,
        }
    }
}
