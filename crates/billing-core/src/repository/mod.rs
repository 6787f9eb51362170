//! Billing Repository (SPEC_FULL §2, §4): narrow per-aggregate traits,
//! each with a `Postgres*` implementation over `sqlx::PgPool` and an
//! in-memory implementation used by unit tests — trait plus
//! `Postgres*Repository` struct pairs, one per aggregate.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::{DatabaseConfig, TenantProcessorConfig};
use crate::error::Result;
use crate::models::{
    AccountingPeriod, Charge, Customer, Dispute, DunningConfig, Event, FailedGlEvent,
    IdempotencyRecord, Invoice, JournalEntry, JournalLine, LineItem, PaymentMethod,
    PeriodSummarySnapshot, Refund, Subscription, WebhookAttempt, WebhookRecord,
};

#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    async fn find(&self, app_id: &str, key: &str) -> Result<Option<IdempotencyRecord>>;
    async fn insert(&self, record: IdempotencyRecord) -> Result<()>;
    /// Data retention purge (SPEC_FULL §4.12): deletes records whose
    /// `expires_at` has already passed. Returns the row count removed.
    async fn purge_expired_before(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn insert_pending(&self, customer: Customer) -> Result<Customer>;
    async fn find_by_id(&self, app_id: &str, id: Uuid) -> Result<Option<Customer>>;
    async fn find_by_external_id(&self, app_id: &str, external_id: &str) -> Result<Option<Customer>>;
    async fn mark_active(&self, app_id: &str, id: Uuid, processor_id: &str) -> Result<Customer>;
    async fn mark_failed(&self, app_id: &str, id: Uuid) -> Result<Customer>;
    async fn update(&self, customer: Customer) -> Result<Customer>;
    async fn list_pending_older_than(&self, app_id: &str, older_than: DateTime<Utc>) -> Result<Vec<Customer>>;
    async fn list_delinquent_past_grace(&self, now: DateTime<Utc>) -> Result<Vec<Customer>>;
}

#[async_trait]
pub trait PaymentMethodRepository: Send + Sync {
    async fn insert(&self, method: PaymentMethod) -> Result<PaymentMethod>;
    async fn find_default(&self, app_id: &str, customer_id: Uuid) -> Result<Option<PaymentMethod>>;
    async fn clear_default(&self, app_id: &str, customer_id: Uuid) -> Result<()>;
    async fn set_default(&self, app_id: &str, id: Uuid) -> Result<PaymentMethod>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn insert(&self, subscription: Subscription) -> Result<Subscription>;
    async fn find_by_id(&self, app_id: &str, id: Uuid) -> Result<Option<Subscription>>;
    async fn find_by_processor_id(&self, processor_id: &str) -> Result<Option<Subscription>>;
    async fn update(&self, subscription: Subscription) -> Result<Subscription>;
    async fn list_due_for_renewal(&self, before: DateTime<Utc>) -> Result<Vec<Subscription>>;
}

#[async_trait]
pub trait ChargeRepository: Send + Sync {
    async fn insert(&self, charge: Charge) -> Result<Charge>;
    async fn find_by_id(&self, app_id: &str, id: Uuid) -> Result<Option<Charge>>;
    async fn find_by_reference_id(&self, app_id: &str, reference_id: &str) -> Result<Option<Charge>>;
    /// Used by the refund webhook handler (SPEC_FULL §4.10) to resolve the
    /// local charge a `refund.*` event's `processor_charge_id` points at.
    async fn find_by_processor_id(&self, app_id: &str, processor_id: &str) -> Result<Option<Charge>>;
    async fn update(&self, charge: Charge) -> Result<Charge>;
}

#[async_trait]
pub trait RefundRepository: Send + Sync {
    async fn insert(&self, refund: Refund) -> Result<Refund>;
    async fn find_by_processor_id(&self, app_id: &str, processor_id: &str) -> Result<Option<Refund>>;
    async fn update(&self, refund: Refund) -> Result<Refund>;
    async fn list_successful_for_charge(&self, app_id: &str, charge_id: Uuid) -> Result<Vec<Refund>>;
}

#[async_trait]
pub trait DisputeRepository: Send + Sync {
    async fn upsert_by_processor_id(&self, dispute: Dispute) -> Result<Dispute>;
}

#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    async fn insert(&self, invoice: Invoice, line_items: Vec<LineItem>) -> Result<Invoice>;
    async fn find_by_id(&self, app_id: &str, id: Uuid) -> Result<Option<Invoice>>;
}

#[async_trait]
pub trait WebhookRepository: Send + Sync {
    async fn find(&self, app_id: &str, event_id: &str) -> Result<Option<WebhookRecord>>;
    async fn insert(&self, record: WebhookRecord) -> Result<WebhookRecord>;
    async fn update(&self, record: WebhookRecord) -> Result<WebhookRecord>;
    async fn list_due_for_retry(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<WebhookRecord>>;
    async fn record_attempt(&self, attempt: WebhookAttempt) -> Result<()>;
    /// Data retention purge (SPEC_FULL §4.12): deletes terminal rows
    /// (`processed` or dead-lettered) older than `older_than`. Rows still
    /// eligible for retry are never purged.
    async fn purge_older_than(&self, app_id: &str, older_than: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn append(&self, event: Event) -> Result<()>;
    async fn list_for_entity(&self, app_id: &str, entity_type: &str, entity_id: &str) -> Result<Vec<Event>>;
    async fn purge_older_than(&self, app_id: &str, older_than: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait JournalRepository: Send + Sync {
    async fn find_by_source_event_id(&self, tenant_id: &str, source_event_id: &str) -> Result<Option<JournalEntry>>;
    async fn insert(&self, entry: JournalEntry, lines: Vec<JournalLine>) -> Result<JournalEntry>;
    async fn list_in_period(
        &self,
        tenant_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Vec<(JournalEntry, Vec<JournalLine>)>>;
}

#[async_trait]
pub trait PeriodRepository: Send + Sync {
    async fn find_open(&self, tenant_id: &str) -> Result<Option<AccountingPeriod>>;
    async fn find_by_id(&self, tenant_id: &str, id: Uuid) -> Result<Option<AccountingPeriod>>;
    /// Finds the period (open or closed) whose `[period_start, period_end)`
    /// range contains `at` — used by the GL consumer to reject postings
    /// landing inside an already-closed period (SPEC_FULL §4.14).
    async fn find_covering(&self, tenant_id: &str, at: DateTime<Utc>) -> Result<Option<AccountingPeriod>>;
    async fn insert(&self, period: AccountingPeriod) -> Result<AccountingPeriod>;
    async fn mark_requested(&self, tenant_id: &str, id: Uuid, requested_at: DateTime<Utc>) -> Result<AccountingPeriod>;
    /// Closes the period under a row lock (`SELECT ... FOR UPDATE` in the
    /// Postgres implementation) so concurrent close attempts serialize.
    async fn close_locked(
        &self,
        tenant_id: &str,
        id: Uuid,
        closed_by: &str,
        close_reason: &str,
        close_hash: &str,
        closed_at: DateTime<Utc>,
    ) -> Result<AccountingPeriod>;
}

/// Per-currency close snapshot persistence (SPEC_FULL §4.14). Kept as its
/// own narrow trait rather than folded into `PeriodRepository` since it is
/// written once, at close time, and never updated.
#[async_trait]
pub trait PeriodSummaryRepository: Send + Sync {
    /// `INSERT ... ON CONFLICT (tenant_id, period_id, currency) DO NOTHING`;
    /// returns whether a row was actually inserted.
    async fn insert_if_absent(&self, snapshot: PeriodSummarySnapshot) -> Result<bool>;
    async fn list_for_period(&self, tenant_id: &str, period_id: Uuid) -> Result<Vec<PeriodSummarySnapshot>>;
}

/// Dead-letter sink for the GL Posting Consumer (SPEC_FULL §4.13).
#[async_trait]
pub trait FailedGlEventRepository: Send + Sync {
    async fn insert(&self, failure: FailedGlEvent) -> Result<()>;
}

/// Per-tenant processor credentials and webhook signing secret (SPEC_FULL
/// §4.4, §6). Read-mostly, cached with explicit refresh per §5; never the
/// static [`crate::config::Config`].
#[async_trait]
pub trait TenantConfigRepository: Send + Sync {
    async fn find(&self, app_id: &str) -> Result<Option<TenantProcessorConfig>>;
}

/// Per-tenant dunning configuration (SPEC_FULL §4.11, §3 Supplemented
/// Features): the settings row plus its stage table, assembled into one
/// [`DunningConfig`].
#[async_trait]
pub trait DunningConfigRepository: Send + Sync {
    async fn find(&self, app_id: &str) -> Result<Option<DunningConfig>>;
}

pub use memory::{
    InMemoryChargeRepository, InMemoryCustomerRepository, InMemoryDisputeRepository,
    InMemoryDunningConfigRepository, InMemoryEventRepository, InMemoryFailedGlEventRepository,
    InMemoryIdempotencyRepository, InMemoryInvoiceRepository, InMemoryJournalRepository,
    InMemoryPaymentMethodRepository, InMemoryPeriodRepository, InMemoryPeriodSummaryRepository,
    InMemoryRefundRepository, InMemorySubscriptionRepository, InMemoryTenantConfigRepository,
    InMemoryWebhookRepository,
};
pub use postgres::{
    PostgresChargeRepository, PostgresCustomerRepository, PostgresDisputeRepository,
    PostgresDunningConfigRepository, PostgresEventRepository, PostgresFailedGlEventRepository,
    PostgresIdempotencyRepository, PostgresInvoiceRepository, PostgresJournalRepository,
    PostgresPaymentMethodRepository, PostgresPeriodRepository, PostgresPeriodSummaryRepository,
    PostgresRefundRepository, PostgresSubscriptionRepository, PostgresTenantConfigRepository,
    PostgresWebhookRepository,
};
