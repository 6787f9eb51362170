//! Postgres-backed repository implementations. Every query is scoped by
//! `app_id` (or `tenant_id` on the GL side) — there is no query path here
//! that can return a row belonging to a different tenant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::TenantProcessorConfig;
use crate::error::{Error, Result};
use crate::models::{
    AccountingPeriod, Charge, Customer, Dispute, DunningConfig, DunningSettings, DunningStage,
    Event, FailedGlEvent, IdempotencyRecord, Invoice, JournalEntry, JournalLine, LineItem,
    PaymentMethod, PeriodSummarySnapshot, Refund, Subscription, WebhookAttempt, WebhookRecord,
};

use super::{
    ChargeRepository, CustomerRepository, DisputeRepository, DunningConfigRepository,
    EventRepository, FailedGlEventRepository, IdempotencyRepository, InvoiceRepository,
    JournalRepository, PaymentMethodRepository, PeriodRepository, PeriodSummaryRepository,
    RefundRepository, SubscriptionRepository, TenantConfigRepository, WebhookRepository,
};

pub struct PostgresIdempotencyRepository {
    pool: PgPool,
}

impl PostgresIdempotencyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyRepository for PostgresIdempotencyRepository {
    async fn find(&self, app_id: &str, key: &str) -> Result<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"SELECT app_id, idempotency_key, request_hash, status_code, response_body, expires_at, created_at
               FROM billing_idempotency_keys
               WHERE app_id = $1 AND idempotency_key = $2"#,
        )
        .bind(app_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn insert(&self, record: IdempotencyRecord) -> Result<()> {
        let result = sqlx::query(
            r#"INSERT INTO billing_idempotency_keys
                 (app_id, idempotency_key, request_hash, status_code, response_body, expires_at, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               ON CONFLICT (app_id, idempotency_key) DO NOTHING"#,
        )
        .bind(&record.app_id)
        .bind(&record.idempotency_key)
        .bind(&record.request_hash)
        .bind(record.status_code)
        .bind(&record.response_body)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::conflict("Idempotency-Key already in use"));
        }
        Ok(())
    }

    async fn purge_expired_before(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM billing_idempotency_keys WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct PostgresCustomerRepository {
    pool: PgPool,
}

impl PostgresCustomerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerRepository for PostgresCustomerRepository {
    async fn insert_pending(&self, customer: Customer) -> Result<Customer> {
        let row = sqlx::query_as::<_, Customer>(
            r#"INSERT INTO billing_customers
                 (id, app_id, external_id, processor_id, status, email, name,
                  default_payment_method_id, delinquent_since, grace_period_end,
                  dunning_stage, next_retry_at, metadata, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
               RETURNING *"#,
        )
        .bind(customer.id)
        .bind(&customer.app_id)
        .bind(&customer.external_id)
        .bind(&customer.processor_id)
        .bind(customer.status)
        .bind(&customer.email)
        .bind(&customer.name)
        .bind(customer.default_payment_method_id)
        .bind(customer.delinquent_since)
        .bind(customer.grace_period_end)
        .bind(customer.dunning_stage)
        .bind(customer.next_retry_at)
        .bind(&customer.metadata)
        .bind(customer.created_at)
        .bind(customer.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_id(&self, app_id: &str, id: Uuid) -> Result<Option<Customer>> {
        let row = sqlx::query_as::<_, Customer>(
            "SELECT * FROM billing_customers WHERE app_id = $1 AND id = $2",
        )
        .bind(app_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_external_id(&self, app_id: &str, external_id: &str) -> Result<Option<Customer>> {
        let row = sqlx::query_as::<_, Customer>(
            "SELECT * FROM billing_customers WHERE app_id = $1 AND external_id = $2",
        )
        .bind(app_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn mark_active(&self, app_id: &str, id: Uuid, processor_id: &str) -> Result<Customer> {
        let row = sqlx::query_as::<_, Customer>(
            r#"UPDATE billing_customers
               SET status = 'active', processor_id = $3, updated_at = now()
               WHERE app_id = $1 AND id = $2
               RETURNING *"#,
        )
        .bind(app_id)
        .bind(id)
        .bind(processor_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn mark_failed(&self, app_id: &str, id: Uuid) -> Result<Customer> {
        let row = sqlx::query_as::<_, Customer>(
            r#"UPDATE billing_customers
               SET status = 'failed', updated_at = now()
               WHERE app_id = $1 AND id = $2
               RETURNING *"#,
        )
        .bind(app_id)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update(&self, customer: Customer) -> Result<Customer> {
        let row = sqlx::query_as::<_, Customer>(
            r#"UPDATE billing_customers
               SET email = $3, name = $4, default_payment_method_id = $5, metadata = $6,
                   delinquent_since = $7, grace_period_end = $8, dunning_stage = $9,
                   next_retry_at = $10, updated_at = now()
               WHERE app_id = $1 AND id = $2
               RETURNING *"#,
        )
        .bind(&customer.app_id)
        .bind(customer.id)
        .bind(&customer.email)
        .bind(&customer.name)
        .bind(customer.default_payment_method_id)
        .bind(&customer.metadata)
        .bind(customer.delinquent_since)
        .bind(customer.grace_period_end)
        .bind(customer.dunning_stage)
        .bind(customer.next_retry_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_pending_older_than(&self, app_id: &str, older_than: DateTime<Utc>) -> Result<Vec<Customer>> {
        let rows = sqlx::query_as::<_, Customer>(
            "SELECT * FROM billing_customers WHERE app_id = $1 AND status = 'pending' AND created_at < $2",
        )
        .bind(app_id)
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_delinquent_past_grace(&self, now: DateTime<Utc>) -> Result<Vec<Customer>> {
        let rows = sqlx::query_as::<_, Customer>(
            "SELECT * FROM billing_customers WHERE grace_period_end IS NOT NULL AND grace_period_end < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

pub struct PostgresPaymentMethodRepository {
    pool: PgPool,
}

impl PostgresPaymentMethodRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentMethodRepository for PostgresPaymentMethodRepository {
    async fn insert(&self, method: PaymentMethod) -> Result<PaymentMethod> {
        let row = sqlx::query_as::<_, PaymentMethod>(
            r#"INSERT INTO billing_payment_methods
                 (id, app_id, customer_id, processor_id, method_type, display_metadata, is_default, deleted_at, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               RETURNING *"#,
        )
        .bind(method.id)
        .bind(&method.app_id)
        .bind(method.customer_id)
        .bind(&method.processor_id)
        .bind(method.method_type)
        .bind(&method.display_metadata)
        .bind(method.is_default)
        .bind(method.deleted_at)
        .bind(method.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_default(&self, app_id: &str, customer_id: Uuid) -> Result<Option<PaymentMethod>> {
        let row = sqlx::query_as::<_, PaymentMethod>(
            r#"SELECT * FROM billing_payment_methods
               WHERE app_id = $1 AND customer_id = $2 AND is_default AND deleted_at IS NULL"#,
        )
        .bind(app_id)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn clear_default(&self, app_id: &str, customer_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE billing_payment_methods SET is_default = false WHERE app_id = $1 AND customer_id = $2",
        )
        .bind(app_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_default(&self, app_id: &str, id: Uuid) -> Result<PaymentMethod> {
        let row = sqlx::query_as::<_, PaymentMethod>(
            r#"UPDATE billing_payment_methods SET is_default = true
               WHERE app_id = $1 AND id = $2
               RETURNING *"#,
        )
        .bind(app_id)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}

pub struct PostgresSubscriptionRepository {
    pool: PgPool,
}

impl PostgresSubscriptionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for PostgresSubscriptionRepository {
    async fn insert(&self, subscription: Subscription) -> Result<Subscription> {
        let row = sqlx::query_as::<_, Subscription>(
            r#"INSERT INTO billing_subscriptions
                 (id, app_id, customer_id, processor_id, plan_id, price_cents, quantity, currency,
                  interval_unit, interval_count, status, current_period_start, current_period_end,
                  cancel_at, canceled_at, metadata, created_at, updated_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
               RETURNING *"#,
        )
        .bind(subscription.id)
        .bind(&subscription.app_id)
        .bind(subscription.customer_id)
        .bind(&subscription.processor_id)
        .bind(&subscription.plan_id)
        .bind(subscription.price_cents)
        .bind(subscription.quantity)
        .bind(&subscription.currency)
        .bind(subscription.interval_unit)
        .bind(subscription.interval_count)
        .bind(subscription.status)
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.cancel_at)
        .bind(subscription.canceled_at)
        .bind(&subscription.metadata)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_id(&self, app_id: &str, id: Uuid) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM billing_subscriptions WHERE app_id = $1 AND id = $2",
        )
        .bind(app_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_processor_id(&self, processor_id: &str) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM billing_subscriptions WHERE processor_id = $1",
        )
        .bind(processor_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update(&self, subscription: Subscription) -> Result<Subscription> {
        let row = sqlx::query_as::<_, Subscription>(
            r#"UPDATE billing_subscriptions
               SET status = $3, current_period_start = $4, current_period_end = $5,
                   cancel_at = $6, canceled_at = $7, price_cents = $8, quantity = $9, metadata = $10, updated_at = now()
               WHERE app_id = $1 AND id = $2
               RETURNING *"#,
        )
        .bind(&subscription.app_id)
        .bind(subscription.id)
        .bind(subscription.status)
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.cancel_at)
        .bind(subscription.canceled_at)
        .bind(subscription.price_cents)
        .bind(subscription.quantity)
        .bind(&subscription.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_due_for_renewal(&self, before: DateTime<Utc>) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, Subscription>(
            r#"SELECT * FROM billing_subscriptions
               WHERE status IN ('active', 'past_due') AND current_period_end < $1"#,
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

pub struct PostgresChargeRepository {
    pool: PgPool,
}

impl PostgresChargeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChargeRepository for PostgresChargeRepository {
    async fn insert(&self, charge: Charge) -> Result<Charge> {
        let row = sqlx::query_as::<_, Charge>(
            r#"INSERT INTO billing_charges
                 (id, app_id, customer_id, subscription_id, processor_id, charge_type, amount_cents,
                  currency, status, reason, reference_id, failure_code, failure_message, metadata, created_at, updated_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
               RETURNING *"#,
        )
        .bind(charge.id)
        .bind(&charge.app_id)
        .bind(charge.customer_id)
        .bind(charge.subscription_id)
        .bind(&charge.processor_id)
        .bind(charge.charge_type)
        .bind(charge.amount_cents)
        .bind(&charge.currency)
        .bind(charge.status)
        .bind(&charge.reason)
        .bind(&charge.reference_id)
        .bind(&charge.failure_code)
        .bind(&charge.failure_message)
        .bind(&charge.metadata)
        .bind(charge.created_at)
        .bind(charge.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_id(&self, app_id: &str, id: Uuid) -> Result<Option<Charge>> {
        let row = sqlx::query_as::<_, Charge>("SELECT * FROM billing_charges WHERE app_id = $1 AND id = $2")
            .bind(app_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_by_reference_id(&self, app_id: &str, reference_id: &str) -> Result<Option<Charge>> {
        let row = sqlx::query_as::<_, Charge>(
            "SELECT * FROM billing_charges WHERE app_id = $1 AND reference_id = $2",
        )
        .bind(app_id)
        .bind(reference_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_processor_id(&self, app_id: &str, processor_id: &str) -> Result<Option<Charge>> {
        let row = sqlx::query_as::<_, Charge>(
            "SELECT * FROM billing_charges WHERE app_id = $1 AND processor_id = $2",
        )
        .bind(app_id)
        .bind(processor_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update(&self, charge: Charge) -> Result<Charge> {
        let row = sqlx::query_as::<_, Charge>(
            r#"UPDATE billing_charges
               SET processor_id = $3, status = $4, failure_code = $5, failure_message = $6, updated_at = now()
               WHERE app_id = $1 AND id = $2
               RETURNING *"#,
        )
        .bind(&charge.app_id)
        .bind(charge.id)
        .bind(&charge.processor_id)
        .bind(charge.status)
        .bind(&charge.failure_code)
        .bind(&charge.failure_message)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}

pub struct PostgresRefundRepository {
    pool: PgPool,
}

impl PostgresRefundRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefundRepository for PostgresRefundRepository {
    async fn insert(&self, refund: Refund) -> Result<Refund> {
        let row = sqlx::query_as::<_, Refund>(
            r#"INSERT INTO billing_refunds
                 (id, app_id, charge_id, processor_id, amount_cents, status, reason, reference_id, created_at, updated_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
               RETURNING *"#,
        )
        .bind(refund.id)
        .bind(&refund.app_id)
        .bind(refund.charge_id)
        .bind(&refund.processor_id)
        .bind(refund.amount_cents)
        .bind(refund.status)
        .bind(&refund.reason)
        .bind(&refund.reference_id)
        .bind(refund.created_at)
        .bind(refund.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_processor_id(&self, app_id: &str, processor_id: &str) -> Result<Option<Refund>> {
        let row = sqlx::query_as::<_, Refund>(
            "SELECT * FROM billing_refunds WHERE app_id = $1 AND processor_id = $2",
        )
        .bind(app_id)
        .bind(processor_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update(&self, refund: Refund) -> Result<Refund> {
        let row = sqlx::query_as::<_, Refund>(
            r#"UPDATE billing_refunds
               SET processor_id = $3, status = $4, updated_at = now()
               WHERE app_id = $1 AND id = $2
               RETURNING *"#,
        )
        .bind(&refund.app_id)
        .bind(refund.id)
        .bind(&refund.processor_id)
        .bind(refund.status)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_successful_for_charge(&self, app_id: &str, charge_id: Uuid) -> Result<Vec<Refund>> {
        let rows = sqlx::query_as::<_, Refund>(
            "SELECT * FROM billing_refunds WHERE app_id = $1 AND charge_id = $2 AND status = 'succeeded'",
        )
        .bind(app_id)
        .bind(charge_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

pub struct PostgresDisputeRepository {
    pool: PgPool,
}

impl PostgresDisputeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DisputeRepository for PostgresDisputeRepository {
    async fn upsert_by_processor_id(&self, dispute: Dispute) -> Result<Dispute> {
        let row = sqlx::query_as::<_, Dispute>(
            r#"INSERT INTO billing_disputes
                 (id, app_id, charge_id, processor_dispute_id, status, reason, amount_cents, evidence_due_by, created_at, updated_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
               ON CONFLICT (app_id, processor_dispute_id) DO UPDATE
                 SET status = EXCLUDED.status, evidence_due_by = EXCLUDED.evidence_due_by, updated_at = now()
               RETURNING *"#,
        )
        .bind(dispute.id)
        .bind(&dispute.app_id)
        .bind(dispute.charge_id)
        .bind(&dispute.processor_dispute_id)
        .bind(dispute.status)
        .bind(&dispute.reason)
        .bind(dispute.amount_cents)
        .bind(dispute.evidence_due_by)
        .bind(dispute.created_at)
        .bind(dispute.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }
}

pub struct PostgresInvoiceRepository {
    pool: PgPool,
}

impl PostgresInvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvoiceRepository for PostgresInvoiceRepository {
    async fn insert(&self, invoice: Invoice, line_items: Vec<LineItem>) -> Result<Invoice> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, Invoice>(
            r#"INSERT INTO billing_invoices
                 (id, app_id, customer_id, subscription_id, status, amount_cents, currency,
                  billing_period_start, billing_period_end, due_at, paid_at, created_at, updated_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
               RETURNING *"#,
        )
        .bind(invoice.id)
        .bind(&invoice.app_id)
        .bind(invoice.customer_id)
        .bind(invoice.subscription_id)
        .bind(invoice.status)
        .bind(invoice.amount_cents)
        .bind(&invoice.currency)
        .bind(invoice.billing_period_start)
        .bind(invoice.billing_period_end)
        .bind(invoice.due_at)
        .bind(invoice.paid_at)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        for item in &line_items {
            sqlx::query(
                r#"INSERT INTO billing_invoice_line_items
                     (id, invoice_id, item_type, description, quantity, unit_price_cents)
                   VALUES ($1,$2,$3,$4,$5,$6)"#,
            )
            .bind(item.id)
            .bind(item.invoice_id)
            .bind(item.item_type)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price_cents)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(row)
    }

    async fn find_by_id(&self, app_id: &str, id: Uuid) -> Result<Option<Invoice>> {
        let row = sqlx::query_as::<_, Invoice>(
            "SELECT * FROM billing_invoices WHERE app_id = $1 AND id = $2",
        )
        .bind(app_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

pub struct PostgresWebhookRepository {
    pool: PgPool,
}

impl PostgresWebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookRepository for PostgresWebhookRepository {
    async fn find(&self, app_id: &str, event_id: &str) -> Result<Option<WebhookRecord>> {
        let row = sqlx::query_as::<_, WebhookRecord>(
            "SELECT * FROM billing_webhook_events WHERE app_id = $1 AND event_id = $2",
        )
        .bind(app_id)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert(&self, record: WebhookRecord) -> Result<WebhookRecord> {
        let row = sqlx::query_as::<_, WebhookRecord>(
            r#"INSERT INTO billing_webhook_events
                 (app_id, event_id, event_type, status, payload, attempt_count,
                  last_attempt_at, next_attempt_at, dead_at, error_code, created_at, updated_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
               RETURNING *"#,
        )
        .bind(&record.app_id)
        .bind(&record.event_id)
        .bind(&record.event_type)
        .bind(record.status)
        .bind(&record.payload)
        .bind(record.attempt_count)
        .bind(record.last_attempt_at)
        .bind(record.next_attempt_at)
        .bind(record.dead_at)
        .bind(&record.error_code)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update(&self, record: WebhookRecord) -> Result<WebhookRecord> {
        let row = sqlx::query_as::<_, WebhookRecord>(
            r#"UPDATE billing_webhook_events
               SET status = $3, attempt_count = $4, last_attempt_at = $5, next_attempt_at = $6,
                   dead_at = $7, error_code = $8, updated_at = now()
               WHERE app_id = $1 AND event_id = $2
               RETURNING *"#,
        )
        .bind(&record.app_id)
        .bind(&record.event_id)
        .bind(record.status)
        .bind(record.attempt_count)
        .bind(record.last_attempt_at)
        .bind(record.next_attempt_at)
        .bind(record.dead_at)
        .bind(&record.error_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_due_for_retry(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<WebhookRecord>> {
        let rows = sqlx::query_as::<_, WebhookRecord>(
            r#"SELECT * FROM billing_webhook_events
               WHERE next_attempt_at IS NOT NULL AND next_attempt_at <= $1 AND dead_at IS NULL
               ORDER BY next_attempt_at ASC
               LIMIT $2"#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn record_attempt(&self, attempt: WebhookAttempt) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO billing_webhook_attempts
                 (app_id, event_id, attempt_number, status, next_attempt_at, error_code, error_message, created_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8)"#,
        )
        .bind(&attempt.app_id)
        .bind(&attempt.event_id)
        .bind(attempt.attempt_number)
        .bind(attempt.status)
        .bind(attempt.next_attempt_at)
        .bind(&attempt.error_code)
        .bind(&attempt.error_message)
        .bind(attempt.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_older_than(&self, app_id: &str, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"DELETE FROM billing_webhook_events
               WHERE app_id = $1 AND updated_at < $2
                 AND (status = 'processed' OR dead_at IS NOT NULL)"#,
        )
        .bind(app_id)
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

pub struct PostgresEventRepository {
    pool: PgPool,
}

impl PostgresEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for PostgresEventRepository {
    async fn append(&self, event: Event) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO billing_events
                 (id, app_id, event_type, source, entity_type, entity_id, payload, created_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8)"#,
        )
        .bind(event.id)
        .bind(&event.app_id)
        .bind(&event.event_type)
        .bind(event.source)
        .bind(&event.entity_type)
        .bind(&event.entity_id)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_entity(&self, app_id: &str, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, Event>(
            r#"SELECT * FROM billing_events
               WHERE app_id = $1 AND entity_type = $2 AND entity_id = $3
               ORDER BY created_at ASC"#,
        )
        .bind(app_id)
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn purge_older_than(&self, app_id: &str, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM billing_events WHERE app_id = $1 AND created_at < $2")
            .bind(app_id)
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct PostgresJournalRepository {
    pool: PgPool,
}

impl PostgresJournalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JournalRepository for PostgresJournalRepository {
    async fn find_by_source_event_id(&self, tenant_id: &str, source_event_id: &str) -> Result<Option<JournalEntry>> {
        let row = sqlx::query_as::<_, JournalEntry>(
            "SELECT * FROM gl_journal_entries WHERE tenant_id = $1 AND source_event_id = $2",
        )
        .bind(tenant_id)
        .bind(source_event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert(&self, entry: JournalEntry, lines: Vec<JournalLine>) -> Result<JournalEntry> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, JournalEntry>(
            r#"INSERT INTO gl_journal_entries
                 (id, tenant_id, source_module, source_event_id, source_subject, posted_at, currency,
                  description, reference_type, reference_id, reverses_entry_id, created_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
               RETURNING *"#,
        )
        .bind(entry.id)
        .bind(&entry.tenant_id)
        .bind(&entry.source_module)
        .bind(&entry.source_event_id)
        .bind(&entry.source_subject)
        .bind(entry.posted_at)
        .bind(&entry.currency)
        .bind(&entry.description)
        .bind(&entry.reference_type)
        .bind(&entry.reference_id)
        .bind(entry.reverses_entry_id)
        .bind(entry.created_at)
        .fetch_one(&mut *tx)
        .await?;

        for line in &lines {
            sqlx::query(
                r#"INSERT INTO gl_journal_lines
                     (journal_entry_id, line_no, account_ref, debit_minor, credit_minor, memo)
                   VALUES ($1,$2,$3,$4,$5,$6)"#,
            )
            .bind(line.journal_entry_id)
            .bind(line.line_no)
            .bind(&line.account_ref)
            .bind(line.debit_minor)
            .bind(line.credit_minor)
            .bind(&line.memo)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(row)
    }

    async fn list_in_period(
        &self,
        tenant_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Vec<(JournalEntry, Vec<JournalLine>)>> {
        let entries = sqlx::query_as::<_, JournalEntry>(
            r#"SELECT * FROM gl_journal_entries
               WHERE tenant_id = $1 AND posted_at >= $2 AND posted_at < $3
               ORDER BY posted_at ASC"#,
        )
        .bind(tenant_id)
        .bind(period_start)
        .bind(period_end)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let lines = sqlx::query_as::<_, JournalLine>(
                "SELECT * FROM gl_journal_lines WHERE journal_entry_id = $1 ORDER BY line_no ASC",
            )
            .bind(entry.id)
            .fetch_all(&self.pool)
            .await?;
            out.push((entry, lines));
        }
        Ok(out)
    }
}

pub struct PostgresPeriodRepository {
    pool: PgPool,
}

impl PostgresPeriodRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PeriodRepository for PostgresPeriodRepository {
    async fn find_open(&self, tenant_id: &str) -> Result<Option<AccountingPeriod>> {
        let row = sqlx::query_as::<_, AccountingPeriod>(
            "SELECT * FROM gl_accounting_periods WHERE tenant_id = $1 AND is_closed = false",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_id(&self, tenant_id: &str, id: Uuid) -> Result<Option<AccountingPeriod>> {
        let row = sqlx::query_as::<_, AccountingPeriod>(
            "SELECT * FROM gl_accounting_periods WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_covering(&self, tenant_id: &str, at: DateTime<Utc>) -> Result<Option<AccountingPeriod>> {
        let row = sqlx::query_as::<_, AccountingPeriod>(
            r#"SELECT * FROM gl_accounting_periods
               WHERE tenant_id = $1 AND period_start <= $2 AND $2 < period_end"#,
        )
        .bind(tenant_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert(&self, period: AccountingPeriod) -> Result<AccountingPeriod> {
        let row = sqlx::query_as::<_, AccountingPeriod>(
            r#"INSERT INTO gl_accounting_periods
                 (id, tenant_id, period_start, period_end, is_closed, close_requested_at,
                  closed_at, closed_by, close_reason, close_hash)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
               RETURNING *"#,
        )
        .bind(period.id)
        .bind(&period.tenant_id)
        .bind(period.period_start)
        .bind(period.period_end)
        .bind(period.is_closed)
        .bind(period.close_requested_at)
        .bind(period.closed_at)
        .bind(&period.closed_by)
        .bind(&period.close_reason)
        .bind(&period.close_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn mark_requested(&self, tenant_id: &str, id: Uuid, requested_at: DateTime<Utc>) -> Result<AccountingPeriod> {
        let row = sqlx::query_as::<_, AccountingPeriod>(
            r#"UPDATE gl_accounting_periods SET close_requested_at = $3
               WHERE tenant_id = $1 AND id = $2
               RETURNING *"#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(requested_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// `FOR UPDATE` serializes concurrent close attempts on the same period
    /// (SPEC_FULL §4.14) — the second caller blocks until the first commits
    /// or rolls back, then observes `is_closed = true` and short-circuits.
    async fn close_locked(
        &self,
        tenant_id: &str,
        id: Uuid,
        closed_by: &str,
        close_reason: &str,
        close_hash: &str,
        closed_at: DateTime<Utc>,
    ) -> Result<AccountingPeriod> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, AccountingPeriod>(
            "SELECT * FROM gl_accounting_periods WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        if current.is_closed {
            tx.commit().await?;
            return Ok(current);
        }

        let row = sqlx::query_as::<_, AccountingPeriod>(
            r#"UPDATE gl_accounting_periods
               SET is_closed = true, closed_at = $3, closed_by = $4, close_reason = $5, close_hash = $6
               WHERE tenant_id = $1 AND id = $2
               RETURNING *"#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(closed_at)
        .bind(closed_by)
        .bind(close_reason)
        .bind(close_hash)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }
}

pub struct PostgresPeriodSummaryRepository {
    pool: PgPool,
}

impl PostgresPeriodSummaryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PeriodSummaryRepository for PostgresPeriodSummaryRepository {
    async fn insert_if_absent(&self, snapshot: PeriodSummarySnapshot) -> Result<bool> {
        let result = sqlx::query(
            r#"INSERT INTO gl_period_summary_snapshots
                 (tenant_id, period_id, currency, journal_count, line_count,
                  total_debits_minor, total_credits_minor, checksum)
               VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
               ON CONFLICT (tenant_id, period_id, currency) DO NOTHING"#,
        )
        .bind(&snapshot.tenant_id)
        .bind(snapshot.period_id)
        .bind(&snapshot.currency)
        .bind(snapshot.journal_count)
        .bind(snapshot.line_count)
        .bind(snapshot.total_debits_minor)
        .bind(snapshot.total_credits_minor)
        .bind(&snapshot.checksum)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_for_period(&self, tenant_id: &str, period_id: Uuid) -> Result<Vec<PeriodSummarySnapshot>> {
        let rows = sqlx::query_as::<_, PeriodSummarySnapshot>(
            "SELECT * FROM gl_period_summary_snapshots WHERE tenant_id = $1 AND period_id = $2",
        )
        .bind(tenant_id)
        .bind(period_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

pub struct PostgresFailedGlEventRepository {
    pool: PgPool,
}

impl PostgresFailedGlEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FailedGlEventRepository for PostgresFailedGlEventRepository {
    async fn insert(&self, failure: FailedGlEvent) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO gl_failed_events
                 (id, tenant_id, source_event_id, reason_code, reason_message, envelope, created_at)
               VALUES ($1,$2,$3,$4,$5,$6,$7)"#,
        )
        .bind(failure.id)
        .bind(&failure.tenant_id)
        .bind(&failure.source_event_id)
        .bind(&failure.reason_code)
        .bind(&failure.reason_message)
        .bind(&failure.envelope)
        .bind(failure.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct PostgresTenantConfigRepository {
    pool: PgPool,
}

impl PostgresTenantConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantConfigRepository for PostgresTenantConfigRepository {
    async fn find(&self, app_id: &str) -> Result<Option<TenantProcessorConfig>> {
        let row = sqlx::query_as::<_, TenantProcessorConfig>(
            r#"SELECT app_id, processor_account_id, processor_api_key, webhook_signing_secret, sandbox_mode
               FROM tenants WHERE app_id = $1"#,
        )
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

pub struct PostgresDunningConfigRepository {
    pool: PgPool,
}

impl PostgresDunningConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DunningConfigRepository for PostgresDunningConfigRepository {
    async fn find(&self, app_id: &str) -> Result<Option<DunningConfig>> {
        let settings = sqlx::query_as::<_, DunningSettings>(
            "SELECT app_id, grace_days, max_retry_attempts FROM dunning_settings WHERE app_id = $1",
        )
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(settings) = settings else {
            return Ok(None);
        };

        let stages = sqlx::query_as::<_, DunningStage>(
            "SELECT app_id, stage_number, wait_days, action FROM dunning_stages WHERE app_id = $1 ORDER BY stage_number",
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(DunningConfig {
            app_id: settings.app_id,
            grace_days: settings.grace_days,
            stages,
            max_retry_attempts: settings.max_retry_attempts,
        }))
    }
}
