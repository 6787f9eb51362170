//! In-memory repository implementations used by unit tests throughout
//! `billing-core` (engines, webhooks, jobs, gl). Each mirrors the shape
//! of its `Postgres*` sibling one-for-one so tests exercise the same
//! trait surface production code runs against.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::TenantProcessorConfig;
use crate::error::{Error, Result};
use crate::models::{
    AccountingPeriod, Charge, Customer, CustomerStatus, Dispute, DunningConfig, Event,
    FailedGlEvent, IdempotencyRecord, Invoice, JournalEntry, JournalLine, LineItem, PaymentMethod,
    PeriodSummarySnapshot, Refund, RefundStatus, Subscription, WebhookAttempt, WebhookRecord,
    WebhookStatus,
};

use super::{
    ChargeRepository, CustomerRepository, DisputeRepository, DunningConfigRepository,
    EventRepository, FailedGlEventRepository, IdempotencyRepository, InvoiceRepository,
    JournalRepository, PaymentMethodRepository, PeriodRepository, PeriodSummaryRepository,
    RefundRepository, SubscriptionRepository, TenantConfigRepository, WebhookRepository,
};

#[derive(Default)]
pub struct InMemoryIdempotencyRepository {
    rows: Mutex<HashMap<(String, String), IdempotencyRecord>>,
}

#[async_trait]
impl IdempotencyRepository for InMemoryIdempotencyRepository {
    async fn find(&self, app_id: &str, key: &str) -> Result<Option<IdempotencyRecord>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&(app_id.to_string(), key.to_string())).cloned())
    }

    async fn insert(&self, record: IdempotencyRecord) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let k = (record.app_id.clone(), record.idempotency_key.clone());
        if rows.contains_key(&k) {
            return Err(Error::conflict("Idempotency-Key already in use"));
        }
        rows.insert(k, record);
        Ok(())
    }

    async fn purge_expired_before(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, record| record.expires_at >= now);
        Ok((before - rows.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryCustomerRepository {
    rows: Mutex<HashMap<Uuid, Customer>>,
}

#[async_trait]
impl CustomerRepository for InMemoryCustomerRepository {
    async fn insert_pending(&self, customer: Customer) -> Result<Customer> {
        let mut rows = self.rows.lock().unwrap();
        if rows
            .values()
            .any(|c| c.app_id == customer.app_id && c.external_id == customer.external_id && customer.external_id.is_some())
        {
            return Err(Error::conflict("Customer external_id already exists for this tenant"));
        }
        rows.insert(customer.id, customer.clone());
        Ok(customer)
    }

    async fn find_by_id(&self, app_id: &str, id: Uuid) -> Result<Option<Customer>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&id).filter(|c| c.app_id == app_id).cloned())
    }

    async fn find_by_external_id(&self, app_id: &str, external_id: &str) -> Result<Option<Customer>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .find(|c| c.app_id == app_id && c.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn mark_active(&self, app_id: &str, id: Uuid, processor_id: &str) -> Result<Customer> {
        let mut rows = self.rows.lock().unwrap();
        let customer = rows
            .get_mut(&id)
            .filter(|c| c.app_id == app_id)
            .ok_or_else(|| Error::not_found("Customer not found"))?;
        customer.status = CustomerStatus::Active;
        customer.processor_id = Some(processor_id.to_string());
        customer.updated_at = Utc::now();
        Ok(customer.clone())
    }

    async fn mark_failed(&self, app_id: &str, id: Uuid) -> Result<Customer> {
        let mut rows = self.rows.lock().unwrap();
        let customer = rows
            .get_mut(&id)
            .filter(|c| c.app_id == app_id)
            .ok_or_else(|| Error::not_found("Customer not found"))?;
        customer.status = CustomerStatus::Failed;
        customer.updated_at = Utc::now();
        Ok(customer.clone())
    }

    async fn update(&self, customer: Customer) -> Result<Customer> {
        let mut rows = self.rows.lock().unwrap();
        rows.insert(customer.id, customer.clone());
        Ok(customer)
    }

    async fn list_pending_older_than(&self, app_id: &str, older_than: DateTime<Utc>) -> Result<Vec<Customer>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|c| c.app_id == app_id && c.status == CustomerStatus::Pending && c.created_at < older_than)
            .cloned()
            .collect())
    }

    async fn list_delinquent_past_grace(&self, now: DateTime<Utc>) -> Result<Vec<Customer>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|c| matches!(c.grace_period_end, Some(end) if end < now))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryPaymentMethodRepository {
    rows: Mutex<HashMap<Uuid, PaymentMethod>>,
}

#[async_trait]
impl PaymentMethodRepository for InMemoryPaymentMethodRepository {
    async fn insert(&self, method: PaymentMethod) -> Result<PaymentMethod> {
        let mut rows = self.rows.lock().unwrap();
        rows.insert(method.id, method.clone());
        Ok(method)
    }

    async fn find_default(&self, app_id: &str, customer_id: Uuid) -> Result<Option<PaymentMethod>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .find(|m| m.app_id == app_id && m.customer_id == customer_id && m.is_default && m.deleted_at.is_none())
            .cloned())
    }

    async fn clear_default(&self, app_id: &str, customer_id: Uuid) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        for m in rows.values_mut().filter(|m| m.app_id == app_id && m.customer_id == customer_id) {
            m.is_default = false;
        }
        Ok(())
    }

    async fn set_default(&self, app_id: &str, id: Uuid) -> Result<PaymentMethod> {
        let mut rows = self.rows.lock().unwrap();
        let method = rows
            .get_mut(&id)
            .filter(|m| m.app_id == app_id)
            .ok_or_else(|| Error::not_found("Payment method not found"))?;
        method.is_default = true;
        Ok(method.clone())
    }
}

#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    rows: Mutex<HashMap<Uuid, Subscription>>,
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn insert(&self, subscription: Subscription) -> Result<Subscription> {
        let mut rows = self.rows.lock().unwrap();
        rows.insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn find_by_id(&self, app_id: &str, id: Uuid) -> Result<Option<Subscription>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&id).filter(|s| s.app_id == app_id).cloned())
    }

    async fn find_by_processor_id(&self, processor_id: &str) -> Result<Option<Subscription>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .find(|s| s.processor_id.as_deref() == Some(processor_id))
            .cloned())
    }

    async fn update(&self, subscription: Subscription) -> Result<Subscription> {
        let mut rows = self.rows.lock().unwrap();
        rows.insert(subscription.id, subscription.clone());
        Ok(subscription)
    }

    async fn list_due_for_renewal(&self, before: DateTime<Utc>) -> Result<Vec<Subscription>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|s| s.current_period_end < before)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryChargeRepository {
    rows: Mutex<HashMap<Uuid, Charge>>,
}

#[async_trait]
impl ChargeRepository for InMemoryChargeRepository {
    async fn insert(&self, charge: Charge) -> Result<Charge> {
        let mut rows = self.rows.lock().unwrap();
        if rows
            .values()
            .any(|c| c.app_id == charge.app_id && c.reference_id == charge.reference_id)
        {
            return Err(Error::conflict("Charge reference_id already used for this tenant"));
        }
        rows.insert(charge.id, charge.clone());
        Ok(charge)
    }

    async fn find_by_id(&self, app_id: &str, id: Uuid) -> Result<Option<Charge>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&id).filter(|c| c.app_id == app_id).cloned())
    }

    async fn find_by_reference_id(&self, app_id: &str, reference_id: &str) -> Result<Option<Charge>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .find(|c| c.app_id == app_id && c.reference_id == reference_id)
            .cloned())
    }

    async fn find_by_processor_id(&self, app_id: &str, processor_id: &str) -> Result<Option<Charge>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .find(|c| c.app_id == app_id && c.processor_id.as_deref() == Some(processor_id))
            .cloned())
    }

    async fn update(&self, charge: Charge) -> Result<Charge> {
        let mut rows = self.rows.lock().unwrap();
        rows.insert(charge.id, charge.clone());
        Ok(charge)
    }
}

#[derive(Default)]
pub struct InMemoryRefundRepository {
    rows: Mutex<HashMap<Uuid, Refund>>,
}

#[async_trait]
impl RefundRepository for InMemoryRefundRepository {
    async fn insert(&self, refund: Refund) -> Result<Refund> {
        let mut rows = self.rows.lock().unwrap();
        if rows
            .values()
            .any(|r| r.app_id == refund.app_id && r.reference_id == refund.reference_id)
        {
            return Err(Error::conflict("Refund reference_id already used for this tenant"));
        }
        rows.insert(refund.id, refund.clone());
        Ok(refund)
    }

    async fn find_by_processor_id(&self, app_id: &str, processor_id: &str) -> Result<Option<Refund>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .find(|r| r.app_id == app_id && r.processor_id.as_deref() == Some(processor_id))
            .cloned())
    }

    async fn update(&self, refund: Refund) -> Result<Refund> {
        let mut rows = self.rows.lock().unwrap();
        rows.insert(refund.id, refund.clone());
        Ok(refund)
    }

    async fn list_successful_for_charge(&self, app_id: &str, charge_id: Uuid) -> Result<Vec<Refund>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|r| r.app_id == app_id && r.charge_id == charge_id && r.status == RefundStatus::Succeeded)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryDisputeRepository {
    rows: Mutex<HashMap<String, Dispute>>,
}

#[async_trait]
impl DisputeRepository for InMemoryDisputeRepository {
    async fn upsert_by_processor_id(&self, dispute: Dispute) -> Result<Dispute> {
        let mut rows = self.rows.lock().unwrap();
        rows.insert(dispute.processor_dispute_id.clone(), dispute.clone());
        Ok(dispute)
    }
}

#[derive(Default)]
pub struct InMemoryInvoiceRepository {
    rows: Mutex<HashMap<Uuid, (Invoice, Vec<LineItem>)>>,
}

#[async_trait]
impl InvoiceRepository for InMemoryInvoiceRepository {
    async fn insert(&self, invoice: Invoice, line_items: Vec<LineItem>) -> Result<Invoice> {
        let mut rows = self.rows.lock().unwrap();
        rows.insert(invoice.id, (invoice.clone(), line_items));
        Ok(invoice)
    }

    async fn find_by_id(&self, app_id: &str, id: Uuid) -> Result<Option<Invoice>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&id).filter(|(inv, _)| inv.app_id == app_id).map(|(inv, _)| inv.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryWebhookRepository {
    rows: Mutex<HashMap<(String, String), WebhookRecord>>,
    attempts: Mutex<Vec<WebhookAttempt>>,
}

#[async_trait]
impl WebhookRepository for InMemoryWebhookRepository {
    async fn find(&self, app_id: &str, event_id: &str) -> Result<Option<WebhookRecord>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&(app_id.to_string(), event_id.to_string())).cloned())
    }

    async fn insert(&self, record: WebhookRecord) -> Result<WebhookRecord> {
        let mut rows = self.rows.lock().unwrap();
        let k = (record.app_id.clone(), record.event_id.clone());
        if rows.contains_key(&k) {
            return Err(Error::conflict("Webhook event already received"));
        }
        rows.insert(k, record.clone());
        Ok(record)
    }

    async fn update(&self, record: WebhookRecord) -> Result<WebhookRecord> {
        let mut rows = self.rows.lock().unwrap();
        rows.insert((record.app_id.clone(), record.event_id.clone()), record.clone());
        Ok(record)
    }

    async fn list_due_for_retry(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<WebhookRecord>> {
        let rows = self.rows.lock().unwrap();
        let mut due: Vec<WebhookRecord> = rows
            .values()
            .filter(|r| matches!(r.next_attempt_at, Some(at) if at <= now) && r.dead_at.is_none())
            .cloned()
            .collect();
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn record_attempt(&self, attempt: WebhookAttempt) -> Result<()> {
        self.attempts.lock().unwrap().push(attempt);
        Ok(())
    }

    async fn purge_older_than(&self, app_id: &str, older_than: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|(tenant, _), record| {
            let terminal = record.status == WebhookStatus::Processed || record.dead_at.is_some();
            tenant != app_id || record.updated_at >= older_than || !terminal
        });
        Ok((before - rows.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryEventRepository {
    rows: Mutex<Vec<Event>>,
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn append(&self, event: Event) -> Result<()> {
        self.rows.lock().unwrap().push(event);
        Ok(())
    }

    async fn list_for_entity(&self, app_id: &str, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|e| e.app_id == app_id && e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn purge_older_than(&self, app_id: &str, older_than: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|e| !(e.app_id == app_id && e.created_at < older_than));
        Ok((before - rows.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryJournalRepository {
    rows: Mutex<HashMap<Uuid, (JournalEntry, Vec<JournalLine>)>>,
}

#[async_trait]
impl JournalRepository for InMemoryJournalRepository {
    async fn find_by_source_event_id(&self, tenant_id: &str, source_event_id: &str) -> Result<Option<JournalEntry>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .find(|(e, _)| e.tenant_id == tenant_id && e.source_event_id == source_event_id)
            .map(|(e, _)| e.clone()))
    }

    async fn insert(&self, entry: JournalEntry, lines: Vec<JournalLine>) -> Result<JournalEntry> {
        let mut rows = self.rows.lock().unwrap();
        rows.insert(entry.id, (entry.clone(), lines));
        Ok(entry)
    }

    async fn list_in_period(
        &self,
        tenant_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Vec<(JournalEntry, Vec<JournalLine>)>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|(e, _)| e.tenant_id == tenant_id && e.posted_at >= period_start && e.posted_at < period_end)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryPeriodRepository {
    rows: Mutex<HashMap<Uuid, AccountingPeriod>>,
}

#[async_trait]
impl PeriodRepository for InMemoryPeriodRepository {
    async fn find_open(&self, tenant_id: &str) -> Result<Option<AccountingPeriod>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .find(|p| p.tenant_id == tenant_id && !p.is_closed)
            .cloned())
    }

    async fn find_by_id(&self, tenant_id: &str, id: Uuid) -> Result<Option<AccountingPeriod>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&id).filter(|p| p.tenant_id == tenant_id).cloned())
    }

    async fn find_covering(&self, tenant_id: &str, at: DateTime<Utc>) -> Result<Option<AccountingPeriod>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .find(|p| p.tenant_id == tenant_id && p.period_start <= at && at < p.period_end)
            .cloned())
    }

    async fn insert(&self, period: AccountingPeriod) -> Result<AccountingPeriod> {
        let mut rows = self.rows.lock().unwrap();
        rows.insert(period.id, period.clone());
        Ok(period)
    }

    async fn mark_requested(&self, tenant_id: &str, id: Uuid, requested_at: DateTime<Utc>) -> Result<AccountingPeriod> {
        let mut rows = self.rows.lock().unwrap();
        let period = rows
            .get_mut(&id)
            .filter(|p| p.tenant_id == tenant_id)
            .ok_or_else(|| Error::not_found("Accounting period not found"))?;
        period.close_requested_at = Some(requested_at);
        Ok(period.clone())
    }

    async fn close_locked(
        &self,
        tenant_id: &str,
        id: Uuid,
        closed_by: &str,
        close_reason: &str,
        close_hash: &str,
        closed_at: DateTime<Utc>,
    ) -> Result<AccountingPeriod> {
        let mut rows = self.rows.lock().unwrap();
        let period = rows
            .get_mut(&id)
            .filter(|p| p.tenant_id == tenant_id)
            .ok_or_else(|| Error::not_found("Accounting period not found"))?;
        if period.is_closed {
            return Ok(period.clone());
        }
        period.is_closed = true;
        period.closed_at = Some(closed_at);
        period.closed_by = Some(closed_by.to_string());
        period.close_reason = Some(close_reason.to_string());
        period.close_hash = Some(close_hash.to_string());
        Ok(period.clone())
    }
}

#[derive(Default)]
pub struct InMemoryPeriodSummaryRepository {
    rows: Mutex<HashMap<(String, Uuid, String), PeriodSummarySnapshot>>,
}

#[async_trait]
impl PeriodSummaryRepository for InMemoryPeriodSummaryRepository {
    async fn insert_if_absent(&self, snapshot: PeriodSummarySnapshot) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        let key = (snapshot.tenant_id.clone(), snapshot.period_id, snapshot.currency.clone());
        if rows.contains_key(&key) {
            return Ok(false);
        }
        rows.insert(key, snapshot);
        Ok(true)
    }

    async fn list_for_period(&self, tenant_id: &str, period_id: Uuid) -> Result<Vec<PeriodSummarySnapshot>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.period_id == period_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryFailedGlEventRepository {
    rows: Mutex<Vec<FailedGlEvent>>,
}

#[async_trait]
impl FailedGlEventRepository for InMemoryFailedGlEventRepository {
    async fn insert(&self, failure: FailedGlEvent) -> Result<()> {
        self.rows.lock().unwrap().push(failure);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryTenantConfigRepository {
    rows: Mutex<HashMap<String, TenantProcessorConfig>>,
}

impl InMemoryTenantConfigRepository {
    /// Test/seed helper — production code populates this repository from
    /// the `tenants` table, never by direct insertion.
    pub fn seed(&self, config: TenantProcessorConfig) {
        self.rows.lock().unwrap().insert(config.app_id.clone(), config);
    }
}

#[async_trait]
impl TenantConfigRepository for InMemoryTenantConfigRepository {
    async fn find(&self, app_id: &str) -> Result<Option<TenantProcessorConfig>> {
        Ok(self.rows.lock().unwrap().get(app_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryDunningConfigRepository {
    rows: Mutex<HashMap<String, DunningConfig>>,
}

impl InMemoryDunningConfigRepository {
    pub fn seed(&self, config: DunningConfig) {
        self.rows.lock().unwrap().insert(config.app_id.clone(), config);
    }
}

#[async_trait]
impl DunningConfigRepository for InMemoryDunningConfigRepository {
    async fn find(&self, app_id: &str) -> Result<Option<DunningConfig>> {
        Ok(self.rows.lock().unwrap().get(app_id).cloned())
    }
}
