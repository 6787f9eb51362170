//! Renewal job (SPEC_FULL §4.12): finds subscriptions due at or before the
//! look-ahead window and generates the next period's invoice. Same
//! single `run()` counted-report shape as the other background jobs in
//! this module, applied here to invoice generation rather than retry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::engines::subscription_engine::period_length;
use crate::error::Result;
use crate::models::{Invoice, InvoiceStatus, LineItem, LineItemType, Subscription};
use crate::repository::{InvoiceRepository, SubscriptionRepository};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RenewalRunReport {
    pub job_id: Uuid,
    pub due: usize,
    pub invoiced: usize,
    pub errors: Vec<String>,
}

pub struct RenewalJob {
    subscriptions: Arc<dyn SubscriptionRepository>,
    invoices: Arc<dyn InvoiceRepository>,
    /// How far ahead of `current_period_end` a subscription is considered
    /// due, so invoices can be generated and paid before the period
    /// actually rolls over.
    lookahead: chrono::Duration,
}

impl RenewalJob {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        invoices: Arc<dyn InvoiceRepository>,
        lookahead: chrono::Duration,
    ) -> Self {
        Self {
            subscriptions,
            invoices,
            lookahead,
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<RenewalRunReport> {
        let due = self.subscriptions.list_due_for_renewal(now + self.lookahead).await?;
        let mut report = RenewalRunReport {
            job_id: Uuid::new_v4(),
            due: due.len(),
            ..Default::default()
        };

        for subscription in due {
            let subscription_id = subscription.id;
            match self.renew_one(subscription, now).await {
                Ok(()) => report.invoiced += 1,
                Err(err) => {
                    warn!(subscription_id = %subscription_id, error = %err, "renewal failed");
                    report.errors.push(format!("{subscription_id}: {err}"));
                }
            }
        }

        Ok(report)
    }

    /// Invoices the subscription's current period and advances it to the
    /// next one. The processor's own period-boundary webhook remains the
    /// source of truth for charging; this job only records the invoice
    /// and moves the local bookkeeping window forward so the same
    /// subscription is not picked up again next tick.
    async fn renew_one(&self, subscription: Subscription, now: DateTime<Utc>) -> Result<()> {
        let invoice_id = Uuid::new_v4();
        let line_item = LineItem {
            id: Uuid::new_v4(),
            invoice_id,
            item_type: LineItemType::Subscription,
            description: format!("{} (qty {})", subscription.plan_id, subscription.quantity),
            quantity: subscription.quantity,
            unit_price_cents: subscription.price_cents,
        };
        let amount_cents = line_item.total_cents();

        let invoice = Invoice {
            id: invoice_id,
            app_id: subscription.app_id.clone(),
            customer_id: subscription.customer_id,
            subscription_id: Some(subscription.id),
            status: InvoiceStatus::Open,
            amount_cents,
            currency: subscription.currency.clone(),
            billing_period_start: Some(subscription.current_period_start),
            billing_period_end: Some(subscription.current_period_end),
            due_at: Some(subscription.current_period_end),
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        self.invoices.insert(invoice, vec![line_item]).await?;

        let next_start = subscription.current_period_end;
        let next_end = next_start + period_length(subscription.interval_unit, subscription.interval_count);
        let mut advanced = subscription;
        advanced.current_period_start = next_start;
        advanced.current_period_end = next_end;
        advanced.updated_at = now;
        self.subscriptions.update(advanced).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IntervalUnit, SubscriptionStatus};
    use crate::repository::{InMemoryInvoiceRepository, InMemorySubscriptionRepository};

    fn seed_subscription(app_id: &str, current_period_end: DateTime<Utc>) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            app_id: app_id.to_string(),
            customer_id: Uuid::new_v4(),
            processor_id: Some("sub_1".to_string()),
            plan_id: "plan-pro".to_string(),
            price_cents: 2500,
            quantity: 2,
            currency: "usd".to_string(),
            interval_unit: IntervalUnit::Month,
            interval_count: 1,
            status: SubscriptionStatus::Active,
            current_period_start: current_period_end - chrono::Duration::days(30),
            current_period_end,
            cancel_at: None,
            canceled_at: None,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn due_subscription_is_invoiced_and_advanced() {
        let subscriptions = Arc::new(InMemorySubscriptionRepository::default());
        let invoices = Arc::new(InMemoryInvoiceRepository::default());
        let now = Utc::now();
        let sub = subscriptions
            .insert(seed_subscription("tenant-a", now + chrono::Duration::hours(1)))
            .await
            .unwrap();

        let job = RenewalJob::new(subscriptions.clone(), invoices, chrono::Duration::days(3));
        let report = job.run(now).await.unwrap();

        assert_eq!(report.due, 1);
        assert_eq!(report.invoiced, 1);

        let advanced = subscriptions.find_by_id("tenant-a", sub.id).await.unwrap().unwrap();
        assert_eq!(advanced.current_period_start, sub.current_period_end);
        assert!(advanced.current_period_end > sub.current_period_end);
    }

    #[tokio::test]
    async fn subscription_not_due_is_left_untouched() {
        let subscriptions = Arc::new(InMemorySubscriptionRepository::default());
        let invoices = Arc::new(InMemoryInvoiceRepository::default());
        let now = Utc::now();
        let sub = subscriptions
            .insert(seed_subscription("tenant-a", now + chrono::Duration::days(30)))
            .await
            .unwrap();

        let job = RenewalJob::new(subscriptions.clone(), invoices, chrono::Duration::days(3));
        let report = job.run(now).await.unwrap();

        assert_eq!(report.due, 0);
        assert_eq!(report.invoiced, 0);
        let unchanged = subscriptions.find_by_id("tenant-a", sub.id).await.unwrap().unwrap();
        assert_eq!(unchanged.current_period_end, sub.current_period_end);
    }
}
