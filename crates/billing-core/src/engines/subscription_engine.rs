//! Subscription Engine (SPEC_FULL §4.6): create/cancel/cycle-change and
//! the status machine. In-place price changes within the same interval
//! are delegated to [`crate::engines::proration::apply_subscription_change`];
//! interval changes are cancel-then-create, never an in-place mutation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    CancelSubscriptionRequest, CancellationMode, CreateSubscriptionRequest, CycleChangeResult,
    IntervalUnit, Subscription, SubscriptionStatus,
};
use crate::processor::{self, ProcessorGateway};
use crate::repository::SubscriptionRepository;

pub struct SubscriptionEngine {
    subscriptions: Arc<dyn SubscriptionRepository>,
    gateway: Arc<dyn ProcessorGateway>,
}

pub(crate) fn period_length(interval_unit: IntervalUnit, interval_count: i32) -> chrono::Duration {
    let count = interval_count.max(1) as i64;
    match interval_unit {
        IntervalUnit::Day => chrono::Duration::days(count),
        IntervalUnit::Week => chrono::Duration::weeks(count),
        // Calendar months/years are approximated as 30/365 day blocks —
        // the processor is the source of truth for exact period bounds
        // once it acknowledges the subscription; this is only the local
        // placeholder used before that round trip completes.
        IntervalUnit::Month => chrono::Duration::days(30 * count),
        IntervalUnit::Year => chrono::Duration::days(365 * count),
    }
}

impl SubscriptionEngine {
    pub fn new(subscriptions: Arc<dyn SubscriptionRepository>, gateway: Arc<dyn ProcessorGateway>) -> Self {
        Self { subscriptions, gateway }
    }

    /// SPEC_FULL §4.6: persist local pending row, call the processor,
    /// finalize with `processor_id` and the derived period bounds.
    pub async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
        account_id: &str,
        customer_processor_id: &str,
        processor_payment_method_id: &str,
    ) -> Result<Subscription> {
        if request.price_cents < 0 {
            return Err(Error::validation("price_cents must not be negative"));
        }

        let now = Utc::now();
        let period_start = now;
        let period_end = period_start + period_length(request.interval_unit, request.interval_count);

        let initial_status = if request.trial_days > 0 {
            SubscriptionStatus::Trialing
        } else {
            SubscriptionStatus::Active
        };

        let pending = Subscription {
            id: Uuid::new_v4(),
            app_id: request.app_id.clone(),
            customer_id: request.customer_id,
            processor_id: None,
            plan_id: request.plan_id.clone(),
            price_cents: request.price_cents,
            quantity: request.quantity,
            currency: request.currency.clone(),
            interval_unit: request.interval_unit,
            interval_count: request.interval_count,
            status: initial_status,
            current_period_start: period_start,
            current_period_end: period_end,
            cancel_at: None,
            canceled_at: None,
            metadata: request.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
            created_at: now,
            updated_at: now,
        };
        let pending = self.subscriptions.insert(pending).await?;

        let result = self
            .gateway
            .create_subscription(processor::CreateSubscriptionRequest {
                account_id: account_id.to_string(),
                processor_customer_id: customer_processor_id.to_string(),
                processor_payment_method_id: processor_payment_method_id.to_string(),
                plan_id: request.plan_id,
                price_cents: request.price_cents,
                currency: request.currency,
                quantity: request.quantity,
            })
            .await?;

        let mut finalized = pending;
        finalized.processor_id = Some(result.processor_id);
        finalized.updated_at = Utc::now();
        self.subscriptions.update(finalized).await
    }

    /// Two cancellation modes per SPEC_FULL §4.6: immediate transitions
    /// straight to `canceled`; at-period-end only schedules `cancel_at`
    /// and waits for the processor's period-boundary event to flip status.
    pub async fn cancel_subscription(&self, request: CancelSubscriptionRequest) -> Result<Subscription> {
        let subscription = self
            .subscriptions
            .find_by_id(&request.app_id, request.subscription_id)
            .await?
            .ok_or_else(|| Error::not_found("Subscription not found"))?;

        let processor_id = subscription
            .processor_id
            .clone()
            .ok_or_else(|| Error::conflict("Subscription is not yet confirmed with the processor"))?;

        match request.mode {
            CancellationMode::Immediate => {
                if !subscription.status.can_transition_to(SubscriptionStatus::Canceled) {
                    return Err(Error::conflict("Subscription cannot be canceled from its current status"));
                }
                self.gateway.cancel_subscription(&request.app_id, &processor_id, false).await?;

                let mut updated = subscription;
                updated.status = SubscriptionStatus::Canceled;
                updated.canceled_at = Some(Utc::now());
                updated.updated_at = Utc::now();
                self.subscriptions.update(updated).await
            }
            CancellationMode::AtPeriodEnd => {
                self.gateway.cancel_subscription(&request.app_id, &processor_id, true).await?;

                let mut updated = subscription.clone();
                updated.cancel_at = Some(subscription.current_period_end);
                updated.updated_at = Utc::now();
                self.subscriptions.update(updated).await
            }
        }
    }

    /// SPEC_FULL §4.6: interval changes are cancel-then-create, not an
    /// in-place mutation. The old subscription is canceled immediately;
    /// the new one is created fresh, charged in full for its own first
    /// period (see the proration engine's cycle-change worked example).
    pub async fn change_cycle(
        &self,
        app_id: &str,
        subscription_id: Uuid,
        new_request: CreateSubscriptionRequest,
        account_id: &str,
        customer_processor_id: &str,
        processor_payment_method_id: &str,
    ) -> Result<CycleChangeResult> {
        let old = self
            .subscriptions
            .find_by_id(app_id, subscription_id)
            .await?
            .ok_or_else(|| Error::not_found("Subscription not found"))?;

        let processor_id = old
            .processor_id
            .clone()
            .ok_or_else(|| Error::conflict("Subscription is not yet confirmed with the processor"))?;

        self.gateway.cancel_subscription(app_id, &processor_id, false).await?;

        let mut canceled = old.clone();
        canceled.status = SubscriptionStatus::Canceled;
        canceled.canceled_at = Some(Utc::now());
        canceled.updated_at = Utc::now();
        self.subscriptions.update(canceled).await?;

        let new_subscription = self
            .create_subscription(new_request, account_id, customer_processor_id, processor_payment_method_id)
            .await?;

        Ok(CycleChangeResult {
            canceled_subscription_id: old.id,
            new_subscription,
        })
    }

    /// Applies a processor-driven status transition, enforcing the status
    /// machine invariant from SPEC_FULL §4.6 rather than writing the
    /// target status unconditionally.
    pub async fn transition_status(
        &self,
        app_id: &str,
        subscription_id: Uuid,
        next: SubscriptionStatus,
        period: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Subscription> {
        let subscription = self
            .subscriptions
            .find_by_id(app_id, subscription_id)
            .await?
            .ok_or_else(|| Error::not_found("Subscription not found"))?;

        if !subscription.status.can_transition_to(next) {
            return Err(Error::conflict("Invalid subscription status transition"));
        }

        let mut updated = subscription;
        updated.status = next;
        if let Some((start, end)) = period {
            updated.current_period_start = start;
            updated.current_period_end = end;
        }
        if next == SubscriptionStatus::Canceled {
            updated.canceled_at = Some(Utc::now());
        }
        updated.updated_at = Utc::now();
        self.subscriptions.update(updated).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::FakeProcessorGateway;
    use crate::repository::InMemorySubscriptionRepository;

    fn engine() -> SubscriptionEngine {
        SubscriptionEngine::new(Arc::new(InMemorySubscriptionRepository::default()), Arc::new(FakeProcessorGateway::new()))
    }

    fn base_request(app_id: &str) -> CreateSubscriptionRequest {
        CreateSubscriptionRequest {
            app_id: app_id.to_string(),
            customer_id: Uuid::new_v4(),
            plan_id: "plan-pro".to_string(),
            price_cents: 2500,
            quantity: 1,
            currency: "usd".to_string(),
            interval_unit: IntervalUnit::Month,
            interval_count: 1,
            trial_days: 0,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn create_subscription_is_active_without_trial() {
        let engine = engine();
        let sub = engine
            .create_subscription(base_request("tenant-a"), "acct_1", "cus_1", "pm_1")
            .await
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(sub.has_valid_period());
    }

    #[tokio::test]
    async fn create_subscription_with_trial_starts_trialing() {
        let engine = engine();
        let mut request = base_request("tenant-a");
        request.trial_days = 14;
        let sub = engine
            .create_subscription(request, "acct_1", "cus_1", "pm_1")
            .await
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Trialing);
    }

    #[tokio::test]
    async fn immediate_cancellation_sets_canceled_at() {
        let engine = engine();
        let sub = engine
            .create_subscription(base_request("tenant-a"), "acct_1", "cus_1", "pm_1")
            .await
            .unwrap();

        let canceled = engine
            .cancel_subscription(CancelSubscriptionRequest {
                app_id: "tenant-a".to_string(),
                subscription_id: sub.id,
                mode: CancellationMode::Immediate,
            })
            .await
            .unwrap();

        assert_eq!(canceled.status, SubscriptionStatus::Canceled);
        assert!(canceled.canceled_at.is_some());
    }

    #[tokio::test]
    async fn at_period_end_cancellation_only_schedules_cancel_at() {
        let engine = engine();
        let sub = engine
            .create_subscription(base_request("tenant-a"), "acct_1", "cus_1", "pm_1")
            .await
            .unwrap();

        let updated = engine
            .cancel_subscription(CancelSubscriptionRequest {
                app_id: "tenant-a".to_string(),
                subscription_id: sub.id,
                mode: CancellationMode::AtPeriodEnd,
            })
            .await
            .unwrap();

        assert_eq!(updated.status, SubscriptionStatus::Active);
        assert_eq!(updated.cancel_at, Some(sub.current_period_end));
    }

    #[tokio::test]
    async fn cannot_cancel_an_already_canceled_subscription() {
        let engine = engine();
        let sub = engine
            .create_subscription(base_request("tenant-a"), "acct_1", "cus_1", "pm_1")
            .await
            .unwrap();
        engine
            .cancel_subscription(CancelSubscriptionRequest {
                app_id: "tenant-a".to_string(),
                subscription_id: sub.id,
                mode: CancellationMode::Immediate,
            })
            .await
            .unwrap();

        let err = engine
            .cancel_subscription(CancelSubscriptionRequest {
                app_id: "tenant-a".to_string(),
                subscription_id: sub.id,
                mode: CancellationMode::Immediate,
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn change_cycle_cancels_old_and_creates_new() {
        let engine = engine();
        let old = engine
            .create_subscription(base_request("tenant-a"), "acct_1", "cus_1", "pm_1")
            .await
            .unwrap();

        let mut new_request = base_request("tenant-a");
        new_request.customer_id = old.customer_id;
        new_request.interval_unit = IntervalUnit::Year;
        new_request.price_cents = 12000;

        let result = engine
            .change_cycle(
                "tenant-a",
                old.id,
                new_request,
                "acct_1",
                "cus_1",
                "pm_1",
            )
            .await
            .unwrap();

        assert_eq!(result.canceled_subscription_id, old.id);
        assert_eq!(result.new_subscription.price_cents, 12000);
        assert_ne!(result.new_subscription.id, old.id);
    }
}
