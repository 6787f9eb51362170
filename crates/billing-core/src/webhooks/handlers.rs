//! Webhook Handlers (SPEC_FULL §4.10): applies subscription, payment
//! failure, refund, and dispute events to local state. Dispatched by
//! [`crate::webhooks::ingress::WebhookIngress`] once a webhook has cleared
//! signature verification and dedupe.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use crate::engines::customer_lifecycle::CustomerLifecycle;
use crate::error::{Error, Result};
use crate::event_log::{system_event, EventLog};
use crate::models::{ChargeStatus, Dispute, DisputeStatus, Refund, RefundStatus, SubscriptionStatus};
use crate::repository::{
    ChargeRepository, CustomerRepository, DisputeRepository, DunningConfigRepository,
    RefundRepository, SubscriptionRepository,
};

pub struct WebhookHandlers {
    subscriptions: Arc<dyn SubscriptionRepository>,
    customers: Arc<dyn CustomerRepository>,
    charges: Arc<dyn ChargeRepository>,
    refunds: Arc<dyn RefundRepository>,
    disputes: Arc<dyn DisputeRepository>,
    dunning_config: Arc<dyn DunningConfigRepository>,
    default_grace_days: i32,
    events: Arc<EventLog>,
}

impl WebhookHandlers {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        customers: Arc<dyn CustomerRepository>,
        charges: Arc<dyn ChargeRepository>,
        refunds: Arc<dyn RefundRepository>,
        disputes: Arc<dyn DisputeRepository>,
        dunning_config: Arc<dyn DunningConfigRepository>,
        default_grace_days: i32,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            subscriptions,
            customers,
            charges,
            refunds,
            disputes,
            dunning_config,
            default_grace_days,
            events,
        }
    }

    /// Dispatches by `event_type`; unknown types are non-retriable per
    /// SPEC_FULL §4.10.
    pub async fn dispatch(&self, app_id: &str, event_type: &str, payload: &JsonValue) -> Result<()> {
        match event_type {
            "subscription.updated" => self.handle_subscription_updated(app_id, payload).await,
            "subscription.canceled" => self.handle_subscription_canceled(app_id, payload).await,
            "payment.failed" | "charge.failed" | "invoice.payment_failed" => {
                self.handle_payment_failure(app_id, payload).await
            }
            t if t.starts_with("refund.") => self.handle_refund_event(app_id, payload).await,
            t if t.starts_with("dispute.") => self.handle_dispute_event(app_id, payload).await,
            _ => Err(Error::validation("unknown_event_type")),
        }
    }

    /// `subscription.updated`: status, period bounds, `cancel_at`,
    /// `canceled_at`.
    async fn handle_subscription_updated(&self, app_id: &str, payload: &JsonValue) -> Result<()> {
        let processor_id = require_str(payload, "processor_subscription_id")?;
        let subscription = self
            .subscriptions
            .find_by_processor_id(processor_id)
            .await?
            .filter(|s| s.app_id == app_id)
            .ok_or_else(|| Error::not_found("Subscription not found for processor id"))?;

        let next_status = match payload.get("status").and_then(JsonValue::as_str) {
            Some("active") => SubscriptionStatus::Active,
            Some("past_due") => SubscriptionStatus::PastDue,
            Some("trialing") => SubscriptionStatus::Trialing,
            Some("canceled") => SubscriptionStatus::Canceled,
            Some(other) => return Err(Error::validation(format!("unrecognized subscription status '{other}'"))),
            None => subscription.status,
        };

        if !subscription.status.can_transition_to(next_status) {
            return Err(Error::conflict("invalid_status_transition"));
        }

        let mut updated = subscription.clone();
        updated.status = next_status;
        if let (Some(start), Some(end)) = (
            optional_timestamp(payload, "current_period_start")?,
            optional_timestamp(payload, "current_period_end")?,
        ) {
            updated.current_period_start = start;
            updated.current_period_end = end;
        }
        if let Some(cancel_at) = optional_timestamp(payload, "cancel_at")? {
            updated.cancel_at = Some(cancel_at);
        }
        if let Some(canceled_at) = optional_timestamp(payload, "canceled_at")? {
            updated.canceled_at = Some(canceled_at);
        }
        updated.updated_at = Utc::now();
        self.subscriptions.update(updated).await?;

        self.events.append_async(system_event(
            app_id,
            "subscription.updated",
            "subscription",
            &subscription.id.to_string(),
            payload.clone(),
        ));
        Ok(())
    }

    /// `subscription.canceled`: `status=canceled`, `canceled_at=now`.
    async fn handle_subscription_canceled(&self, app_id: &str, payload: &JsonValue) -> Result<()> {
        let processor_id = require_str(payload, "processor_subscription_id")?;
        let subscription = self
            .subscriptions
            .find_by_processor_id(processor_id)
            .await?
            .filter(|s| s.app_id == app_id)
            .ok_or_else(|| Error::not_found("Subscription not found for processor id"))?;

        if !subscription.status.can_transition_to(SubscriptionStatus::Canceled) {
            return Err(Error::conflict("invalid_status_transition"));
        }

        let mut updated = subscription.clone();
        updated.status = SubscriptionStatus::Canceled;
        updated.canceled_at = Some(Utc::now());
        updated.updated_at = Utc::now();
        self.subscriptions.update(updated).await?;

        self.events.append_async(system_event(
            app_id,
            "subscription.canceled",
            "subscription",
            &subscription.id.to_string(),
            payload.clone(),
        ));
        Ok(())
    }

    /// `payment.failed | charge.failed | invoice.payment_failed`: locate
    /// the subscription, locate its customer, set `delinquent_since`/
    /// `grace_period_end` from the tenant's dunning config. Subscription
    /// status itself follows the next `subscription.updated` event.
    async fn handle_payment_failure(&self, app_id: &str, payload: &JsonValue) -> Result<()> {
        let processor_id = require_str(payload, "processor_subscription_id")?;
        let subscription = self
            .subscriptions
            .find_by_processor_id(processor_id)
            .await?
            .filter(|s| s.app_id == app_id)
            .ok_or_else(|| Error::not_found("Subscription not found for processor id"))?;

        let customer = self
            .customers
            .find_by_id(app_id, subscription.customer_id)
            .await?
            .ok_or_else(|| Error::not_found("Customer not found"))?;

        let config = self.dunning_config.find(app_id).await?;
        let grace_days = config.as_ref().map(|c| c.grace_days).unwrap_or(self.default_grace_days);
        let first_stage = config.as_ref().and_then(|c| c.stage_after(0));

        let now = Utc::now();
        let mut updated = customer.clone();
        updated.delinquent_since = Some(now);
        updated.grace_period_end = Some(CustomerLifecycle::grace_period_end(now, grace_days));
        updated.dunning_stage = 0;
        updated.next_retry_at = first_stage.map(|s| now + chrono::Duration::days(s.wait_days as i64));
        updated.updated_at = now;
        self.customers.update(updated).await?;

        self.events.append_async(system_event(
            app_id,
            "payment_failure",
            "customer",
            &customer.id.to_string(),
            payload.clone(),
        ));
        Ok(())
    }

    /// `refund.*`: update an existing local refund by processor id, or
    /// create one linked to the charge by processor charge id. If the
    /// charge cannot be resolved locally, log and skip — it is persisted
    /// during the next reconciliation sweep rather than failing ingress.
    async fn handle_refund_event(&self, app_id: &str, payload: &JsonValue) -> Result<()> {
        let processor_refund_id = require_str(payload, "processor_refund_id")?;
        let status = refund_status_from(payload)?;

        if let Some(mut existing) = self.refunds.find_by_processor_id(app_id, processor_refund_id).await? {
            existing.status = status;
            existing.updated_at = Utc::now();
            self.refunds.update(existing).await?;
            return Ok(());
        }

        let processor_charge_id = require_str(payload, "processor_charge_id")?;
        let charge = match self.charges.find_by_processor_id(app_id, processor_charge_id).await? {
            Some(charge) => charge,
            None => {
                warn!(
                    app_id,
                    processor_charge_id, "refund webhook references an unresolved charge; deferring to reconciliation"
                );
                return Ok(());
            }
        };

        let amount_cents = require_i64(payload, "amount_cents")?;
        let now = Utc::now();
        let refund = Refund {
            id: Uuid::new_v4(),
            app_id: app_id.to_string(),
            charge_id: charge.id,
            processor_id: Some(processor_refund_id.to_string()),
            amount_cents,
            status,
            reason: payload.get("reason").and_then(JsonValue::as_str).map(str::to_string),
            reference_id: format!("webhook_refund_{processor_refund_id}"),
            created_at: now,
            updated_at: now,
        };
        self.refunds.insert(refund).await?;
        Ok(())
    }

    /// `dispute.*`: upsert by `(processor_dispute_id, app_id)`.
    async fn handle_dispute_event(&self, app_id: &str, payload: &JsonValue) -> Result<()> {
        let processor_dispute_id = require_str(payload, "processor_dispute_id")?;
        let processor_charge_id = require_str(payload, "processor_charge_id")?;
        let charge = self
            .charges
            .find_by_processor_id(app_id, processor_charge_id)
            .await?
            .ok_or_else(|| Error::not_found("Charge not found for dispute"))?;

        let status = dispute_status_from(payload)?;
        let amount_cents = require_i64(payload, "amount_cents")?;
        let now = Utc::now();

        let dispute = Dispute {
            id: Uuid::new_v4(),
            app_id: app_id.to_string(),
            charge_id: charge.id,
            processor_dispute_id: processor_dispute_id.to_string(),
            status,
            reason: payload.get("reason").and_then(JsonValue::as_str).map(str::to_string),
            amount_cents,
            evidence_due_by: optional_timestamp(payload, "evidence_due_by")?,
            created_at: now,
            updated_at: now,
        };
        self.disputes.upsert_by_processor_id(dispute).await?;
        Ok(())
    }
}

fn require_str<'a>(payload: &'a JsonValue, field: &str) -> Result<&'a str> {
    payload
        .get(field)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| Error::validation(format!("missing or invalid '{field}' in webhook payload")))
}

fn require_i64(payload: &JsonValue, field: &str) -> Result<i64> {
    payload
        .get(field)
        .and_then(JsonValue::as_i64)
        .ok_or_else(|| Error::validation(format!("missing or invalid '{field}' in webhook payload")))
}

fn optional_timestamp(payload: &JsonValue, field: &str) -> Result<Option<DateTime<Utc>>> {
    match payload.get(field).and_then(JsonValue::as_str) {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| Error::validation(format!("'{field}' is not a valid RFC3339 timestamp"))),
        None => Ok(None),
    }
}

fn refund_status_from(payload: &JsonValue) -> Result<RefundStatus> {
    match payload.get("status").and_then(JsonValue::as_str) {
        Some("succeeded") => Ok(RefundStatus::Succeeded),
        Some("failed") => Ok(RefundStatus::Failed),
        Some("pending") => Ok(RefundStatus::Pending),
        Some(other) => Err(Error::validation(format!("unrecognized refund status '{other}'"))),
        None => Err(Error::validation("missing 'status' in refund webhook payload")),
    }
}

fn dispute_status_from(payload: &JsonValue) -> Result<DisputeStatus> {
    match payload.get("status").and_then(JsonValue::as_str) {
        Some("needs_response") => Ok(DisputeStatus::NeedsResponse),
        Some("under_review") => Ok(DisputeStatus::UnderReview),
        Some("won") => Ok(DisputeStatus::Won),
        Some("lost") => Ok(DisputeStatus::Lost),
        Some(other) => Err(Error::validation(format!("unrecognized dispute status '{other}'"))),
        None => Err(Error::validation("missing 'status' in dispute webhook payload")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Charge, ChargeType, Customer, CustomerStatus, Subscription, IntervalUnit};
    use crate::repository::{
        InMemoryChargeRepository, InMemoryCustomerRepository, InMemoryDisputeRepository,
        InMemoryDunningConfigRepository, InMemoryEventRepository, InMemoryRefundRepository,
        InMemorySubscriptionRepository,
    };
    use serde_json::json;

    struct Fixture {
        handlers: WebhookHandlers,
        subscriptions: Arc<InMemorySubscriptionRepository>,
        customers: Arc<InMemoryCustomerRepository>,
        charges: Arc<InMemoryChargeRepository>,
        refunds: Arc<InMemoryRefundRepository>,
    }

    async fn fixture() -> Fixture {
        let subscriptions = Arc::new(InMemorySubscriptionRepository::default());
        let customers = Arc::new(InMemoryCustomerRepository::default());
        let charges = Arc::new(InMemoryChargeRepository::default());
        let refunds = Arc::new(InMemoryRefundRepository::default());
        let disputes = Arc::new(InMemoryDisputeRepository::default());
        let dunning_config = Arc::new(InMemoryDunningConfigRepository::default());
        let events = Arc::new(EventLog::new(Arc::new(InMemoryEventRepository::default())));

        let handlers = WebhookHandlers::new(
            subscriptions.clone(),
            customers.clone(),
            charges.clone(),
            refunds.clone(),
            disputes,
            dunning_config,
            3,
            events,
        );

        Fixture {
            handlers,
            subscriptions,
            customers,
            charges,
            refunds,
        }
    }

    fn seed_subscription(app_id: &str, processor_id: &str, customer_id: Uuid) -> Subscription {
        let now = Utc::now();
        Subscription {
            id: Uuid::new_v4(),
            app_id: app_id.to_string(),
            customer_id,
            processor_id: Some(processor_id.to_string()),
            plan_id: "plan-pro".to_string(),
            price_cents: 2500,
            quantity: 1,
            currency: "usd".to_string(),
            interval_unit: IntervalUnit::Month,
            interval_count: 1,
            status: SubscriptionStatus::Active,
            current_period_start: now,
            current_period_end: now + chrono::Duration::days(30),
            cancel_at: None,
            canceled_at: None,
            metadata: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    fn seed_customer(app_id: &str) -> Customer {
        let now = Utc::now();
        Customer {
            id: Uuid::new_v4(),
            app_id: app_id.to_string(),
            external_id: Some("ext-1".to_string()),
            processor_id: Some("cus_1".to_string()),
            status: CustomerStatus::Active,
            email: "a@example.com".to_string(),
            name: "A".to_string(),
            default_payment_method_id: None,
            delinquent_since: None,
            grace_period_end: None,
            dunning_stage: 0,
            next_retry_at: None,
            metadata: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn subscription_updated_applies_new_status_and_period() {
        let fx = fixture().await;
        let customer = fx.customers.insert_pending(seed_customer("tenant-a")).await.unwrap();
        let sub = fx
            .subscriptions
            .insert(seed_subscription("tenant-a", "sub_1", customer.id))
            .await
            .unwrap();

        fx.handlers
            .dispatch(
                "tenant-a",
                "subscription.updated",
                &json!({
                    "processor_subscription_id": "sub_1",
                    "status": "past_due"
                }),
            )
            .await
            .unwrap();

        let updated = fx.subscriptions.find_by_id("tenant-a", sub.id).await.unwrap().unwrap();
        assert_eq!(updated.status, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn payment_failure_sets_delinquency_window() {
        let fx = fixture().await;
        let customer = fx.customers.insert_pending(seed_customer("tenant-a")).await.unwrap();
        fx.subscriptions
            .insert(seed_subscription("tenant-a", "sub_1", customer.id))
            .await
            .unwrap();

        fx.handlers
            .dispatch(
                "tenant-a",
                "invoice.payment_failed",
                &json!({"processor_subscription_id": "sub_1"}),
            )
            .await
            .unwrap();

        let updated = fx.customers.find_by_id("tenant-a", customer.id).await.unwrap().unwrap();
        assert!(updated.delinquent_since.is_some());
        assert!(updated.grace_period_end.is_some());
    }

    #[tokio::test]
    async fn refund_event_creates_row_when_charge_resolves() {
        let fx = fixture().await;
        let customer = fx.customers.insert_pending(seed_customer("tenant-a")).await.unwrap();
        let now = Utc::now();
        let charge = fx
            .charges
            .insert(Charge {
                id: Uuid::new_v4(),
                app_id: "tenant-a".to_string(),
                customer_id: customer.id,
                subscription_id: None,
                processor_id: Some("ch_1".to_string()),
                charge_type: ChargeType::OneTime,
                amount_cents: 1000,
                currency: "usd".to_string(),
                status: ChargeStatus::Succeeded,
                reason: None,
                reference_id: "r-1".to_string(),
                failure_code: None,
                failure_message: None,
                metadata: json!({}),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        fx.handlers
            .dispatch(
                "tenant-a",
                "refund.succeeded",
                &json!({
                    "processor_refund_id": "re_1",
                    "processor_charge_id": "ch_1",
                    "amount_cents": 500,
                    "status": "succeeded"
                }),
            )
            .await
            .unwrap();

        let refunds = fx.refunds.list_successful_for_charge("tenant-a", charge.id).await.unwrap();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].amount_cents, 500);
    }

    #[tokio::test]
    async fn refund_event_skips_when_charge_unresolved() {
        let fx = fixture().await;
        let outcome = fx
            .handlers
            .dispatch(
                "tenant-a",
                "refund.succeeded",
                &json!({
                    "processor_refund_id": "re_2",
                    "processor_charge_id": "ch_missing",
                    "amount_cents": 500,
                    "status": "succeeded"
                }),
            )
            .await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn unknown_event_type_is_rejected() {
        let fx = fixture().await;
        let err = fx.handlers.dispatch("tenant-a", "not.a.real.event", &json!({})).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
