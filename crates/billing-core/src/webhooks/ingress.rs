//! Webhook Ingress (SPEC_FULL §4.9): signature verify, dedupe, persist,
//! dispatch, mark processed/failed. Must run ahead of any JSON body
//! parser — `billing-api` captures the raw bytes before this module ever
//! sees them, per SPEC_FULL §6.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::event_log::{system_event, EventLog};
use crate::models::{WebhookAttempt, WebhookAttemptStatus, WebhookRecord, WebhookStatus};
use crate::processor::ProcessorGateway;
use crate::repository::{TenantConfigRepository, WebhookRepository};
use crate::webhooks::handlers::WebhookHandlers;
use crate::webhooks::retry::{RetryController, RetryDecision};

/// Outcome of [`WebhookIngress::ingest`] — the shape of the response body
/// SPEC_FULL §4.9 describes (`{received, duplicate}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    pub received: bool,
    pub duplicate: bool,
}

pub struct WebhookIngress {
    webhooks: Arc<dyn WebhookRepository>,
    tenant_config: Arc<dyn TenantConfigRepository>,
    gateway: Arc<dyn ProcessorGateway>,
    handlers: Arc<WebhookHandlers>,
    events: Arc<EventLog>,
}

impl WebhookIngress {
    pub fn new(
        webhooks: Arc<dyn WebhookRepository>,
        tenant_config: Arc<dyn TenantConfigRepository>,
        gateway: Arc<dyn ProcessorGateway>,
        handlers: Arc<WebhookHandlers>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            webhooks,
            tenant_config,
            gateway,
            handlers,
            events,
        }
    }

    /// SPEC_FULL §4.9 pipeline. `signature_header` is `None` when the
    /// header was absent from the request entirely.
    pub async fn ingest(
        &self,
        app_id: &str,
        event_id: &str,
        event_type: &str,
        raw_body: &[u8],
        signature_header: Option<&str>,
        payload: JsonValue,
    ) -> Result<IngestOutcome> {
        let signature = signature_header.ok_or_else(|| Error::validation("signature_invalid"))?;

        let tenant = self
            .tenant_config
            .find(app_id)
            .await?
            .ok_or_else(|| Error::not_found("Unknown tenant"))?;

        self.gateway
            .verify_webhook_signature(&tenant.webhook_signing_secret, raw_body, signature)
            .map_err(|_| Error::validation("signature_invalid"))?;

        if self.webhooks.find(app_id, event_id).await?.is_some() {
            return Ok(IngestOutcome {
                received: true,
                duplicate: true,
            });
        }

        let now = Utc::now();
        let record = WebhookRecord {
            app_id: app_id.to_string(),
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            status: WebhookStatus::Received,
            payload: payload.clone(),
            attempt_count: 0,
            last_attempt_at: None,
            next_attempt_at: None,
            dead_at: None,
            error_code: None,
            created_at: now,
            updated_at: now,
        };
        let record = self.webhooks.insert(record).await?;

        self.dispatch_and_record(record, payload, 1).await?;

        Ok(IngestOutcome {
            received: true,
            duplicate: false,
        })
    }

    /// Shared by [`Self::ingest`] (first attempt) and
    /// [`Self::process_due_retries`] (subsequent attempts): runs the
    /// handler, writes the append-only [`WebhookAttempt`], and advances
    /// `WebhookRecord` per the Retry Controller's decision.
    async fn dispatch_and_record(&self, mut record: WebhookRecord, payload: JsonValue, attempt_number: i32) -> Result<()> {
        record.status = WebhookStatus::Processing;
        record.attempt_count = attempt_number;
        record.last_attempt_at = Some(Utc::now());
        record = self.webhooks.update(record).await?;

        match self.handlers.dispatch(&record.app_id, &record.event_type, &payload).await {
            Ok(()) => {
                record.status = WebhookStatus::Processed;
                record.updated_at = Utc::now();
                self.webhooks.update(record.clone()).await?;
                self.webhooks
                    .record_attempt(WebhookAttempt {
                        app_id: record.app_id.clone(),
                        event_id: record.event_id.clone(),
                        attempt_number,
                        status: WebhookAttemptStatus::Succeeded,
                        next_attempt_at: None,
                        error_code: None,
                        error_message: None,
                        created_at: Utc::now(),
                    })
                    .await?;
                self.events.append_async(system_event(
                    &record.app_id,
                    "webhook.processed",
                    "webhook",
                    &record.event_id,
                    serde_json::json!({"event_type": record.event_type}),
                ));
            }
            Err(err) => {
                let error_code = classify_webhook_error(&err);
                let decision = RetryController::decide(attempt_number, error_code);

                record.status = WebhookStatus::Failed;
                record.error_code = Some(error_code.to_string());
                record.updated_at = Utc::now();

                let attempt_status = match decision {
                    RetryDecision::RetryAt(at) => {
                        record.next_attempt_at = Some(at);
                        WebhookAttemptStatus::Failed
                    }
                    RetryDecision::DeadLetter => {
                        record.dead_at = Some(Utc::now());
                        record.next_attempt_at = None;
                        WebhookAttemptStatus::DeadLettered
                    }
                };
                self.webhooks.update(record.clone()).await?;
                self.webhooks
                    .record_attempt(WebhookAttempt {
                        app_id: record.app_id.clone(),
                        event_id: record.event_id.clone(),
                        attempt_number,
                        status: attempt_status,
                        next_attempt_at: record.next_attempt_at,
                        error_code: Some(error_code.to_string()),
                        error_message: Some(err.to_string()),
                        created_at: Utc::now(),
                    })
                    .await?;
            }
        }
        Ok(())
    }

    /// Background retry processor (SPEC_FULL §4.9): picks rows where
    /// `status=failed AND next_attempt_at <= now AND dead_at IS NULL`,
    /// replays the handler, and advances the record. Returns the count
    /// processed so the jobs supervisor can report a tick summary.
    pub async fn process_due_retries(&self, now: DateTime<Utc>, limit: i64) -> Result<usize> {
        let due = self.webhooks.list_due_for_retry(now, limit).await?;
        let count = due.len();
        for record in due {
            let attempt_number = record.attempt_count + 1;
            let payload = record.payload.clone();
            self.dispatch_and_record(record, payload, attempt_number).await?;
        }
        Ok(count)
    }
}

/// Maps a domain error to one of the stable classification codes
/// SPEC_FULL §4.9's retry table keys off of. Sentinel messages
/// (`"signature_invalid"`, `"unknown_event_type"`, `"closed_period"`) are
/// set by the call sites that raise those specific conditions; any other
/// `Validation`/`NotFound` is a generic `validation_error` since retrying
/// a malformed or unresolvable webhook on a timer won't fix it.
pub fn classify_webhook_error(err: &Error) -> &'static str {
    match err {
        Error::Validation(msg) if msg == "signature_invalid" => "signature_invalid",
        Error::Validation(msg) if msg == "unknown_event_type" => "unknown_event_type",
        Error::Conflict(msg) if msg == "closed_period" => "closed_period",
        Error::Validation(_) | Error::NotFound(_) | Error::Unauthorized(_) | Error::Forbidden(_) => "validation_error",
        Error::PaymentProcessor(_) | Error::Network(_) => "processor_timeout",
        Error::Conflict(_) | Error::Database(_) | Error::Internal(_) | Error::Serialization(_) | Error::Io(_) | Error::Config(_) => {
            "processor_timeout"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DunningConfig, IntervalUnit, Subscription, SubscriptionStatus};
    use crate::processor::FakeProcessorGateway;
    use crate::repository::{
        InMemoryChargeRepository, InMemoryCustomerRepository, InMemoryDisputeRepository,
        InMemoryDunningConfigRepository, InMemoryEventRepository, InMemoryRefundRepository,
        InMemorySubscriptionRepository, InMemoryTenantConfigRepository, InMemoryWebhookRepository,
    };
    use crate::config::TenantProcessorConfig;
    use crate::processor::compute_hmac_signature;
    use serde_json::json;
    use uuid::Uuid;

    fn ingress_with_handlers() -> (WebhookIngress, Arc<InMemorySubscriptionRepository>) {
        let subscriptions = Arc::new(InMemorySubscriptionRepository::default());
        let customers = Arc::new(InMemoryCustomerRepository::default());
        let charges = Arc::new(InMemoryChargeRepository::default());
        let refunds = Arc::new(InMemoryRefundRepository::default());
        let disputes = Arc::new(InMemoryDisputeRepository::default());
        let dunning_config = Arc::new(InMemoryDunningConfigRepository::default());
        let events = Arc::new(EventLog::new(Arc::new(InMemoryEventRepository::default())));

        let handlers = Arc::new(WebhookHandlers::new(
            subscriptions.clone(),
            customers,
            charges,
            refunds,
            disputes,
            dunning_config,
            3,
            events.clone(),
        ));

        let webhooks = Arc::new(InMemoryWebhookRepository::default());
        let tenant_config = Arc::new(InMemoryTenantConfigRepository::default());
        tenant_config.seed(TenantProcessorConfig {
            app_id: "tenant-a".to_string(),
            processor_account_id: "acct_1".to_string(),
            processor_api_key: "sk_test".to_string(),
            webhook_signing_secret: "whsec_test".to_string(),
            sandbox_mode: true,
        });
        let gateway = Arc::new(FakeProcessorGateway::new());

        let ingress = WebhookIngress::new(webhooks, tenant_config, gateway, handlers, events);
        (ingress, subscriptions)
    }

    #[tokio::test]
    async fn missing_signature_header_is_rejected() {
        let (ingress, _) = ingress_with_handlers();
        let err = ingress
            .ingest("tenant-a", "evt_1", "subscription.updated", b"{}", None, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let (ingress, _) = ingress_with_handlers();
        let body = br#"{"processor_subscription_id":"sub_1","status":"active"}"#;
        let err = ingress
            .ingest("tenant-a", "evt_1", "subscription.updated", body, Some("deadbeef"), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn duplicate_event_id_is_not_reprocessed() {
        let (ingress, subscriptions) = ingress_with_handlers();
        let now = Utc::now();
        subscriptions
            .insert(Subscription {
                id: Uuid::new_v4(),
                app_id: "tenant-a".to_string(),
                customer_id: Uuid::new_v4(),
                processor_id: Some("sub_1".to_string()),
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
            })
            .await
            .unwrap();

        let payload = json!({"processor_subscription_id": "sub_1", "status": "past_due"});
        let body = serde_json::to_vec(&payload).unwrap();
        let signature = compute_hmac_signature("whsec_test", &body);

        let first = ingress
            .ingest("tenant-a", "evt_1", "subscription.updated", &body, Some(&signature), payload.clone())
            .await
            .unwrap();
        assert!(!first.duplicate);

        let second = ingress
            .ingest("tenant-a", "evt_1", "subscription.updated", &body, Some(&signature), payload)
            .await
            .unwrap();
        assert!(second.duplicate);
    }

    #[test]
    fn unknown_event_type_classifies_non_retriable() {
        let err = Error::validation("unknown_event_type");
        assert_eq!(classify_webhook_error(&err), "unknown_event_type");
        assert!(crate::models::is_non_retriable(classify_webhook_error(&err)));
    }

    #[test]
    fn closed_period_classifies_non_retriable() {
        let err = Error::conflict("closed_period");
        assert_eq!(classify_webhook_error(&err), "closed_period");
        assert!(crate::models::is_non_retriable(classify_webhook_error(&err)));
    }
}
