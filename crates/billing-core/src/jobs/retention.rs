//! Data retention job (SPEC_FULL §4.12): purges append-only tables past
//! each tenant's retention window. There is no tenant registry in this
//! crate, so the caller (the supervisor, or an operator CLI command)
//! supplies the tenant list explicitly rather than this job discovering
//! it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::repository::{EventRepository, IdempotencyRepository, WebhookRepository};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RetentionRunReport {
    pub job_id: Uuid,
    pub events_purged: u64,
    pub webhooks_purged: u64,
    pub idempotency_purged: u64,
    pub errors: Vec<String>,
}

pub struct RetentionJob {
    events: Arc<dyn EventRepository>,
    webhooks: Arc<dyn WebhookRepository>,
    idempotency: Arc<dyn IdempotencyRepository>,
    retention: chrono::Duration,
}

impl RetentionJob {
    pub fn new(
        events: Arc<dyn EventRepository>,
        webhooks: Arc<dyn WebhookRepository>,
        idempotency: Arc<dyn IdempotencyRepository>,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            events,
            webhooks,
            idempotency,
            retention,
        }
    }

    /// Idempotency keys carry their own `expires_at` (SPEC_FULL §3: "TTL,
    /// typically 24h") and are purged globally; events and webhooks are
    /// append-only per tenant and purged per `app_ids` against the same
    /// retention window.
    pub async fn run(&self, app_ids: &[String], now: DateTime<Utc>) -> Result<RetentionRunReport> {
        let mut report = RetentionRunReport {
            job_id: Uuid::new_v4(),
            ..Default::default()
        };
        let cutoff = now - self.retention;

        for app_id in app_ids {
            match self.events.purge_older_than(app_id, cutoff).await {
                Ok(n) => report.events_purged += n,
                Err(err) => {
                    warn!(app_id = %app_id, error = %err, "event retention purge failed");
                    report.errors.push(format!("events/{app_id}: {err}"));
                }
            }

            match self.webhooks.purge_older_than(app_id, cutoff).await {
                Ok(n) => report.webhooks_purged += n,
                Err(err) => {
                    warn!(app_id = %app_id, error = %err, "webhook retention purge failed");
                    report.errors.push(format!("webhooks/{app_id}: {err}"));
                }
            }
        }

        match self.idempotency.purge_expired_before(now).await {
            Ok(n) => report.idempotency_purged = n,
            Err(err) => {
                warn!(error = %err, "idempotency retention purge failed");
                report.errors.push(format!("idempotency: {err}"));
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Event, EventSource, IdempotencyRecord};
    use crate::repository::{InMemoryEventRepository, InMemoryIdempotencyRepository, InMemoryWebhookRepository};

    #[tokio::test]
    async fn purges_events_past_the_retention_window_only_for_named_tenants() {
        let events = Arc::new(InMemoryEventRepository::default());
        let webhooks = Arc::new(InMemoryWebhookRepository::default());
        let idempotency = Arc::new(InMemoryIdempotencyRepository::default());
        let now = Utc::now();

        events
            .append(Event {
                id: Uuid::new_v4(),
                app_id: "tenant-a".to_string(),
                event_type: "customer.created".to_string(),
                source: EventSource::System,
                entity_type: "customer".to_string(),
                entity_id: Uuid::new_v4().to_string(),
                payload: serde_json::json!({}),
                created_at: now - chrono::Duration::days(120),
            })
            .await
            .unwrap();
        events
            .append(Event {
                id: Uuid::new_v4(),
                app_id: "tenant-b".to_string(),
                event_type: "customer.created".to_string(),
                source: EventSource::System,
                entity_type: "customer".to_string(),
                entity_id: Uuid::new_v4().to_string(),
                payload: serde_json::json!({}),
                created_at: now - chrono::Duration::days(120),
            })
            .await
            .unwrap();

        let job = RetentionJob::new(events.clone(), webhooks, idempotency, chrono::Duration::days(90));
        let report = job.run(&["tenant-a".to_string()], now).await.unwrap();

        // Only tenant-a was named, so tenant-b's equally old event survives.
        assert_eq!(report.events_purged, 1);
    }

    #[tokio::test]
    async fn purges_expired_idempotency_records() {
        let events = Arc::new(InMemoryEventRepository::default());
        let webhooks = Arc::new(InMemoryWebhookRepository::default());
        let idempotency = Arc::new(InMemoryIdempotencyRepository::default());
        let now = Utc::now();

        idempotency
            .insert(IdempotencyRecord {
                app_id: "tenant-a".to_string(),
                idempotency_key: "key-1".to_string(),
                request_hash: "hash".to_string(),
                status_code: 200,
                response_body: serde_json::json!({}),
                expires_at: now - chrono::Duration::hours(1),
                created_at: now - chrono::Duration::days(2),
            })
            .await
            .unwrap();

        let job = RetentionJob::new(events, webhooks, idempotency.clone(), chrono::Duration::days(90));
        let report = job.run(&[], now).await.unwrap();

        assert_eq!(report.idempotency_purged, 1);
        assert!(idempotency.find("tenant-a", "key-1").await.unwrap().is_none());
    }
}
