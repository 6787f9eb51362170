//! Job supervisor (SPEC_FULL §4.11, §4.12, REDESIGN FLAGS): owns the
//! dunning, renewal, retention, and webhook-retry jobs as tasks with a
//! fixed tick rather than ad hoc cron entries. A single in-process tick
//! loop (no external schedule store) since every job here is a
//! bounded-batch sweep over this crate's own repositories.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tracing::{error, info};

use super::{DunningController, RenewalJob, RetentionJob};
use crate::error::Result;
use crate::jobs::dunning::DunningRunReport;
use crate::jobs::renewal::RenewalRunReport;
use crate::jobs::retention::RetentionRunReport;
use crate::webhooks::WebhookIngress;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TickReport {
    pub dunning: DunningRunReport,
    pub renewal: RenewalRunReport,
    pub retention: RetentionRunReport,
    pub webhook_retries_replayed: usize,
}

pub struct JobSupervisor {
    dunning: Arc<DunningController>,
    renewal: Arc<RenewalJob>,
    retention: Arc<RetentionJob>,
    webhooks: Arc<WebhookIngress>,
    tenant_ids: Vec<String>,
    tick_interval: StdDuration,
    webhook_retry_batch: i64,
    running: Arc<AtomicBool>,
}

impl JobSupervisor {
    pub fn new(
        dunning: Arc<DunningController>,
        renewal: Arc<RenewalJob>,
        retention: Arc<RetentionJob>,
        webhooks: Arc<WebhookIngress>,
        tenant_ids: Vec<String>,
        tick_interval: StdDuration,
        webhook_retry_batch: i64,
    ) -> Self {
        Self {
            dunning,
            renewal,
            retention,
            webhooks,
            tenant_ids,
            tick_interval,
            webhook_retry_batch,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the tick loop. Each tick runs every job once, in sequence,
    /// and logs a warning (never panics the loop) if one fails — a failed
    /// tick does not cancel the schedule.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            info!(interval_ms = self.tick_interval.as_millis() as u64, "job supervisor started");
            let mut interval = tokio::time::interval(self.tick_interval);
            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(err) = self.run_now().await {
                    error!(error = %err, "job supervisor tick failed");
                }
            }
            info!("job supervisor stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Runs one tick immediately, independent of the scheduled loop. Used
    /// by tests and by an operator-triggered one-shot run.
    pub async fn run_now(&self) -> Result<TickReport> {
        let now = Utc::now();
        let dunning = self.dunning.run(now).await?;
        let renewal = self.renewal.run(now).await?;
        let retention = self.retention.run(&self.tenant_ids, now).await?;
        let webhook_retries_replayed = self.webhooks.process_due_retries(now, self.webhook_retry_batch).await?;

        Ok(TickReport {
            dunning,
            renewal,
            retention,
            webhook_retries_replayed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::FakeProcessorGateway;
    use crate::repository::{
        InMemoryCustomerRepository, InMemoryDunningConfigRepository, InMemoryEventRepository,
        InMemoryIdempotencyRepository, InMemoryInvoiceRepository, InMemorySubscriptionRepository,
        InMemoryTenantConfigRepository, InMemoryWebhookRepository,
    };
    use crate::event_log::EventLog;
    use crate::webhooks::WebhookHandlers;

    fn supervisor() -> Arc<JobSupervisor> {
        let customers = Arc::new(InMemoryCustomerRepository::default());
        let dunning_config = Arc::new(InMemoryDunningConfigRepository::default());
        let events = Arc::new(EventLog::new(Arc::new(InMemoryEventRepository::default())));
        let dunning = Arc::new(DunningController::new(customers.clone(), dunning_config.clone(), events.clone()));

        let subscriptions = Arc::new(InMemorySubscriptionRepository::default());
        let invoices = Arc::new(InMemoryInvoiceRepository::default());
        let renewal = Arc::new(RenewalJob::new(subscriptions.clone(), invoices, chrono::Duration::days(3)));

        let webhook_repo = Arc::new(InMemoryWebhookRepository::default());
        let idempotency = Arc::new(InMemoryIdempotencyRepository::default());
        let retention = Arc::new(RetentionJob::new(
            Arc::new(InMemoryEventRepository::default()),
            webhook_repo.clone(),
            idempotency,
            chrono::Duration::days(90),
        ));

        let gateway = Arc::new(FakeProcessorGateway::new());
        let tenant_config = Arc::new(InMemoryTenantConfigRepository::default());
        let handlers = Arc::new(WebhookHandlers::new(
            subscriptions,
            customers,
            Arc::new(crate::repository::InMemoryChargeRepository::default()),
            Arc::new(crate::repository::InMemoryRefundRepository::default()),
            Arc::new(crate::repository::InMemoryDisputeRepository::default()),
            dunning_config,
            3,
            events.clone(),
        ));
        let webhooks = Arc::new(WebhookIngress::new(
            webhook_repo,
            tenant_config,
            gateway,
            handlers,
            events,
        ));

        Arc::new(JobSupervisor::new(
            dunning,
            renewal,
            retention,
            webhooks,
            vec!["tenant-a".to_string()],
            StdDuration::from_secs(60),
            100,
        ))
    }

    #[tokio::test]
    async fn run_now_executes_every_job_without_error() {
        let supervisor = supervisor();
        let report = supervisor.run_now().await.unwrap();
        assert_eq!(report.dunning.due, 0);
        assert_eq!(report.renewal.due, 0);
        assert_eq!(report.webhook_retries_replayed, 0);
    }

    #[tokio::test]
    async fn start_and_stop_toggle_running_flag() {
        let supervisor = supervisor();
        assert!(!supervisor.is_running());
        let handle = supervisor.clone().start();
        assert!(supervisor.is_running());
        supervisor.stop();
        handle.abort();
    }
}
