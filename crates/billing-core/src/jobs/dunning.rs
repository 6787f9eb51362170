//! Dunning Controller (SPEC_FULL §4.11): a single `run()` entry point
//! returning a counted report, walking customers in a failed-payment
//! state through grace period and access-state transitions.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::event_log::{system_event, EventLog};
use crate::models::{Customer, DunningAction};
use crate::repository::{CustomerRepository, DunningConfigRepository};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DunningRunReport {
    pub job_id: Uuid,
    pub due: usize,
    pub advanced: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

pub struct DunningController {
    customers: Arc<dyn CustomerRepository>,
    dunning_config: Arc<dyn DunningConfigRepository>,
    events: Arc<EventLog>,
}

impl DunningController {
    pub fn new(
        customers: Arc<dyn CustomerRepository>,
        dunning_config: Arc<dyn DunningConfigRepository>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            customers,
            dunning_config,
            events,
        }
    }

    /// Finds every customer whose `grace_period_end` has passed and
    /// advances each to its next dunning stage. Never touches
    /// subscription status — only `dunning_stage`/`next_retry_at` on the
    /// customer.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<DunningRunReport> {
        let due = self.customers.list_delinquent_past_grace(now).await?;
        let mut report = DunningRunReport {
            job_id: Uuid::new_v4(),
            due: due.len(),
            ..Default::default()
        };

        for customer in due {
            let customer_id = customer.id;
            match self.advance_one(customer, now).await {
                Ok(true) => report.advanced += 1,
                Ok(false) => report.skipped += 1,
                Err(err) => {
                    warn!(customer_id = %customer_id, error = %err, "dunning advance failed");
                    report.errors.push(format!("{customer_id}: {err}"));
                }
            }
        }

        Ok(report)
    }

    /// Returns `Ok(true)` if the customer advanced a stage, `Ok(false)`
    /// if there was no tenant dunning config or no further stage to
    /// advance to.
    async fn advance_one(&self, customer: Customer, now: DateTime<Utc>) -> Result<bool> {
        let config = match self.dunning_config.find(&customer.app_id).await? {
            Some(c) => c,
            None => return Ok(false),
        };
        let stage = match config.stage_after(customer.dunning_stage) {
            Some(s) => s.clone(),
            None => return Ok(false),
        };

        let mut updated = customer.clone();
        updated.dunning_stage = stage.stage_number;
        updated.next_retry_at = config
            .stage_after(stage.stage_number)
            .map(|next| now + Duration::days(next.wait_days as i64));
        updated.updated_at = now;
        self.customers.update(updated).await?;

        self.events.append_async(system_event(
            &customer.app_id,
            &format!("dunning.{}", action_event_suffix(stage.action)),
            "customer",
            &customer.id.to_string(),
            serde_json::json!({"stage": stage.stage_number}),
        ));

        Ok(true)
    }
}

fn action_event_suffix(action: DunningAction) -> &'static str {
    match action {
        DunningAction::RetryPayment => "retry_payment",
        DunningAction::SendNotice => "send_notice",
        DunningAction::CancelSubscription => "cancel_subscription",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomerStatus, DunningConfig, DunningStage};
    use crate::repository::{InMemoryCustomerRepository, InMemoryDunningConfigRepository, InMemoryEventRepository};

    fn seed_customer(app_id: &str, grace_period_end: DateTime<Utc>) -> Customer {
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
            delinquent_since: Some(now - Duration::days(5)),
            grace_period_end: Some(grace_period_end),
            dunning_stage: 0,
            next_retry_at: None,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    fn controller() -> (DunningController, Arc<InMemoryCustomerRepository>, Arc<InMemoryDunningConfigRepository>) {
        let customers = Arc::new(InMemoryCustomerRepository::default());
        let dunning_config = Arc::new(InMemoryDunningConfigRepository::default());
        let events = Arc::new(EventLog::new(Arc::new(InMemoryEventRepository::default())));
        let controller = DunningController::new(customers.clone(), dunning_config.clone(), events);
        (controller, customers, dunning_config)
    }

    #[tokio::test]
    async fn advances_past_grace_customer_to_first_stage() {
        let (controller, customers, dunning_config) = controller();
        let now = Utc::now();
        let customer = customers.insert_pending(seed_customer("tenant-a", now - Duration::days(1))).await.unwrap();
        dunning_config.seed(DunningConfig {
            app_id: "tenant-a".to_string(),
            grace_days: 3,
            max_retry_attempts: 4,
            stages: vec![DunningStage {
                app_id: "tenant-a".to_string(),
                stage_number: 1,
                wait_days: 2,
                action: DunningAction::RetryPayment,
            }],
        });

        let report = controller.run(now).await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.advanced, 1);

        let updated = customers.find_by_id("tenant-a", customer.id).await.unwrap().unwrap();
        assert_eq!(updated.dunning_stage, 1);
    }

    #[tokio::test]
    async fn customer_with_no_tenant_config_is_skipped() {
        let (controller, customers, _) = controller();
        let now = Utc::now();
        customers.insert_pending(seed_customer("tenant-b", now - Duration::days(1))).await.unwrap();

        let report = controller.run(now).await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.skipped, 1);
    }
}
