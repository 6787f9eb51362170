//! Customer Lifecycle (SPEC_FULL §4.5): local-first create with
//! pending -> active/failed reconciliation. A service-layer shape
//! (`Arc<Repository>`, validate-then-call) wrapped around the processor
//! round trip.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::event_log::{system_event, EventLog};
use crate::models::{Customer, CustomerStatus, CreateCustomerRequest};
use crate::processor::{self, ProcessorGateway};
use crate::repository::CustomerRepository;

pub struct CustomerLifecycle {
    customers: Arc<dyn CustomerRepository>,
    gateway: Arc<dyn ProcessorGateway>,
    events: Arc<EventLog>,
}

/// Result of retrying one stuck `pending` row during reconciliation.
#[derive(Debug, Clone)]
pub struct ReconciliationOutcome {
    pub customer_id: Uuid,
    pub became_active: bool,
}

impl CustomerLifecycle {
    pub fn new(customers: Arc<dyn CustomerRepository>, gateway: Arc<dyn ProcessorGateway>, events: Arc<EventLog>) -> Self {
        Self {
            customers,
            gateway,
            events,
        }
    }

    /// SPEC_FULL §4.5: insert pending, call the processor, finalize.
    /// The remote-first variant mentioned in spec.md's design notes is
    /// deliberately not implemented — it is documented as obsolete.
    pub async fn create_customer(&self, request: CreateCustomerRequest, account_id: &str) -> Result<Customer> {
        let now = Utc::now();
        let pending = Customer {
            id: Uuid::new_v4(),
            app_id: request.app_id.clone(),
            external_id: request.external_id.clone(),
            processor_id: None,
            status: CustomerStatus::Pending,
            email: request.email.clone(),
            name: request.name.clone(),
            default_payment_method_id: None,
            delinquent_since: None,
            grace_period_end: None,
            dunning_stage: 0,
            next_retry_at: None,
            metadata: request.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
            created_at: now,
            updated_at: now,
        };
        let pending = self.customers.insert_pending(pending).await?;

        let result = self
            .gateway
            .create_customer(processor::CreateCustomerRequest {
                account_id: account_id.to_string(),
                email: request.email.clone(),
                name: request.name.clone(),
            })
            .await;

        match result {
            Ok(processor_customer) => {
                let active = self
                    .customers
                    .mark_active(&request.app_id, pending.id, &processor_customer.processor_id)
                    .await?;

                self.events.append_async(system_event(
                    &request.app_id,
                    "customer.activated",
                    "customer",
                    &active.id.to_string(),
                    serde_json::json!({"processor_id": processor_customer.processor_id}),
                ));

                Ok(active)
            }
            Err(err) => {
                self.customers.mark_failed(&request.app_id, pending.id).await?;
                Err(err)
            }
        }
    }

    /// Supplemented per SPEC_FULL §4.5's rationale ("reconciliation
    /// tooling can retry pending rows"): finds local rows stuck in
    /// `pending` past `older_than` and retries the processor call for
    /// each, recording the outcome without raising on individual failure.
    pub async fn reconcile_pending(&self, app_id: &str, older_than: chrono::DateTime<Utc>) -> Result<Vec<ReconciliationOutcome>> {
        let stuck = self.customers.list_pending_older_than(app_id, older_than).await?;
        let mut outcomes = Vec::with_capacity(stuck.len());

        for customer in stuck {
            let result = self
                .gateway
                .create_customer(processor::CreateCustomerRequest {
                    account_id: app_id.to_string(),
                    email: customer.email.clone(),
                    name: customer.name.clone(),
                })
                .await;

            let became_active = match result {
                Ok(processor_customer) => {
                    self.customers
                        .mark_active(app_id, customer.id, &processor_customer.processor_id)
                        .await?;
                    true
                }
                Err(_) => {
                    self.customers.mark_failed(app_id, customer.id).await?;
                    false
                }
            };

            outcomes.push(ReconciliationOutcome {
                customer_id: customer.id,
                became_active,
            });
        }

        Ok(outcomes)
    }

    /// SPEC_FULL §4.10: webhook payment-failure handlers set this window;
    /// kept here so both the webhook handler and the dunning controller
    /// call a single source of truth for the grace-period math.
    pub fn grace_period_end(now: chrono::DateTime<Utc>, grace_days: i32) -> chrono::DateTime<Utc> {
        now + Duration::days(grace_days as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::FakeProcessorGateway;
    use crate::repository::{InMemoryCustomerRepository, InMemoryEventRepository};

    fn lifecycle() -> CustomerLifecycle {
        CustomerLifecycle::new(
            Arc::new(InMemoryCustomerRepository::default()),
            Arc::new(FakeProcessorGateway::new()),
            Arc::new(EventLog::new(Arc::new(InMemoryEventRepository::default()))),
        )
    }

    #[tokio::test]
    async fn create_customer_finishes_active_on_success() {
        let lifecycle = lifecycle();
        let customer = lifecycle
            .create_customer(
                CreateCustomerRequest {
                    app_id: "tenant-a".to_string(),
                    external_id: Some("ext-1".to_string()),
                    email: "a@example.com".to_string(),
                    name: "A".to_string(),
                    metadata: None,
                },
                "acct_1",
            )
            .await
            .unwrap();

        assert_eq!(customer.status, CustomerStatus::Active);
        assert!(customer.processor_id.is_some());
    }

    #[tokio::test]
    async fn duplicate_external_id_is_conflict() {
        let lifecycle = lifecycle();
        lifecycle
            .create_customer(
                CreateCustomerRequest {
                    app_id: "tenant-a".to_string(),
                    external_id: Some("ext-1".to_string()),
                    email: "a@example.com".to_string(),
                    name: "A".to_string(),
                    metadata: None,
                },
                "acct_1",
            )
            .await
            .unwrap();

        let err = lifecycle
            .create_customer(
                CreateCustomerRequest {
                    app_id: "tenant-a".to_string(),
                    external_id: Some("ext-1".to_string()),
                    email: "b@example.com".to_string(),
                    name: "B".to_string(),
                    metadata: None,
                },
                "acct_1",
            )
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 409);
    }
}
