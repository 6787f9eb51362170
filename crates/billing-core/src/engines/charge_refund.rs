//! Charge & Refund Engine (SPEC_FULL §4.8). Both flows are local-first:
//! insert a pending row, call the processor, finalize — the same shape as
//! the Customer Lifecycle, and both are meant to run behind the
//! Idempotency Store rather than calling the processor on a bare retry.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    Charge, ChargeStatus, ChargeType, CreateOneTimeChargeRequest, CreateRefundRequest, Refund,
    RefundStatus,
};
use crate::processor::{self, ProcessorGateway};
use crate::repository::{ChargeRepository, CustomerRepository, PaymentMethodRepository, RefundRepository};

pub struct ChargeRefundEngine {
    charges: Arc<dyn ChargeRepository>,
    refunds: Arc<dyn RefundRepository>,
    customers: Arc<dyn CustomerRepository>,
    payment_methods: Arc<dyn PaymentMethodRepository>,
    gateway: Arc<dyn ProcessorGateway>,
}

impl ChargeRefundEngine {
    pub fn new(
        charges: Arc<dyn ChargeRepository>,
        refunds: Arc<dyn RefundRepository>,
        customers: Arc<dyn CustomerRepository>,
        payment_methods: Arc<dyn PaymentMethodRepository>,
        gateway: Arc<dyn ProcessorGateway>,
    ) -> Self {
        Self {
            charges,
            refunds,
            customers,
            payment_methods,
            gateway,
        }
    }

    /// SPEC_FULL §4.8: resolve customer by external id, require a default
    /// payment method, insert pending, call the processor, finalize.
    pub async fn create_one_time_charge(&self, request: CreateOneTimeChargeRequest) -> Result<Charge> {
        let customer = self
            .customers
            .find_by_external_id(&request.app_id, &request.customer_external_id)
            .await?
            .ok_or_else(|| Error::not_found("Customer not found"))?;

        let payment_method = self
            .payment_methods
            .find_default(&request.app_id, customer.id)
            .await?
            .ok_or_else(|| Error::conflict("Customer has no default payment method"))?;

        let now = Utc::now();
        let pending = Charge {
            id: Uuid::new_v4(),
            app_id: request.app_id.clone(),
            customer_id: customer.id,
            subscription_id: None,
            processor_id: None,
            charge_type: ChargeType::OneTime,
            amount_cents: request.amount_cents,
            currency: request.currency.clone(),
            status: ChargeStatus::Pending,
            reason: request.reason.clone(),
            reference_id: request.reference_id.clone(),
            failure_code: None,
            failure_message: None,
            metadata: request.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
            created_at: now,
            updated_at: now,
        };
        let pending = self.charges.insert(pending).await?;

        let customer_processor_id = customer
            .processor_id
            .clone()
            .ok_or_else(|| Error::conflict("Customer is not yet confirmed with the processor"))?;

        let result = self
            .gateway
            .create_charge(processor::CreateChargeRequest {
                account_id: request.app_id.clone(),
                processor_customer_id: customer_processor_id,
                processor_payment_method_id: payment_method.processor_id.clone(),
                amount_cents: request.amount_cents,
                currency: request.currency.clone(),
                reference_id: request.reference_id.clone(),
            })
            .await?;

        let mut finalized = pending;
        finalized.processor_id = Some(result.processor_id);
        finalized.status = if result.succeeded { ChargeStatus::Succeeded } else { ChargeStatus::Failed };
        finalized.failure_code = result.failure_code;
        finalized.failure_message = result.failure_message;
        finalized.updated_at = Utc::now();
        self.charges.update(finalized).await
    }

    /// SPEC_FULL §4.8: the charge must be resolved by `(id, app_id)` — a
    /// cross-tenant lookup is a `NotFound`, not a `Forbidden`, so a probing
    /// client learns nothing about whether the id exists elsewhere.
    pub async fn create_refund(&self, request: CreateRefundRequest) -> Result<Refund> {
        let charge = self
            .charges
            .find_by_id(&request.app_id, request.charge_id)
            .await?
            .ok_or_else(|| Error::not_found("Charge not found"))?;

        if charge.status != ChargeStatus::Succeeded {
            return Err(Error::conflict("Charge is not in a refundable state"));
        }

        let already_refunded: i64 = self
            .refunds
            .list_successful_for_charge(&request.app_id, charge.id)
            .await?
            .into_iter()
            .map(|r| r.amount_cents)
            .sum();

        if request.amount_cents > charge.amount_cents - already_refunded {
            return Err(Error::conflict("Refund amount exceeds the charge's refundable balance"));
        }

        let now = Utc::now();
        let pending = Refund {
            id: Uuid::new_v4(),
            app_id: request.app_id.clone(),
            charge_id: charge.id,
            processor_id: None,
            amount_cents: request.amount_cents,
            status: RefundStatus::Pending,
            reason: request.reason.clone(),
            reference_id: request.reference_id.clone(),
            created_at: now,
            updated_at: now,
        };
        let pending = self.refunds.insert(pending).await?;

        let processor_charge_id = charge
            .processor_id
            .clone()
            .ok_or_else(|| Error::conflict("Charge has no processor reference to refund"))?;

        let result = self
            .gateway
            .create_refund(processor::CreateRefundRequest {
                account_id: request.app_id.clone(),
                processor_charge_id,
                amount_cents: request.amount_cents,
            })
            .await?;

        let mut finalized = pending;
        finalized.processor_id = Some(result.processor_id);
        finalized.status = if result.succeeded { RefundStatus::Succeeded } else { RefundStatus::Failed };
        finalized.updated_at = Utc::now();
        self.refunds.update(finalized).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Customer, CustomerStatus, PaymentMethod, PaymentMethodType};
    use crate::processor::FakeProcessorGateway;
    use crate::repository::{
        InMemoryChargeRepository, InMemoryCustomerRepository, InMemoryPaymentMethodRepository,
        InMemoryRefundRepository,
    };

    async fn seeded_engine() -> (ChargeRefundEngine, Uuid) {
        let customers = Arc::new(InMemoryCustomerRepository::default());
        let payment_methods = Arc::new(InMemoryPaymentMethodRepository::default());
        let charges = Arc::new(InMemoryChargeRepository::default());
        let refunds = Arc::new(InMemoryRefundRepository::default());
        let gateway = Arc::new(FakeProcessorGateway::new());

        let now = Utc::now();
        let customer = Customer {
            id: Uuid::new_v4(),
            app_id: "tenant-a".to_string(),
            external_id: Some("cust-ext-1".to_string()),
            processor_id: Some("cus_seed".to_string()),
            status: CustomerStatus::Active,
            email: "a@example.com".to_string(),
            name: "A".to_string(),
            default_payment_method_id: None,
            delinquent_since: None,
            grace_period_end: None,
            dunning_stage: 0,
            next_retry_at: None,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };
        let customer = customers.insert_pending(customer).await.unwrap();

        payment_methods
            .insert(PaymentMethod {
                id: Uuid::new_v4(),
                app_id: "tenant-a".to_string(),
                customer_id: customer.id,
                processor_id: "pm_seed".to_string(),
                method_type: PaymentMethodType::Card,
                display_metadata: serde_json::json!({"last4": "4242"}),
                is_default: true,
                deleted_at: None,
                created_at: now,
            })
            .await
            .unwrap();

        let engine = ChargeRefundEngine::new(charges, refunds, customers, payment_methods, gateway);
        (engine, customer.id)
    }

    #[tokio::test]
    async fn one_time_charge_succeeds_with_default_payment_method() {
        let (engine, _customer_id) = seeded_engine().await;
        let charge = engine
            .create_one_time_charge(CreateOneTimeChargeRequest {
                app_id: "tenant-a".to_string(),
                customer_external_id: "cust-ext-1".to_string(),
                amount_cents: 3500,
                currency: "usd".to_string(),
                reference_id: "r-1".to_string(),
                reason: None,
                metadata: None,
            })
            .await
            .unwrap();

        assert_eq!(charge.status, ChargeStatus::Succeeded);
        assert!(charge.processor_id.is_some());
    }

    #[tokio::test]
    async fn refund_exceeding_charge_is_conflict() {
        let (engine, _customer_id) = seeded_engine().await;
        let charge = engine
            .create_one_time_charge(CreateOneTimeChargeRequest {
                app_id: "tenant-a".to_string(),
                customer_external_id: "cust-ext-1".to_string(),
                amount_cents: 1000,
                currency: "usd".to_string(),
                reference_id: "r-2".to_string(),
                reason: None,
                metadata: None,
            })
            .await
            .unwrap();

        let err = engine
            .create_refund(CreateRefundRequest {
                app_id: "tenant-a".to_string(),
                charge_id: charge.id,
                amount_cents: 1200,
                reference_id: "ref-1".to_string(),
                reason: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn refund_within_bound_succeeds() {
        let (engine, _customer_id) = seeded_engine().await;
        let charge = engine
            .create_one_time_charge(CreateOneTimeChargeRequest {
                app_id: "tenant-a".to_string(),
                customer_external_id: "cust-ext-1".to_string(),
                amount_cents: 1000,
                currency: "usd".to_string(),
                reference_id: "r-3".to_string(),
                reason: None,
                metadata: None,
            })
            .await
            .unwrap();

        let refund = engine
            .create_refund(CreateRefundRequest {
                app_id: "tenant-a".to_string(),
                charge_id: charge.id,
                amount_cents: 1000,
                reference_id: "ref-2".to_string(),
                reason: None,
            })
            .await
            .unwrap();

        assert_eq!(refund.status, RefundStatus::Succeeded);
    }

    #[tokio::test]
    async fn cross_tenant_charge_lookup_is_not_found() {
        let (engine, _customer_id) = seeded_engine().await;
        let charge = engine
            .create_one_time_charge(CreateOneTimeChargeRequest {
                app_id: "tenant-a".to_string(),
                customer_external_id: "cust-ext-1".to_string(),
                amount_cents: 1000,
                currency: "usd".to_string(),
                reference_id: "r-4".to_string(),
                reason: None,
                metadata: None,
            })
            .await
            .unwrap();

        let err = engine
            .create_refund(CreateRefundRequest {
                app_id: "tenant-b".to_string(),
                charge_id: charge.id,
                amount_cents: 100,
                reference_id: "ref-3".to_string(),
                reason: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 404);
    }
}
