//! In-process test double for [`ProcessorGateway`], used by engine unit
//! tests so they never reach across the network. Deterministic and
//! configurable just enough to drive the failure paths the engines need
//! to exercise (declined charge, failed refund).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::*;
use crate::error::Result;

pub struct FakeProcessorGateway {
    counter: AtomicU64,
    /// Reference ids the fake should decline, set up by a test before the
    /// call it wants to fail.
    declines: Mutex<std::collections::HashSet<String>>,
}

impl Default for FakeProcessorGateway {
    fn default() -> Self {
        Self {
            counter: AtomicU64::new(1),
            declines: Mutex::new(std::collections::HashSet::new()),
        }
    }
}

impl FakeProcessorGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decline_reference(&self, reference_id: &str) {
        self.declines.lock().unwrap().insert(reference_id.to_string());
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}_{n}")
    }
}

#[async_trait]
impl ProcessorGateway for FakeProcessorGateway {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn create_customer(&self, _request: CreateCustomerRequest) -> Result<ProcessorCustomer> {
        Ok(ProcessorCustomer {
            processor_id: self.next_id("cus"),
        })
    }

    async fn update_customer_email(&self, _account_id: &str, _processor_customer_id: &str, _email: &str) -> Result<()> {
        Ok(())
    }

    async fn attach_payment_method(&self, _request: AttachPaymentMethodRequest) -> Result<ProcessorPaymentMethod> {
        Ok(ProcessorPaymentMethod {
            processor_id: self.next_id("pm"),
        })
    }

    async fn set_default_payment_method(
        &self,
        _account_id: &str,
        _processor_customer_id: &str,
        _processor_payment_method_id: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn create_subscription(&self, _request: CreateSubscriptionRequest) -> Result<ProcessorSubscription> {
        Ok(ProcessorSubscription {
            processor_id: self.next_id("sub"),
        })
    }

    async fn cancel_subscription(&self, _account_id: &str, _processor_subscription_id: &str, _at_period_end: bool) -> Result<()> {
        Ok(())
    }

    async fn update_subscription_price(
        &self,
        _account_id: &str,
        _processor_subscription_id: &str,
        _price_cents: i64,
        _quantity: i32,
    ) -> Result<()> {
        Ok(())
    }

    async fn create_charge(&self, request: CreateChargeRequest) -> Result<ProcessorCharge> {
        if self.declines.lock().unwrap().contains(&request.reference_id) {
            return Ok(ProcessorCharge {
                processor_id: self.next_id("ch"),
                succeeded: false,
                failure_code: Some("card_declined".to_string()),
                failure_message: Some("The card was declined".to_string()),
            });
        }
        Ok(ProcessorCharge {
            processor_id: self.next_id("ch"),
            succeeded: true,
            failure_code: None,
            failure_message: None,
        })
    }

    async fn create_refund(&self, request: CreateRefundRequest) -> Result<ProcessorRefund> {
        if self.declines.lock().unwrap().contains(&request.processor_charge_id) {
            return Ok(ProcessorRefund {
                processor_id: self.next_id("re"),
                succeeded: false,
            });
        }
        Ok(ProcessorRefund {
            processor_id: self.next_id("re"),
            succeeded: true,
        })
    }

    fn verify_webhook_signature(&self, signing_secret: &str, raw_body: &[u8], signature_header: &str) -> Result<()> {
        verify_hmac_signature(signing_secret, raw_body, signature_header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_charge_succeeds_by_default() {
        let gateway = FakeProcessorGateway::new();
        let result = gateway
            .create_charge(CreateChargeRequest {
                account_id: "acct_1".to_string(),
                processor_customer_id: "cus_1".to_string(),
                processor_payment_method_id: "pm_1".to_string(),
                amount_cents: 500,
                currency: "usd".to_string(),
                reference_id: "ref_1".to_string(),
            })
            .await
            .unwrap();
        assert!(result.succeeded);
    }

    #[tokio::test]
    async fn create_charge_declines_when_configured() {
        let gateway = FakeProcessorGateway::new();
        gateway.decline_reference("ref_2");
        let result = gateway
            .create_charge(CreateChargeRequest {
                account_id: "acct_1".to_string(),
                processor_customer_id: "cus_1".to_string(),
                processor_payment_method_id: "pm_1".to_string(),
                amount_cents: 500,
                currency: "usd".to_string(),
                reference_id: "ref_2".to_string(),
            })
            .await
            .unwrap();
        assert!(!result.succeeded);
        assert_eq!(result.failure_code.as_deref(), Some("card_declined"));
    }

    #[test]
    fn hmac_signature_round_trips() {
        let secret = "whsec_test";
        let body = b"{\"type\":\"charge.succeeded\"}";
        let signature = compute_hmac_signature(secret, body);
        assert!(verify_hmac_signature(secret, body, &signature).is_ok());
        assert!(verify_hmac_signature(secret, body, "deadbeef").is_err());
    }
}
