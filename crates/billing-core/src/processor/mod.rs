//! Processor Gateway (SPEC_FULL §4.4): the only seam between this crate
//! and the outside payment processor. One async-fn trait per concern
//! returning typed records, narrowed to the tokenized-only surface this
//! system requires — there is no `CardDetails` variant anywhere in this
//! crate; a raw PAN/CVV never has a Rust type here, it is simply not
//! representable.

pub mod fake;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct CreateCustomerRequest {
    pub account_id: String,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ProcessorCustomer {
    pub processor_id: String,
}

#[derive(Debug, Clone)]
pub struct AttachPaymentMethodRequest {
    pub account_id: String,
    pub processor_customer_id: String,
    /// Token minted by the processor's hosted fields/SDK — never a PAN.
    pub processor_token: String,
}

#[derive(Debug, Clone)]
pub struct ProcessorPaymentMethod {
    pub processor_id: String,
}

#[derive(Debug, Clone)]
pub struct CreateSubscriptionRequest {
    pub account_id: String,
    pub processor_customer_id: String,
    pub processor_payment_method_id: String,
    pub plan_id: String,
    pub price_cents: i64,
    pub currency: String,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct ProcessorSubscription {
    pub processor_id: String,
}

#[derive(Debug, Clone)]
pub struct CreateChargeRequest {
    pub account_id: String,
    pub processor_customer_id: String,
    pub processor_payment_method_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub reference_id: String,
}

#[derive(Debug, Clone)]
pub struct ProcessorCharge {
    pub processor_id: String,
    pub succeeded: bool,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateRefundRequest {
    pub account_id: String,
    pub processor_charge_id: String,
    pub amount_cents: i64,
}

#[derive(Debug, Clone)]
pub struct ProcessorRefund {
    pub processor_id: String,
    pub succeeded: bool,
}

/// The narrow, tokenized-only surface the Customer Lifecycle, Subscription
/// Engine, and Charge & Refund Engine call through. Every method is
/// idempotent from the caller's perspective in the sense that the engines
/// above this trait, not the trait itself, own retry/reconciliation.
#[async_trait]
pub trait ProcessorGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_customer(&self, request: CreateCustomerRequest) -> Result<ProcessorCustomer>;
    async fn update_customer_email(&self, account_id: &str, processor_customer_id: &str, email: &str) -> Result<()>;

    async fn attach_payment_method(&self, request: AttachPaymentMethodRequest) -> Result<ProcessorPaymentMethod>;
    async fn set_default_payment_method(
        &self,
        account_id: &str,
        processor_customer_id: &str,
        processor_payment_method_id: &str,
    ) -> Result<()>;

    async fn create_subscription(&self, request: CreateSubscriptionRequest) -> Result<ProcessorSubscription>;
    async fn cancel_subscription(&self, account_id: &str, processor_subscription_id: &str, at_period_end: bool) -> Result<()>;
    async fn update_subscription_price(
        &self,
        account_id: &str,
        processor_subscription_id: &str,
        price_cents: i64,
        quantity: i32,
    ) -> Result<()>;

    async fn create_charge(&self, request: CreateChargeRequest) -> Result<ProcessorCharge>;
    async fn create_refund(&self, request: CreateRefundRequest) -> Result<ProcessorRefund>;

    /// Verifies an inbound webhook's HMAC-SHA256 signature against the
    /// tenant's signing secret (SPEC_FULL §4.9). Returns `Ok(())` on a
    /// valid signature, `Err(Error::Validation)` otherwise.
    fn verify_webhook_signature(&self, signing_secret: &str, raw_body: &[u8], signature_header: &str) -> Result<()>;
}

/// Computes the processor's expected `hex(hmac_sha256(secret, body))`
/// signature. Shared by every `ProcessorGateway` implementation so the
/// verification logic lives in one place regardless of which concrete
/// processor is configured.
pub fn compute_hmac_signature(signing_secret: &str, raw_body: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut mac = Hmac::<Sha256>::new_from_slice(signing_secret.as_bytes())
        .expect("HMAC accepts a key of any length");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies via `Mac::verify_slice`, which compares in constant time so
/// signature checks don't leak timing information about how many leading
/// bytes matched.
pub fn verify_hmac_signature(signing_secret: &str, raw_body: &[u8], signature_header: &str) -> Result<()> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let decoded = hex::decode(signature_header)
        .map_err(|_| crate::error::Error::validation("Webhook signature is not valid hex"))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(signing_secret.as_bytes())
        .expect("HMAC accepts a key of any length");
    mac.update(raw_body);
    mac.verify_slice(&decoded)
        .map_err(|_| crate::error::Error::validation("Webhook signature verification failed"))
}

/// Resolves which [`ProcessorGateway`] a tenant's traffic should go
/// through (SPEC_FULL §9 Open Question: a single shared processor account
/// doesn't fit every deployment). Separated from `TenantConfigRepository`
/// because the credentials a gateway needs and the gateway implementation
/// itself vary independently — two tenants on the same processor account
/// still share one `ProcessorGateway` instance.
pub trait ProcessorGatewayFactory: Send + Sync {
    fn for_tenant(&self, app_id: &str) -> Arc<dyn ProcessorGateway>;
}

/// The only factory this crate ships: every tenant shares one gateway
/// instance. Per-tenant processor accounts (SPEC_FULL §9) are resolved by
/// `TenantConfigRepository::find` feeding that shared gateway's calls, not
/// by swapping the gateway itself — a real multi-processor deployment
/// would replace this with a factory keyed by `app_id`.
pub struct StaticProcessorGatewayFactory {
    gateway: Arc<dyn ProcessorGateway>,
}

impl StaticProcessorGatewayFactory {
    pub fn new(gateway: Arc<dyn ProcessorGateway>) -> Self {
        Self { gateway }
    }
}

impl ProcessorGatewayFactory for StaticProcessorGatewayFactory {
    fn for_tenant(&self, _app_id: &str) -> Arc<dyn ProcessorGateway> {
        self.gateway.clone()
    }
}

pub use fake::FakeProcessorGateway;
