//! Webhook Ingress and Handlers (SPEC_FULL §4.9, §4.10).

pub mod handlers;
pub mod ingress;
pub mod retry;

pub use handlers::WebhookHandlers;
pub use ingress::{classify_webhook_error, IngestOutcome, WebhookIngress};
pub use retry::{RetryController, RetryDecision};
