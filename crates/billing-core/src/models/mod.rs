pub mod charge;
pub mod customer;
pub mod dispute;
pub mod dunning;
pub mod event;
pub mod gl;
pub mod idempotency;
pub mod invoice;
pub mod payment_method;
pub mod refund;
pub mod subscription;
pub mod webhook;

pub use charge::{Charge, ChargeStatus, ChargeType, CreateOneTimeChargeRequest};
pub use customer::{Customer, CustomerStatus, CreateCustomerRequest, UpdateCustomerRequest};
pub use dispute::{Dispute, DisputeStatus};
pub use dunning::{DunningAction, DunningConfig, DunningSettings, DunningStage};
pub use event::{Event, EventSource, NewEvent};
pub use gl::{
    AccountingPeriod, FailedGlEvent, JournalEntry, JournalLine, NewJournalEntry, NewJournalLine,
    PeriodSummarySnapshot,
};
pub use idempotency::{IdempotencyRecord, DEFAULT_TTL_HOURS};
pub use invoice::{Invoice, InvoiceStatus, LineItem, LineItemType, NewInvoice, NewLineItem};
pub use payment_method::{AttachPaymentMethodRequest, PaymentMethod, PaymentMethodType};
pub use refund::{CreateRefundRequest, Refund, RefundStatus};
pub use subscription::{
    CancelSubscriptionRequest, CancellationMode, CreateSubscriptionRequest, CycleChangeResult,
    IntervalUnit, Subscription, SubscriptionStatus,
};
pub use webhook::{
    backoff_for_attempt, is_non_retriable, WebhookAttempt, WebhookAttemptStatus, WebhookRecord,
    WebhookStatus, MAX_WEBHOOK_ATTEMPTS, RETRY_BACKOFF_SECONDS,
};
