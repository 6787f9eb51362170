//! Tokenized payment methods (SPEC_FULL §3). Never stores PAN/CVV/routing
//! numbers — only the processor's token plus display metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "payment_method_type", rename_all = "snake_case")]
pub enum PaymentMethodType {
    Card,
    AchDebit,
    EftDebit,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub app_id: String,
    pub customer_id: Uuid,
    pub processor_id: String,
    pub method_type: PaymentMethodType,
    /// Masked display metadata only: last4, brand, exp_month/year — never raw card data.
    pub display_metadata: serde_json::Value,
    pub is_default: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachPaymentMethodRequest {
    pub app_id: String,
    pub customer_id: Uuid,
    /// Token returned by the processor's hosted fields; never a raw PAN.
    pub processor_token: String,
    pub method_type: PaymentMethodType,
    pub display_metadata: serde_json::Value,
    pub set_default: bool,
}
