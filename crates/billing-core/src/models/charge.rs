//! Charge entity (SPEC_FULL §3, §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "charge_type", rename_all = "snake_case")]
pub enum ChargeType {
    Subscription,
    OneTime,
    ProrationCharge,
    ProrationCredit,
    Usage,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "charge_status", rename_all = "snake_case")]
pub enum ChargeStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Charge {
    pub id: Uuid,
    pub app_id: String,
    pub customer_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub processor_id: Option<String>,
    pub charge_type: ChargeType,
    /// Minor units. Negative only permitted for `ProrationCredit`.
    pub amount_cents: i64,
    pub currency: String,
    pub status: ChargeStatus,
    pub reason: Option<String>,
    pub reference_id: String,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Charge {
    /// Invariant from SPEC_FULL §3: negative `amount_cents` only for proration credits.
    pub fn has_valid_amount_sign(&self) -> bool {
        if self.amount_cents < 0 {
            self.charge_type == ChargeType::ProrationCredit
        } else {
            true
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOneTimeChargeRequest {
    pub app_id: String,
    pub customer_external_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub reference_id: String,
    pub reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
}
